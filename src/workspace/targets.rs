//! 噪声工具发现的共享变量
//!
//! 文件在第一次带噪声运行后才会出现，因此每批测试结束都尝试刷新；加载成功一次后不再读取。

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::workspace::TargetRefresher;

/// (类名, 变量名)
pub type SharedVar = (String, String);

pub struct SharedVarTargets {
    path: PathBuf,
    vars: RwLock<Option<Vec<SharedVar>>>,
}

impl SharedVarTargets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            vars: RwLock::new(None),
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.vars.read().await.is_some()
    }

    pub async fn shared_vars(&self) -> Vec<SharedVar> {
        self.vars.read().await.clone().unwrap_or_default()
    }
}

/// `package.Class.variable` -> (`Class`, `variable`)，重复项只保留一个
pub fn parse_shared_vars(content: &str) -> Vec<SharedVar> {
    let mut vars: Vec<SharedVar> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.rsplit('.');
        let (Some(var), Some(class)) = (parts.next(), parts.next()) else {
            continue;
        };
        if class.is_empty() || var.is_empty() {
            continue;
        }
        let pair = (class.to_string(), var.to_string());
        if !vars.contains(&pair) {
            vars.push(pair);
        }
    }
    vars
}

#[async_trait]
impl TargetRefresher for SharedVarTargets {
    async fn refresh(&self) {
        if self.is_loaded().await {
            return;
        }
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let vars = parse_shared_vars(&content);
                tracing::info!(count = vars.len(), path = %self.path.display(), "Loaded shared variables");
                *self.vars.write().await = Some(vars);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "Could not read shared variables: {}", e),
        }
    }
}
