//! 修复搜索错误类型
//!
//! 只有配置错误与不可恢复的 I/O 失败会终止整个搜索；单次试验失败、变异穷尽等
//! 都会被吸收为结果分类或布尔返回值，不会走到这里。

use thiserror::Error;

/// 搜索过程中可能出现的致命错误
#[derive(Error, Debug)]
pub enum RepairError {
    #[error("Config error: {0}")]
    Config(String),

    /// 原始工程一个变异位点都没有：基线必须至少允许一次变异
    #[error("Pristine project admits no mutation sites (individual {id}, generation {generation})")]
    NoMutationSites { generation: u32, id: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact store error: {0}")]
    Artifact(String),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl RepairError {
    /// 是否属于配置类错误（需要用户修正输入而不是重试）
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RepairError::Config(_) | RepairError::NoMutationSites { .. } | RepairError::ConfigLoad(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_flagged() {
        assert!(RepairError::Config("population is 0".into()).is_configuration());
        assert!(RepairError::NoMutationSites { generation: 1, id: 3 }.is_configuration());
        assert!(!RepairError::Artifact("missing".into()).is_configuration());
    }

    #[test]
    fn test_no_mutation_sites_message() {
        let err = RepairError::NoMutationSites { generation: 4, id: 2 };
        let msg = err.to_string();
        assert!(msg.contains("individual 2"));
        assert!(msg.contains("generation 4"));
    }
}
