//! 基于文件系统的变异体存储
//!
//! 目录布局：`<tmp>/<generation>/<id>/project`。所有整树复制都先写到同级的临时目录，
//! 成功后再替换目标，因此“重置到基线”不会留下半拷贝的工程。

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::config::ProjectSection;
use crate::core::{RepairError, Result};
use crate::workspace::{ArtifactRef, ArtifactStore, Baseline};

/// 各目录位置
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub pristine_dir: PathBuf,
    pub work_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn from_config(project: &ProjectSection) -> Self {
        Self {
            pristine_dir: project.pristine_dir.clone(),
            work_dir: project.work_dir.clone(),
            tmp_dir: project.tmp_dir.clone(),
            output_dir: project.output_dir.clone(),
        }
    }

    pub fn project_dir(&self, at: ArtifactRef) -> PathBuf {
        self.tmp_dir
            .join(at.generation.to_string())
            .join(at.id.to_string())
            .join("project")
    }
}

pub struct FsArtifactStore {
    layout: ArtifactLayout,
}

impl FsArtifactStore {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    fn baseline_dir(&self, at: ArtifactRef, baseline: Baseline) -> PathBuf {
        match baseline {
            Baseline::Pristine => self.layout.pristine_dir.clone(),
            Baseline::Previous => {
                if at.generation > 0 {
                    let previous = self.layout.project_dir(ArtifactRef::new(at.generation - 1, at.id));
                    if previous.is_dir() {
                        return previous;
                    }
                }
                self.layout.pristine_dir.clone()
            }
            Baseline::Generation(g) => self.layout.project_dir(ArtifactRef::new(g, at.id)),
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RepairError::Artifact(format!("filesystem task failed: {}", e)))?
        .map_err(RepairError::from)
}

/// 用 `src` 的内容替换 `dst`
fn replace_tree(src: &Path, dst: &Path) -> io::Result<()> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source project {} does not exist", src.display()),
        ));
    }
    let staging = staging_path(dst);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    copy_tree(src, &staging)?;
    if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    std::fs::rename(&staging, dst)
}

fn staging_path(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "project".into());
    name.push(".staging");
    dst.with_file_name(name)
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// 相对路径与内容按文件名排序后依次喂给 blake3
fn hash_tree(root: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&std::fs::read(entry.path())?);
        hasher.update(&[0]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn create_local(&self, at: ArtifactRef, baseline: Baseline) -> Result<()> {
        let src = self.baseline_dir(at, baseline);
        let dst = self.layout.project_dir(at);
        tracing::debug!(artifact = %at, from = %src.display(), "Creating local project");
        blocking(move || replace_tree(&src, &dst)).await
    }

    async fn copy(&self, from: ArtifactRef, to: ArtifactRef) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let src = self.layout.project_dir(from);
        let dst = self.layout.project_dir(to);
        tracing::debug!(%from, %to, "Copying local project");
        blocking(move || replace_tree(&src, &dst)).await
    }

    async fn stage(&self, at: ArtifactRef) -> Result<()> {
        let src = self.layout.project_dir(at);
        let dst = self.layout.work_dir.clone();
        blocking(move || replace_tree(&src, &dst)).await
    }

    async fn fingerprint(&self, at: ArtifactRef) -> Result<String> {
        let root = self.layout.project_dir(at);
        blocking(move || hash_tree(&root)).await
    }

    async fn prune(&self, at: ArtifactRef) -> Result<()> {
        let dir = self.layout.project_dir(at);
        blocking(move || {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            Ok(())
        })
        .await
    }

    async fn export(&self, at: ArtifactRef) -> Result<PathBuf> {
        let src = self.layout.project_dir(at);
        let dst = self.layout.output_dir.clone();
        let out = dst.clone();
        blocking(move || replace_tree(&src, &dst)).await?;
        tracing::info!(artifact = %at, output = %out.display(), "Exported project");
        Ok(out)
    }

    async fn cleanup(&self) -> Result<()> {
        let tmp = self.layout.tmp_dir.clone();
        blocking(move || {
            if tmp.exists() {
                std::fs::remove_dir_all(&tmp)?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let pristine = dir.path().join("input");
        std::fs::create_dir_all(pristine.join("src")).unwrap();
        std::fs::write(pristine.join("src/Account.java"), "class Account {}").unwrap();
        std::fs::write(pristine.join("build.xml"), "<project/>").unwrap();
        let layout = ArtifactLayout {
            pristine_dir: pristine,
            work_dir: dir.path().join("workarea"),
            tmp_dir: dir.path().join("tmp"),
            output_dir: dir.path().join("output"),
        };
        (dir, FsArtifactStore::new(layout))
    }

    #[tokio::test]
    async fn test_previous_falls_back_to_pristine() {
        let (_dir, store) = fixture();
        let at = ArtifactRef::new(1, 1);
        store.create_local(at, Baseline::Previous).await.unwrap();
        let copied = store.layout().project_dir(at).join("src/Account.java");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "class Account {}");
    }

    #[tokio::test]
    async fn test_previous_uses_last_generation() {
        let (_dir, store) = fixture();
        let first = ArtifactRef::new(1, 2);
        store.create_local(first, Baseline::Pristine).await.unwrap();
        let file = store.layout().project_dir(first).join("src/Account.java");
        std::fs::write(&file, "class Account { synchronized void f() {} }").unwrap();

        let second = ArtifactRef::new(2, 2);
        store.create_local(second, Baseline::Previous).await.unwrap();
        let copied = store.layout().project_dir(second).join("src/Account.java");
        assert!(std::fs::read_to_string(copied).unwrap().contains("synchronized"));
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let (_dir, store) = fixture();
        let a = ArtifactRef::new(1, 1);
        let b = ArtifactRef::new(1, 2);
        store.create_local(a, Baseline::Pristine).await.unwrap();
        store.create_local(b, Baseline::Pristine).await.unwrap();
        let fa = store.fingerprint(a).await.unwrap();
        assert_eq!(fa, store.fingerprint(b).await.unwrap());

        std::fs::write(store.layout().project_dir(b).join("src/Account.java"), "changed").unwrap();
        assert_ne!(fa, store.fingerprint(b).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_removes_stale_files() {
        let (_dir, store) = fixture();
        let at = ArtifactRef::new(1, 1);
        store.create_local(at, Baseline::Pristine).await.unwrap();
        let stale = store.layout().project_dir(at).join("src/Mutant.java");
        std::fs::write(&stale, "x").unwrap();
        store.create_local(at, Baseline::Pristine).await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_stage_export_prune_and_cleanup() {
        let (_dir, store) = fixture();
        let at = ArtifactRef::new(3, 1);
        store.create_local(at, Baseline::Pristine).await.unwrap();

        store.stage(at).await.unwrap();
        assert!(store.layout().work_dir.join("build.xml").exists());

        let out = store.export(at).await.unwrap();
        assert!(out.join("src/Account.java").exists());

        store.prune(at).await.unwrap();
        assert!(!store.layout().project_dir(at).exists());
        store.prune(at).await.unwrap();

        store.create_local(ArtifactRef::new(4, 1), Baseline::Pristine).await.unwrap();
        store.cleanup().await.unwrap();
        assert!(!store.layout().tmp_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_generation_is_error() {
        let (_dir, store) = fixture();
        let err = store
            .create_local(ArtifactRef::new(5, 1), Baseline::Generation(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::Io(_)));
    }
}
