//! Filesystem-backed object store: `<root>/<bucket>/<object name>`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{io_err, CloudError, ObjectStore};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_file(&self, name: &str) -> PathBuf {
        name.split('/')
            .filter(|p| !p.is_empty() && *p != "..")
            .fold(self.bucket_dir(), |p, part| p.join(part))
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), CloudError> {
        for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
            let path = entry.map_err(io_err(dir))?.path();
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };
            if path.is_dir() {
                self.collect(&path, &name, out)?;
            } else {
                out.push(name);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<(), CloudError> {
        let dir = self.bucket_dir();
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))
    }

    async fn upload_file(&self, local: &Path, name: &str) -> Result<(), CloudError> {
        let target = self.object_file(name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        std::fs::copy(local, &target).map_err(io_err(local))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError> {
        let dir = self.bucket_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        self.collect(&dir, "", &mut names)?;
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    async fn download(&self, name: &str, dest: &Path) -> Result<(), CloudError> {
        let source = self.object_file(name);
        if !source.is_file() {
            return Err(CloudError::NotFound(self.uri(name)));
        }
        std::fs::copy(&source, dest).map_err(io_err(dest))?;
        Ok(())
    }
}
