use super::{SourceStream, StreamProvider};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Local filesystem provider
pub struct LocalProvider;

impl SourceStream for File {}

impl StreamProvider for LocalProvider {
    fn open(&self, path: &str) -> Result<Box<dyn SourceStream>> {
        let file = File::open(Path::new(path)).with_context(|| format!("cannot open {path}"))?;
        Ok(Box::new(file))
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let dir = if dir.is_empty() { "." } else { dir };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("cannot list {dir}"))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(PathBuf::from(path))
    }
}
