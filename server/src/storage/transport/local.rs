//! Directory on the gateway host used as a backend.

use super::{copy_range, new_chunk_path, ReadSeek, Transport};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalParams {
    pub base_path: String,
}

pub struct LocalTransport {
    base: PathBuf,
}

impl LocalTransport {
    pub fn new(params: LocalParams) -> Self {
        Self {
            base: PathBuf::from(params.base_path),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || path.is_empty() {
            return Err(StoreError::InvalidArgument(format!("chunk path {}", path)));
        }
        Ok(self.base.join(relative))
    }
}

impl Transport for LocalTransport {
    fn probe(&self) -> Result<()> {
        fs::create_dir_all(&self.base)?;
        let meta = fs::metadata(&self.base)?;
        if !meta.is_dir() || meta.permissions().readonly() {
            return Err(StoreError::TransportFailure(format!(
                "{} is not a writable directory",
                self.base.display()
            )));
        }
        Ok(())
    }

    fn store_chunk(
        &self,
        mut source: Box<dyn ReadSeek>,
        start: u64,
        length: u64,
    ) -> Result<String> {
        let relative = new_chunk_path();
        let full = self.resolve(&relative)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file first so a failed copy leaves nothing behind
        let tmp = full.with_extension("part");
        let result = File::create(&tmp).map_err(StoreError::from).and_then(|file| {
            let mut writer = BufWriter::new(file);
            copy_range(&mut *source, start, length, &mut writer)?;
            writer
                .into_inner()
                .map_err(|e| e.into_error())?
                .sync_all()?;
            Ok(())
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &full)?;

        Ok(relative)
    }

    fn open_for_read(&self, path: &str) -> Result<Box<dyn ReadSeek>> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    fn transport(dir: &Path) -> LocalTransport {
        LocalTransport::new(LocalParams {
            base_path: dir.to_string_lossy().into_owned(),
        })
    }

    #[test]
    fn test_store_and_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(dir.path());
        t.probe().unwrap();

        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let path = t
            .store_chunk(Box::new(Cursor::new(data.clone())), 1000, 500)
            .unwrap();
        assert_eq!(path.split('/').count(), 5);

        let mut reader = t.open_for_read(&path).unwrap();
        let mut stored = Vec::new();
        reader.read_to_end(&mut stored).unwrap();
        assert_eq!(stored, &data[1000..1500]);

        reader.seek(SeekFrom::Start(10)).unwrap();
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], data[1010]);
    }

    #[test]
    fn test_short_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(dir.path());
        let err = t.store_chunk(Box::new(Cursor::new(vec![1u8; 10])), 5, 100);
        assert!(err.is_err());

        let leftovers = walk(dir.path());
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[test]
    fn test_empty_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(dir.path());
        let path = t.store_chunk(Box::new(Cursor::new(Vec::new())), 0, 0).unwrap();
        let mut buf = Vec::new();
        t.open_for_read(&path).unwrap().read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(dir.path());
        assert!(t.open_for_read("../etc/passwd").is_err());
        assert!(t.open_for_read("/etc/passwd").is_err());
    }

    #[test]
    fn test_probe_fails_under_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let t = transport(&blocker.join("store"));
        assert!(t.probe().is_err());
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
        files
    }
}
