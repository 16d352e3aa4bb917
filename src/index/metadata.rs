use std::{fs::File, io::Read, path::Path};

use chrono::{DateTime, Utc};

use crate::{
    bgen::FINGERPRINT_SIZE,
    error::{IndexError, Result},
};

/// Identifying properties of a BGEN file, recorded in its index
///
/// An index is only trusted while the live file has the same size and the same
/// leading bytes as recorded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub last_write_time: i64,
    /// The first 1000 bytes of the file (fewer for shorter files)
    pub first_bytes: Vec<u8>,
}
impl FileMetadata {
    /// Captures the metadata of the file at `path`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let stat = file.metadata()?;
        let last_write_time = DateTime::<Utc>::from(stat.modified()?).timestamp();
        let mut first_bytes = Vec::with_capacity(FINGERPRINT_SIZE);
        (&mut file)
            .take(FINGERPRINT_SIZE as u64)
            .read_to_end(&mut first_bytes)?;
        Ok(Self {
            filename: path.display().to_string(),
            size: stat.len(),
            last_write_time,
            first_bytes,
        })
    }

    /// Checks that `live` still matches this recorded metadata
    ///
    /// Only the size and the fingerprint are compared; names and timestamps change
    /// when files are copied.
    pub fn verify(&self, live: &FileMetadata) -> Result<()> {
        if self.size != live.size {
            return Err(IndexError::SizeMismatch {
                filename: live.filename.clone(),
                expected: self.size,
                actual: live.size,
            }
            .into());
        }
        if self.first_bytes != live.first_bytes {
            return Err(IndexError::FingerprintMismatch {
                filename: live.filename.clone(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_fingerprint_is_truncated() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&vec![7u8; 1500])?;
        file.flush()?;
        let metadata = FileMetadata::from_path(file.path())?;
        assert_eq!(metadata.size, 1500);
        assert_eq!(metadata.first_bytes.len(), FINGERPRINT_SIZE);
        assert!(metadata.last_write_time > 0);
        Ok(())
    }

    #[test]
    fn test_verify_detects_changes() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"original contents")?;
        file.flush()?;
        let recorded = FileMetadata::from_path(file.path())?;
        recorded.verify(&recorded.clone())?;

        let mut resized = recorded.clone();
        resized.size += 1;
        assert!(recorded.verify(&resized).unwrap_err().is_index_mismatch());

        let mut altered = recorded.clone();
        altered.first_bytes[0] ^= 0xFF;
        let err = recorded.verify(&altered).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::IndexError(IndexError::FingerprintMismatch { .. })
        ));

        let mut renamed = recorded.clone();
        renamed.filename = "elsewhere.bgen".to_string();
        renamed.last_write_time += 100;
        recorded.verify(&renamed)?;
        Ok(())
    }
}
