//! MD5 and SHA-256 digests over buffers, readers and files.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{GoSdkError, Result};

/// Buffer size for streaming digests.
const BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumKind {
    Md5,
    Sha256,
}

impl ChecksumKind {
    pub fn all() -> &'static [ChecksumKind] {
        &[Self::Md5, Self::Sha256]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA256",
        }
    }

    /// Finds the kind whose name prefixes `name`, ignoring case.
    ///
    /// `"sha256"`, `"SHA256SUM"` and `"md5hash"` all resolve.
    pub fn find(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|kind| upper.starts_with(kind.as_str()))
    }

    /// Lowercase hex digest of a buffer.
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }

    /// Lowercase hex digest of everything readable from `reader`.
    pub fn digest_reader<R: Read>(&self, reader: R) -> io::Result<String> {
        match self {
            Self::Md5 => stream_digest::<Md5, R>(reader),
            Self::Sha256 => stream_digest::<Sha256, R>(reader),
        }
    }

    /// Lowercase hex digest of a file.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|e| GoSdkError::io(path, e))?;
        self.digest_reader(file).map_err(|e| GoSdkError::io(path, e))
    }

    /// Checks a file against an expected hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::ChecksumMismatch`] when the digests differ.
    pub fn verify_file(&self, path: &Path, expected: &str) -> Result<()> {
        let actual = self.digest_file(path)?;
        if matches(expected, &actual) {
            Ok(())
        } else {
            Err(GoSdkError::ChecksumMismatch {
                path: path.to_path_buf(),
                kind: self.as_str().to_string(),
                expected: expected.trim().to_string(),
                actual,
            })
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compares two hex digests, ignoring case and surrounding whitespace.
pub fn matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

fn stream_digest<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ChecksumKind::Md5.digest(b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            ChecksumKind::Sha256.digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ChecksumKind::Md5.digest(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            ChecksumKind::Sha256.digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_reader_matches_buffer() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        for kind in ChecksumKind::all() {
            let streamed = kind.digest_reader(Cursor::new(&data)).unwrap();
            assert_eq!(streamed, kind.digest(&data));
        }
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let mut data = b"Go SDK archive payload".to_vec();
        std::fs::write(&path, &data).unwrap();

        for kind in ChecksumKind::all() {
            let expected = kind.digest(&data);
            kind.verify_file(&path, &expected).unwrap();
            kind.verify_file(&path, &expected.to_uppercase()).unwrap();
        }

        let md5 = ChecksumKind::Md5.digest(&data);
        let sha = ChecksumKind::Sha256.digest(&data);
        data[3] ^= 0x01;
        std::fs::write(&path, &data).unwrap();

        let err = ChecksumKind::Md5.verify_file(&path, &md5).unwrap_err();
        assert!(matches!(err, GoSdkError::ChecksumMismatch { .. }));
        let err = ChecksumKind::Sha256.verify_file(&path, &sha).unwrap_err();
        assert!(matches!(err, GoSdkError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_find_by_prefix() {
        assert_eq!(ChecksumKind::find("sha256"), Some(ChecksumKind::Sha256));
        assert_eq!(ChecksumKind::find("SHA256SUM"), Some(ChecksumKind::Sha256));
        assert_eq!(ChecksumKind::find("md5"), Some(ChecksumKind::Md5));
        assert_eq!(ChecksumKind::find("sha1"), None);
        assert_eq!(ChecksumKind::find(""), None);
    }

    #[test]
    fn test_digest_file_missing() {
        let err = ChecksumKind::Md5
            .digest_file(Path::new("/definitely/not/here.bin"))
            .unwrap_err();
        assert!(matches!(err, GoSdkError::Io { .. }));
    }
}
