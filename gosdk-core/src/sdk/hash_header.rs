//! Verification against the cloud-storage `x-goog-hash` response header.
//!
//! The header carries one or more `name=base64` elements, for example
//! `x-goog-hash: crc32c=n03x6A==, md5=Ojk9c3dhfxgoKVVHYwFbHQ==`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::HeaderMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::checksum::ChecksumKind;
use crate::error::{GoSdkError, Result};

/// Header name used by Google Cloud Storage.
pub const HASH_HEADER: &str = "x-goog-hash";

/// Checksums announced by the server for a downloaded body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorHashHeader {
    /// MD5 as lowercase hex.
    pub md5: Option<String>,
    /// CRC32C as an integer.
    pub crc32c: Option<u32>,
}

impl VendorHashHeader {
    /// Collects hash elements from every `x-goog-hash` header value.
    ///
    /// Elements that are not valid base64 are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut result = Self::default();
        for value in headers.get_all(HASH_HEADER) {
            if let Ok(text) = value.to_str() {
                result.merge_value(text);
            }
        }
        result
    }

    /// Parses a single header value.
    pub fn parse(value: &str) -> Self {
        let mut result = Self::default();
        result.merge_value(value);
        result
    }

    fn merge_value(&mut self, value: &str) {
        for element in value.split([',', ';']) {
            let Some((name, encoded)) = element.trim().split_once('=') else {
                continue;
            };
            let Ok(bytes) = STANDARD.decode(encoded.trim()) else {
                debug!("Ignoring malformed {} element: {}", HASH_HEADER, element);
                continue;
            };

            match name.trim().to_lowercase().as_str() {
                "md5" => self.md5 = Some(hex::encode(bytes)),
                "crc32c" => {
                    if let Ok(raw) = <[u8; 4]>::try_from(bytes.as_slice()) {
                        self.crc32c = Some(u32::from_be_bytes(raw));
                    }
                }
                _ => {}
            }
        }
    }

    /// Returns true if at least one usable checksum was announced.
    pub fn is_valid(&self) -> bool {
        self.md5.is_some() || self.crc32c.is_some()
    }

    /// Verifies a file, preferring MD5 over CRC32C.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::ChecksumMismatch`] on a mismatch and
    /// [`GoSdkError::Config`] if the header announced nothing usable.
    pub fn verify_file(&self, path: &Path) -> Result<()> {
        if let Some(md5) = &self.md5 {
            return ChecksumKind::Md5.verify_file(path, md5);
        }

        let Some(expected) = self.crc32c else {
            return Err(GoSdkError::Config(format!(
                "{} has neither md5 nor crc32c records",
                HASH_HEADER
            )));
        };

        let actual = crc32c_file(path)?;
        if actual == expected {
            Ok(())
        } else {
            Err(GoSdkError::ChecksumMismatch {
                path: path.to_path_buf(),
                kind: "CRC32C".to_string(),
                expected: format!("{:08x}", expected),
                actual: format!("{:08x}", actual),
            })
        }
    }
}

fn crc32c_file(path: &Path) -> Result<u32> {
    let mut file = File::open(path).map_err(|e| GoSdkError::io(path, e))?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut crc = 0u32;
    loop {
        let read = file.read(&mut buffer).map_err(|e| GoSdkError::io(path, e))?;
        if read == 0 {
            break;
        }
        crc = crc32c::crc32c_append(crc, &buffer[..read]);
    }
    Ok(crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::TempDir;

    #[test]
    fn test_parse_md5_and_crc32c() {
        let md5_b64 = STANDARD.encode(hex::decode("5eb63bbbe01eeed093cb22bb8f5acdc3").unwrap());
        let crc_b64 = STANDARD.encode(0xC99465AAu32.to_be_bytes());
        let header = VendorHashHeader::parse(&format!("crc32c={}, md5={}", crc_b64, md5_b64));

        assert!(header.is_valid());
        assert_eq!(header.md5.as_deref(), Some("5eb63bbbe01eeed093cb22bb8f5acdc3"));
        assert_eq!(header.crc32c, Some(0xC99465AA));
    }

    #[test]
    fn test_collects_across_header_values() {
        let mut headers = HeaderMap::new();
        headers.append(HASH_HEADER, HeaderValue::from_static("crc32c=AAAAAA=="));
        headers.append(HASH_HEADER, HeaderValue::from_static("md5=1B2M2Y8AsgTpgAmY7PhCfg=="));

        let header = VendorHashHeader::from_headers(&headers);
        assert_eq!(header.crc32c, Some(0));
        assert_eq!(header.md5.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert!(!VendorHashHeader::from_headers(&HeaderMap::new()).is_valid());
        assert!(!VendorHashHeader::parse("md5=***; other=abc").is_valid());
    }

    #[test]
    fn test_verify_file_md5() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let good = VendorHashHeader {
            md5: Some("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string()),
            crc32c: Some(1),
        };
        good.verify_file(&path).unwrap();

        let bad = VendorHashHeader {
            md5: Some("00000000000000000000000000000000".to_string()),
            crc32c: None,
        };
        assert!(matches!(
            bad.verify_file(&path),
            Err(GoSdkError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_file_crc32c() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("digits.txt");
        std::fs::write(&path, b"123456789").unwrap();

        // CRC-32C check value for "123456789".
        let good = VendorHashHeader {
            md5: None,
            crc32c: Some(0xE306_9283),
        };
        good.verify_file(&path).unwrap();

        let bad = VendorHashHeader {
            md5: None,
            crc32c: Some(0xDEAD_BEEF),
        };
        assert!(matches!(
            bad.verify_file(&path),
            Err(GoSdkError::ChecksumMismatch { .. })
        ));
    }
}
