//! Core types for Go SDK acquisition.
//!
//! This module defines the value types that flow between the index parser,
//! the cache manager and the CLI: the requested SDK spec and its canonical
//! base name, the parsed index records, and the SDK site presets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::checksum::ChecksumKind;

// ============================================================================
// SDK Spec
// ============================================================================

/// Identifies one Go SDK distribution: version, target OS, architecture and
/// an optional OS variant (for example a macOS release suffix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdkSpec {
    pub version: String,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub os_variant: Option<String>,
}

impl SdkSpec {
    pub fn new(
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
        os_variant: Option<String>,
    ) -> Self {
        Self {
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
            os_variant,
        }
    }

    /// Returns the canonical cache key, `go<version>.<os>-<arch>[-<variant>]`.
    ///
    /// Surrounding whitespace of each part is ignored; a blank variant is
    /// treated as absent.
    pub fn base_name(&self) -> String {
        let variant = match self.os_variant.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => format!("-{}", v),
            _ => String::new(),
        };
        format!(
            "go{}.{}-{}{}",
            self.version.trim(),
            self.os.trim(),
            self.arch.trim(),
            variant
        )
    }

    /// Default archive extension for the target OS.
    pub fn default_archive_extension(&self) -> &'static str {
        if self.os.trim().eq_ignore_ascii_case("windows") {
            "zip"
        } else {
            "tar.gz"
        }
    }
}

impl fmt::Display for SdkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())
    }
}

/// Makes a user supplied name safe for use as a file name.
///
/// The name is split at the first `.`. Every character of the stem outside
/// `[A-Za-z0-9_-]` becomes `_`, and so does every character of the
/// extension outside `[A-Za-z0-9._-]`. A result made only of dots is
/// replaced by underscores so it never names `.` or `..`.
pub fn safe_file_name(name: &str) -> String {
    let (stem, extension) = match name.find('.') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => (name, ""),
    };

    let stem: String = stem.chars().map(|c| keep_or_underscore(c, false)).collect();
    let extension: String = extension
        .chars()
        .map(|c| keep_or_underscore(c, true))
        .collect();

    let safe = if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    };

    if safe.chars().all(|c| c == '.') {
        safe.replace('.', "_")
    } else {
        safe
    }
}

fn keep_or_underscore(c: char, allow_dot: bool) -> char {
    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_dot && c == '.') {
        c
    } else {
        '_'
    }
}

// ============================================================================
// Index Records
// ============================================================================

/// One downloadable file listed for an SDK version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkFile {
    pub file_name: String,
    pub link: String,
    #[serde(default)]
    pub checksums: BTreeMap<ChecksumKind, String>,
}

impl SdkFile {
    pub fn new(
        file_name: impl Into<String>,
        link: impl Into<String>,
        checksums: BTreeMap<ChecksumKind, String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            link: link.into(),
            checksums,
        }
    }
}

/// All files published for one SDK version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkRecord {
    pub name: String,
    pub files: Vec<SdkFile>,
}

impl SdkRecord {
    /// Finds a file by its exact name.
    pub fn find_file(&self, file_name: &str) -> Option<&SdkFile> {
        self.files.iter().find(|f| f.file_name == file_name)
    }
}

// ============================================================================
// SDK Sites
// ============================================================================

/// Well known places that publish Go SDK archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SdkSite {
    /// Pick the default site.
    #[default]
    Auto,
    /// Google Cloud Storage bucket with an XML listing.
    GoogleApis,
    /// The official download page.
    GoDev,
}

impl SdkSite {
    pub fn url(&self) -> &'static str {
        match self {
            Self::Auto | Self::GoogleApis => "https://storage.googleapis.com/golang/",
            Self::GoDev => "https://go.dev/dl/",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::GoogleApis => "google-apis",
            Self::GoDev => "go-dev",
        }
    }
}

impl fmt::Display for SdkSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SdkSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "google-apis" | "google_apis" | "googleapis" => Ok(Self::GoogleApis),
            "go-dev" | "gosdk_site" | "go.dev" => Ok(Self::GoDev),
            _ => Err(format!("Unknown SDK site: {}", s)),
        }
    }
}
