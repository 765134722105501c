//! Resolution of SDK archives published as repository artifacts.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GoSdkError, Result};

/// Packaging type assumed when a coordinate omits it.
pub const DEFAULT_ARTIFACT_TYPE: &str = "zip";

/// `group:artifact:version[:type[:classifier]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCoordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub artifact_type: String,
    pub classifier: Option<String>,
}

impl ArtifactCoordinate {
    /// Parses a colon-separated coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Config`] for fewer than three or more than five
    /// parts, or a blank mandatory part.
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split(':').map(str::trim).collect();
        if !(3..=5).contains(&parts.len()) || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(GoSdkError::Config(format!(
                "Artifact must be 'group:artifact:version[:type[:classifier]]': {}",
                text
            )));
        }

        let artifact_type = parts
            .get(3)
            .filter(|t| !t.is_empty())
            .unwrap_or(&DEFAULT_ARTIFACT_TYPE)
            .to_string();
        let classifier = parts
            .get(4)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string());

        Ok(Self {
            group_id: parts[0].to_string(),
            artifact_id: parts[1].to_string(),
            version: parts[2].to_string(),
            artifact_type,
            classifier,
        })
    }

    /// File name inside the repository, e.g. `go-sdk-1.22.1-linux.zip`.
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, classifier, self.artifact_type
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.artifact_type),
        }
    }

    /// Path relative to a repository root.
    pub fn repository_path(&self) -> PathBuf {
        let mut path: PathBuf = self.group_id.split('.').collect();
        path.push(&self.artifact_id);
        path.push(&self.version);
        path.push(self.file_name());
        path
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.version, self.artifact_type
        )?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}

/// Turns a coordinate into a local archive file.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(&self, coordinate: &ArtifactCoordinate) -> Result<PathBuf>;
}

/// Looks artifacts up in a local repository laid out by group path.
#[derive(Debug, Clone)]
pub struct LocalRepositoryResolver {
    root: PathBuf,
}

impl LocalRepositoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.m2/repository`, if a home directory is known.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".m2").join("repository"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactResolver for LocalRepositoryResolver {
    async fn resolve(&self, coordinate: &ArtifactCoordinate) -> Result<PathBuf> {
        let path = self.root.join(coordinate.repository_path());
        debug!("Resolving {} as {}", coordinate, path.display());

        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            Ok(path)
        } else {
            Err(GoSdkError::SdkNotFound {
                base_name: coordinate.to_string(),
                site: self.root.display().to_string(),
            })
        }
    }
}
