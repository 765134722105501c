//! Settings for SDK acquisition, tool execution and folder housekeeping.
//!
//! Settings are read from a JSON file. Every field has a default, so an
//! empty object (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{GoSdkError, Result};
use crate::sdk::{platform, HttpOptions, LockOptions, ProxySettings, SdkSite, SdkSpec};

/// File looked up in the current directory by [`Settings::load`].
pub const SETTINGS_FILE_NAME: &str = "gosdk.json";

/// Go version used when none is configured.
pub const DEFAULT_GO_VERSION: &str = "1.24.0";

/// Store folder name under the home directory.
pub const DEFAULT_STORE_FOLDER_NAME: &str = ".mvnGoLang";

/// Folder inside the store used as `GOPATH` when the environment has none.
pub const DEFAULT_GO_PATH_FOLDER_NAME: &str = ".go_path";

// =============================================================================
// SDK Settings
// =============================================================================

/// Where and how to obtain the Go SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    pub go_version: String,
    /// Target OS; the host OS when absent.
    pub os: Option<String>,
    /// Target architecture; the host architecture when absent.
    pub arch: Option<String>,
    /// Extra suffix of the base name, e.g. `osx10.8`.
    pub os_variant: Option<String>,
    /// Listing site. Accepts a URL or one of `auto`, `google-apis`, `go-dev`.
    pub sdk_site: String,
    /// Overrides the synthesized base name.
    pub sdk_archive_base_name: Option<String>,
    /// Cache root; `~/.mvnGoLang` when absent.
    pub store_folder: Option<PathBuf>,
    /// Where archives are downloaded; the store folder when absent.
    pub download_archive_folder: Option<PathBuf>,
    pub expected_archive_md5: Option<String>,
    pub expected_archive_sha256: Option<String>,
    pub keep_downloaded_archive: bool,
    /// Use this SDK instead of the cache.
    pub preinstalled_sdk_folder: Option<PathBuf>,
    /// Download the archive from exactly this URL.
    pub sdk_download_url: Option<String>,
    /// Repository coordinate `group:artifact:version[:type[:classifier]]`.
    pub sdk_artifact: Option<String>,
    /// Archive file name on the site; skips the listing lookup.
    pub sdk_archive_file_name: Option<String>,
    pub connection_timeout_ms: u64,
    pub disable_ssl_check: bool,
    pub hide_load_indicator: bool,
    /// Guess `<base>.zip` or `<base>.tar.gz` when the listing has no match.
    pub sdk_archive_file_auto_extension: bool,
    /// Ceiling for waiting on a busy cache slot.
    pub lock_max_wait_ms: Option<u64>,
    pub proxy: Option<ProxySettings>,
    pub offline: bool,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            go_version: DEFAULT_GO_VERSION.to_string(),
            os: None,
            arch: None,
            os_variant: None,
            sdk_site: SdkSite::Auto.url().to_string(),
            sdk_archive_base_name: None,
            store_folder: None,
            download_archive_folder: None,
            expected_archive_md5: None,
            expected_archive_sha256: None,
            keep_downloaded_archive: false,
            preinstalled_sdk_folder: None,
            sdk_download_url: None,
            sdk_artifact: None,
            sdk_archive_file_name: None,
            connection_timeout_ms: 60_000,
            disable_ssl_check: false,
            hide_load_indicator: false,
            sdk_archive_file_auto_extension: true,
            lock_max_wait_ms: None,
            proxy: None,
            offline: false,
        }
    }
}

impl SdkSettings {
    /// The SDK coordinates, filling OS and architecture from the host.
    pub fn sdk_spec(&self) -> SdkSpec {
        let os = non_blank(self.os.as_deref())
            .map(|os| os.to_lowercase())
            .unwrap_or_else(|| platform::detect_os().to_string());
        let arch = non_blank(self.arch.as_deref())
            .map(|arch| match platform::known_arch(arch) {
                Some(go_arch) => go_arch.to_string(),
                None => arch.to_string(),
            })
            .unwrap_or_else(|| platform::detect_arch().to_string());

        SdkSpec::new(
            self.go_version.trim(),
            os,
            arch,
            non_blank(self.os_variant.as_deref()).map(str::to_string),
        )
    }

    /// Listing site URL with a trailing slash. Presets are expanded.
    pub fn site_url(&self) -> String {
        let site = self.sdk_site.trim();
        let url = match site.parse::<SdkSite>() {
            Ok(preset) => preset.url().to_string(),
            Err(_) => site.to_string(),
        };
        if url.ends_with('/') {
            url
        } else {
            format!("{}/", url)
        }
    }

    /// Cache root folder.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Config`] if no folder is configured and the
    /// home directory is unknown.
    pub fn store_folder(&self) -> Result<PathBuf> {
        match &self.store_folder {
            Some(folder) => Ok(folder.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(DEFAULT_STORE_FOLDER_NAME))
                .ok_or_else(|| {
                    GoSdkError::Config("Can't find home folder for the SDK store".to_string())
                }),
        }
    }

    /// Folder receiving downloaded archives.
    pub fn download_folder(&self, store: &Path) -> PathBuf {
        self.download_archive_folder
            .clone()
            .unwrap_or_else(|| store.to_path_buf())
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            disable_ssl_check: self.disable_ssl_check,
            proxy: self.proxy.clone(),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            max_wait: self.lock_max_wait_ms.map(Duration::from_millis),
        }
    }
}

// =============================================================================
// Exec Settings
// =============================================================================

/// The tool to run from the SDK and how to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecSettings {
    /// Executable name or path relative to the SDK root.
    pub command: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Variables to set.
    pub env: BTreeMap<String, String>,
    /// Variables to remove from the inherited environment.
    pub env_remove: Vec<String>,
    /// Values prepended to existing variables.
    pub env_first: BTreeMap<String, String>,
    /// Values appended to existing variables.
    pub env_last: BTreeMap<String, String>,
    /// 0 waits forever.
    pub process_timeout_ms: u64,
    pub log_file_std: Option<PathBuf>,
    pub log_file_err: Option<PathBuf>,
    pub expected_exit_code: i32,
    pub hide_process_output: bool,
    /// Send stderr through the stdout log and file.
    pub merge_output: bool,
    /// Inject `<store>/.go_path` as `GOPATH` when the environment has none.
    pub default_go_path: bool,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            command: "go".to_string(),
            args: Vec::new(),
            work_dir: PathBuf::from("src"),
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            env_first: BTreeMap::new(),
            env_last: BTreeMap::new(),
            process_timeout_ms: 0,
            log_file_std: None,
            log_file_err: None,
            expected_exit_code: 0,
            hide_process_output: false,
            merge_output: false,
            default_go_path: true,
        }
    }
}

impl ExecSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.process_timeout_ms > 0).then(|| Duration::from_millis(self.process_timeout_ms))
    }
}

// =============================================================================
// Folder Settings
// =============================================================================

/// Shared options of the folder housekeeping commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    pub project_dir: PathBuf,
    /// Refuse to touch anything outside `project_dir`.
    pub project_bound: bool,
    /// Make trees writable before deleting them.
    pub force_delete: bool,
    pub follow_symlinks: bool,
    pub fail_on_error: bool,
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            project_bound: true,
            force_delete: false,
            follow_symlinks: false,
            fail_on_error: true,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// All settings, as stored in `gosdk.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sdk: SdkSettings,
    pub exec: ExecSettings,
    pub folders: FolderSettings,
}

impl Settings {
    /// Loads `gosdk.json` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(SETTINGS_FILE_NAME);
        if path.is_file() {
            Self::load_from(path)
        } else {
            debug!("No {} found, using defaults", SETTINGS_FILE_NAME);
            Ok(Self::default())
        }
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`GoSdkError::Io`] if the file can't be read and
    /// [`GoSdkError::Config`] if it isn't valid settings JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| GoSdkError::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| {
            GoSdkError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Rejects settings that can't work.
    pub fn validate(&self) -> Result<()> {
        if self.sdk.go_version.trim().is_empty() {
            return Err(GoSdkError::Config("go_version must not be blank".to_string()));
        }
        if self.exec.command.trim().is_empty() {
            return Err(GoSdkError::Config("command must not be blank".to_string()));
        }

        let site = self.sdk.site_url();
        match Url::parse(&site) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => {
                return Err(GoSdkError::Config(format!(
                    "sdk_site must be an http(s) URL: {}",
                    self.sdk.sdk_site
                )))
            }
        }

        if self.sdk.disable_ssl_check {
            warn!("TLS certificate verification is disabled");
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
