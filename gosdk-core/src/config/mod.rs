//! Configuration for gosdk-wrapper.
//!
//! Settings come from a JSON file; the session carries per-run state.

mod session;
mod settings;

pub use session::Session;
pub use settings::{
    ExecSettings, FolderSettings, SdkSettings, Settings, DEFAULT_GO_PATH_FOLDER_NAME,
    DEFAULT_GO_VERSION, DEFAULT_STORE_FOLDER_NAME, SETTINGS_FILE_NAME,
};
