//! Environment composition for child processes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Edits applied on top of the inherited environment.
///
/// Applied in order: remove, set, prepend, append, then the default `GOPATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvEdits {
    pub remove: Vec<String>,
    pub set: BTreeMap<String, String>,
    /// Prepended to the current value, or used as the value if unset.
    pub prepend: BTreeMap<String, String>,
    /// Appended to the current value, or used as the value if unset.
    pub append: BTreeMap<String, String>,
    /// Injected as `GOPATH` when nothing else provides one.
    pub default_go_path: Option<PathBuf>,
}

impl EnvEdits {
    /// Applies the edits to `base` and returns the child environment.
    pub fn apply<I>(&self, base: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = base.into_iter().collect();

        for name in &self.remove {
            env.remove(name);
        }
        for (name, value) in &self.set {
            env.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.prepend {
            let updated = match env.get(name) {
                Some(current) => format!("{}{}", value, current),
                None => value.clone(),
            };
            env.insert(name.clone(), updated);
        }
        for (name, value) in &self.append {
            let updated = match env.get(name) {
                Some(current) => format!("{}{}", current, value),
                None => value.clone(),
            };
            env.insert(name.clone(), updated);
        }

        if let Some(go_path) = &self.default_go_path {
            if !env.contains_key("GOPATH") {
                debug!("Using default GOPATH {}", go_path.display());
                env.insert("GOPATH".to_string(), go_path.display().to_string());
            }
        }

        env
    }

    /// Applies the edits to the current process environment.
    pub fn apply_to_current(&self) -> BTreeMap<String, String> {
        self.apply(std::env::vars())
    }
}
