use parking_lot::RwLock;

use crate::value::{Labels, Value};

/// Environment variable consulted for the app name when no name has been set explicitly.
pub const APP_NAME_ENV_VAR: &str = "HASTUR_APP_NAME";

/// Label carrying the resolved app name.
pub const APP_LABEL: &str = "app";

/// Label carrying the process ID.
pub const PID_LABEL: &str = "pid";

/// Resolves the app name and default labels attached to every message.
pub(crate) struct LabelResolver {
    app_name: RwLock<String>,
    defaults: RwLock<Labels>,
}

impl LabelResolver {
    pub fn new(app_name: String, defaults: Labels) -> Self {
        LabelResolver { app_name: RwLock::new(app_name), defaults: RwLock::new(defaults) }
    }

    /// Returns the current app name.
    ///
    /// In priority order: the name set explicitly, the `HASTUR_APP_NAME` environment variable, and finally the name
    /// the executable was invoked as. Empty values count as unset.
    pub fn app_name(&self) -> String {
        let explicit = self.app_name.read();
        if !explicit.is_empty() {
            return explicit.clone();
        }
        drop(explicit);

        if let Some(name) = std::env::var(APP_NAME_ENV_VAR).ok().filter(|name| !name.is_empty()) {
            return name;
        }

        std::env::args_os().next().map(|arg| arg.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub fn set_app_name(&self, name: String) {
        *self.app_name.write() = name;
    }

    /// Returns the default labels: any added labels, plus `app` and `pid`.
    ///
    /// `app` and `pid` are computed on every call and always replace stored labels of the same name.
    pub fn default_labels(&self) -> Labels {
        let mut labels = self.defaults.read().clone();
        labels.insert(PID_LABEL.to_string(), Value::from(std::process::id()));
        labels.insert(APP_LABEL.to_string(), Value::String(self.app_name()));
        labels
    }

    /// Merges caller-supplied labels with the default labels.
    ///
    /// Default labels win on collision.
    pub fn merge(&self, mut labels: Labels) -> Labels {
        labels.extend(self.default_labels());
        labels
    }

    pub fn add_default_labels(&self, labels: Labels) {
        self.defaults.write().extend(labels);
    }

    pub fn remove_default_labels<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut defaults = self.defaults.write();
        for key in keys {
            defaults.remove(key.as_ref());
        }
    }
}
