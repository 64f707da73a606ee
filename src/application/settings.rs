//! Settings of the `model` process, which runs an
//! [`MemoryModel`](super::memory::MemoryModel) behind a bridge server.

use crate::{
    common::settings::{self, LoggingSettings, SettingsError},
    coordinator::settings::StartupArgs,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    pub bridge: BridgeServerSettings,
    #[serde(default)]
    pub model: ModelSettings,
    /// Handed to the coordinator when it starts.
    pub server: StartupArgs,
}

impl Settings {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Self = settings::load(path)?;
        settings.server.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeServerSettings {
    /// Address the bridge server listens on.
    pub bind_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_updates_per_version")]
    pub updates_per_version: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            updates_per_version: default_updates_per_version(),
        }
    }
}

fn default_updates_per_version() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load() {
        let file = write_config(
            r#"
[bridge]
bind_address = "127.0.0.1:5555"

[model]
updates_per_version = 3

[server.registry]
server_mode_safe = false

[server.api]
bind_address = "127.0.0.1:8080"

[server.notifier]
model_check_interval = 250
"#,
        );
        let settings = Settings::new(file.path()).unwrap();
        assert_eq!(settings.bridge.bind_address, "127.0.0.1:5555");
        assert_eq!(settings.model.updates_per_version, 3);
        assert!(!settings.server.registry.server_mode_safe);
        assert_eq!(settings.server.notifier.model_check_interval, 250);
    }

    #[test]
    fn test_load_invalid() {
        let file = write_config(
            r#"
[bridge]
bind_address = "127.0.0.1:5555"

[server.registry]
server_mode_safe = false
key_list_file = "keys.txt"

[server.api]
bind_address = "127.0.0.1:8080"
"#,
        );
        assert!(matches!(
            Settings::new(file.path()),
            Err(SettingsError::Validation(_))
        ));
    }
}
