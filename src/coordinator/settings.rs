//! Settings of the coordinator.
//!
//! The coordinator process itself only knows how to reach the
//! application ([`Settings`]). Everything else is owned by the
//! application and fetched over the bridge at startup
//! ([`StartupArgs`]).

use crate::common::settings::{self, LoggingSettings, SettingsError};
use serde::Deserialize;
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    pub bridge: BridgeSettings,
}

impl Settings {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        settings::load(path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Address of the application's bridge server, e.g.
    /// `127.0.0.1:5555`.
    pub address: String,
    /// Upper bound in milliseconds on a single call to the
    /// application. No bound if absent.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_millis)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
/// The configuration the application hands to the coordinator.
pub struct StartupArgs {
    pub registry: RegistrySettings,
    pub api: ApiSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
}

impl StartupArgs {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.registry.validate()?;
        self.notifier.validate()
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Whether workers must authenticate with a public key. When
    /// `false`, every request is accepted and gets a fresh identifier.
    pub server_mode_safe: bool,
    /// File with one hex encoded public key per line, added to the
    /// allowed workers at startup. Only valid in safe mode.
    #[serde(default)]
    pub key_list_file: Option<PathBuf>,
    /// Whether the workers of the previous session are restored from
    /// the key database. When `false` no key database is kept.
    #[serde(default = "default_load_last_session_workers")]
    pub load_last_session_workers: bool,
    #[serde(default = "default_path_to_keys_db")]
    pub path_to_keys_db: PathBuf,
}

impl RegistrySettings {
    fn validate(&self) -> Result<(), SettingsError> {
        if !self.server_mode_safe && self.key_list_file.is_some() {
            return Err(SettingsError::Validation(
                "a key list file cannot be used when the server is not in safe mode".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_load_last_session_workers() -> bool {
    true
}

fn default_path_to_keys_db() -> PathBuf {
    PathBuf::from("workers_db.json")
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Address the REST API listens on.
    pub bind_address: SocketAddr,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct NotifierSettings {
    /// Interval in milliseconds between two checks of a waiting
    /// worker's model version.
    #[serde(default = "default_model_check_interval")]
    pub model_check_interval: u64,
}

impl NotifierSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.model_check_interval)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.model_check_interval == 0 {
            return Err(SettingsError::Validation(
                "model_check_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            model_check_interval: default_model_check_interval(),
        }
    }
}

fn default_model_check_interval() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup_args() -> StartupArgs {
        StartupArgs {
            registry: RegistrySettings {
                server_mode_safe: true,
                key_list_file: None,
                load_last_session_workers: true,
                path_to_keys_db: default_path_to_keys_db(),
            },
            api: ApiSettings {
                bind_address: "127.0.0.1:8080".parse().unwrap(),
            },
            notifier: NotifierSettings::default(),
        }
    }

    #[test]
    fn test_startup_args_defaults() {
        let args: StartupArgs = serde_json::from_str(
            r#"{
                "registry": {"server_mode_safe": true},
                "api": {"bind_address": "127.0.0.1:8080"}
            }"#,
        )
        .unwrap();
        assert_eq!(args, startup_args());
        assert_eq!(args.notifier.check_interval(), Duration::from_secs(10));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_unsafe_mode_with_key_list() {
        let mut args = startup_args();
        args.registry.server_mode_safe = false;
        assert!(args.validate().is_ok());

        args.registry.key_list_file = Some(PathBuf::from("keys.txt"));
        assert!(matches!(
            args.validate(),
            Err(SettingsError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_check_interval() {
        let mut args = startup_args();
        args.notifier.model_check_interval = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_load_settings() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[bridge]\naddress = \"127.0.0.1:5555\"\nrequest_timeout = 500\n",
        )
        .unwrap();
        let settings = Settings::new(file.path()).unwrap();
        assert_eq!(settings.bridge.address, "127.0.0.1:5555");
        assert_eq!(
            settings.bridge.request_timeout(),
            Some(Duration::from_millis(500))
        );
    }
}
