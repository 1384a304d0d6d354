//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Control-plane API server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Monitored hosts
    #[serde(default)]
    pub hosts: Vec<HostSettings>,

    /// Remote metrics store; upload is disabled when absent
    #[serde(default)]
    pub store: Option<StoreSettings>,

    /// Connection and supervision tuning
    #[serde(default)]
    pub collect: CollectSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            server: ServerSettings::default(),
            hosts: Vec::new(),
            store: None,
            collect: CollectSettings::default(),
        }
    }
}

/// Control-plane API server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Connection parameters for one monitored host
#[derive(Debug, Clone, Deserialize)]
pub struct HostSettings {
    /// Hostname or address
    pub hostname: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Password credential; forwarded to sshpass, never logged
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Private key file credential
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Remote metrics store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Base URL of the store, e.g. "http://elastic.example:9200"
    pub base_url: String,

    /// Index name records are written to
    #[serde(default = "default_store_index")]
    pub index: String,

    /// Basic-auth user
    pub username: String,

    /// Basic-auth password
    pub password: SecretString,

    /// Per-request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

fn default_store_index() -> String {
    "memcpu_data".to_string()
}

fn default_store_timeout() -> u64 {
    60
}

/// Connection retry and supervision tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CollectSettings {
    /// Connect attempts before giving up on a host
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Per-attempt connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay before restarting a crashed collector, in seconds
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Ceiling on the restart window, in seconds
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,
}

fn default_connect_attempts() -> u32 {
    4
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_restart_delay() -> u64 {
    60
}

fn default_restart_window() -> u64 {
    600
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            connect_timeout_secs: default_connect_timeout(),
            restart_delay_secs: default_restart_delay(),
            restart_window_secs: default_restart_window(),
        }
    }
}

impl CollectSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_from_empty_object() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.server.port, 5000);
        assert!(settings.hosts.is_empty());
        assert!(settings.store.is_none());
        assert_eq!(settings.collect.connect_attempts, 4);
        assert_eq!(settings.collect.connect_timeout_secs, 5);
    }

    #[test]
    fn test_host_settings_parse() {
        let json = r#"{
            "hosts": [
                {"hostname": "10.0.0.5", "username": "probe", "password": "hunter2"},
                {"hostname": "10.0.0.6", "port": 2222, "username": "probe", "key_path": "/etc/probe/id_ed25519"}
            ]
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.hosts.len(), 2);
        assert_eq!(settings.hosts[0].port, 22);
        assert!(settings.hosts[0].password.is_some());
        assert_eq!(settings.hosts[1].port, 2222);
        assert!(settings.hosts[1].key_path.is_some());
    }
}
