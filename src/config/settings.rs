use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration settings for the broker process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Listener and per-client limits.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Also listen on this unix socket when set.
    pub unix_socket: Option<PathBuf>,
    pub max_clients: usize,
    /// Seconds of inactivity before a client is dropped; 0 never drops.
    pub client_timeout_secs: u64,
    /// Largest request body accepted, in bytes.
    pub max_request_size: usize,
    pub pid_file: Option<PathBuf>,
}

/// Admin account, persistence and memory limits.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub admin_name: String,
    pub admin_password: String,
    /// Snapshot file; an empty path disables persistence.
    pub storage_path: PathBuf,
    /// Seconds between background snapshots; 0 disables them.
    pub save_timeout_secs: u64,
    /// Memory ceiling such as `512mb`; `0` means unlimited.
    pub max_memory: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    /// Log to this file instead of stdout.
    pub file: Option<PathBuf>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    pub max_clients: Option<usize>,
    pub client_timeout_secs: Option<u64>,
    pub max_request_size: Option<usize>,
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub admin_name: Option<String>,
    pub admin_password: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub save_timeout_secs: Option<u64>,
    pub max_memory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 7851,
                unix_socket: None,
                max_clients: 16384,
                client_timeout_secs: 0,
                max_request_size: 64 * 1024 * 1024,
                pid_file: None,
            },
            broker: BrokerSettings {
                admin_name: "admin".to_string(),
                admin_password: "admin".to_string(),
                storage_path: PathBuf::from("talonmq.dat"),
                save_timeout_secs: 60,
                max_memory: "0".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

impl PartialSettings {
    /// Overlays the values that were provided on top of `base`.
    pub fn merge_into(self, base: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(base.server.host),
                port: server.port.unwrap_or(base.server.port),
                unix_socket: server.unix_socket.or(base.server.unix_socket),
                max_clients: server.max_clients.unwrap_or(base.server.max_clients),
                client_timeout_secs: server
                    .client_timeout_secs
                    .unwrap_or(base.server.client_timeout_secs),
                max_request_size: server
                    .max_request_size
                    .unwrap_or(base.server.max_request_size),
                pid_file: server.pid_file.or(base.server.pid_file),
            },
            broker: BrokerSettings {
                admin_name: broker.admin_name.unwrap_or(base.broker.admin_name),
                admin_password: broker.admin_password.unwrap_or(base.broker.admin_password),
                storage_path: broker.storage_path.unwrap_or(base.broker.storage_path),
                save_timeout_secs: broker
                    .save_timeout_secs
                    .unwrap_or(base.broker.save_timeout_secs),
                max_memory: broker.max_memory.unwrap_or(base.broker.max_memory),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(base.logging.level),
                file: logging.file.or(base.logging.file),
            },
        }
    }
}
