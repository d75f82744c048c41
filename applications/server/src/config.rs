/// Server configuration
use crate::error::{Result, ServerError};
use playlog_core::{BufferConfig, ReconciliationPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server")]
    pub server: ServerSettings,

    #[serde(default = "default_storage")]
    pub storage: StorageSettings,

    #[serde(default = "default_buffer")]
    pub buffer: BufferSettings,

    #[serde(default = "default_flush")]
    pub flush: FlushSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferBackend {
    /// In-process map, lost on restart
    Memory,
    /// Embedded redb file
    Redb,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferSettings {
    #[serde(default = "default_backend")]
    pub backend: BufferBackend,

    #[serde(default = "default_buffer_path")]
    pub path: PathBuf,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlushSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_staleness_threshold_seconds")]
    pub staleness_threshold_seconds: u64,

    #[serde(default = "default_pass_timeout_seconds")]
    pub pass_timeout_seconds: u64,

    /// 0 retries forever
    #[serde(default)]
    pub max_flush_attempts: u32,
}

impl FlushSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_seconds)
    }
}

impl ServerConfig {
    /// Load configuration from file and environment
    ///
    /// `path` defaults to `config.toml` in the working directory; a missing
    /// default file is fine, a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match path {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                let config_path = PathBuf::from("config.toml");
                if config_path.exists() {
                    settings = settings.add_source(config::File::from(config_path));
                }
            }
        }

        // Override with environment variables, e.g. PLAYLOG_FLUSH__INTERVAL_SECONDS
        settings = settings.add_source(
            config::Environment::with_prefix("PLAYLOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.flush.interval_seconds == 0 {
            return Err(ServerError::Config(
                "flush.interval_seconds must be greater than zero".to_string(),
            ));
        }

        if self.flush.pass_timeout_seconds >= self.flush.interval_seconds {
            return Err(ServerError::Config(format!(
                "flush.pass_timeout_seconds ({}) must be shorter than flush.interval_seconds ({})",
                self.flush.pass_timeout_seconds, self.flush.interval_seconds
            )));
        }

        if self.buffer.ttl_seconds == 0 {
            return Err(ServerError::Config(
                "buffer.ttl_seconds must be greater than zero".to_string(),
            ));
        }

        if self.buffer.op_timeout_ms == 0 {
            return Err(ServerError::Config(
                "buffer.op_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.buffer.namespace.is_empty() || self.buffer.namespace.contains(':') {
            return Err(ServerError::Config(format!(
                "buffer.namespace {:?} must be non-empty and must not contain ':'",
                self.buffer.namespace
            )));
        }

        Ok(())
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            namespace: self.buffer.namespace.clone(),
            ttl: Duration::from_secs(self.buffer.ttl_seconds),
            op_timeout: Duration::from_millis(self.buffer.op_timeout_ms),
        }
    }

    pub fn policy(&self) -> ReconciliationPolicy {
        ReconciliationPolicy::new(
            Duration::from_secs(self.flush.staleness_threshold_seconds),
            Some(self.flush.max_flush_attempts),
        )
    }
}

// Default values
fn default_server() -> ServerSettings {
    ServerSettings {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageSettings {
    StorageSettings {
        database_url: default_database_url(),
    }
}

fn default_database_url() -> String {
    "sqlite://./data/playlog.db".to_string()
}

fn default_buffer() -> BufferSettings {
    BufferSettings {
        backend: default_backend(),
        path: default_buffer_path(),
        namespace: default_namespace(),
        ttl_seconds: default_ttl_seconds(),
        op_timeout_ms: default_op_timeout_ms(),
    }
}

fn default_backend() -> BufferBackend {
    BufferBackend::Memory
}

fn default_buffer_path() -> PathBuf {
    PathBuf::from("./data/buffer.redb")
}

fn default_namespace() -> String {
    playlog_core::buffer::DEFAULT_NAMESPACE.to_string()
}

fn default_ttl_seconds() -> u64 {
    playlog_core::buffer::DEFAULT_TTL.as_secs()
}

fn default_op_timeout_ms() -> u64 {
    playlog_core::buffer::DEFAULT_OP_TIMEOUT.as_millis() as u64
}

fn default_flush() -> FlushSettings {
    FlushSettings {
        enabled: default_enabled(),
        interval_seconds: default_interval_seconds(),
        staleness_threshold_seconds: default_staleness_threshold_seconds(),
        pass_timeout_seconds: default_pass_timeout_seconds(),
        max_flush_attempts: 0,
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_staleness_threshold_seconds() -> u64 {
    30
}

fn default_pass_timeout_seconds() -> u64 {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            buffer: default_buffer(),
            flush: default_flush(),
        }
    }
}
