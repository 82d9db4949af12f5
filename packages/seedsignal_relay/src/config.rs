use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use seedsignal_core::BridgeConfig;

// Layered as: defaults -> relay.toml -> SEEDSIGNAL_* env vars.
//
//   relay.toml:   [store]
//                 chunk_size = 500
//
//   env var:      SEEDSIGNAL_STORE__CHUNK_SIZE=500   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
}

/// Listener settings (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Record store settings (`[store]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreFileConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_record_bytes: default_max_record_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    6881
}
fn default_chunk_size() -> usize {
    seedsignal_core::DEFAULT_CHUNK_SIZE
}
fn default_max_record_bytes() -> usize {
    seedsignal_core::store::DEFAULT_MAX_RECORD_BYTES
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Build the layered figment. `path` defaults to `relay.toml` in the working
/// directory; a missing file is not an error.
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(RelayFileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SEEDSIGNAL_").split("__"))
}

/// Resolved relay configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub bridge: BridgeConfig,
    pub max_record_bytes: usize,
}

impl RelayConfig {
    /// Apply CLI overrides on top of the file config and validate the result.
    pub fn resolve(
        file: &RelayFileConfig,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Result<Self> {
        let host = host.unwrap_or(&file.server.host);
        let port = port.unwrap_or(file.server.port);
        let bind_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid bind address {host}:{port}"))?;

        let store = &file.store;
        if store.chunk_size == 0 {
            bail!("store.chunk_size must be positive");
        }
        if store.chunk_size >= store.max_record_bytes {
            bail!(
                "store.chunk_size ({}) must be below store.max_record_bytes ({})",
                store.chunk_size,
                store.max_record_bytes
            );
        }

        Ok(Self {
            bind_addr,
            bridge: BridgeConfig {
                chunk_size: store.chunk_size,
                request_timeout: Duration::from_millis(store.request_timeout_ms),
            },
            max_record_bytes: store.max_record_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve() {
        let config = RelayConfig::resolve(&RelayFileConfig::default(), None, None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(config.bridge, BridgeConfig::default());
        assert_eq!(config.max_record_bytes, 1000);
    }

    #[test]
    fn toml_file_is_layered_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nchunk_size = 400\n\n[server]\nport = 7000").unwrap();

        let fc: RelayFileConfig = load_config(Some(file.path())).extract().unwrap();
        assert_eq!(fc.store.chunk_size, 400);
        assert_eq!(fc.store.max_record_bytes, 1000);
        assert_eq!(fc.server.port, 7000);
        assert_eq!(fc.server.host, "127.0.0.1");
    }

    #[test]
    fn cli_overrides_file() {
        let mut fc = RelayFileConfig::default();
        fc.server.port = 7000;
        let config = RelayConfig::resolve(&fc, Some("0.0.0.0"), Some(9999)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9999".parse().unwrap());
    }

    #[test]
    fn chunk_size_must_fit_record() {
        let mut fc = RelayFileConfig::default();
        fc.store.chunk_size = 1000;
        assert!(RelayConfig::resolve(&fc, None, None).is_err());
        fc.store.chunk_size = 0;
        assert!(RelayConfig::resolve(&fc, None, None).is_err());
    }

    #[test]
    fn bad_host_rejected() {
        let err = RelayConfig::resolve(&RelayFileConfig::default(), Some("not a host"), None)
            .unwrap_err();
        assert!(err.to_string().contains("invalid bind address"));
    }
}
