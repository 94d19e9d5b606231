use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [relay]
//                    port = 3001
//
//   env var:         WINDROP_RELAY__PORT=3001   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Relay tunables (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Rooms with no peer activity for this long are closed as if the host
    /// had disconnected.
    #[serde(default = "default_room_idle_secs")]
    pub room_idle_secs: u64,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            room_idle_secs: default_room_idle_secs(),
        }
    }
}

/// Client tunables (lives under `[client]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Bound on establishing the signaling link.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on the relay acknowledging create-room / join-room.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Bound on the whole offer/answer/candidate exchange up to channel-open.
    #[serde(default = "default_negotiation_timeout_secs")]
    pub negotiation_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seal file chunks with a relay-distributed session key.
    #[serde(default)]
    pub encryption: bool,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            negotiation_timeout_secs: default_negotiation_timeout_secs(),
            chunk_size: default_chunk_size(),
            encryption: false,
        }
    }
}

impl ClientFileConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}

impl RelayFileConfig {
    pub fn room_idle(&self) -> Duration {
        Duration::from_secs(self.room_idle_secs)
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    3001
}

fn default_room_idle_secs() -> u64 {
    600
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:3001/ws".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_negotiation_timeout_secs() -> u64 {
    20
}

fn default_chunk_size() -> usize {
    16 * 1024
}

/// Build a figment that layers: struct defaults → config.toml → WINDROP_*
/// env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `WINDROP_RELAY__PORT=3001`          →  `relay.port = 3001`
///   `WINDROP_CLIENT__CHUNK_SIZE=32768`  →  `client.chunk_size = 32768`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("WINDROP_").split("__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = FileConfig::default();
        assert_eq!(cfg.relay.port, 3001);
        assert_eq!(cfg.client.chunk_size, 16 * 1024);
        assert_eq!(cfg.client.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.relay.room_idle(), Duration::from_secs(600));
        assert!(!cfg.client.encryption);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[relay]\nport = 4100\n\n[client]\nchunk_size = 8192\nencryption = true\n",
        )
        .unwrap();

        let cfg: FileConfig = load_config(dir.path()).extract().unwrap();
        assert_eq!(cfg.relay.port, 4100);
        assert_eq!(cfg.client.chunk_size, 8192);
        assert!(cfg.client.encryption);
        // Untouched fields keep their defaults
        assert_eq!(cfg.relay.host, "127.0.0.1");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: FileConfig = load_config(dir.path()).extract().unwrap();
        assert_eq!(cfg.client.relay_url, "ws://127.0.0.1:3001/ws");
    }
}
