//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `shardhub.toml` in the working directory, or the file named by
//! `SHARDHUB_CONFIG`. Every field has a default so the file is optional.
//! Environment variables take precedence over file values.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;

use shardhub_adapter_peer_tcp::PeerTcpConfig;
use shardhub_app::peer::{INITIAL_DELAY, LinkOptions, MAX_DELAY};
use shardhub_domain::shard::{EntrySeed, ShardDescriptor, ShardSchema};
use shardhub_domain::space::SpaceDescriptor;
use shardhub_domain::time::as_millis;

const DEFAULT_PATH: &str = "shardhub.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,
    pub logging: LoggingConfig,
    pub listen: ListenConfig,
    pub space: SpaceConfig,
    pub shards: Vec<ShardConfig>,
    /// Peer link tunables.
    pub link: LinkConfig,
    /// TCP framing tunables.
    pub transport: PeerTcpConfig,
    pub script: ScriptConfig,
}

/// Identity of this instance.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Instance name, unique among the peers of a space.
    pub name: String,
    /// Run with virtual pins only.
    pub dummy: bool,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Inbound peer listener.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// `host:port` to accept peers on; no listener when unset.
    pub addr: Option<String>,
}

/// The space this instance belongs to.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    pub name: String,
    /// Home instance of the space; this instance when empty.
    pub home: String,
    /// Peer name to connection target (`tcp://host:port`).
    pub peers: BTreeMap<String, String>,
}

/// One shard of the space.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    pub id: u32,
    pub alias: String,
    #[serde(default)]
    pub schema: ShardSchema,
    /// Peer holding the canonical copy; this instance when unset.
    #[serde(default)]
    pub home: Option<String>,
    /// Entries committed when a canonical shard starts.
    #[serde(default)]
    pub entries: Vec<EntrySeed>,
}

/// Peer link tunables, in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub request_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

/// Commands run once the instance is up.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub steps: Vec<String>,
}

impl Config {
    /// Load configuration from `SHARDHUB_CONFIG` or `shardhub.toml` (if
    /// present) then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SHARDHUB_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("SHARDHUB_INSTANCE") {
            self.instance.name = val;
        }
        if let Some(val) = var("SHARDHUB_LISTEN") {
            self.listen.addr = Some(val).filter(|addr| !addr.is_empty());
        }
        if let Some(val) = var("SHARDHUB_DUMMY") {
            match val.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.instance.dummy = true,
                "0" | "false" | "no" => self.instance.dummy = false,
                _ => {}
            }
        }
        if let Some(val) = var("SHARDHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.name.is_empty() {
            return Err(ConfigError::Validation(
                "instance name must not be empty".to_string(),
            ));
        }
        if self.space.name.is_empty() {
            return Err(ConfigError::Validation(
                "space name must not be empty".to_string(),
            ));
        }
        let mut ids = BTreeSet::new();
        let mut aliases = BTreeSet::new();
        for shard in &self.shards {
            if !ids.insert(shard.id) {
                return Err(ConfigError::Validation(format!(
                    "shard id {} is configured twice",
                    shard.id
                )));
            }
            if !aliases.insert(shard.alias.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "shard alias `{}` is configured twice",
                    shard.alias
                )));
            }
            if let Some(home) = shard.home_peer(&self.instance.name)
                && !self.space.peers.contains_key(home)
            {
                return Err(ConfigError::Validation(format!(
                    "shard `{}` is homed on unknown peer `{home}`",
                    shard.alias
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn space_descriptor(&self) -> SpaceDescriptor {
        let home = if self.space.home.is_empty() {
            &self.instance.name
        } else {
            &self.space.home
        };
        self.space
            .peers
            .iter()
            .fold(SpaceDescriptor::new(&self.space.name, home), |desc, (peer, target)| {
                desc.with_peer(peer, target)
            })
    }

    #[must_use]
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            request_timeout: Duration::from_millis(self.link.request_timeout_ms),
            backoff_initial: Duration::from_millis(self.link.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.link.backoff_max_ms),
        }
    }
}

impl ShardConfig {
    /// The peer holding the canonical copy, `None` when it is `instance`.
    fn home_peer<'a>(&'a self, instance: &str) -> Option<&'a str> {
        self.home.as_deref().filter(|home| *home != instance)
    }

    /// Descriptor of this shard as seen from `instance`.
    #[must_use]
    pub fn descriptor(&self, instance: &str) -> ShardDescriptor {
        let desc = ShardDescriptor::new(self.id, &self.alias, self.schema);
        match self.home_peer(instance) {
            Some(home) => desc.homed_on(home),
            None => desc,
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "shardhub".to_string(),
            dummy: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "shardhubd=info,shardhub=info".to_string(),
        }
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            name: "example.org".to_string(),
            home: String::new(),
            peers: BTreeMap::new(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: as_millis(LinkOptions::default().request_timeout),
            backoff_initial_ms: as_millis(INITIAL_DELAY),
            backoff_max_ms: as_millis(MAX_DELAY),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardhub_domain::entry::EntryKind;

    const RPI: &str = r#"
        [instance]
        name = "rpi"
        dummy = true

        [listen]
        addr = "0.0.0.0:4431"

        [space]
        name = "example.org"
        home = "player"
        [space.peers]
        player = "tcp://10.0.0.8:4431"

        [[shards]]
        id = 6
        alias = "rpi"
        schema = "control"
        [[shards.entries]]
        id = "switch1"
        kind = "switch"
        attrs = { master = "rpi", pin = 4 }

        [[shards]]
        id = 7
        alias = "rpiImages"
        schema = "fs"

        [script]
        steps = ["wait 2000", "space example.org"]
    "#;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.instance.name, "shardhub");
        assert!(config.instance.dummy);
        assert_eq!(config.space.name, "example.org");
        assert!(config.listen.addr.is_none());
        assert!(config.shards.is_empty());
        assert_eq!(config.link_options().request_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.filter, "shardhubd=info,shardhub=info");
    }

    #[test]
    fn should_parse_full_toml() {
        let config: Config = toml::from_str(RPI).unwrap();
        assert_eq!(config.instance.name, "rpi");
        assert_eq!(config.listen.addr.as_deref(), Some("0.0.0.0:4431"));
        assert_eq!(config.space.peers["player"], "tcp://10.0.0.8:4431");
        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.shards[1].schema, ShardSchema::Fs);
        assert_eq!(config.script.steps.len(), 2);

        let seed = &config.shards[0].entries[0];
        assert_eq!(seed.kind, EntryKind::Switch);
        assert_eq!(seed.attrs, json!({"master": "rpi", "pin": 4}));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.instance.name, "shardhub");
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_apply_overrides_with_rust_log_last() {
        let mut config = Config::default();
        let vars = BTreeMap::from([
            ("SHARDHUB_INSTANCE", "player"),
            ("SHARDHUB_LISTEN", "127.0.0.1:4431"),
            ("SHARDHUB_DUMMY", "false"),
            ("SHARDHUB_LOG", "debug"),
            ("RUST_LOG", "trace"),
        ]);
        config.apply_overrides(|key| vars.get(key).map(ToString::to_string));
        assert_eq!(config.instance.name, "player");
        assert_eq!(config.listen.addr.as_deref(), Some("127.0.0.1:4431"));
        assert!(!config.instance.dummy);
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_ignore_unparsable_dummy_flag() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "SHARDHUB_DUMMY").then(|| "maybe".to_string()));
        assert!(config.instance.dummy);
    }

    #[test]
    fn should_reject_empty_instance_name() {
        let mut config = Config::default();
        config.instance.name = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_reject_duplicate_shard_ids_and_aliases() {
        let mut config: Config = toml::from_str(RPI).unwrap();
        config.shards[1].id = 6;
        assert!(config.validate().is_err());

        let mut config: Config = toml::from_str(RPI).unwrap();
        config.shards[1].alias = "rpi".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_shard_homed_on_unknown_peer() {
        let mut config: Config = toml::from_str(RPI).unwrap();
        config.shards[0].home = Some("tv".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_treat_own_name_as_canonical_home() {
        let mut config: Config = toml::from_str(RPI).unwrap();
        config.shards[0].home = Some("rpi".to_string());
        assert!(config.validate().is_ok());
        assert!(!config.shards[0].descriptor("rpi").is_replica());
        assert!(config.shards[0].descriptor("player").is_replica());
    }

    #[test]
    fn should_default_space_home_to_instance() {
        let mut config = Config::default();
        config.instance.name = "rpi".to_string();
        assert_eq!(config.space_descriptor().home, "rpi");
    }
}
