use runwatch_cloud::OracleConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub ids: IdConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            cors_allowed_origins: Vec::new(),
            poller: PollerConfig::default(),
            cleanup: CleanupConfig::default(),
            dispatcher: DispatcherConfig::default(),
            oracle: OracleConfig::default(),
            ids: IdConfig::default(),
        }
    }
}

// ---- Definition seed file (used by the `init-definitions` subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionsSeedFile {
    #[serde(default)]
    pub definitions: Vec<SeedDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedDefinition {
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poller_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poller_tick_secs")]
    pub tick_secs: u64,
    /// A tick still running after this long is abandoned without committing.
    #[serde(default = "default_poller_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
    #[serde(default = "default_poller_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    /// Lease holder name; a random one is generated when absent.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_poller_batch_limit")]
    pub batch_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_poller_enabled(),
            tick_secs: default_poller_tick_secs(),
            tick_timeout_secs: default_poller_tick_timeout_secs(),
            lease_ttl_secs: default_poller_lease_ttl_secs(),
            worker_id: None,
            batch_limit: default_poller_batch_limit(),
        }
    }
}

fn default_poller_enabled() -> bool {
    true
}

fn default_poller_tick_secs() -> u64 {
    300
}

fn default_poller_tick_timeout_secs() -> u64 {
    240
}

fn default_poller_lease_ttl_secs() -> u64 {
    600
}

fn default_poller_batch_limit() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_journal_retention_days")]
    pub journal_retention_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            interval_secs: default_cleanup_interval_secs(),
            history_retention_days: default_history_retention_days(),
            journal_retention_days: default_journal_retention_days(),
        }
    }
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_cleanup_interval_secs() -> u64 {
    86400
}

fn default_history_retention_days() -> u32 {
    1
}

fn default_journal_retention_days() -> u32 {
    7
}

/// `[dispatcher]` section: a registered dispatcher kind plus its JSON config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_dispatcher_kind")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            kind: default_dispatcher_kind(),
            config: serde_json::Value::Null,
        }
    }
}

fn default_dispatcher_kind() -> String {
    "log".to_string()
}

/// `[ids]` section: Snowflake machine and node ids for this worker.
///
/// Either half left out is derived from the poller worker id, so workers
/// with distinct worker ids get distinct pairs without extra setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default)]
    pub machine_id: Option<i32>,
    #[serde(default)]
    pub node_id: Option<i32>,
}

const SNOWFLAKE_ID_RANGE: std::ops::Range<i32> = 0..32;

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_database_file() -> String {
    "runwatch.db".to_string()
}

fn default_seed_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        // Pin the worker id once so the lease holder and the id pair agree.
        config.poller.worker_id = Some(config.worker_id());
        Ok(config)
    }

    /// Holder name for the poller lease.
    pub fn worker_id(&self) -> String {
        self.poller.worker_id.clone().unwrap_or_else(|| {
            let suffix: u32 = rand::random();
            format!("worker-{suffix:08x}")
        })
    }

    /// Snowflake `(machine_id, node_id)` for this worker.
    ///
    /// Explicit `[ids]` values win and must be in `0..32`. Missing values
    /// come from an FNV-1a hash of the configured worker id.
    pub fn snowflake_ids(&self) -> anyhow::Result<(i32, i32)> {
        let (derived_machine, derived_node) = match &self.poller.worker_id {
            Some(worker_id) => derive_ids(worker_id),
            None => (1, 1),
        };
        let machine_id = self.ids.machine_id.unwrap_or(derived_machine);
        let node_id = self.ids.node_id.unwrap_or(derived_node);
        for (name, value) in [("machine_id", machine_id), ("node_id", node_id)] {
            if !SNOWFLAKE_ID_RANGE.contains(&value) {
                anyhow::bail!("ids.{name} must be in 0..32, got {value}");
            }
        }
        Ok((machine_id, node_id))
    }
}

fn derive_ids(worker_id: &str) -> (i32, i32) {
    let hash = worker_id.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    ((hash % 32) as i32, ((hash / 32) % 32) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.database_file, "runwatch.db");
        assert_eq!(config.poller.tick_secs, 300);
        assert_eq!(config.poller.tick_timeout_secs, 240);
        assert_eq!(config.cleanup.history_retention_days, 1);
        assert_eq!(config.dispatcher.kind, "log");
        assert_eq!(config.oracle.kind, "snapshot");
    }

    #[test]
    fn sections_override_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            http_port = 9000

            [poller]
            tick_secs = 60
            worker_id = "w-1"

            [dispatcher]
            kind = "webhook"
            config = { url = "https://push.example.com/send" }

            [oracle]
            kind = "http"
            endpoint = "http://inventory.local/states"
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.poller.tick_secs, 60);
        assert_eq!(config.poller.lease_ttl_secs, 600);
        assert_eq!(config.worker_id(), "w-1");
        assert_eq!(config.dispatcher.config["url"], "https://push.example.com/send");
        assert_eq!(config.oracle.endpoint.as_deref(), Some("http://inventory.local/states"));
    }

    #[test]
    fn snowflake_ids_follow_the_worker_id() {
        let worker = |id: &str| ServerConfig {
            poller: PollerConfig {
                worker_id: Some(id.to_string()),
                ..PollerConfig::default()
            },
            ..ServerConfig::default()
        };

        let a = worker("worker-a").snowflake_ids().unwrap();
        assert_eq!(a, worker("worker-a").snowflake_ids().unwrap());
        assert!(SNOWFLAKE_ID_RANGE.contains(&a.0) && SNOWFLAKE_ID_RANGE.contains(&a.1));

        let pairs: std::collections::HashSet<(i32, i32)> = (0..16)
            .map(|n| worker(&format!("worker-{n}")).snowflake_ids().unwrap())
            .collect();
        assert!(pairs.len() > 1, "distinct workers should not all share one pair");

        assert_eq!(ServerConfig::default().snowflake_ids().unwrap(), (1, 1));
    }

    #[test]
    fn explicit_snowflake_ids_win_and_are_validated() {
        let config: ServerConfig = toml::from_str(
            r#"
            [poller]
            worker_id = "w-1"

            [ids]
            machine_id = 7
            node_id = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.snowflake_ids().unwrap(), (7, 30));

        let partial: ServerConfig = toml::from_str(
            r#"
            [poller]
            worker_id = "w-1"

            [ids]
            machine_id = 3
            "#,
        )
        .unwrap();
        assert_eq!(partial.snowflake_ids().unwrap(), (3, derive_ids("w-1").1));

        let out_of_range: ServerConfig = toml::from_str("[ids]\nnode_id = 32\n").unwrap();
        let err = out_of_range.snowflake_ids().unwrap_err();
        assert!(err.to_string().contains("ids.node_id"), "{err}");
    }

    #[test]
    fn load_pins_a_generated_worker_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "http_port = 9001\n").unwrap();

        let config = ServerConfig::load(path.to_str().unwrap()).unwrap();
        let pinned = config.poller.worker_id.clone().unwrap();
        assert!(pinned.starts_with("worker-"));
        assert_eq!(config.worker_id(), pinned);
        assert_eq!(config.snowflake_ids().unwrap(), derive_ids(&pinned));
    }

    #[test]
    fn generated_worker_id_has_prefix() {
        assert!(ServerConfig::default().worker_id().starts_with("worker-"));
    }
}
