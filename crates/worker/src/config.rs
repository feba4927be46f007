//! Worker configuration loaded from environment variables.
//!
//! | Env Var                    | Default                  |
//! |----------------------------|--------------------------|
//! | `QUEUE_BACKEND`            | `postgres`               |
//! | `DATABASE_URL`             | required for `postgres`  |
//! | `WORKER_NAME`              | `<hostname>-<pid>`       |
//! | `WORKER_IDLE_DELAY_MS`     | `1000`                   |
//! | `WORKER_ERROR_BACKOFF_MS`  | `5000`                   |
//! | `PROVIDER_TIMEOUT_SECS`    | `300`                    |
//! | `STALE_CLAIM_TIMEOUT_SECS` | unset (reaper disabled)  |
//! | `REAPER_INTERVAL_SECS`     | `60`                     |
//! | `EXPANSION_LEASE_SECS`     | `300`                    |
//! | `ORPHAN_POLICY`            | `run`                    |
//! | `EXPANSION_CHUNK_SIZE`     | `500`                    |
//! | `OUTPUT_DIR`               | `synthetic_dataset`      |
//! | `COMFYUI_URL`              | `http://127.0.0.1:8188`  |
//! | `COMFYUI_WORKFLOWS_DIR`    | `workflows`              |
//! | `MOCK_RENDER_DELAY_MS`     | `2000`                   |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the queue lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    Postgres { database_url: String },
    /// In-process store; jobs do not survive a restart.
    Memory,
}

/// What happens to children already created when a batch's expansion
/// fails partway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Leave them queued. They render but no longer count toward the batch.
    Run,
    /// Cancel them together with failing the batch.
    Cancel,
}

impl OrphanPolicy {
    pub fn cancels_children(self) -> bool {
        matches!(self, Self::Cancel)
    }
}

impl QueueBackend {
    /// Read `QUEUE_BACKEND` (and `DATABASE_URL` for Postgres).
    pub fn from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        match get("QUEUE_BACKEND").as_deref() {
            None | Some("postgres") => Ok(Self::Postgres {
                database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            }),
            Some("memory") => Ok(Self::Memory),
            Some(other) => Err(ConfigError::Invalid {
                var: "QUEUE_BACKEND",
                value: other.to_string(),
                reason: "expected 'postgres' or 'memory'".to_string(),
            }),
        }
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "run" => Ok(Self::Run),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("expected 'run' or 'cancel', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: QueueBackend,
    /// Recorded as `claimed_by` on every claim.
    pub worker_name: String,
    pub idle_delay: Duration,
    pub error_backoff: Duration,
    pub provider_timeout: Duration,
    /// Claims older than this are requeued. `None` disables the reaper.
    pub stale_claim_timeout: Option<Duration>,
    pub reaper_interval: Duration,
    /// A generating batch whose expansion has not advanced for this long
    /// is failed by the reaper.
    pub expansion_lease: Duration,
    pub orphan_policy: OrphanPolicy,
    pub expansion_chunk_size: usize,
    pub output_dir: PathBuf,
    pub comfyui_url: String,
    pub comfyui_workflows_dir: PathBuf,
    pub mock_render_delay: Duration,
}

impl WorkerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let queue = QueueBackend::from_lookup(&get)?;

        let worker_name = get("WORKER_NAME").unwrap_or_else(|| {
            let host = get("HOSTNAME").unwrap_or_else(|| "mayagen-worker".to_string());
            format!("{host}-{}", std::process::id())
        });

        let provider_timeout = Duration::from_secs(parse(&get, "PROVIDER_TIMEOUT_SECS", 300)?);
        let stale_claim_timeout = match get("STALE_CLAIM_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = parse_value("STALE_CLAIM_TIMEOUT_SECS", &raw)?;
                let timeout = Duration::from_secs(secs);
                if timeout <= provider_timeout {
                    return Err(ConfigError::Invalid {
                        var: "STALE_CLAIM_TIMEOUT_SECS",
                        value: raw,
                        reason: format!(
                            "must exceed PROVIDER_TIMEOUT_SECS ({}s)",
                            provider_timeout.as_secs()
                        ),
                    });
                }
                Some(timeout)
            }
            None => None,
        };

        let orphan_policy = match get("ORPHAN_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "ORPHAN_POLICY",
                value: raw.clone(),
                reason,
            })?,
            None => OrphanPolicy::Run,
        };

        let expansion_chunk_size: usize =
            at_least_one("EXPANSION_CHUNK_SIZE", parse(&get, "EXPANSION_CHUNK_SIZE", 500)?)?;
        let reaper_interval =
            at_least_one("REAPER_INTERVAL_SECS", parse(&get, "REAPER_INTERVAL_SECS", 60)?)?;
        let expansion_lease =
            at_least_one("EXPANSION_LEASE_SECS", parse(&get, "EXPANSION_LEASE_SECS", 300)?)?;

        Ok(Self {
            queue,
            worker_name,
            idle_delay: Duration::from_millis(parse(&get, "WORKER_IDLE_DELAY_MS", 1_000)?),
            error_backoff: Duration::from_millis(parse(&get, "WORKER_ERROR_BACKOFF_MS", 5_000)?),
            provider_timeout,
            stale_claim_timeout,
            reaper_interval: Duration::from_secs(reaper_interval),
            expansion_lease: Duration::from_secs(expansion_lease),
            orphan_policy,
            expansion_chunk_size,
            output_dir: get("OUTPUT_DIR")
                .unwrap_or_else(|| "synthetic_dataset".to_string())
                .into(),
            comfyui_url: get("COMFYUI_URL").unwrap_or_else(|| "http://127.0.0.1:8188".to_string()),
            comfyui_workflows_dir: get("COMFYUI_WORKFLOWS_DIR")
                .unwrap_or_else(|| "workflows".to_string())
                .into(),
            mock_render_delay: Duration::from_millis(parse(&get, "MOCK_RENDER_DELAY_MS", 2_000)?),
        })
    }
}

/// Parse `var` when set, otherwise return `default`.
pub fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(raw) => parse_value(var, &raw),
        None => Ok(default),
    }
}

fn at_least_one<T>(var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default + std::fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

pub fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_database_url() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/mayagen")]).unwrap();
        assert_eq!(
            config.queue,
            QueueBackend::Postgres {
                database_url: "postgres://localhost/mayagen".to_string()
            }
        );
        assert_eq!(config.idle_delay, Duration::from_secs(1));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
        assert_eq!(config.provider_timeout, Duration::from_secs(300));
        assert_eq!(config.stale_claim_timeout, None);
        assert_eq!(config.orphan_policy, OrphanPolicy::Run);
        assert_eq!(config.expansion_chunk_size, 500);
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.expansion_lease, Duration::from_secs(300));
        assert_eq!(config.output_dir, PathBuf::from("synthetic_dataset"));
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn memory_backend_needs_no_database() {
        let config = load(&[("QUEUE_BACKEND", "memory"), ("WORKER_NAME", "w1")]).unwrap();
        assert_eq!(config.queue, QueueBackend::Memory);
        assert_eq!(config.worker_name, "w1");
    }

    #[test]
    fn stale_timeout_must_exceed_provider_timeout() {
        let err = load(&[
            ("QUEUE_BACKEND", "memory"),
            ("PROVIDER_TIMEOUT_SECS", "60"),
            ("STALE_CLAIM_TIMEOUT_SECS", "60"),
        ]);
        assert_matches!(err, Err(ConfigError::Invalid { var: "STALE_CLAIM_TIMEOUT_SECS", .. }));

        let ok = load(&[
            ("QUEUE_BACKEND", "memory"),
            ("PROVIDER_TIMEOUT_SECS", "60"),
            ("STALE_CLAIM_TIMEOUT_SECS", "600"),
        ])
        .unwrap();
        assert_eq!(ok.stale_claim_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_matches!(
            load(&[("QUEUE_BACKEND", "memory"), ("ORPHAN_POLICY", "drop")]),
            Err(ConfigError::Invalid { var: "ORPHAN_POLICY", .. })
        );
        assert_matches!(
            load(&[("QUEUE_BACKEND", "memory"), ("WORKER_IDLE_DELAY_MS", "soon")]),
            Err(ConfigError::Invalid { var: "WORKER_IDLE_DELAY_MS", .. })
        );
        assert_matches!(
            load(&[("QUEUE_BACKEND", "memory"), ("EXPANSION_CHUNK_SIZE", "0")]),
            Err(ConfigError::Invalid { var: "EXPANSION_CHUNK_SIZE", .. })
        );
        assert_matches!(
            load(&[("QUEUE_BACKEND", "sqlite")]),
            Err(ConfigError::Invalid { var: "QUEUE_BACKEND", .. })
        );
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for var in ["REAPER_INTERVAL_SECS", "EXPANSION_LEASE_SECS"] {
            let err = load(&[
                ("QUEUE_BACKEND", "memory"),
                ("STALE_CLAIM_TIMEOUT_SECS", "600"),
                (var, "0"),
            ]);
            assert_matches!(err, Err(ConfigError::Invalid { var: v, ref value, .. }) if v == var && value == "0");
        }

        let ok = load(&[("QUEUE_BACKEND", "memory"), ("REAPER_INTERVAL_SECS", "1")]).unwrap();
        assert_eq!(ok.reaper_interval, Duration::from_secs(1));
    }

    #[test]
    fn orphan_policy_parses_case_insensitively() {
        assert_eq!("Cancel".parse::<OrphanPolicy>(), Ok(OrphanPolicy::Cancel));
        assert!(OrphanPolicy::Cancel.cancels_children());
        assert!(!OrphanPolicy::Run.cancels_children());
    }
}
