//! Engine configuration
//!
//! Provides defaults, validation and `KORUS_*` environment overrides for the
//! knobs the controllers expose. No file or CLI parsing happens here; hosts
//! construct a [`EngineConfig`] however they load settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Top-level configuration for one engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity stamped into child labels
    pub identity: IdentityConfig,
    /// Dynamic controller knobs
    pub controller: ControllerConfig,
}

impl EngineConfig {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> Result<()> {
        self.identity.validate()?;
        self.controller.validate()?;
        Ok(())
    }

    /// Apply `KORUS_*` environment overrides on top of the current values.
    pub fn load_from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("KORUS_POD_ID") {
            config.identity.pod_id = val;
        }
        if let Ok(val) = std::env::var("KORUS_WORKERS") {
            config.controller.workers = val
                .parse()
                .map_err(|_| Error::Validation(format!("KORUS_WORKERS={val} is not a number")))?;
        }
        if let Ok(val) = std::env::var("KORUS_MAX_RETRIES") {
            config.controller.queue_max_retries = val.parse().map_err(|_| {
                Error::Validation(format!("KORUS_MAX_RETRIES={val} is not a number"))
            })?;
        }
        if let Ok(val) = std::env::var("KORUS_REQUEUE_SECONDS") {
            let secs: u64 = val.parse().map_err(|_| {
                Error::Validation(format!("KORUS_REQUEUE_SECONDS={val} is not a number"))
            })?;
            config.controller.default_requeue_duration = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

/// Identity of this controller process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Pod (or process) id recorded on every managed object
    pub pod_id: String,
    /// Engine version recorded on every managed object
    pub engine_version: String,
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pod_id.is_empty() {
            return Err(Error::Validation("pod id cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            pod_id: Uuid::new_v4().to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Knobs for the dynamic controller and its shared queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent queue workers
    pub workers: usize,
    /// Delay used by recoverable requeues (child created, not ready yet)
    #[serde(with = "duration_secs")]
    pub default_requeue_duration: Duration,
    /// Retries before a failing item is dropped from the queue
    pub queue_max_retries: u32,
    /// Upper bound on graceful shutdown of all event sources
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    /// Upper bound on waiting for one source's initial cache sync
    #[serde(with = "duration_secs")]
    pub sync_timeout: Duration,
    /// Default namespace for children with no namespace of their own
    pub default_namespace: String,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Validation(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.default_namespace.is_empty() {
            return Err(Error::Validation(
                "default namespace cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            default_requeue_duration: Duration::from_secs(5),
            queue_max_retries: 20,
            shutdown_timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(60),
            default_namespace: "default".to_string(),
        }
    }
}

mod duration_secs {
    //! Serialize durations as whole seconds for config round-trips.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
