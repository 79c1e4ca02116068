use std::time::Duration;

use serde::Deserialize;
use batchgate_core::error::{BatchGateError, Result};

use crate::batching::BatcherConfig;
use crate::dispatch::AgentCatalog;
use crate::policy::TenantPolicy;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub batching: BatchingSection,

    #[serde(default)]
    pub default_policy: PolicySection,

    #[serde(default)]
    pub tenants: Vec<TenantConfig>,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub autostart: Vec<AutostartConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BatchGateError::UnsupportedVersion);
        }

        self.server.validate()?;
        self.batching
            .to_batcher_config()
            .validate()
            .map_err(|e| section_err("batching", e))?;
        self.default_policy
            .to_policy()
            .validate()
            .map_err(|e| section_err("default_policy", e))?;
        self.backend.validate()?;

        let mut seen = std::collections::HashSet::new();
        for t in &self.tenants {
            if t.id.is_empty() {
                return Err(BatchGateError::BadRequest("tenants[].id must not be empty".into()));
            }
            if !seen.insert(t.id.as_str()) {
                return Err(BatchGateError::BadRequest(format!("duplicate tenant id: {}", t.id)));
            }
            t.policy()
                .validate()
                .map_err(|e| section_err(&format!("tenant {}", t.id), e))?;
        }

        let mut slugs = std::collections::HashSet::new();
        for a in &self.agents {
            if a.slug.is_empty() {
                return Err(BatchGateError::BadRequest("agents[].slug must not be empty".into()));
            }
            if !slugs.insert(a.slug.as_str()) {
                return Err(BatchGateError::BadRequest(format!("duplicate agent slug: {}", a.slug)));
            }
            a.batcher_config(&self.batching)
                .validate()
                .map_err(|e| section_err(&format!("agent {}", a.slug), e))?;
        }

        for s in &self.autostart {
            if !slugs.contains(s.slug.as_str()) {
                return Err(BatchGateError::BadRequest(format!(
                    "autostart references unknown agent slug: {}",
                    s.slug
                )));
            }
            if !(1..=crate::dispatch::MAX_COPIES).contains(&s.copies) {
                return Err(BatchGateError::BadRequest(format!(
                    "autostart.copies must be between 1 and {}",
                    crate::dispatch::MAX_COPIES
                )));
            }
            if s.name_prefix.is_empty() {
                return Err(BatchGateError::BadRequest("autostart.name_prefix must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Slug catalog for the target registry.
    pub fn catalog(&self) -> AgentCatalog {
        self.agents.iter().fold(AgentCatalog::new(), |c, a| {
            c.with_agent(a.slug.clone(), a.batcher_config(&self.batching))
        })
    }
}

fn section_err(section: &str, e: BatchGateError) -> BatchGateError {
    match e {
        BatchGateError::BadRequest(msg) => BatchGateError::BadRequest(format!("{section}: {msg}")),
        other => other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(BatchGateError::BadRequest(
                "server.listen must be a valid socket address".into(),
            ));
        }
        if self.shutdown_grace_ms > 300_000 {
            return Err(BatchGateError::BadRequest(
                "server.shutdown_grace_ms must be at most 300000".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchingSection {
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
}

impl Default for BatchingSection {
    fn default() -> Self {
        Self {
            max_queue: default_max_queue(),
            max_batch: default_max_batch(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

impl BatchingSection {
    pub fn to_batcher_config(&self) -> BatcherConfig {
        BatcherConfig::new(self.max_queue, self.max_batch, self.max_latency_ms)
    }
}

fn default_max_queue() -> usize {
    1024
}
fn default_max_batch() -> usize {
    8
}
fn default_max_latency_ms() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PolicySection {
    /// Unvalidated; call `validate()` on the result.
    pub fn to_policy(&self) -> TenantPolicy {
        TenantPolicy {
            rate: self.rate,
            burst: self.burst,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

fn default_rate() -> f64 {
    20.0
}
fn default_burst() -> u32 {
    40
}
fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl TenantConfig {
    pub fn policy(&self) -> TenantPolicy {
        TenantPolicy {
            rate: self.rate,
            burst: self.burst,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Echo,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,

    /// Artificial per-batch latency of the echo backend.
    #[serde(default)]
    pub latency_ms: u64,

    /// Id of the direct provider used when a query names no target.
    #[serde(default = "default_direct_id")]
    pub direct_id: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            latency_ms: 0,
            direct_id: default_direct_id(),
        }
    }
}

impl BackendSection {
    pub fn validate(&self) -> Result<()> {
        if self.latency_ms > 60_000 {
            return Err(BatchGateError::BadRequest(
                "backend.latency_ms must be at most 60000".into(),
            ));
        }
        if self.direct_id.is_empty() {
            return Err(BatchGateError::BadRequest("backend.direct_id must not be empty".into()));
        }
        Ok(())
    }
}

fn default_direct_id() -> String {
    "direct".into()
}

/// Agent slug with optional batching overrides on top of `batching`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub slug: String,
    #[serde(default)]
    pub max_queue: Option<usize>,
    #[serde(default)]
    pub max_batch: Option<usize>,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
}

impl AgentConfig {
    pub fn batcher_config(&self, base: &BatchingSection) -> BatcherConfig {
        BatcherConfig::new(
            self.max_queue.unwrap_or(base.max_queue),
            self.max_batch.unwrap_or(base.max_batch),
            self.max_latency_ms.unwrap_or(base.max_latency_ms),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutostartConfig {
    pub slug: String,
    pub name_prefix: String,
    #[serde(default = "default_copies")]
    pub copies: usize,
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

fn default_copies() -> usize {
    1
}
pub(crate) fn default_tenant() -> String {
    "default".into()
}
