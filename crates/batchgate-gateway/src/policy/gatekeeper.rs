use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use batchgate_core::error::{BatchGateError, Result};
use batchgate_core::limiter::TokenBucket;

use crate::obs::PipelineMetrics;

/// Per-tenant admission policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantPolicy {
    /// Sustained requests per second.
    pub rate: f64,
    /// Bucket capacity (maximum burst).
    pub burst: u32,
    /// How long an admitted request may wait for its result.
    pub timeout: Duration,
}

impl TenantPolicy {
    pub fn new(rate: f64, burst: u32, timeout: Duration) -> Result<Self> {
        let p = Self {
            rate,
            burst,
            timeout,
        };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(BatchGateError::BadRequest(format!(
                "policy rate must be > 0, got {}",
                self.rate
            )));
        }
        if self.burst == 0 {
            return Err(BatchGateError::BadRequest("policy burst must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(BatchGateError::BadRequest("policy timeout must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            rate: 20.0,
            burst: 40,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where admitted work goes.
#[async_trait]
pub trait Submitter<I, O>: Send + Sync {
    async fn submit(&self, payload: I, timeout: Duration) -> Result<O>;
}

/// One tenant's bucket; the lock covers exactly one refill-check-consume.
#[derive(Debug)]
struct SharedBucket {
    inner: Mutex<TokenBucket>,
}

impl SharedBucket {
    fn new(policy: &TenantPolicy) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(TokenBucket::new(policy.rate, policy.burst)?),
        })
    }

    fn allow(&self) -> bool {
        // Poisoned mutex means logic bug; deny instead of panic.
        match self.inner.lock() {
            Ok(mut b) => b.allow(),
            Err(_) => false,
        }
    }

    fn available(&self) -> f64 {
        self.inner.lock().map(|b| b.available()).unwrap_or(0.0)
    }
}

struct TenantEntry {
    policy: TenantPolicy,
    bucket: Arc<SharedBucket>,
}

impl TenantEntry {
    fn new(policy: TenantPolicy) -> Result<Self> {
        let bucket = Arc::new(SharedBucket::new(&policy)?);
        Ok(Self { policy, bucket })
    }
}

#[derive(Default)]
struct GateCounters {
    admitted: AtomicU64,
    rejected_rate_limited: AtomicU64,
    rejected_queue_full: AtomicU64,
    timeouts: AtomicU64,
    backend_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatekeeperStats {
    pub tenants: usize,
    pub admitted: u64,
    pub rejected_rate_limited: u64,
    pub rejected_queue_full: u64,
    pub timeouts: u64,
    pub backend_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSnapshot {
    pub tenant: String,
    pub rate: f64,
    pub burst: u32,
    pub timeout_ms: u64,
    pub tokens_available: f64,
}

/// Tenant-scoped rate limiter in front of a [`Submitter`].
///
/// Unknown tenants get the default policy on first sight. The tenant map is
/// sharded and each bucket has its own lock, so tenants never contend.
pub struct Gatekeeper<I, O> {
    submit: Arc<dyn Submitter<I, O>>,
    default_policy: TenantPolicy,
    tenants: DashMap<String, TenantEntry>,
    counters: GateCounters,
    observer: Option<(String, Arc<PipelineMetrics>)>,
}

impl<I, O> Gatekeeper<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(submit: Arc<dyn Submitter<I, O>>) -> Self {
        Self {
            submit,
            default_policy: TenantPolicy::default(),
            tenants: DashMap::new(),
            counters: GateCounters::default(),
            observer: None,
        }
    }

    /// Policy materialized for tenants that were never configured.
    pub fn with_default_policy(mut self, policy: TenantPolicy) -> Result<Self> {
        policy.validate()?;
        self.default_policy = policy;
        Ok(self)
    }

    pub fn with_metrics(mut self, target: impl Into<String>, metrics: Arc<PipelineMetrics>) -> Self {
        self.observer = Some((target.into(), metrics));
        self
    }

    /// Replace a tenant's policy. The bucket starts over full; no tokens
    /// carry over from the previous policy.
    pub fn set_policy(&self, tenant: &str, rate: f64, burst: u32, timeout: Duration) -> Result<()> {
        self.set_tenant_policy(tenant, TenantPolicy::new(rate, burst, timeout)?)
    }

    pub fn set_tenant_policy(&self, tenant: &str, policy: TenantPolicy) -> Result<()> {
        let entry = TenantEntry::new(policy)?;
        tracing::info!(
            tenant,
            rate = entry.policy.rate,
            burst = entry.policy.burst,
            timeout_ms = entry.policy.timeout.as_millis() as u64,
            "tenant policy set"
        );
        self.tenants.insert(tenant.to_string(), entry);
        Ok(())
    }

    /// Effective policy for `tenant` (the default if never seen).
    pub fn policy(&self, tenant: &str) -> TenantPolicy {
        self.tenants
            .get(tenant)
            .map(|e| e.policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Admit-or-reject, then submit with the tenant's timeout.
    pub async fn handle(&self, tenant: &str, payload: I) -> Result<O> {
        self.handle_within(tenant, payload, None).await
    }

    /// Like [`Gatekeeper::handle`], with the wait additionally capped by `cap`.
    pub async fn handle_within(&self, tenant: &str, payload: I, cap: Option<Duration>) -> Result<O> {
        let (policy_timeout, bucket) = self.resolve(tenant)?;

        if !bucket.allow() {
            self.counters
                .rejected_rate_limited
                .fetch_add(1, Ordering::Relaxed);
            self.record("rate_limited");
            tracing::debug!(tenant, "rate limited");
            return Err(BatchGateError::RateLimited);
        }

        let wait = match cap {
            Some(cap) => policy_timeout.min(cap),
            None => policy_timeout,
        };
        let res = self.submit.submit(payload, wait).await;

        match &res {
            Err(BatchGateError::QueueFull) => {
                self.counters
                    .rejected_queue_full
                    .fetch_add(1, Ordering::Relaxed);
                self.record("queue_full");
                tracing::debug!(tenant, "queue full");
            }
            Err(e) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.record("admitted");
                match e {
                    BatchGateError::Timeout => {
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    BatchGateError::Backend(_) => {
                        self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
            Ok(_) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.record("admitted");
            }
        }
        res
    }

    pub fn stats(&self) -> GatekeeperStats {
        let c = &self.counters;
        GatekeeperStats {
            tenants: self.tenants.len(),
            admitted: c.admitted.load(Ordering::Relaxed),
            rejected_rate_limited: c.rejected_rate_limited.load(Ordering::Relaxed),
            rejected_queue_full: c.rejected_queue_full.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            backend_errors: c.backend_errors.load(Ordering::Relaxed),
        }
    }

    pub fn tenants(&self) -> Vec<TenantSnapshot> {
        let mut out: Vec<TenantSnapshot> = self
            .tenants
            .iter()
            .map(|e| TenantSnapshot {
                tenant: e.key().clone(),
                rate: e.policy.rate,
                burst: e.policy.burst,
                timeout_ms: e.policy.timeout.as_millis() as u64,
                tokens_available: e.bucket.available(),
            })
            .collect();
        out.sort_by(|a, b| a.tenant.cmp(&b.tenant));
        out
    }

    fn resolve(&self, tenant: &str) -> Result<(Duration, Arc<SharedBucket>)> {
        if let Some(e) = self.tenants.get(tenant) {
            return Ok((e.policy.timeout, Arc::clone(&e.bucket)));
        }
        // Entry API holds the shard lock: concurrent first requests share one bucket.
        let e = self
            .tenants
            .entry(tenant.to_string())
            .or_try_insert_with(|| TenantEntry::new(self.default_policy.clone()))?;
        Ok((e.policy.timeout, Arc::clone(&e.bucket)))
    }

    // Tenant ids come from callers, so they stay out of metric labels.
    fn record(&self, outcome: &str) {
        if let Some((target, metrics)) = &self.observer {
            metrics
                .admission_decisions
                .inc(&[("target", target.as_str()), ("outcome", outcome)]);
        }
    }
}
