//! Shared application state for the batchgate gateway.
//!
//! Builds the target registry from config, registers the default direct
//! provider and seeds tenant policies. Startup errors are returned, not
//! panicked.

use std::sync::Arc;
use std::time::Duration;

use batchgate_core::error::{BatchGateError, Result};

use crate::backend;
use crate::config::AppConfig;
use crate::dispatch::{DirectProvider, QueryTarget, TargetRegistry};
use crate::obs::PipelineMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: AppConfig,
    registry: TargetRegistry,
    metrics: Arc<PipelineMetrics>,
    default_target: String,
}

impl AppState {
    pub fn new(cfg: AppConfig) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(PipelineMetrics::default());
        let forward = backend::build_forward(&cfg.backend);
        let default_policy = cfg.default_policy.to_policy();
        let registry = TargetRegistry::new(
            cfg.catalog(),
            forward,
            default_policy.clone(),
            Arc::clone(&metrics),
        )?;

        for t in &cfg.tenants {
            registry.set_policy_all(&t.id, t.policy()).map_err(|e| {
                BatchGateError::BadRequest(format!("tenant policy failed (tenant={}): {e}", t.id))
            })?;
        }

        let default_target = cfg.backend.direct_id.clone();
        registry.insert(QueryTarget::Direct(Arc::new(DirectProvider::new(
            default_target.clone(),
            registry.forward(),
            default_policy.timeout,
        ))))?;

        tracing::info!(
            direct = %default_target,
            slugs = ?registry.catalog().slugs(),
            tenants = cfg.tenants.len(),
            "app state built"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                metrics,
                default_target,
            }),
        })
    }

    /// Start the agents listed under `autostart`. Needs a tokio runtime.
    pub fn autostart(&self) -> Result<usize> {
        let mut started = 0;
        for s in &self.inner.cfg.autostart {
            started += self
                .inner
                .registry
                .start_agents(&s.slug, &s.name_prefix, s.copies, &s.tenant)?
                .len();
        }
        Ok(started)
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.inner.registry
    }

    pub fn default_target(&self) -> &str {
        &self.inner.default_target
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.inner.cfg.server.shutdown_grace_ms)
    }

    /// Scrape-time values appended to `/metrics`.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let reg = &self.inner.registry;
        reg.refresh_gauges();
        vec![
            ("batchgate_targets", reg.len() as u64),
            ("batchgate_agents", reg.agents().len() as u64),
        ]
    }

    /// Stop accepting work and drain every batcher.
    pub async fn shutdown(&self) {
        self.inner.metrics.set_draining();
        self.inner.registry.close_all().await;
    }
}
