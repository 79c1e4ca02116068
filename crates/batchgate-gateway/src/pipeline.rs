//! Admission pipeline: rate check -> enqueue -> batch -> forward -> fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use batchgate_core::error::Result;

use crate::batching::{BatchForward, BatcherConfig, BatcherStats, MicroBatcher};
use crate::obs::PipelineMetrics;
use crate::policy::{Gatekeeper, GatekeeperStats, Submitter, TenantPolicy, TenantSnapshot};

#[async_trait]
impl<I, O> Submitter<I, O> for MicroBatcher<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn submit(&self, payload: I, timeout: Duration) -> Result<O> {
        MicroBatcher::submit(self, payload, timeout).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub gatekeeper: GatekeeperStats,
    pub batcher: BatcherStats,
}

/// Gatekeeper wired to a MicroBatcher it owns.
pub struct AdmissionPipeline<I, O> {
    gate: Gatekeeper<I, O>,
    batcher: Arc<MicroBatcher<I, O>>,
}

impl<I, O> AdmissionPipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(cfg: BatcherConfig, forward: Arc<dyn BatchForward<I, O>>) -> Result<Self> {
        Self::build(cfg, forward, TenantPolicy::default(), None)
    }

    /// Full constructor: default tenant policy plus an optional metrics sink
    /// labelled with `target`.
    pub fn build(
        cfg: BatcherConfig,
        forward: Arc<dyn BatchForward<I, O>>,
        default_policy: TenantPolicy,
        metrics: Option<(&str, Arc<PipelineMetrics>)>,
    ) -> Result<Self> {
        let mut batcher = MicroBatcher::new(cfg, forward)?;
        if let Some((target, m)) = &metrics {
            batcher = batcher.with_metrics(*target, Arc::clone(m));
        }
        let batcher = Arc::new(batcher);

        let submit: Arc<dyn Submitter<I, O>> = batcher.clone();
        let mut gate = Gatekeeper::new(submit).with_default_policy(default_policy)?;
        if let Some((target, m)) = metrics {
            gate = gate.with_metrics(target, m);
        }
        Ok(Self { gate, batcher })
    }

    pub fn start(&self) -> Result<()> {
        self.batcher.start()
    }

    pub async fn close(&self) {
        self.batcher.close().await
    }

    pub fn is_running(&self) -> bool {
        self.batcher.is_running()
    }

    pub fn set_policy(&self, tenant: &str, rate: f64, burst: u32, timeout: Duration) -> Result<()> {
        self.gate.set_policy(tenant, rate, burst, timeout)
    }

    pub fn set_tenant_policy(&self, tenant: &str, policy: TenantPolicy) -> Result<()> {
        self.gate.set_tenant_policy(tenant, policy)
    }

    /// Single entry point for callers. `timeout` caps the tenant's own
    /// admission timeout; it never extends it.
    pub async fn query(&self, tenant: &str, payload: I, timeout: Option<Duration>) -> Result<O> {
        self.gate.handle_within(tenant, payload, timeout).await
    }

    pub fn gatekeeper(&self) -> &Gatekeeper<I, O> {
        &self.gate
    }

    pub fn batcher(&self) -> &MicroBatcher<I, O> {
        &self.batcher
    }

    pub fn tenants(&self) -> Vec<TenantSnapshot> {
        self.gate.tenants()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            gatekeeper: self.gate.stats(),
            batcher: self.batcher.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::forward_fn;
    use batchgate_core::BatchGateError;
    use futures_util::future::join_all;

    fn doubling() -> Arc<dyn BatchForward<u64, u64>> {
        Arc::new(forward_fn(|batch: Vec<u64>| async move {
            Ok(batch.into_iter().map(|x| x * 2).collect())
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn query_runs_through_gate_and_batcher() {
        let p = AdmissionPipeline::new(BatcherConfig::new(16, 4, 5), doubling()).unwrap();
        p.start().unwrap();
        assert_eq!(p.query("acme", 21, None).await.unwrap(), 42);

        let s = p.stats();
        assert_eq!(s.gatekeeper.admitted, 1);
        assert_eq!(s.batcher.batches_formed, 1);
        p.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn queue_full_surfaces_through_the_gate() {
        let p = AdmissionPipeline::new(BatcherConfig::new(1, 4, 5), doubling()).unwrap();
        // Not started: the single queue slot stays occupied.
        let results = join_all((0..2).map(|i| p.query("acme", i, Some(Duration::from_millis(50))))).await;
        assert_eq!(results[1].clone().unwrap_err(), BatchGateError::QueueFull);
        assert_eq!(results[0].clone().unwrap_err(), BatchGateError::Timeout);

        let s = p.stats();
        assert_eq!(s.gatekeeper.rejected_queue_full, 1);
        assert_eq!(s.batcher.rejected_queue_full, 1);
        assert_eq!(s.batcher.timeouts, 1);
        p.close().await;
    }

    #[tokio::test]
    async fn closed_pipeline_rejects() {
        let p = AdmissionPipeline::new(BatcherConfig::default(), doubling()).unwrap();
        p.start().unwrap();
        p.close().await;
        assert!(!p.is_running());
        assert_eq!(p.query("acme", 1, None).await.unwrap_err(), BatchGateError::Closed);
    }
}
