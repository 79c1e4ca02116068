use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use batchgate_core::error::{BatchGateError, Result};

use crate::batching::BatchForward;
use crate::pipeline::{AdmissionPipeline, PipelineStats};

/// An agent instance: one admission pipeline (gate + batcher) of its own.
pub struct AgentTask {
    id: String,
    slug: String,
    tenant: String,
    created_at: f64,
    pipeline: AdmissionPipeline<Value, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent: String,
    pub task_id: String,
    pub name: String,
    pub tenant: String,
    pub ready: bool,
    pub created_at: f64,
}

impl AgentTask {
    pub fn new(
        id: impl Into<String>,
        slug: impl Into<String>,
        tenant: impl Into<String>,
        pipeline: AdmissionPipeline<Value, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            slug: slug.into(),
            tenant: tenant.into(),
            created_at: unix_now(),
            pipeline,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Ready once its batcher is consuming.
    pub fn is_ready(&self) -> bool {
        self.pipeline.is_running()
    }

    pub fn pipeline(&self) -> &AdmissionPipeline<Value, Value> {
        &self.pipeline
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            agent: self.slug.clone(),
            task_id: self.id.clone(),
            name: self.id.clone(),
            tenant: self.tenant.clone(),
            ready: self.is_ready(),
            created_at: self.created_at,
        }
    }

    pub async fn submit(&self, tenant: &str, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        self.pipeline.query(tenant, payload, timeout).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectStats {
    pub calls: u64,
    pub failures: u64,
    pub timeouts: u64,
}

/// Unbatched path: one forward call per request, no queue and no gate.
pub struct DirectProvider {
    id: String,
    forward: Arc<dyn BatchForward<Value, Value>>,
    timeout: Duration,
    calls: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl DirectProvider {
    pub fn new(
        id: impl Into<String>,
        forward: Arc<dyn BatchForward<Value, Value>>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            forward,
            timeout,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn submit(&self, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let wait = timeout.map_or(self.timeout, |t| t.min(self.timeout));

        let res = match tokio::time::timeout(wait, self.forward.forward(vec![payload])).await {
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(BatchGateError::Timeout);
            }
            Ok(Err(e)) => Err(e.into_backend()),
            Ok(Ok(mut outputs)) if outputs.len() == 1 => outputs
                .pop()
                .ok_or_else(|| BatchGateError::Internal("output vanished".into())),
            Ok(Ok(outputs)) => Err(BatchGateError::Backend(format!(
                "forward returned {} outputs for a single request",
                outputs.len()
            ))),
        };
        if res.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    pub fn stats(&self) -> DirectStats {
        DirectStats {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Something a query can be sent to. The variant is fixed when the target is
/// registered; callers never probe for capabilities.
#[derive(Clone)]
pub enum QueryTarget {
    Agent(Arc<AgentTask>),
    Direct(Arc<DirectProvider>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetStats {
    Agent {
        status: AgentStatus,
        pipeline: PipelineStats,
    },
    Direct {
        id: String,
        stats: DirectStats,
    },
}

impl QueryTarget {
    pub fn id(&self) -> &str {
        match self {
            QueryTarget::Agent(a) => a.id(),
            QueryTarget::Direct(d) => d.id(),
        }
    }

    pub async fn submit(&self, tenant: &str, payload: Value, timeout: Option<Duration>) -> Result<Value> {
        match self {
            QueryTarget::Agent(a) => a.submit(tenant, payload, timeout).await,
            QueryTarget::Direct(d) => d.submit(payload, timeout).await,
        }
    }

    pub fn stats(&self) -> TargetStats {
        match self {
            QueryTarget::Agent(a) => TargetStats::Agent {
                status: a.status(),
                pipeline: a.pipeline().stats(),
            },
            QueryTarget::Direct(d) => TargetStats::Direct {
                id: d.id().to_string(),
                stats: d.stats(),
            },
        }
    }

    /// Stop accepting work. Direct providers hold no queue.
    pub async fn close(&self) {
        if let QueryTarget::Agent(a) = self {
            a.pipeline().close().await;
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoForward;
    use crate::batching::{forward_fn, BatcherConfig};
    use serde_json::json;

    #[tokio::test]
    async fn direct_provider_forwards_single_payload() {
        let d = DirectProvider::new("direct", Arc::new(EchoForward::default()), Duration::from_secs(1));
        let out = d.submit(json!({"question": "hi"}), None).await.unwrap();
        assert_eq!(out["echo"]["question"], "hi");
        assert_eq!(out["batch_size"], 1);
        assert_eq!(d.stats().calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_provider_times_out() {
        let d = DirectProvider::new(
            "slow",
            Arc::new(EchoForward::new(Duration::from_secs(10))),
            Duration::from_secs(30),
        );
        let err = d.submit(json!(1), Some(Duration::from_millis(20))).await.unwrap_err();
        assert_eq!(err, BatchGateError::Timeout);
        assert_eq!(d.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn direct_provider_rejects_wrong_output_count() {
        let forward: Arc<dyn BatchForward<Value, Value>> =
            Arc::new(forward_fn(|_batch: Vec<Value>| async move { Ok(vec![json!(1), json!(2)]) }));
        let d = DirectProvider::new("bad", forward, Duration::from_secs(1));
        let err = d.submit(json!(0), None).await.unwrap_err();
        assert!(matches!(err, BatchGateError::Backend(_)));
        assert_eq!(d.stats().failures, 1);
    }

    #[tokio::test]
    async fn agent_target_goes_through_its_pipeline() {
        let pipeline = AdmissionPipeline::<Value, Value>::new(
            BatcherConfig::new(8, 4, 1),
            Arc::new(EchoForward::default()),
        )
        .unwrap();
        let agent = Arc::new(AgentTask::new("boot-retriever-0", "retriever", "default", pipeline));
        assert!(!agent.is_ready());
        agent.pipeline().start().unwrap();
        assert!(agent.is_ready());

        let target = QueryTarget::Agent(agent.clone());
        assert_eq!(target.id(), "boot-retriever-0");
        let out = target.submit("acme", json!("q"), None).await.unwrap();
        assert_eq!(out["echo"], "q");

        match target.stats() {
            TargetStats::Agent { status, pipeline } => {
                assert_eq!(status.agent, "retriever");
                assert!(status.ready);
                assert_eq!(pipeline.gatekeeper.admitted, 1);
            }
            other => panic!("unexpected stats: {other:?}"),
        }
        target.close().await;
        assert!(!agent.is_ready());
    }
}
