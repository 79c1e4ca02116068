use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use batchgate_core::error::{BatchGateError, Result};

use super::target::{AgentStatus, AgentTask, QueryTarget, TargetStats};
use crate::batching::{BatchForward, BatcherConfig};
use crate::obs::PipelineMetrics;
use crate::pipeline::AdmissionPipeline;
use crate::policy::TenantPolicy;

/// Upper bound on copies per bulk start.
pub const MAX_COPIES: usize = 64;

/// Agent slugs that may be started, with their batching limits.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    slugs: HashMap<String, BatcherConfig>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, slug: impl Into<String>, cfg: BatcherConfig) -> Self {
        self.slugs.insert(slug.into(), cfg);
        self
    }

    pub fn batcher_config(&self, slug: &str) -> Option<&BatcherConfig> {
        self.slugs.get(slug)
    }

    pub fn slugs(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.slugs.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

/// Owns every query target for the process lifetime.
///
/// Agents started here share the forward backend, the default tenant policy,
/// tenant overrides and the metrics sink; each gets its own batcher.
pub struct TargetRegistry {
    targets: DashMap<String, QueryTarget>,
    catalog: AgentCatalog,
    forward: Arc<dyn BatchForward<Value, Value>>,
    default_policy: TenantPolicy,
    // Tenant overrides, re-applied to agents started later.
    policies: DashMap<String, TenantPolicy>,
    metrics: Arc<PipelineMetrics>,
}

impl TargetRegistry {
    pub fn new(
        catalog: AgentCatalog,
        forward: Arc<dyn BatchForward<Value, Value>>,
        default_policy: TenantPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        default_policy.validate()?;
        Ok(Self {
            targets: DashMap::new(),
            catalog,
            forward,
            default_policy,
            policies: DashMap::new(),
            metrics,
        })
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn forward(&self) -> Arc<dyn BatchForward<Value, Value>> {
        Arc::clone(&self.forward)
    }

    /// Register a target under its id. Ids are unique.
    pub fn insert(&self, target: QueryTarget) -> Result<()> {
        match self.targets.entry(target.id().to_string()) {
            Entry::Occupied(e) => Err(BatchGateError::BadRequest(format!(
                "target already registered: {}",
                e.key()
            ))),
            Entry::Vacant(e) => {
                e.insert(target);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<QueryTarget> {
        self.targets.get(id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Unregister and close a target.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (_, target) = self
            .targets
            .remove(id)
            .ok_or_else(|| BatchGateError::NotFound(format!("target {id}")))?;
        target.close().await;
        self.metrics.remove_target(id);
        tracing::info!(target_id = id, "target removed");
        Ok(())
    }

    /// Start `copies` agents of `slug` named `{prefix}-{slug}-{i}`.
    /// Ids that already exist are returned as-is.
    pub fn start_agents(
        &self,
        slug: &str,
        name_prefix: &str,
        copies: usize,
        tenant: &str,
    ) -> Result<Vec<Arc<AgentTask>>> {
        if !(1..=MAX_COPIES).contains(&copies) {
            return Err(BatchGateError::BadRequest(format!(
                "copies must be between 1 and {MAX_COPIES}"
            )));
        }
        if name_prefix.is_empty() {
            return Err(BatchGateError::BadRequest("name_prefix must not be empty".into()));
        }
        let cfg = self
            .catalog
            .batcher_config(slug)
            .ok_or_else(|| BatchGateError::NotFound(format!("unknown agent slug: {slug}")))?
            .clone();

        let mut started = Vec::with_capacity(copies);
        for i in 0..copies {
            let id = format!("{name_prefix}-{slug}-{i}");
            let agent = match self.targets.entry(id.clone()) {
                Entry::Occupied(e) => match e.get() {
                    QueryTarget::Agent(a) => Arc::clone(a),
                    QueryTarget::Direct(_) => {
                        return Err(BatchGateError::BadRequest(format!(
                            "id {id} is taken by a direct provider"
                        )))
                    }
                },
                Entry::Vacant(e) => {
                    let agent = Arc::new(self.build_agent(&id, slug, tenant, cfg.clone())?);
                    agent.pipeline().start()?;
                    e.insert(QueryTarget::Agent(Arc::clone(&agent)));
                    tracing::info!(target_id = %id, slug, tenant, "agent started");
                    agent
                }
            };
            started.push(agent);
        }
        Ok(started)
    }

    fn build_agent(&self, id: &str, slug: &str, tenant: &str, cfg: BatcherConfig) -> Result<AgentTask> {
        let pipeline = AdmissionPipeline::build(
            cfg,
            Arc::clone(&self.forward),
            self.default_policy.clone(),
            Some((id, Arc::clone(&self.metrics))),
        )?;
        for p in self.policies.iter() {
            pipeline.set_tenant_policy(p.key(), p.value().clone())?;
        }
        Ok(AgentTask::new(id, slug, tenant, pipeline))
    }

    /// Apply a tenant policy to every agent, now and later.
    pub fn set_policy_all(&self, tenant: &str, policy: TenantPolicy) -> Result<usize> {
        policy.validate()?;
        self.policies.insert(tenant.to_string(), policy.clone());
        let mut applied = 0;
        for t in self.targets.iter() {
            if let QueryTarget::Agent(a) = t.value() {
                a.pipeline().set_tenant_policy(tenant, policy.clone())?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Registered ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.targets.iter().map(|t| t.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn agents(&self) -> Vec<AgentStatus> {
        let mut out: Vec<AgentStatus> = self
            .targets
            .iter()
            .filter_map(|t| match t.value() {
                QueryTarget::Agent(a) => Some(a.status()),
                QueryTarget::Direct(_) => None,
            })
            .collect();
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }

    pub fn stats(&self) -> BTreeMap<String, TargetStats> {
        self.targets
            .iter()
            .map(|t| (t.key().clone(), t.value().stats()))
            .collect()
    }

    /// Copy live queue depths into the metrics gauges (called at scrape time).
    pub fn refresh_gauges(&self) {
        for t in self.targets.iter() {
            if let QueryTarget::Agent(a) = t.value() {
                let depth = a.pipeline().batcher().queue_depth() as i64;
                self.metrics.queue_depth.set(&[("target", t.key().as_str())], depth);
            }
        }
    }

    /// Drain every batcher. Used on shutdown.
    pub async fn close_all(&self) {
        let targets: Vec<QueryTarget> = self.targets.iter().map(|t| t.value().clone()).collect();
        for t in targets {
            t.close().await;
        }
        tracing::info!(count = self.targets.len(), "all targets closed");
    }
}
