//! Query targets and the registry that owns them.
//!
//! A target is either an agent (its own admission pipeline) or a direct
//! provider (one unbatched forward call per request).

pub mod registry;
pub mod target;

pub use registry::{AgentCatalog, TargetRegistry, MAX_COPIES};
pub use target::{AgentStatus, AgentTask, DirectProvider, DirectStats, QueryTarget, TargetStats};
