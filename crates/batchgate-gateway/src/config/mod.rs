//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use batchgate_core::error::{BatchGateError, Result};

pub use schema::{
    AgentConfig, AppConfig, AutostartConfig, BackendKind, BackendSection, BatchingSection,
    PolicySection, ServerSection, TenantConfig,
};

/// Environment variable naming the config file when no CLI argument is given.
pub const CONFIG_ENV: &str = "BATCHGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "batchgate.yaml";

/// First CLI argument, else `BATCHGATE_CONFIG`, else `batchgate.yaml`.
pub fn resolve_path(arg: Option<String>, env: Option<String>) -> String {
    arg.or(env)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BatchGateError::Internal(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig = serde_yaml::from_str(s)
        .map_err(|e| BatchGateError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
