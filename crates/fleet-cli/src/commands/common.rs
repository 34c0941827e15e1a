// Shared loading helpers

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use fleet_control::PolicyRegistry;
use fleet_core::FleetConfig;

/// Defaults, then the file if given, then `FLEET_*` overrides
pub fn load_config(path: Option<&Path>) -> Result<FleetConfig> {
    let config = FleetConfig::load(path).context("loading configuration")?;
    tracing::debug!(?path, "configuration loaded");
    Ok(config)
}

/// Policy tables from `file`, falling back to the configured `policy_file`
pub fn load_policies(config: &FleetConfig, file: Option<&Path>) -> Result<PolicyRegistry> {
    let path = file
        .or(config.policy_file.as_deref())
        .ok_or_else(|| anyhow!("no policy table: pass --file or set policy_file"))?;
    PolicyRegistry::load_from_file(path)
        .with_context(|| format!("loading policy tables from {}", path.display()))
}
