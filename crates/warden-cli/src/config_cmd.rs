//! `warden config`: print the effective configuration.

use anyhow::{Context, Result};
use warden_core::WardenConfig;

pub fn execute(config: &WardenConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("failed to render configuration")?;
    print!("{yaml}");
    Ok(())
}
