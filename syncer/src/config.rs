use anyhow::Context;
use sync_config::load_config;
use sync_config::shared::SyncConfig;

/// Loads and validates the syncer configuration.
///
/// Uses the standard configuration loading mechanism from [`sync_config`] and validates the
/// resulting [`SyncConfig`] before returning it.
pub fn load_sync_config() -> anyhow::Result<SyncConfig> {
    let config = load_config::<SyncConfig>().context("loading syncer configuration")?;
    config.validate().context("validating syncer configuration")?;

    Ok(config)
}
