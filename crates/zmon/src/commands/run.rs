//! `zmon run`: host a broker and the device actor until Ctrl-C.

use tracing::info;

use zmon_api::Broker;
use zmon_config::{DeviceConfig, Settings};
use zmon_core::DeviceActor;
use zmon_core::config::{ADDRESS_PATH, ENDPOINT_PATH};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let settings = zmon_config::load_settings()?;
    let device = device_config(args, &settings)?;

    let path = device.path.display().to_string();
    let endpoint = device
        .tree
        .endpoint()
        .ok_or_else(|| missing(ENDPOINT_PATH, &path))?
        .to_owned();
    if device.tree.address().is_none() {
        return Err(missing(ADDRESS_PATH, &path));
    }

    let broker = Broker::bind(&endpoint).map_err(|source| CliError::BindFailed {
        endpoint: endpoint.clone(),
        source,
    })?;

    let actor = DeviceActor::spawn();
    actor.configure(device.text()).await?;
    if settings.verbose || global.verbose > 0 {
        actor.verbose().await?;
    }
    actor.start().await?;
    info!(endpoint = %broker.endpoint(), config = %path, "device actor running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    actor.stop().await?;
    actor.terminate().await?;
    Ok(())
}

/// The device configuration named on the command line, or else by the
/// settings, with setting overrides applied.
fn device_config(args: RunArgs, settings: &Settings) -> Result<DeviceConfig, CliError> {
    let path = args
        .config
        .or_else(|| settings.device_config.clone())
        .ok_or_else(|| CliError::NoDeviceConfig {
            path: zmon_config::config_path().display().to_string(),
        })?;

    let mut device = DeviceConfig::load(path)?;
    device.apply(settings);
    Ok(device)
}

fn missing(key: &str, path: &str) -> CliError {
    CliError::MissingSetting {
        key: key.into(),
        path: path.into(),
    }
}
