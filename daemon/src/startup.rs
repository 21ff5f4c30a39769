use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

use cfam_common::fields::Hex;
use cfam_common::services::{fw_version_hash, get_bmc_position, get_fw_version_id};
use cfam_common::{CfamError, LocalIdentity, Result};

use crate::config::DaemonConfig;

/// Waits for the FSI driver to create the CFAM's register files.
///
/// Early in boot the driver may not have bound yet, so this polls until
/// `ready` says so or `timeout` runs out.
pub async fn wait_for_cfam<F>(mut ready: F, link: usize, poll: Duration, timeout: Duration) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut logged = false;

    loop {
        if ready() {
            if logged {
                info!(link, "CFAM is ready");
            }
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(CfamError::NotReady { link });
        }

        if !logged {
            info!(link, timeout_secs = timeout.as_secs(), "waiting for CFAM");
            logged = true;
        }
        sleep(poll).await;
    }
}

/// Collects the identity fields written at startup.
pub fn local_identity(config: &DaemonConfig) -> Result<LocalIdentity> {
    let version_id = get_fw_version_id(&config.os_release)?;
    let fw_version = fw_version_hash(&version_id);

    let bmc_position = match config.bmc_position {
        Some(position) => position,
        None => get_bmc_position()?,
    };

    info!(%version_id, fw_version = %Hex(fw_version), bmc_position, "local identity");
    Ok(LocalIdentity {
        fw_version,
        bmc_position,
    })
}
