use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use cfam_common::{
    CfamAccess, CfamDriver, CfamError, LocalBmc, LocalCfam, RetryPolicy, SysFsImpl,
};

use crate::config::DaemonConfig;
use crate::publish::JsonFilePublisher;
use crate::startup::{local_identity, wait_for_cfam};
use crate::state::StateFile;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Cfam(#[from] CfamError),

    #[error("unable to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// The signals that stop the daemon. Both streams are registered once and
/// live for the whole run.
pub struct Shutdown {
    interrupt: Signal,
    terminate: Signal,
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next stop signal and names it.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "interrupted",
            _ = self.terminate.recv() => "terminated",
        }
    }
}

/// Brings up the local CFAM, then runs the replication loop until asked to
/// stop or the heartbeat can no longer be written.
pub async fn run(config: DaemonConfig) -> Result<(), AppError> {
    let sysfs = SysFsImpl;
    let local = LocalCfam::new(CfamAccess::new(config.local_link, sysfs).with_root(&config.sysfs_root));

    wait_for_cfam(
        || local.is_ready(),
        config.local_link,
        Duration::from_millis(config.cfam_wait_poll_ms),
        Duration::from_secs(config.cfam_wait_timeout_secs),
    )
    .await?;

    let identity = local_identity(&config)?;
    let mut provider = StateFile::new(&config.state_file);

    let mut local = LocalBmc::new(local);
    local.start(&identity, &mut provider)?;

    let sibling = config.sibling_link.map(|link| {
        let retry = if config.sibling_read_retry {
            RetryPolicy::Once
        } else {
            RetryPolicy::None
        };
        let access = CfamAccess::new(link, sysfs)
            .with_root(&config.sysfs_root)
            .with_retry(retry);
        (access, JsonFilePublisher::new(&config.sibling_view_file))
    });
    let mut driver = CfamDriver::new(local, sibling);

    let mut shutdown = Shutdown::new().map_err(AppError::Signal)?;

    let mut poll_timer = interval(Duration::from_millis(config.poll_interval_ms));
    poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat_timer = interval(Duration::from_millis(config.heartbeat_interval_ms));
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        local_link = config.local_link,
        sibling_link = ?config.sibling_link,
        "cfamd running"
    );

    let result = loop {
        tokio::select! {
            reason = shutdown.recv() => {
                info!(reason, "stopping");
                break Ok(());
            }

            _ = heartbeat_timer.tick() => {
                if let Err(e) = driver.local_mut().inc_heartbeat() {
                    error!(err = %e, "unable to advance heartbeat");
                    break Err(e.into());
                }
            }

            _ = poll_timer.tick() => {
                for event in provider.poll_changes() {
                    driver.local_mut().handle_event(event);
                }
                driver.poll();
            }
        }
    };

    driver.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tokio::time::timeout;

    fn send_interrupt() {
        let status = Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_shutdown_sees_repeated_interrupts() {
        let mut shutdown = Shutdown::new().unwrap();

        // The same handler observes every delivery, not just the first.
        for _ in 0..2 {
            send_interrupt();
            let reason = timeout(Duration::from_secs(5), shutdown.recv()).await.unwrap();
            assert_eq!(reason, "interrupted");
        }
    }
}
