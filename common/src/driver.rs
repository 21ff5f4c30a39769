use tracing::{info, warn};

use crate::access::CfamAccess;
use crate::hal::SysFs;
use crate::local::LocalBmc;
use crate::sibling::{Publisher, SiblingBmc, SiblingCfam};

/// Ties the local writer to the sibling reader.
///
/// The sibling side is only built once its CFAM shows up, and each poll
/// feeds the sibling's liveness back into the local comms OK field.
pub struct CfamDriver<S, P> {
    local: LocalBmc<S>,
    pending: Option<(CfamAccess<S>, P)>,
    sibling: Option<SiblingBmc<S, P>>,
}

impl<S: SysFs, P: Publisher> CfamDriver<S, P> {
    /// `sibling` is the access for the sibling's link and the publisher
    /// for its fields, or `None` when there is no sibling to watch.
    pub fn new(local: LocalBmc<S>, sibling: Option<(CfamAccess<S>, P)>) -> Self {
        Self {
            local,
            pending: sibling,
            sibling: None,
        }
    }

    pub fn local(&self) -> &LocalBmc<S> {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut LocalBmc<S> {
        &mut self.local
    }

    pub fn sibling(&self) -> Option<&SiblingBmc<S, P>> {
        self.sibling.as_ref()
    }

    /// Runs a single replication step. Returns whether the sibling is alive.
    pub fn poll(&mut self) -> bool {
        if self.sibling.is_none() && self.pending.as_ref().is_some_and(|(a, _)| a.exists()) {
            if let Some((access, publisher)) = self.pending.take() {
                info!(link = access.link(), "sibling CFAM found");
                self.sibling = Some(SiblingBmc::new(SiblingCfam::new(access), publisher));
            }
        }

        let alive = match self.sibling.as_mut() {
            Some(sibling) => sibling.read(),
            None => false,
        };

        // Tried again on the next poll since the cached value didn't change.
        if let Err(e) = self.local.set_sibling_comms_ok(alive) {
            warn!(err = %e, alive, "failed updating sibling comms OK");
        }

        alive
    }

    /// Takes down anything published about the sibling.
    pub fn shutdown(&mut self) {
        if let Some(sibling) = self.sibling.as_mut() {
            sibling.retract();
        }
    }
}
