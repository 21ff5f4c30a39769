//! BMC state and redundancy role, as published by the redundancy manager in
//! a small JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use cfam_common::{BmcState, CfamError, Result, Role, StateEvent, StateProvider};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct StateSnapshot {
    bmc_state: Option<BmcState>,
    role: Option<Role>,
    redundancy_enabled: Option<bool>,
}

/// Reads the state file on demand and turns changes into `StateEvent`s.
///
/// A missing or unreadable file means the interface isn't there yet.
pub struct StateFile {
    path: PathBuf,
    last: Option<StateSnapshot>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StateSnapshot> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            CfamError::ProviderUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CfamError::ProviderUnavailable(format!("{}: {e}", self.path.display()))
        })
    }

    fn load_and_remember(&mut self) -> Result<StateSnapshot> {
        let result = self.load();
        self.last = result.as_ref().ok().copied();
        result
    }

    /// Rereads the file and reports what changed since the last look.
    pub fn poll_changes(&mut self) -> Vec<StateEvent> {
        let previous = self.last;
        let current = match self.load_and_remember() {
            Ok(current) => current,
            Err(e) => {
                if previous.is_some() {
                    info!(err = %e, "BMC state no longer available");
                }
                return Vec::new();
            }
        };

        let Some(previous) = previous else {
            debug!(path = %self.path().display(), "BMC state appeared");
            if current == StateSnapshot::default() {
                return Vec::new();
            }
            return vec![StateEvent::InterfacesAdded {
                bmc_state: current.bmc_state,
                role: current.role,
                redundancy_enabled: current.redundancy_enabled,
            }];
        };

        let mut events = Vec::new();
        if current.bmc_state != previous.bmc_state {
            events.extend(current.bmc_state.map(StateEvent::BmcState));
        }
        if current.role != previous.role {
            events.extend(current.role.map(StateEvent::Role));
        }
        if current.redundancy_enabled != previous.redundancy_enabled {
            events.extend(current.redundancy_enabled.map(StateEvent::RedundancyEnabled));
        }
        events
    }
}

impl StateProvider for StateFile {
    fn bmc_state(&mut self) -> Result<BmcState> {
        self.load_and_remember()?
            .bmc_state
            .ok_or_else(|| CfamError::ProviderUnavailable("BMC state not set".into()))
    }

    fn redundancy_props(&mut self) -> Result<(Role, bool)> {
        let snapshot = self.load_and_remember()?;
        match (snapshot.role, snapshot.redundancy_enabled) {
            (Some(role), Some(enabled)) => Ok((role, enabled)),
            _ => Err(CfamError::ProviderUnavailable(
                "redundancy properties not set".into(),
            )),
        }
    }
}
