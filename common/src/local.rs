//! Writer side: keeps this BMC's own CFAM fields up to date.

use tracing::{error, info};

use crate::access::{CfamAccess, RetryPolicy};
use crate::error::{CfamError, Result};
use crate::fields::{create_modify_op, max_value, Hex};
use crate::hal::SysFs;
use crate::registers::{BmcState, Field, Role};
use crate::services::{LocalIdentity, StateEvent, StateProvider};

pub const API_VERSION: u8 = 0x01;

/// The CFAM on the local BMC's card. Handles writing fields into it.
pub struct LocalCfam<S> {
    access: CfamAccess<S>,
    /// Last heartbeat written. `None` until the first increment reads the
    /// hardware value back.
    heartbeat: Option<u32>,
    max_heartbeat: u32,
}

impl<S: SysFs> LocalCfam<S> {
    /// Reads done on behalf of a write are retried once.
    pub fn new(access: CfamAccess<S>) -> Self {
        Self {
            access: access.with_retry(RetryPolicy::Once),
            heartbeat: None,
            max_heartbeat: max_value(Field::Heartbeat.meta().num_bits),
        }
    }

    pub fn access(&self) -> &CfamAccess<S> {
        &self.access
    }

    pub fn is_ready(&self) -> bool {
        self.access.exists()
    }

    /// Writes a right justified value into a field.
    pub fn write_field(&self, field: Field, value: u32) -> Result<()> {
        let meta = field.meta();
        if value > max_value(meta.num_bits) {
            return Err(CfamError::ValueTooWide {
                field,
                value,
                num_bits: meta.num_bits,
            });
        }

        let op = create_modify_op(meta, value);
        self.access.write_scratch_reg_with_mask(&op).inspect_err(|e| {
            error!(?field, value = %Hex(value), err = %e, "failed writing field in local CFAM");
        })
    }

    pub fn read_field(&self, field: Field) -> Result<u32> {
        self.access.read_field(field)
    }

    pub fn write_api_version(&self, version: u8) -> Result<()> {
        self.write_field(Field::ApiVersion, version.into())
    }

    pub fn write_fw_version(&self, version: u32) -> Result<()> {
        self.write_field(Field::FwVersion, version)
    }

    pub fn write_bmc_position(&self, position: u32) -> Result<()> {
        self.write_field(Field::BmcPosition, position)
    }

    pub fn write_provisioned(&self, provisioned: bool) -> Result<()> {
        self.write_field(Field::Provisioned, provisioned.into())
    }

    pub fn write_redundancy_enabled(&self, enabled: bool) -> Result<()> {
        self.write_field(Field::RedundancyEnabled, enabled.into())
    }

    pub fn write_failovers_paused(&self, paused: bool) -> Result<()> {
        self.write_field(Field::FailoversPaused, paused.into())
    }

    pub fn write_role(&self, role: Role) -> Result<()> {
        self.write_field(Field::Role, role as u32)
    }

    pub fn write_bmc_state(&self, state: BmcState) -> Result<()> {
        self.write_field(Field::BmcState, state as u32)
    }

    pub fn write_sibling_comms_ok(&self, ok: bool) -> Result<()> {
        self.write_field(Field::SiblingCommsOk, ok.into())
    }

    /// Increments the heartbeat field, wrapping to 0 after the field's max.
    ///
    /// The first call resumes from the value already in the hardware so a
    /// restart doesn't reset the count.
    pub fn inc_heartbeat(&mut self) -> Result<()> {
        let current = match self.heartbeat {
            Some(value) => value,
            None => self.read_field(Field::Heartbeat).inspect_err(|e| {
                error!(err = %e, "failed reading heartbeat from local CFAM");
            })?,
        };

        let next = if current >= self.max_heartbeat { 0 } else { current + 1 };
        self.write_field(Field::Heartbeat, next)?;
        self.heartbeat = Some(next);
        Ok(())
    }
}

/// The local BMC: writes data about this BMC into its own CFAM so the
/// sibling can read it.
pub struct LocalBmc<S> {
    cfam: LocalCfam<S>,
    sibling_ok: bool,
}

impl<S: SysFs> LocalBmc<S> {
    pub fn new(cfam: LocalCfam<S>) -> Self {
        Self {
            cfam,
            sibling_ok: false,
        }
    }

    pub fn sibling_comms_ok(&self) -> bool {
        self.sibling_ok
    }

    /// Writes the initial field values. The CFAM must already be ready.
    ///
    /// Identity fields and the sibling comms flag must land; any failure
    /// there is returned. Role, redundancy and state come from `provider`
    /// and are skipped if it isn't available yet.
    pub fn start<P: StateProvider + ?Sized>(
        &mut self,
        identity: &LocalIdentity,
        provider: &mut P,
    ) -> Result<()> {
        if !self.cfam.is_ready() {
            return Err(CfamError::NotReady {
                link: self.cfam.access().link(),
            });
        }

        self.cfam.write_api_version(API_VERSION)?;
        self.cfam.write_fw_version(identity.fw_version)?;
        self.cfam.write_bmc_position(identity.bmc_position)?;
        // TODO: source from the provisioning state once something owns it.
        self.cfam.write_provisioned(false)?;
        self.cfam.write_sibling_comms_ok(false)?;
        self.sibling_ok = false;

        self.write_redundancy_props(provider);
        self.write_bmc_state(provider);

        info!(
            link = self.cfam.access().link(),
            fw_version = %Hex(identity.fw_version),
            position = identity.bmc_position,
            "local CFAM initialized"
        );
        Ok(())
    }

    fn write_redundancy_props<P: StateProvider + ?Sized>(&mut self, provider: &mut P) {
        match provider.redundancy_props() {
            Ok((role, enabled)) => {
                info!(%role, enabled, "initial values of local role and redundancy enabled");
                let _ = self.cfam.write_role(role);
                let _ = self.cfam.write_redundancy_enabled(enabled);
                let _ = self.cfam.write_failovers_paused(false);
            }
            Err(e) => info!(err = %e, "redundancy interface not available"),
        }
    }

    fn write_bmc_state<P: StateProvider + ?Sized>(&mut self, provider: &mut P) {
        match provider.bmc_state() {
            Ok(state) => {
                info!(%state, "initial value of local BMC state");
                let _ = self.cfam.write_bmc_state(state);
            }
            Err(e) => info!(err = %e, "local BMC state not available"),
        }
    }

    // Write failures on these paths were already logged by the writer and
    // the next change rewrites the field.

    pub fn on_state_changed(&mut self, state: BmcState) {
        info!(%state, "local BMC state changed");
        let _ = self.cfam.write_bmc_state(state);
    }

    pub fn on_role_changed(&mut self, role: Role) {
        info!(%role, "local role changed");
        let _ = self.cfam.write_role(role);
    }

    pub fn on_redundancy_enabled_changed(&mut self, enabled: bool) {
        info!(enabled, "local redundancy enabled changed");
        let _ = self.cfam.write_redundancy_enabled(enabled);
    }

    pub fn handle_event(&mut self, event: StateEvent) {
        match event {
            StateEvent::BmcState(state) => self.on_state_changed(state),
            StateEvent::Role(role) => self.on_role_changed(role),
            StateEvent::RedundancyEnabled(enabled) => self.on_redundancy_enabled_changed(enabled),
            StateEvent::InterfacesAdded {
                bmc_state,
                role,
                redundancy_enabled,
            } => {
                if let Some(state) = bmc_state {
                    self.on_state_changed(state);
                }
                if let Some(role) = role {
                    self.on_role_changed(role);
                }
                if let Some(enabled) = redundancy_enabled {
                    self.on_redundancy_enabled_changed(enabled);
                }
            }
        }
    }

    /// Advances the heartbeat. A failure here means the sibling will see
    /// this BMC as hung, so it is returned to the caller.
    pub fn inc_heartbeat(&mut self) -> Result<()> {
        self.cfam.inc_heartbeat()
    }

    /// Only touches the register when the value changes.
    pub fn set_sibling_comms_ok(&mut self, ok: bool) -> Result<()> {
        if ok == self.sibling_ok {
            return Ok(());
        }

        self.cfam.write_sibling_comms_ok(ok)?;
        self.sibling_ok = ok;
        info!(ok, "sibling communication OK changed");
        Ok(())
    }
}
