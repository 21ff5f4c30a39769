//! Reader side: decodes the sibling BMC's CFAM fields and tracks its
//! heartbeat.

#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{info, warn};

use crate::access::CfamAccess;
use crate::error::{CfamError, Result};
use crate::fields::{get_field_value_from, RegMap};
use crate::hal::SysFs;
use crate::registers::{used_regs, BmcState, Field, Role};

/// Every catalog field decoded from one complete register read.
///
/// Role and BMC state are kept as the raw field values, since a sibling on
/// newer firmware may use values this build doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingFields {
    pub api_version: u8,
    pub bmc_position: u32,
    pub role_value: u32,
    pub redundancy_enabled: bool,
    pub failovers_paused: bool,
    pub provisioned: bool,
    pub bmc_state_value: u32,
    pub sibling_comms_ok: bool,
    pub heartbeat: u32,
    pub fw_version: u32,
}

impl SiblingFields {
    /// Decodes all fields at once. Only a register missing from `regs`
    /// fails.
    pub fn decode(regs: &RegMap) -> Result<Self> {
        let get = |field: Field| get_field_value_from(regs, field.meta());

        Ok(Self {
            // 8 bit field
            api_version: get(Field::ApiVersion)? as u8,
            bmc_position: get(Field::BmcPosition)?,
            role_value: get(Field::Role)?,
            redundancy_enabled: get(Field::RedundancyEnabled)? != 0,
            failovers_paused: get(Field::FailoversPaused)? != 0,
            provisioned: get(Field::Provisioned)? != 0,
            bmc_state_value: get(Field::BmcState)?,
            sibling_comms_ok: get(Field::SiblingCommsOk)? != 0,
            heartbeat: get(Field::Heartbeat)?,
            fw_version: get(Field::FwVersion)?,
        })
    }

    pub fn role(&self) -> Result<Role> {
        Role::try_from(self.role_value).map_err(|value| CfamError::UnknownEnumValue {
            field: Field::Role,
            value,
        })
    }

    pub fn bmc_state(&self) -> Result<BmcState> {
        BmcState::try_from(self.bmc_state_value).map_err(|value| CfamError::UnknownEnumValue {
            field: Field::BmcState,
            value,
        })
    }
}

/// The CFAM on the sibling BMC's card, read over the local FSI link to it.
///
/// Holds the fields from the last refresh. After any failed refresh the
/// fields are gone and every getter returns `NotAvailable` until a later
/// refresh succeeds.
pub struct SiblingCfam<S> {
    access: CfamAccess<S>,
    fields: Option<SiblingFields>,
}

impl<S: SysFs> SiblingCfam<S> {
    pub fn new(access: CfamAccess<S>) -> Self {
        Self {
            access,
            fields: None,
        }
    }

    pub fn access(&self) -> &CfamAccess<S> {
        &self.access
    }

    pub fn is_ready(&self) -> bool {
        self.access.exists()
    }

    /// Reads every used register and decodes the fields.
    pub fn refresh(&mut self) -> Result<&SiblingFields> {
        self.fields = None;

        if !self.is_ready() {
            return Err(CfamError::NotReady {
                link: self.access.link(),
            });
        }

        let regs = self.access.read_scratch_regs(&used_regs())?;
        let fields = SiblingFields::decode(&regs)?;
        Ok(self.fields.insert(fields))
    }

    pub fn has_error(&self) -> bool {
        self.fields.is_none()
    }

    pub fn fields(&self) -> Result<&SiblingFields> {
        self.fields.as_ref().ok_or(CfamError::NotAvailable)
    }

    pub fn api_version(&self) -> Result<u8> {
        self.fields().map(|f| f.api_version)
    }

    pub fn bmc_position(&self) -> Result<u32> {
        self.fields().map(|f| f.bmc_position)
    }

    pub fn role(&self) -> Result<Role> {
        self.fields()?.role()
    }

    pub fn redundancy_enabled(&self) -> Result<bool> {
        self.fields().map(|f| f.redundancy_enabled)
    }

    pub fn failovers_paused(&self) -> Result<bool> {
        self.fields().map(|f| f.failovers_paused)
    }

    pub fn provisioned(&self) -> Result<bool> {
        self.fields().map(|f| f.provisioned)
    }

    pub fn bmc_state(&self) -> Result<BmcState> {
        self.fields()?.bmc_state()
    }

    pub fn sibling_comms_ok(&self) -> Result<bool> {
        self.fields().map(|f| f.sibling_comms_ok)
    }

    pub fn heartbeat(&self) -> Result<u32> {
        self.fields().map(|f| f.heartbeat)
    }

    pub fn fw_version(&self) -> Result<u32> {
        self.fields().map(|f| f.fw_version)
    }
}

/// The externally visible form of the sibling's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SiblingView {
    pub api_version: u8,
    pub bmc_position: u32,
    pub provisioned: bool,
    /// `None` when the raw value isn't a known role.
    pub role: Option<Role>,
    pub redundancy_enabled: bool,
    pub failovers_paused: bool,
    /// `None` when the raw value isn't a known state.
    pub bmc_state: Option<BmcState>,
    pub communication_ok: bool,
    /// Uppercase hex, no prefix.
    pub fw_version: String,
    /// Whether the sibling's heartbeat is advancing.
    pub heartbeat: bool,
}

impl SiblingView {
    pub fn new(fields: &SiblingFields, alive: bool) -> Self {
        Self {
            api_version: fields.api_version,
            bmc_position: fields.bmc_position,
            provisioned: fields.provisioned,
            role: fields.role().ok(),
            redundancy_enabled: fields.redundancy_enabled,
            failovers_paused: fields.failovers_paused,
            bmc_state: fields.bmc_state().ok(),
            communication_ok: fields.sibling_comms_ok,
            fw_version: format!("{:X}", fields.fw_version),
            heartbeat: alive,
        }
    }
}

/// Where the sibling's view is made available to the rest of the system.
pub trait Publisher {
    /// `created` is set on the first publish after construction or after a
    /// retract.
    fn publish(&mut self, view: &SiblingView, created: bool) -> Result<()>;

    /// Removes the view entirely.
    fn retract(&mut self) -> Result<()>;
}

impl<T: Publisher + ?Sized> Publisher for &mut T {
    fn publish(&mut self, view: &SiblingView, created: bool) -> Result<()> {
        (**self).publish(view, created)
    }

    fn retract(&mut self) -> Result<()> {
        (**self).retract()
    }
}

/// The sibling BMC: refreshes its CFAM fields, derives liveness from the
/// heartbeat and keeps the published view in step.
pub struct SiblingBmc<S, P> {
    cfam: SiblingCfam<S>,
    publisher: P,
    last_heartbeat: Option<u32>,
    ready: Option<bool>,
    errored: bool,
    published: bool,
    retract_failed: bool,
}

impl<S: SysFs, P: Publisher> SiblingBmc<S, P> {
    pub fn new(cfam: SiblingCfam<S>, publisher: P) -> Self {
        Self {
            cfam,
            publisher,
            last_heartbeat: None,
            ready: None,
            errored: false,
            published: false,
            retract_failed: false,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// The CFAM was ready and the last read succeeded.
    pub fn ok(&self) -> bool {
        self.ready == Some(true) && !self.errored
    }

    /// Refreshes the fields and returns whether the sibling is alive.
    ///
    /// Alive means the heartbeat differs from the one seen on an earlier
    /// good read. The first good read only sets the baseline.
    pub fn read(&mut self) -> bool {
        let link = self.cfam.access().link();

        let fields = match self.cfam.refresh() {
            Ok(fields) => *fields,
            Err(CfamError::NotReady { .. }) => {
                if self.ready != Some(false) {
                    info!(link, "sibling CFAM not ready");
                }
                self.ready = Some(false);
                self.retract();
                return false;
            }
            Err(e) => {
                if !self.errored {
                    warn!(link, err = %e, "failed reading sibling CFAM");
                }
                self.ready = Some(true);
                self.errored = true;
                self.retract();
                return false;
            }
        };

        if self.ready != Some(true) {
            info!(link, "sibling CFAM ready");
        } else if self.errored {
            info!(link, "sibling CFAM read recovered");
        }
        self.ready = Some(true);
        self.errored = false;

        let alive = self
            .last_heartbeat
            .is_some_and(|last| last != fields.heartbeat);
        self.last_heartbeat = Some(fields.heartbeat);

        let view = SiblingView::new(&fields, alive);
        let created = !self.published;
        match self.publisher.publish(&view, created) {
            Ok(()) => {
                if created {
                    info!(link, "publishing sibling fields");
                }
                self.published = true;
            }
            Err(e) => warn!(link, err = %e, "failed publishing sibling fields"),
        }

        alive
    }

    /// Takes the published view down, if there is one.
    pub fn retract(&mut self) {
        if !self.published {
            return;
        }

        let link = self.cfam.access().link();
        match self.publisher.retract() {
            Ok(()) => {
                info!(link, "retracted sibling fields");
                self.published = false;
                self.retract_failed = false;
            }
            Err(e) => {
                if !self.retract_failed {
                    warn!(link, err = %e, "failed retracting sibling fields");
                }
                self.retract_failed = true;
            }
        }
    }
}
