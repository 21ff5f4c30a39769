use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::fields::{get_field_value, Hex, ModifyOp, RegMap};
use crate::hal::SysFs;
use crate::registers::{Field, ScratchPadReg};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/fsi-master";

/// How a failed register read is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Report the first failure.
    #[default]
    None,
    /// Read once more before reporting the failure.
    Once,
}

/// Reads and writes the four scratchpad registers of the CFAM on one FSI link.
pub struct CfamAccess<S> {
    link: usize,
    root: PathBuf,
    retry: RetryPolicy,
    sysfs: S,
}

impl<S: SysFs> CfamAccess<S> {
    pub fn new(link: usize, sysfs: S) -> Self {
        Self {
            link,
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            retry: RetryPolicy::None,
            sysfs,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn link(&self) -> usize {
        self.link
    }

    /// The sysfs file for a register on this link.
    pub fn register_path(&self, reg: ScratchPadReg) -> PathBuf {
        self.root
            .join(format!("fsi{}", self.link))
            .join("slave@00:00")
            .join(reg.file_name())
    }

    /// Whether the driver has created the register files.
    ///
    /// Only the first is checked; the driver creates them all when it binds.
    pub fn exists(&self) -> bool {
        self.sysfs.exists(&self.register_path(ScratchPadReg::One))
    }

    /// Reads one register, retrying once if the policy says so.
    pub fn read_scratch_reg(&self, reg: ScratchPadReg) -> Result<u32> {
        let path = self.register_path(reg);
        match self.sysfs.read(&path) {
            Err(e) if self.retry == RetryPolicy::Once => {
                debug!(link = self.link, %reg, err = %e, "retrying scratch register read");
                self.sysfs.read(&path)
            }
            result => result,
        }
    }

    /// Reads every register in `regs`.
    ///
    /// Either all registers are returned or the first error is; there is
    /// never a partially filled map.
    pub fn read_scratch_regs(&self, regs: &BTreeSet<ScratchPadReg>) -> Result<RegMap> {
        let mut values = RegMap::new();

        for &reg in regs {
            let data = self.read_scratch_reg(reg).inspect_err(|e| {
                debug!(link = self.link, %reg, err = %e, "error reading scratch register");
            })?;
            values.insert(reg, data);
        }

        Ok(values)
    }

    pub fn write_scratch_reg(&self, reg: ScratchPadReg, data: u32) -> Result<()> {
        self.sysfs.write(&self.register_path(reg), data)
    }

    /// Writes a field with a read/modify/write of its register.
    ///
    /// Registers pack several unrelated fields, so the current contents are
    /// always read first and only the bits under the mask change.
    pub fn write_scratch_reg_with_mask(&self, op: &ModifyOp) -> Result<()> {
        let current = self.read_scratch_reg(op.reg)?;
        let value = op.apply(current);

        debug!(
            link = self.link,
            reg = %op.reg,
            old = %Hex(current),
            new = %Hex(value),
            "modifying scratch register"
        );
        self.write_scratch_reg(op.reg, value)
    }

    /// Reads a single field straight from its register.
    pub fn read_field(&self, field: Field) -> Result<u32> {
        let meta = field.meta();
        let data = self.read_scratch_reg(meta.reg)?;
        get_field_value(data, meta.start, meta.num_bits)
    }
}
