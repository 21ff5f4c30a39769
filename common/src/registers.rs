//! Scratchpad register layout shared by the local and sibling BMC.
//!
//! Bit numbering follows the CFAM convention: bit 0 is the most significant
//! bit of the 32-bit register.

use core::fmt;
use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fields::field_mask;

pub const NUM_SCRATCH_PAD_REGS: usize = 4;

/// The scratchpad registers in the Gemini mailbox block of a CFAM-S.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScratchPadReg {
    One,
    Two,
    Three,
    Four,
}

impl ScratchPadReg {
    pub const ALL: [ScratchPadReg; NUM_SCRATCH_PAD_REGS] = [
        ScratchPadReg::One,
        ScratchPadReg::Two,
        ScratchPadReg::Three,
        ScratchPadReg::Four,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name of the sysfs attribute the FSI driver creates for this register.
    pub const fn file_name(self) -> &'static str {
        match self {
            ScratchPadReg::One => "scratch1",
            ScratchPadReg::Two => "scratch2",
            ScratchPadReg::Three => "scratch3",
            ScratchPadReg::Four => "scratch4",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reg| reg.file_name() == name)
    }
}

impl fmt::Display for ScratchPadReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// The fields stored in the mailbox scratchpad registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    ApiVersion,
    BmcPosition,
    Role,
    RedundancyEnabled,
    FailoversPaused,
    Provisioned,
    BmcState,
    SiblingCommsOk,
    Heartbeat,
    FwVersion,
}

/// Where a field lives: register, first bit (MSB-first) and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMetadata {
    pub reg: ScratchPadReg,
    pub start: u32,
    pub num_bits: u32,
    pub desc: &'static str,
}

impl FieldMetadata {
    pub const fn new(reg: ScratchPadReg, start: u32, num_bits: u32, desc: &'static str) -> Self {
        Self {
            reg,
            start,
            num_bits,
            desc,
        }
    }
}

/// The field catalog. Entries are in `Field` declaration order.
pub const CFAM_FIELDS: [(Field, FieldMetadata); 10] = [
    (Field::ApiVersion, FieldMetadata::new(ScratchPadReg::One, 0, 8, "API Version")),
    (Field::BmcPosition, FieldMetadata::new(ScratchPadReg::One, 8, 1, "BMC Position")),
    (Field::Role, FieldMetadata::new(ScratchPadReg::One, 9, 2, "Role")),
    (Field::RedundancyEnabled, FieldMetadata::new(ScratchPadReg::One, 11, 1, "Redundancy Enabled")),
    (Field::FailoversPaused, FieldMetadata::new(ScratchPadReg::One, 12, 1, "Failovers Paused")),
    (Field::Provisioned, FieldMetadata::new(ScratchPadReg::One, 13, 1, "Provisioned")),
    (Field::BmcState, FieldMetadata::new(ScratchPadReg::One, 14, 3, "BMC State")),
    (Field::SiblingCommsOk, FieldMetadata::new(ScratchPadReg::One, 17, 1, "Sibling Communication OK")),
    (Field::Heartbeat, FieldMetadata::new(ScratchPadReg::One, 24, 8, "Heartbeat")),
    (Field::FwVersion, FieldMetadata::new(ScratchPadReg::Two, 0, 32, "FW Version")),
];

// Catalog order, bounds and bit overlap are checked when the crate compiles.
const _: () = assert!(catalog_is_consistent(&CFAM_FIELDS));

/// True when every entry is in declaration order, fits in 32 bits and no two
/// entries share a bit of the same register.
pub const fn catalog_is_consistent(catalog: &[(Field, FieldMetadata)]) -> bool {
    let mut used = [0u32; NUM_SCRATCH_PAD_REGS];
    let mut i = 0;
    while i < catalog.len() {
        let (field, meta) = catalog[i];
        if field as usize != i || meta.num_bits == 0 || meta.start + meta.num_bits > 32 {
            return false;
        }
        let mask = field_mask(meta.start, meta.num_bits);
        if used[meta.reg.index()] & mask != 0 {
            return false;
        }
        used[meta.reg.index()] |= mask;
        i += 1;
    }
    true
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::ApiVersion,
        Field::BmcPosition,
        Field::Role,
        Field::RedundancyEnabled,
        Field::FailoversPaused,
        Field::Provisioned,
        Field::BmcState,
        Field::SiblingCommsOk,
        Field::Heartbeat,
        Field::FwVersion,
    ];

    pub fn meta(self) -> &'static FieldMetadata {
        &CFAM_FIELDS[self as usize].1
    }

    pub fn desc(self) -> &'static str {
        self.meta().desc
    }
}

/// Of the four scratchpad registers, the ones that hold fields.
pub fn used_regs() -> BTreeSet<ScratchPadReg> {
    CFAM_FIELDS.iter().map(|(_, meta)| meta.reg).collect()
}

/// Redundancy role of a BMC.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    #[default]
    Unknown = 0,
    Active = 1,
    Passive = 2,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Unknown => "Unknown",
            Role::Active => "Active",
            Role::Passive => "Passive",
        }
    }
}

impl TryFrom<u32> for Role {
    type Error = u32;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Role::Unknown),
            1 => Ok(Role::Active),
            2 => Ok(Role::Passive),
            other => Err(other),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of a BMC.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BmcState {
    Ready = 0,
    NotReady = 1,
    UpdateInProgress = 2,
    Quiesced = 3,
}

impl BmcState {
    pub const fn as_str(self) -> &'static str {
        match self {
            BmcState::Ready => "Ready",
            BmcState::NotReady => "NotReady",
            BmcState::UpdateInProgress => "UpdateInProgress",
            BmcState::Quiesced => "Quiesced",
        }
    }
}

impl TryFrom<u32> for BmcState {
    type Error = u32;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(BmcState::Ready),
            1 => Ok(BmcState::NotReady),
            2 => Ok(BmcState::UpdateInProgress),
            3 => Ok(BmcState::Quiesced),
            other => Err(other),
        }
    }
}

impl fmt::Display for BmcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_overlapping_fields() {
        let mut regs = [0u32; NUM_SCRATCH_PAD_REGS];

        for (field, meta) in CFAM_FIELDS.iter() {
            assert!(meta.start + meta.num_bits <= 32, "{field:?} runs past bit 31");
            for i in meta.start..meta.start + meta.num_bits {
                let bit = 0x8000_0000u32 >> i;
                assert_eq!(
                    regs[meta.reg.index()] & bit,
                    0,
                    "{} {field:?} has overlapping bits at offset {i}",
                    meta.reg
                );
                regs[meta.reg.index()] |= bit;
            }
        }

        println!("The used bits are: {:#010x} {:#010x} {:#010x} {:#010x}", regs[0], regs[1], regs[2], regs[3]);
    }

    #[test]
    fn test_overlap_is_rejected() {
        let overlapping = [
            (Field::ApiVersion, FieldMetadata::new(ScratchPadReg::One, 0, 8, "a")),
            (Field::BmcPosition, FieldMetadata::new(ScratchPadReg::One, 7, 1, "b")),
        ];
        assert!(!catalog_is_consistent(&overlapping));

        let too_wide = [(Field::ApiVersion, FieldMetadata::new(ScratchPadReg::One, 30, 4, "a"))];
        assert!(!catalog_is_consistent(&too_wide));

        let out_of_order = [(Field::Role, FieldMetadata::new(ScratchPadReg::One, 0, 2, "a"))];
        assert!(!catalog_is_consistent(&out_of_order));
    }

    #[test]
    fn test_catalog_lookup() {
        for field in Field::ALL {
            let (entry, _) = CFAM_FIELDS[field as usize];
            assert_eq!(entry, field);
        }
        assert_eq!(Field::Heartbeat.meta().start, 24);
        assert_eq!(Field::FwVersion.meta().reg, ScratchPadReg::Two);
        assert_eq!(Field::SiblingCommsOk.desc(), "Sibling Communication OK");
    }

    #[test]
    fn test_used_regs() {
        let regs: Vec<_> = used_regs().into_iter().collect();
        assert_eq!(regs, vec![ScratchPadReg::One, ScratchPadReg::Two]);
    }

    #[test]
    fn test_enum_conversions() {
        assert_eq!(Role::try_from(2), Ok(Role::Passive));
        assert_eq!(Role::try_from(3), Err(3));
        assert_eq!(BmcState::try_from(3), Ok(BmcState::Quiesced));
        assert_eq!(BmcState::try_from(7), Err(7));
        assert_eq!(BmcState::UpdateInProgress.to_string(), "UpdateInProgress");
        assert_eq!(ScratchPadReg::from_file_name("scratch3"), Some(ScratchPadReg::Three));
        assert_eq!(ScratchPadReg::from_file_name("scratch5"), None);
    }
}
