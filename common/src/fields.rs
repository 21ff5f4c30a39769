//! Field extraction and read/modify/write helpers for scratchpad registers.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CfamError, Result};
use crate::registers::{FieldMetadata, ScratchPadReg};

/// Register values from one batch read.
pub type RegMap = BTreeMap<ScratchPadReg, u32>;

/// What is needed to update one field with a read/modify/write.
///
/// `data` holds the field value already shifted into place and `mask` covers
/// exactly the field's bits, so `data & !mask == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyOp {
    pub reg: ScratchPadReg,
    pub data: u32,
    pub mask: u32,
}

impl ModifyOp {
    /// Merges the field into the current register contents.
    pub const fn apply(&self, current: u32) -> u32 {
        (current & !self.mask) | (self.data & self.mask)
    }
}

/// Formats a register value as `0x` plus eight hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex(pub u32);

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Mask with a 1 in every bit of `start..start + num_bits`, numbered from
/// the most significant bit.
pub const fn field_mask(start: u32, num_bits: u32) -> u32 {
    let mut mask = 0u32;
    let mut i = start;
    while i < start + num_bits && i < 32 {
        mask |= 0x8000_0000 >> i;
        i += 1;
    }
    mask
}

/// Largest value a field of `num_bits` bits can hold, e.g. 8 -> 0xFF.
pub const fn max_value(num_bits: u32) -> u32 {
    if num_bits >= 32 {
        return u32::MAX;
    }
    field_mask(32 - num_bits, num_bits)
}

/// Extracts `num_bits` bits starting at `start` from a register value.
pub fn get_field_value(data: u32, start: u32, num_bits: u32) -> Result<u32> {
    if num_bits == 0 || start + num_bits > 32 {
        return Err(CfamError::InvalidFieldBounds { start, num_bits });
    }

    // Drop the bits left of the field, then right justify.
    Ok((data << start) >> (32 - num_bits))
}

/// Extracts a field from a batch of register values.
pub fn get_field_value_from(regs: &RegMap, meta: &FieldMetadata) -> Result<u32> {
    let data = regs
        .get(&meta.reg)
        .copied()
        .ok_or(CfamError::MissingRegister { reg: meta.reg })?;
    get_field_value(data, meta.start, meta.num_bits)
}

/// Builds the op that writes `field_value` into the field.
///
/// For a 16 bit field starting at bit 8 and a value of 0x1234 this gives
/// data 0x00123400 and mask 0x00FFFF00. The value is not range checked here;
/// a value wider than the field spills into its neighbours.
pub fn create_modify_op(meta: &FieldMetadata, field_value: u32) -> ModifyOp {
    let shift = 32 - meta.start - meta.num_bits;
    let data = if shift >= 32 { 0 } else { field_value << shift };

    ModifyOp {
        reg: meta.reg,
        data,
        mask: field_mask(meta.start, meta.num_bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{CFAM_FIELDS, ScratchPadReg::*};
    use proptest::prelude::*;

    #[test]
    fn test_get_field_value() {
        let data = 0x123A_BCDE;

        assert_eq!(get_field_value(data, 0, 12).unwrap(), 0x123);
        assert_eq!(get_field_value(data, 12, 3).unwrap(), 0x5);
        assert_eq!(get_field_value(data, 16, 1).unwrap(), 0x1);
        assert_eq!(get_field_value(data, 17, 1).unwrap(), 0x0);
        assert_eq!(get_field_value(data, 18, 5).unwrap(), 0x1E);
        assert_eq!(get_field_value(data, 24, 4).unwrap(), 0xD);
        assert_eq!(get_field_value(data, 0, 32).unwrap(), data);

        // Overflow 32 bits
        assert!(matches!(
            get_field_value(data, 30, 5),
            Err(CfamError::InvalidFieldBounds { start: 30, num_bits: 5 })
        ));
        assert!(get_field_value(data, 4, 0).is_err());
    }

    #[test]
    fn test_get_field_value_from_regs() {
        let regs = RegMap::from([(Two, 0x8000_0000), (Three, 0x0050_0000)]);

        assert_eq!(get_field_value_from(&regs, &FieldMetadata::new(Two, 0, 1, "a")).unwrap(), 1);
        assert_eq!(get_field_value_from(&regs, &FieldMetadata::new(Two, 9, 5, "a")).unwrap(), 0);
        assert_eq!(get_field_value_from(&regs, &FieldMetadata::new(Three, 9, 5, "a")).unwrap(), 0x14);

        let err = get_field_value_from(&regs, &FieldMetadata::new(Four, 0, 1, "a")).unwrap_err();
        assert!(matches!(err, CfamError::MissingRegister { reg: Four }));
        assert!(err.is_schema_violation());
    }

    #[test]
    fn test_create_modify_op() {
        let cases = [
            ((Three, 0, 32, 0x1111_1111), (0x1111_1111, 0xFFFF_FFFF)),
            ((Three, 0, 1, 0x0), (0x0, 0x8000_0000)),
            ((Three, 0, 1, 0x1), (0x8000_0000, 0x8000_0000)),
            ((Three, 31, 1, 0x1), (0x1, 0x0000_0001)),
            ((Three, 31, 1, 0x0), (0x0, 0x0000_0001)),
            ((One, 4, 8, 0x55), (0x0550_0000, 0x0FF0_0000)),
            ((Two, 19, 3, 0x5), (0x0000_1400, 0x0000_1C00)),
            ((Two, 11, 20, 0x34343), (0x0006_8686, 0x001F_FFFE)),
        ];

        for ((reg, start, num_bits, value), (data, mask)) in cases {
            let op = create_modify_op(&FieldMetadata::new(reg, start, num_bits, "a"), value);
            assert_eq!(op, ModifyOp { reg, data, mask }, "start {start} bits {num_bits}");
        }
    }

    #[test]
    fn test_apply_preserves_other_bits() {
        let op = ModifyOp {
            reg: One,
            data: 0x00AA_AA00,
            mask: 0x00FF_FF00,
        };
        assert_eq!(op.apply(0x1234_5678), 0x12AA_AA78);
    }

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(1), 0x1);
        assert_eq!(max_value(4), 0xF);
        assert_eq!(max_value(8), 0xFF);
        assert_eq!(max_value(9), 0x1FF);
        assert_eq!(max_value(24), 0x00FF_FFFF);
        assert_eq!(max_value(32), 0xFFFF_FFFF);
    }

    proptest! {
        #[test]
        fn prop_catalog_field_round_trip(index in 0usize..CFAM_FIELDS.len(), raw in any::<u32>()) {
            let meta = &CFAM_FIELDS[index].1;
            let value = raw & max_value(meta.num_bits);
            let op = create_modify_op(meta, value);

            prop_assert_eq!(op.data & !op.mask, 0);
            prop_assert_eq!(get_field_value(op.data, meta.start, meta.num_bits).unwrap(), value);
        }

        #[test]
        fn prop_apply_only_touches_mask(start in 0u32..32, width in 1u32..=32, value in any::<u32>(), current in any::<u32>()) {
            prop_assume!(start + width <= 32);
            let meta = FieldMetadata::new(One, start, width, "p");
            let op = create_modify_op(&meta, value & max_value(width));
            let merged = op.apply(current);

            prop_assert_eq!(merged & !op.mask, current & !op.mask);
            prop_assert_eq!(get_field_value(merged, start, width).unwrap(), value & max_value(width));
        }
    }
}
