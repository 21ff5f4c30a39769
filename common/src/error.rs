use std::path::PathBuf;

use thiserror::Error;

use crate::registers::{Field, ScratchPadReg};

/// Errors from CFAM register access and field encoding.
#[derive(Error, Debug)]
pub enum CfamError {
    // === Register transport ===
    /// The sysfs attribute is missing, usually because the FSI driver has
    /// not bound the CFAM yet.
    #[error("scratch register file '{path}' doesn't exist")]
    NotFound { path: PathBuf },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes than a full register were transferred.
    #[error("short transfer on '{path}': expected {expected} bytes, got {actual}")]
    ShortTransfer {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("could not extract a register value from '{contents}' in '{path}'")]
    InvalidData { path: PathBuf, contents: String },

    #[error("CFAM on link {link} is not ready")]
    NotReady { link: usize },

    // === Field schema ===
    #[error("start bit {start} + {num_bits} bits does not fit in a 32-bit register")]
    InvalidFieldBounds { start: u32, num_bits: u32 },

    #[error("register {reg} not in register map")]
    MissingRegister { reg: ScratchPadReg },

    #[error("value {value:#x} does not fit in the {num_bits} bit {field:?} field")]
    ValueTooWide {
        field: Field,
        value: u32,
        num_bits: u32,
    },

    #[error("unknown {field:?} value {value:#x}")]
    UnknownEnumValue { field: Field, value: u32 },

    // === Reader ===
    #[error("CFAM fields not available")]
    NotAvailable,

    // === System identity and state ===
    #[error("state provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("unable to parse VERSION_ID out of '{path}'")]
    VersionId { path: PathBuf },

    #[error("unable to determine BMC position: {0}")]
    Position(String),
}

impl CfamError {
    /// Programming errors: the field catalog or a snapshot was used wrongly.
    pub fn is_schema_violation(&self) -> bool {
        matches!(
            self,
            CfamError::InvalidFieldBounds { .. }
                | CfamError::MissingRegister { .. }
                | CfamError::ValueTooWide { .. }
        )
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, CfamError::NotReady { .. } | CfamError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CfamError>;
