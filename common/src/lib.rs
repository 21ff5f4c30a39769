//! CFAM scratchpad field protocol shared by the redundant BMC pair.
//!
//! Each BMC writes its own status into bit fields of its CFAM scratchpad
//! registers and reads the same fields back from its sibling's CFAM.

pub mod registers;
pub mod fields;
pub mod error;
pub mod hal;
pub mod access;
pub mod local;
pub mod sibling;
pub mod services;
pub mod driver;

pub use access::{CfamAccess, RetryPolicy};
pub use driver::CfamDriver;
pub use error::{CfamError, Result};
pub use hal::{SysFs, SysFsImpl};
pub use local::{LocalBmc, LocalCfam};
pub use registers::{BmcState, Field, Role, ScratchPadReg};
pub use services::{LocalIdentity, StateEvent, StateProvider};
pub use sibling::{Publisher, SiblingBmc, SiblingCfam, SiblingFields, SiblingView};
