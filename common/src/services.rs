//! The local system's identity and redundancy state, as seen by the writer.

use std::fs;
use std::path::Path;
use std::process::Command;

use xxhash_rust::xxh32::xxh32;

use crate::error::{CfamError, Result};
use crate::registers::{BmcState, Role};

/// A change reported by whatever owns the BMC state and redundancy role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    BmcState(BmcState),
    Role(Role),
    RedundancyEnabled(bool),
    /// The state or redundancy interface showed up, with whatever values it
    /// carried.
    InterfacesAdded {
        bmc_state: Option<BmcState>,
        role: Option<Role>,
        redundancy_enabled: Option<bool>,
    },
}

/// Source of the current BMC state and redundancy properties.
///
/// Either getter may fail with `ProviderUnavailable` while the owning
/// service has not published its interface yet.
pub trait StateProvider {
    fn bmc_state(&mut self) -> Result<BmcState>;

    /// The role and redundancy-enabled properties, read together.
    fn redundancy_props(&mut self) -> Result<(Role, bool)>;
}

/// Identity values written once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdentity {
    pub fw_version: u32,
    pub bmc_position: u32,
}

/// Reads the VERSION_ID value out of an os-release style file.
///
/// The value may or may not be surrounded by quotes.
pub fn get_fw_version_id(file: &Path) -> Result<String> {
    let version_err = || CfamError::VersionId { path: file.to_path_buf() };
    let contents = fs::read_to_string(file).map_err(|_| version_err())?;

    let version = contents
        .lines()
        .find_map(|line| line.strip_prefix("VERSION_ID="))
        .map(|value| {
            let value = value.trim();
            match (value.find('"'), value.rfind('"')) {
                (Some(first), Some(last)) if last > first => &value[first + 1..last],
                _ => value,
            }
        })
        .unwrap_or_default();

    if version.is_empty() {
        return Err(version_err());
    }
    Ok(version.to_string())
}

/// The 32 bit value stored in the FW version field for a version string.
pub fn fw_version_hash(version_id: &str) -> u32 {
    xxh32(version_id.as_bytes(), 0)
}

/// Parses `fw_printenv -n bmc_position` output.
pub fn parse_bmc_position(output: &str) -> Result<u32> {
    let text = output.trim();
    text.parse()
        .map_err(|_| CfamError::Position(format!("could not extract position from '{text}'")))
}

/// Reads this BMC's position from the bmc_position u-boot variable.
pub fn get_bmc_position() -> Result<u32> {
    let output = Command::new("/sbin/fw_printenv")
        .args(["-n", "bmc_position"])
        .output()
        .map_err(|e| CfamError::Position(format!("error running fw_printenv: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(CfamError::Position(format!(
            "fw_printenv failed with {}, output = {}",
            output.status,
            stdout.trim()
        )));
    }

    parse_bmc_position(&stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_os_release(data: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("os-release");
        fs::write(&file, data).unwrap();
        (dir, file)
    }

    #[test]
    fn test_get_version_id() {
        let (_dir, file) = write_os_release(
            r#"
ID=MY_ID
NAME="BMC (OpenBMC for Foo Systems)"
VERSION="fw2842.00-8"
VERSION_ID=fw2842.00-8-2842.20240425 (FOO)
"#,
        );

        assert_eq!(get_fw_version_id(&file).unwrap(), "fw2842.00-8-2842.20240425 (FOO)");
    }

    #[test]
    fn test_get_version_id_with_quotes() {
        let (_dir, file) = write_os_release(
            r#"
ID=MY_ID
VERSION="fw2842.00-8"
VERSION_ID="fw2842.00-8-2842.20240425 (FOO)"
"#,
        );

        assert_eq!(get_fw_version_id(&file).unwrap(), "fw2842.00-8-2842.20240425 (FOO)");
    }

    #[test]
    fn test_no_version_id() {
        let (dir, file) = write_os_release(
            r#"
ID=MY_ID
VERSION="fw2842.00-8"
CPE_NAME="cpe:/o:openembedded:openbmc-foo:fw2842.00-8"
"#,
        );

        assert!(matches!(get_fw_version_id(&file), Err(CfamError::VersionId { .. })));
        assert!(get_fw_version_id(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_fw_version_hash_is_stable() {
        assert_eq!(fw_version_hash("fw1"), fw_version_hash("fw1"));
        assert_ne!(fw_version_hash("fw1"), fw_version_hash("fw2"));
    }

    #[test]
    fn test_parse_bmc_position() {
        assert_eq!(parse_bmc_position("1\n").unwrap(), 1);
        assert_eq!(parse_bmc_position("0").unwrap(), 0);
        assert!(matches!(parse_bmc_position("abc"), Err(CfamError::Position(_))));
    }
}
