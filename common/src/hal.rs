use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{CfamError, Result};
use crate::fields::Hex;

/// Register transport required by the CFAM access code.
/// This lets the same logic run against the kernel's sysfs attributes
/// and against in-memory doubles.
pub trait SysFs {
    /// Reads a register through its sysfs file.
    fn read(&self, file: &Path) -> Result<u32>;

    /// Writes a register through its sysfs file.
    fn write(&self, file: &Path, value: u32) -> Result<()>;

    /// Whether the file exists, i.e. the driver created it.
    fn exists(&self, file: &Path) -> bool;
}

impl<T: SysFs + ?Sized> SysFs for &T {
    fn read(&self, file: &Path) -> Result<u32> {
        (**self).read(file)
    }

    fn write(&self, file: &Path, value: u32) -> Result<()> {
        (**self).write(file, value)
    }

    fn exists(&self, file: &Path) -> bool {
        (**self).exists(file)
    }
}

/// The real sysfs backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysFsImpl;

impl SysFs for SysFsImpl {
    fn read(&self, file: &Path) -> Result<u32> {
        if !file.exists() {
            return Err(CfamError::NotFound { path: file.to_path_buf() });
        }

        // The attribute reads back as a hex string.
        let contents = fs::read_to_string(file).map_err(|source| CfamError::Io {
            path: file.to_path_buf(),
            source,
        })?;

        let text = contents.trim();
        if text.is_empty() {
            return Err(CfamError::ShortTransfer {
                path: file.to_path_buf(),
                expected: 4,
                actual: 0,
            });
        }

        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);

        u32::from_str_radix(digits, 16).map_err(|_| CfamError::InvalidData {
            path: file.to_path_buf(),
            contents: text.to_string(),
        })
    }

    fn write(&self, file: &Path, value: u32) -> Result<()> {
        if !file.exists() {
            return Err(CfamError::NotFound { path: file.to_path_buf() });
        }

        let io_err = |source| CfamError::Io {
            path: file.to_path_buf(),
            source,
        };

        // Writes take the 4 raw bytes, in one write call.
        let mut handle = OpenOptions::new().write(true).open(file).map_err(io_err)?;
        let written = handle.write(&value.to_ne_bytes()).map_err(io_err)?;
        if written != 4 {
            return Err(CfamError::ShortTransfer {
                path: file.to_path_buf(),
                expected: 4,
                actual: written,
            });
        }

        debug!(file = %file.display(), value = %Hex(value), "wrote scratch register");
        Ok(())
    }

    fn exists(&self, file: &Path) -> bool {
        file.exists()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch1");
        fs::write(&path, "12345678\n").unwrap();

        let sysfs = SysFsImpl;
        assert_eq!(sysfs.read(&path).unwrap(), 0x1234_5678);

        fs::write(&path, "0xdeadbeef").unwrap();
        assert_eq!(sysfs.read(&path).unwrap(), 0xDEAD_BEEF);

        // Doesn't exist
        let missing = dir.path().join("scratch2");
        assert!(matches!(sysfs.read(&missing), Err(CfamError::NotFound { .. })));
    }

    #[test]
    fn test_read_bad_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch1");
        let sysfs = SysFsImpl;

        fs::write(&path, "").unwrap();
        assert!(matches!(
            sysfs.read(&path),
            Err(CfamError::ShortTransfer { expected: 4, actual: 0, .. })
        ));

        fs::write(&path, "xyz").unwrap();
        assert!(matches!(sysfs.read(&path), Err(CfamError::InvalidData { .. })));
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch1");
        fs::write(&path, "0").unwrap();

        let sysfs = SysFsImpl;
        sysfs.write(&path, 0xA000_000B).unwrap();

        // A write puts down exactly 4 raw bytes.
        let raw = fs::read(&path).unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]), 0xA000_000B);

        // Doesn't exist
        let missing = dir.path().join("scratch2");
        assert!(matches!(sysfs.write(&missing, 1), Err(CfamError::NotFound { .. })));
        assert!(sysfs.exists(&path));
        assert!(!sysfs.exists(&missing));
    }
}
