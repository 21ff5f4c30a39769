use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use cfam_common::{CfamError, Publisher, Result, SiblingView};

/// Publishes the sibling's fields as a JSON file. The file only exists
/// while the sibling's CFAM is readable.
pub struct JsonFilePublisher {
    path: PathBuf,
}

impl JsonFilePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: io::Error) -> CfamError {
        CfamError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Publisher for JsonFilePublisher {
    fn publish(&mut self, view: &SiblingView, created: bool) -> Result<()> {
        if created {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
            debug!(path = %self.path.display(), "creating sibling view");
        }

        let json = serde_json::to_vec_pretty(view).map_err(|e| self.io_err(e.into()))?;

        // Readers never see a half written file.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn retract(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(self.io_err(e)),
            _ => Ok(()),
        }
    }
}
