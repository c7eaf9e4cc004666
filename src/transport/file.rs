//! Append-only file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use super::Transport;
use crate::{Result, TelemetryError};

/// Appends payloads to a local file, flushing every call.
///
/// Parent directories are created on open. `reset` drops the handle; the next
/// send reopens the file, which also survives log rotation underneath us.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    file: Option<File>,
}

impl FileTransport {
    /// Open `path` for append, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path)?;
        info!(path = %path.display(), "telemetry file sink opened");
        Ok(Self { path, file: Some(file) })
    }

    fn open_file(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| {
                TelemetryError::transport(
                    format!("create parent directories for {}", path.display()),
                    Some(err),
                )
            })?;
        }
        OpenOptions::new().create(true).append(true).open(path).map_err(|err| {
            TelemetryError::transport(format!("open {} for append", path.display()), Some(err))
        })
    }
}

impl Transport for FileTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(Self::open_file(&self.path)?);
        }
        let result = match self.file.as_mut() {
            Some(file) => file.write_all(payload).and_then(|()| file.flush()),
            None => return Err(TelemetryError::transport("file handle missing", None)),
        };
        if let Err(err) = result {
            // drop the broken handle so the next send reopens
            self.file = None;
            return Err(TelemetryError::transport(
                format!("append to {}", self.path.display()),
                Some(err),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.file = None;
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }
}
