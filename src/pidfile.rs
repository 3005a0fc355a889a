//! Pidfile handling.
//!
//! The pidfile is held under an exclusive flock-style advisory lock for as
//! long as the daemon runs, so a second instance cannot claim it concurrently.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BlockyError, Result};

/// A guard that owns the pidfile.
/// The file is removed when the guard is dropped, unless another process has
/// rewritten it in the meantime.
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    _file: File,
}

impl PidFile {
    /// Create (or take over) the pidfile and write our pid into it.
    ///
    /// Opens without truncating, locks, then truncates, so a file still
    /// locked by a running instance is left untouched.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok(); // /run should exist, but just in case
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| BlockyError::io(format!("Failed to open pidfile {}", path.display()), e))?;

        file.try_lock_exclusive().map_err(|_| {
            BlockyError::Conflict(format!(
                "Another instance of blocky holds the pidfile {}. Abort.",
                path.display()
            ))
        })?;

        fs::set_permissions(path, fs::Permissions::from_mode(0o644))
            .map_err(|e| BlockyError::io("Failed to set pidfile permissions", e))?;

        let pid = std::process::id();
        write_pid(&mut file, pid)
            .map_err(|e| BlockyError::io(format!("Failed to write pidfile {}", path.display()), e))?;

        debug!("Wrote pid {} to {}", pid, path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pid,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if parse_pid(&content) == Some(self.pid) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to remove pidfile {}: {}", self.path.display(), e);
                }
            }
            Ok(_) => debug!(
                "Pidfile {} no longer holds our pid, leaving it",
                self.path.display()
            ),
            Err(_) => {}
        }
    }
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", pid)?;
    file.sync_all()
}

/// First non-empty line of a pidfile, as a pid.
pub fn parse_pid(content: &str) -> Option<u32> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse().ok())
}
