//! Process inspection and control.
//!
//! Used by the startup checks to decide whether the pid in an old pidfile
//! belongs to another blocky instance.

use std::io;

#[cfg(test)]
use mockall::automock;

/// Name the kernel reports for our process (`/proc/<pid>/comm`).
pub const PROCESS_NAME: &str = "blocky";

#[cfg_attr(test, automock)]
pub trait ProcessControl: Send + Sync {
    /// Effective user id of the current process.
    fn effective_uid(&self) -> u32;

    /// Pid of the current process.
    fn current_pid(&self) -> u32;

    /// Whether a process with this pid exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// Command name of the process, if it can be read.
    fn process_name(&self, pid: u32) -> Option<String>;

    /// Send SIGTERM.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Linux implementation backed by libc and procfs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxProcesses;

impl ProcessControl for LinuxProcesses {
    fn effective_uid(&self) -> u32 {
        // SAFETY: geteuid() has no preconditions and cannot fail.
        unsafe { libc::geteuid() }
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs the existence and permission checks only.
        let rc = unsafe { libc::kill(pid, 0) };
        // EPERM means the process exists but belongs to someone else
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        std::fs::read_to_string(format!("/proc/{}/comm", pid))
            .ok()
            .map(|name| name.trim_end().to_string())
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        if pid <= 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"));
        }
        // SAFETY: plain syscall on a validated positive pid.
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
