//! Host process identity backed by `nix`.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{gethostname, getpid, getuid, Pid, User};

use crate::domain::ports::ProcessIdentity;

/// Identity of the running process, probed through POSIX calls.
#[derive(Debug, Clone)]
pub struct SystemProcessIdentity {
    pid: u32,
    hostname: String,
    username: String,
}

impl SystemProcessIdentity {
    /// Capture the current pid, host name and user name. Host or user
    /// lookups that fail are recorded as `"unknown"`.
    pub fn new() -> Self {
        let pid = u32::try_from(getpid().as_raw()).unwrap_or_default();
        let hostname = gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let username = User::from_uid(getuid())
            .ok()
            .flatten()
            .map_or_else(|| "unknown".to_string(), |user| user.name);

        Self {
            pid,
            hostname,
            username,
        }
    }
}

impl Default for SystemProcessIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIdentity for SystemProcessIdentity {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn username(&self) -> String {
        self.username.clone()
    }

    /// Probes with signal 0. A process owned by another user answers
    /// `EPERM`, which still proves it exists.
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }

        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}
