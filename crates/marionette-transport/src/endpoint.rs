//! Deterministic channel endpoint naming.
//!
//! Each target process exposes two endpoints, one per channel role.
//! The endpoint name is a fixed per-role prefix plus the decimal pid,
//! so a controller can locate a running agent knowing only the pid.

use std::path::{Path, PathBuf};

/// Which of a client's two channels an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Transactional request/reply path for control and memory operations.
    Control,
    /// Agent-initiated calls into controller-registered functions.
    Callback,
}

impl ChannelRole {
    /// Fixed endpoint prefix for this role.
    ///
    /// The callback role carries the daemon-style `d` suffix so both
    /// endpoints for a pid sort together.
    pub fn prefix(self) -> &'static str {
        match self {
            ChannelRole::Control => "marionette",
            ChannelRole::Callback => "marionetted",
        }
    }
}

/// A named channel endpoint for one role of one target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    role: ChannelRole,
    pid: u32,
    base_dir: PathBuf,
}

impl ChannelEndpoint {
    /// Endpoint under the default base directory.
    pub fn new(role: ChannelRole, pid: u32) -> Self {
        Self::with_base_dir(role, pid, default_base_dir())
    }

    /// Endpoint under an explicit base directory.
    pub fn with_base_dir(role: ChannelRole, pid: u32, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            role,
            pid,
            base_dir: base_dir.into(),
        }
    }

    /// The endpoint name, `<prefix>-<pid>`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.role.prefix(), self.pid)
    }

    /// The socket path for this endpoint.
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.sock", self.name()))
    }

    /// The role this endpoint serves.
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// The target process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The base directory the endpoint lives under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Default base directory for channel endpoints.
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("marionette")
}
