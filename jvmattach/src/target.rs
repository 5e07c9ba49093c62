//! Rendezvous and request-marker paths for a target JVM.
//!
//! HotSpot's attach listener binds `.java_pid<pid>` in the temp directory and
//! checks for `.attach_pid<pid>` when it receives SIGQUIT. Both filenames
//! embed the pid, so paths derived for distinct targets never collide. All
//! path derivation lives here; no other module computes these names.

use std::path::{Path, PathBuf};

/// Immutable reference to a target JVM process.
#[derive(Debug, Clone)]
pub struct VmTarget {
    pid: i32,
    tmp_root: PathBuf,
}

impl VmTarget {
    /// Target rooted at the system temp directory, where HotSpot binds its
    /// listener socket.
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            tmp_root: std::env::temp_dir(),
        }
    }

    /// Same derivation, rooted somewhere other than the system temp dir.
    pub fn with_tmp_root(pid: i32, tmp_root: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            tmp_root: tmp_root.into(),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn tmp_root(&self) -> &Path {
        &self.tmp_root
    }

    /// The JVM attach listener socket. Its existence is the sole readiness
    /// signal for the handshake.
    pub fn socket_path(&self) -> PathBuf {
        self.tmp_root.join(format!(".java_pid{}", self.pid))
    }

    /// Marker file the attacher creates to request attachment. Only the
    /// target's signal handler assigns it any meaning.
    pub fn attach_file_path(&self) -> PathBuf {
        self.tmp_root.join(format!(".attach_pid{}", self.pid))
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path().exists()
    }
}
