//! Out-of-band wake-up for the target VM.
//!
//! HotSpot only checks for a pending attach request at a safepoint, after
//! being poked with SIGQUIT. The trait keeps the delivery primitive swappable
//! for tests and for platforms without POSIX signals.

#[derive(Debug, thiserror::Error)]
#[error("cannot signal target process {pid}: {source}")]
pub struct NotifyError {
    pub pid: i32,
    #[source]
    pub source: std::io::Error,
}

/// Delivers the quit-class notification that makes the target check for an
/// attach request. Delivery failure means the target is unreachable, not
/// slow; callers never retry it.
pub trait VmNotifier: Send + Sync {
    fn notify(&self, pid: i32) -> Result<(), NotifyError>;
}

/// Production notifier: POSIX SIGQUIT. The crate is unix-only (the control
/// channel is a unix-domain socket), so no other default exists.
pub struct SigQuitNotifier;

impl VmNotifier for SigQuitNotifier {
    fn notify(&self, pid: i32) -> Result<(), NotifyError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid), Signal::SIGQUIT).map_err(|errno| NotifyError {
            pid,
            source: std::io::Error::from(errno),
        })
    }
}
