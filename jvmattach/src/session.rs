//! Attach session: handshake state machine and command execution.
//!
//! Flow:
//! 1. Listener socket already present: connect directly, no handshake.
//! 2. Otherwise drop the `.attach_pid` marker, signal the target, and poll
//!    for the socket file with a linearly growing delay.
//! 3. Past the halfway mark with no socket file, re-signal exactly once.
//! 4. Connect, then run one command over the NUL-delimited wire protocol.
//!    The connection is single-use: one command per attach.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::UnixStream;

use crate::notify::{NotifyError, SigQuitNotifier, VmNotifier};
use crate::target::VmTarget;
use crate::wire::{WireError, WireStream};

/// Ceiling on the whole readiness poll.
const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_millis(5000);

/// The poll delay grows by one step each iteration.
const DEFAULT_DELAY_STEP: Duration = Duration::from_millis(100);

/// Payload the target returns when a command completed cleanly.
const COMMAND_OK: &str = "0";

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// Signal delivery failed; the target is unreachable, not slow.
    #[error(transparent)]
    Unreachable(#[from] NotifyError),

    #[error("cannot create attach file {}: {source}", .path.display())]
    AttachFile { path: PathBuf, source: io::Error },

    #[error(
        "unable to open socket file {}: target process {pid} doesn't respond within {elapsed_ms}ms or HotSpot VM not loaded",
        .path.display()
    )]
    Timeout {
        path: PathBuf,
        pid: i32,
        elapsed_ms: u64,
    },

    #[error("cannot connect to {}: {source}", .path.display())]
    Connect { path: PathBuf, source: io::Error },

    #[error("not attached to a target VM")]
    NotAttached,

    #[error("session already detached")]
    Detached,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("command {command:?} rejected by target VM (response {payload:?})")]
    CommandRejected { command: String, payload: String },
}

/// Handshake policy knobs. Defaults match the reference attach
/// implementation: 5s ceiling, 100ms delay step, system temp dir, SIGQUIT.
#[derive(Clone)]
pub struct AttachConfig {
    timeout: Duration,
    delay_step: Duration,
    tmp_root: PathBuf,
    notifier: Arc<dyn VmNotifier>,
}

impl AttachConfig {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_ATTACH_TIMEOUT,
            delay_step: DEFAULT_DELAY_STEP,
            tmp_root: std::env::temp_dir(),
            notifier: Arc::new(SigQuitNotifier),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay_step(mut self, step: Duration) -> Self {
        self.delay_step = step;
        self
    }

    pub fn with_tmp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tmp_root = root.into();
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn VmNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Released,
}

/// One attach session to a running JVM.
///
/// Owns the connected channel exclusively; the channel slot sits behind its
/// own lock and is taken out for the duration of a round trip. All methods
/// take `&self`, so a session can be shared (e.g. in an `Arc`) with a
/// supervisory task that calls `detach` while a command is in flight. The
/// release flag has its own lock too; that guard covers only the flag
/// check/set, never the I/O, so a command already past the check runs to
/// completion.
pub struct VirtualMachine {
    target: VmTarget,
    config: AttachConfig,
    channel: Mutex<Option<UnixStream>>,
    state: RwLock<SessionState>,
}

impl VirtualMachine {
    pub fn new(pid: i32) -> Self {
        Self::with_config(pid, AttachConfig::new())
    }

    pub fn with_config(pid: i32, config: AttachConfig) -> Self {
        let target = VmTarget::with_tmp_root(pid, config.tmp_root.clone());
        Self {
            target,
            config,
            channel: Mutex::new(None),
            state: RwLock::new(SessionState::Active),
        }
    }

    pub fn target(&self) -> &VmTarget {
        &self.target
    }

    /// Bring up the control channel to the target VM.
    ///
    /// If the listener socket already exists the target is attached from a
    /// prior session; no marker is created and no signal is sent.
    pub async fn attach(&self) -> Result<(), AttachError> {
        if self.target.socket_exists() {
            tracing::debug!(pid = self.target.pid(), "Attach listener already running");
        } else {
            self.request_attach().await?;
        }

        let path = self.target.socket_path();
        tracing::debug!(path = %path.display(), "Connecting to attach listener");
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| AttachError::Connect {
                path: path.clone(),
                source,
            })?;
        *self.lock_channel() = Some(stream);

        tracing::info!(pid = self.target.pid(), "Attached to target VM");
        Ok(())
    }

    /// Ask the target to start its attach listener, then wait for the socket
    /// file to appear.
    async fn request_attach(&self) -> Result<(), AttachError> {
        let pid = self.target.pid();
        let attach_file = self.target.attach_file_path();

        fs::File::create(&attach_file).map_err(|source| AttachError::AttachFile {
            path: attach_file.clone(),
            source,
        })?;

        tracing::debug!(pid, "Signalling target VM");
        self.config.notifier.notify(pid)?;

        let mut elapsed = Duration::ZERO;
        let mut delay = Duration::ZERO;
        let mut renotified = false;
        while !self.target.socket_exists() && elapsed <= self.config.timeout {
            delay += self.config.delay_step;
            tokio::time::sleep(delay).await;
            elapsed += delay;

            // HotSpot only honors the request at a safepoint; a busy VM can
            // miss the first poke. One re-delivery, past the halfway mark.
            if elapsed > self.config.timeout / 2 && !renotified && !self.target.socket_exists() {
                tracing::debug!(
                    pid,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Re-signalling target VM"
                );
                self.config.notifier.notify(pid)?;
                renotified = true;
            }
        }

        if !self.target.socket_exists() {
            return Err(AttachError::Timeout {
                path: self.target.socket_path(),
                pid,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        // The marker has served its purpose; removal is housekeeping only.
        let _ = fs::remove_file(&attach_file);

        tracing::debug!(
            pid,
            elapsed_ms = elapsed.as_millis() as u64,
            "Attach listener ready"
        );
        Ok(())
    }

    /// Mark the session released. Idempotent; never touches the channel or
    /// the target process. A command already in flight is not aborted, but
    /// no command may start after this returns.
    pub fn detach(&self) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state != SessionState::Released {
            *state = SessionState::Released;
            tracing::debug!(pid = self.target.pid(), "Session released");
        }
    }

    fn is_released(&self) -> bool {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state == SessionState::Released
    }

    fn lock_channel(&self) -> std::sync::MutexGuard<'_, Option<UnixStream>> {
        match self.channel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run one command over the attached channel and require the `"0"`
    /// success payload. The channel is consumed and closed whether the
    /// round-trip verdict is success or failure.
    pub async fn execute(&self, command: &str, args: &[&str]) -> Result<(), AttachError> {
        if self.is_released() {
            return Err(AttachError::Detached);
        }
        // The guard is dropped here; the round trip itself runs unlocked.
        let stream = self.lock_channel().take().ok_or(AttachError::NotAttached)?;
        let mut wire = WireStream::new(stream);

        let pid = self.target.pid();
        tracing::debug!(pid, command, "Sending command");
        wire.send_request(command, args).await?;
        wire.read_status().await?;
        let payload = wire.read_payload().await?;
        if payload != COMMAND_OK {
            tracing::warn!(pid, command, %payload, "Command rejected by target VM");
            return Err(AttachError::CommandRejected {
                command: command.to_string(),
                payload,
            });
        }

        tracing::info!(pid, command, "Command completed");
        Ok(())
    }

    /// Load an instrumentation agent jar. `agent` is the jar path,
    /// optionally with `=options` appended, exactly as the agent's
    /// `agentmain` expects to receive it.
    pub async fn load_agent(&self, agent: &str) -> Result<(), AttachError> {
        self.execute("load", &["instrument", "false", agent]).await
    }
}
