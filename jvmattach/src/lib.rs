//! jvmattach: dynamic-attach client for HotSpot JVMs.
//!
//! Speaks the HotSpot attach handshake to an already-running JVM on the same
//! host: drop an attach request file, poke the target with SIGQUIT, wait for
//! its attach listener socket to appear, connect, and issue commands over the
//! NUL-delimited attach protocol.

pub mod notify;
pub mod session;
pub mod target;
pub mod wire;

pub use notify::{NotifyError, SigQuitNotifier, VmNotifier};
pub use session::{AttachConfig, AttachError, VirtualMachine};
pub use target::VmTarget;
pub use wire::{PROTOCOL_VERSION, WireError, WireStream};
