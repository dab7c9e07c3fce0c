//! The out-of-process audio daemon: owns the ring buffer and audio sink,
//! terminates the socket protocol, and enforces the drain-before-complete
//! completion algorithm.

pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{Inbound, Outbound};
pub use server::{serve, DaemonServerError, DaemonState};
pub use session::PlaybackSession;
