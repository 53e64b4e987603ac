//! Daemon module.
//!
//! A long-running process that loads the engine once and transcribes files
//! on request, speaking a line protocol over stdin/stdout:
//! - `process "<input>" ["<output dir>"]`: replies `READY` or `ERROR`
//! - `quit` / `exit`: shuts down (end of input does the same)

pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use protocol::{parse_line, tokenize, DaemonCommand, Reply};
pub use server::{DaemonServer, DaemonState, IDLE_POLL_INTERVAL};
