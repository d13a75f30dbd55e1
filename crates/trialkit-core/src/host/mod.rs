//! The host plugin runtime contract.
//!
//! The host CLI loads a plugin directory and reports, as stream-json, what
//! it registered and what the agent did. [`HostSession`] drives one prompt
//! through it and [`HostRun`] exposes checks over the result.

pub mod events;
pub mod session;

pub use events::{HostEvent, HostInit, HostResult, LoadedPlugin, parse_stream_json_line};
pub use session::{DEFAULT_HOST_BINARY, HostCheckError, HostRun, HostSession, HostToolUse};
