//! Shared configuration for the tiller workspace.
//!
//! The crate owns the small set of knobs the protocol core and its
//! embedders must agree on: the logging output format and the timing
//! defaults used by blocking protocol calls. Keeping them here means the
//! client crate and any front-end binary read the same values.

mod defaults;
mod logging;
mod timings;

pub use defaults::{DEFAULT_LOG_FILTER, default_log_filter, default_log_format};
pub use logging::{LogFormat, LogFormatParseError};
pub use timings::ProtocolTimings;
