//! The connection arena: dispatcher, event router and session multiplexer.
//!
//! A [`DevToolsConnection`] owns one transport and an arena of client
//! records addressed by [`ClientHandle`]. The root record speaks for the
//! whole browser connection; child records are logical sessions attached
//! one level below it and share the root's wire. All blocking calls run on
//! the caller's thread: nested calls share a single read cursor on the
//! transport and unwind in the reverse order they were entered.

mod connection;
mod dialogs;
mod dispatch;
mod record;

pub use connection::{DevToolsConnection, FrontendCloser};
pub use record::ClientHandle;

pub(crate) use dispatch::CommandOptions;

/// Log target for client operations.
pub(crate) const CLIENT_TARGET: &str = "tiller_devtools::client";
