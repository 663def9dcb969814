//! Synchronous DevTools-protocol client and session multiplexer.
//!
//! The crate drives a remote browser over its debugging protocol: a
//! blocking command dispatcher with out-of-order response correlation, a
//! reentrancy-safe listener router, a flat hierarchy of logical sessions
//! sharing one transport, and a WebDriver BiDi bridge tunneled through a
//! scripted binding in the browser. Transports (pipes, sockets) are
//! supplied by embedders behind the [`Transport`] trait; the crate never
//! implements one itself.

pub mod bidi;
mod client;
mod codec;
mod deadline;
mod error;
mod listener;
mod transport;

#[cfg(test)]
mod tests;

pub use client::{ClientHandle, DevToolsConnection, FrontendCloser};
pub use codec::{
    InspectorEvent, InspectorMessage, InspectorResponse, RoutedMessage, parse_inspector_error,
    parse_inspector_message,
};
pub use deadline::Deadline;
pub use error::DevToolsError;
pub use listener::DevToolsListener;
pub use transport::{ReceiveResult, Transport};
