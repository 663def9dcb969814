//! Message-framed transport consumed by the protocol client.

use crate::deadline::Deadline;

/// Outcome of one blocking receive on a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveResult {
    /// One complete inbound message.
    Message(String),
    /// The deadline expired before a message arrived.
    TimedOut,
    /// The remote end closed the channel.
    Disconnected,
}

/// A duplex, message-framed channel to the remote browser.
///
/// Implementations (pipes, sockets) are supplied by embedders; the client
/// consumes the trait and never implements it. The connection owns the
/// transport exclusively: reads happen only inside whichever call is
/// currently at the bottom of the active reentrant stack, so at most one
/// logical reader is ever blocked on the wire.
pub trait Transport {
    /// Opens the channel against `url`. Returns whether it succeeded.
    fn connect(&mut self, url: &str) -> bool;

    /// Writes one complete message. Returns whether the write succeeded.
    fn send(&mut self, message: &str) -> bool;

    /// Blocks for the next inbound message, bounded by `deadline`.
    fn receive(&mut self, deadline: &Deadline) -> ReceiveResult;

    /// Whether the channel is currently open.
    fn is_connected(&self) -> bool;

    /// Whether a message is already buffered and receivable without blocking.
    fn has_buffered_message(&self) -> bool;
}
