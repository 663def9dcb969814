//! Channel bindings: routing BiDi responses back to their consumers.

use std::collections::HashMap;

use super::{BIDI_CHANNEL_SUFFIX, CDP_TUNNEL_CHANNEL};

/// Associates channel names with external connection identifiers.
///
/// A binding is created when a BiDi command is issued with a channel and
/// consulted when the matching response event arrives. Channel names
/// follow the convention `/<connection-id>/<suffix>` with one of the two
/// reserved suffixes.
#[derive(Debug, Default)]
pub struct ChannelBindings {
    bindings: HashMap<String, u64>,
}

impl ChannelBindings {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `channel` with `connection_id`, replacing any previous
    /// binding for the same channel.
    pub fn bind(&mut self, channel: impl Into<String>, connection_id: u64) {
        self.bindings.insert(channel.into(), connection_id);
    }

    /// Connection bound to `channel`, if any.
    #[must_use]
    pub fn resolve(&self, channel: &str) -> Option<u64> {
        self.bindings.get(channel).copied()
    }

    /// Removes the binding for `channel`, returning the connection it
    /// pointed at.
    pub fn unbind(&mut self, channel: &str) -> Option<u64> {
        self.bindings.remove(channel)
    }

    /// Drops every binding for `connection_id` (a closed connection).
    pub fn unbind_connection(&mut self, connection_id: u64) {
        self.bindings.retain(|_, bound| *bound != connection_id);
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no binding is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Extracts the connection id encoded in a conventional channel name.
    ///
    /// Returns `None` when the channel does not follow
    /// `/<connection-id>/<suffix>` with a reserved suffix.
    #[must_use]
    pub fn parse_connection_id(channel: &str) -> Option<u64> {
        let body = channel
            .strip_suffix(BIDI_CHANNEL_SUFFIX)
            .or_else(|| channel.strip_suffix(CDP_TUNNEL_CHANNEL))?;
        body.strip_prefix('/')?.parse().ok()
    }
}
