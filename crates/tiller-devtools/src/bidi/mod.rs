//! The BiDi bridge: a second protocol tunneled through the first.
//!
//! BiDi commands leave the driver as ordinary `Runtime.evaluate` commands
//! invoking the mapper's entry point inside the browser, and come back as
//! `Runtime.bindingCalled` events whose payload is the serialized BiDi
//! message. Channel names route responses to the external consumer that
//! issued the command; the two reserved suffixes distinguish plain BiDi
//! traffic from CDP commands tunneled over BiDi.

mod channel;
mod commands;
mod tracker;
mod tunnel;

pub use channel::ChannelBindings;
pub use tracker::{BidiPayloadSink, BidiTracker};
pub use tunnel::{wrap_bidi_command_in_cdp_command, wrap_cdp_command_in_bidi_command};

/// Field carrying the routing channel in a BiDi message.
pub const CHANNEL_FIELD: &str = "channel";

/// Reserved suffix marking plain BiDi traffic.
pub const BIDI_CHANNEL_SUFFIX: &str = "/bidi";

/// Reserved channel (and suffix) marking CDP-over-BiDi traffic.
pub const CDP_TUNNEL_CHANNEL: &str = "/cdp";

/// Method name of a CDP command wrapped in a BiDi command.
pub const CDP_TUNNEL_METHOD: &str = "cdp.sendCommand";

/// Prefix of tunneled CDP events surfaced through the mapper.
pub const CDP_EVENT_PREFIX: &str = "cdp.";

/// Browser-side binding the mapper answers through.
pub const BIDI_RESPONSE_BINDING: &str = "sendBidiResponse";

/// Browser-side binding carrying mapper debug output.
pub const BIDI_DEBUG_BINDING: &str = "sendDebugMessage";

/// Browser-side entry point BiDi commands are fed into.
pub const MAPPER_ENTRY_POINT: &str = "onBidiMessage";

/// Log target for bridge operations.
pub(crate) const BIDI_TARGET: &str = "tiller_devtools::bidi";
