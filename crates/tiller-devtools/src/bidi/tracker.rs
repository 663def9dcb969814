//! Listener forwarding mapper payloads to an external consumer.

use serde_json::Value;

use super::BIDI_RESPONSE_BINDING;
use crate::client::{ClientHandle, DevToolsConnection};
use crate::codec::BINDING_CALLED_METHOD;
use crate::error::DevToolsError;
use crate::listener::DevToolsListener;

/// Sink a [`BidiTracker`] delivers decoded payloads into.
pub type BidiPayloadSink = Box<dyn Fn(&Value) -> Result<(), DevToolsError>>;

/// Watches `Runtime.bindingCalled` events and hands every payload of the
/// response binding to a session-supplied sink. Events carrying any other
/// binding name are ignored entirely.
pub struct BidiTracker {
    sink: BidiPayloadSink,
}

impl BidiTracker {
    /// Builds a tracker delivering into `sink`.
    #[must_use]
    pub fn new(sink: BidiPayloadSink) -> Self {
        Self { sink }
    }
}

impl DevToolsListener for BidiTracker {
    fn listens_to_connections(&self) -> bool {
        false
    }

    fn on_event(
        &self,
        _connection: &mut DevToolsConnection,
        _client: ClientHandle,
        method: &str,
        params: &Value,
    ) -> Result<(), DevToolsError> {
        if method != BINDING_CALLED_METHOD {
            return Ok(());
        }
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err(DevToolsError::unknown("Runtime.bindingCalled missing 'name'"));
        };
        if name != BIDI_RESPONSE_BINDING {
            return Ok(());
        }
        let Some(payload) = params.get("payload") else {
            return Err(DevToolsError::unknown(
                "Runtime.bindingCalled missing 'payload'",
            ));
        };
        // The codec replaces the serialized payload with its decoded form
        // for channel-suffixed traffic; decode here only when it did not.
        let decoded = match payload {
            Value::String(text) => serde_json::from_str(text)
                .map_err(|_| DevToolsError::unknown("unable to deserialize the BiDi payload"))?,
            other => other.clone(),
        };
        (self.sink)(&decoded)
    }
}
