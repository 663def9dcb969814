//! Inbound message parsing and remote-error classification.
//!
//! One raw transport message decodes to either an event or a command
//! response, tagged with the session it belongs to. BiDi traffic arrives
//! wrapped inside `Runtime.bindingCalled` events and is unwrapped here so
//! downstream consumers never parse a payload twice: plain BiDi payloads
//! replace their serialized form in place (with the reserved channel
//! suffix stripped), and CDP-over-BiDi tunnel payloads are re-framed into
//! ordinary events or responses.

use serde_json::{Map, Value};
use tracing::warn;

use crate::bidi::{
    BIDI_CHANNEL_SUFFIX, BIDI_DEBUG_BINDING, BIDI_RESPONSE_BINDING, CDP_EVENT_PREFIX,
    CDP_TUNNEL_CHANNEL, CHANNEL_FIELD,
};
use crate::error::DevToolsError;

/// Log target for codec operations.
pub(crate) const CODEC_TARGET: &str = "tiller_devtools::codec";

/// The event that carries BiDi traffic out of the browser.
pub(crate) const BINDING_CALLED_METHOD: &str = "Runtime.bindingCalled";

const SESSION_NOT_FOUND_CODE: i64 = -32001;
const METHOD_NOT_FOUND_CODE: i64 = -32601;
const INVALID_PARAMS_CODE: i64 = -32602;

const NO_TARGET_WITH_GIVEN_ID: &str = "No target with given id found";
const DEFAULT_CONTEXT_ERROR: &str = "Cannot find default execution context";
const CONTEXT_ERROR: &str = "Cannot find context with specified id";
const UNIQUE_CONTEXT_ID_NOT_FOUND: &str = "uniqueContextId not found";
const INVALID_URL: &str = "Cannot navigate to invalid URL";
const INSECURE_CONTEXT: &str = "Permission can't be granted in current context.";
const OPAQUE_ORIGINS: &str = "Permission can't be granted to opaque origins.";
const PUSH_PERMISSION: &str = "Push Permission without userVisibleOnly:true isn't supported";
const NO_SUCH_FRAME: &str = "Frame with the given id was not found.";
const FRAME_NOT_IN_TARGET: &str = "Frame with the given id does not belong to the target.";
const NO_NODE_FOR_BACKEND_ID: &str = "No node found for given backend id";
const NO_NODE_WITH_GIVEN_ID: &str = "No node with given id found";
const CONTEXT_DESTROYED: &str = "Execution context was destroyed.";
const TARGET_NAVIGATED_OR_CLOSED: &str = "Inspected target navigated or closed";
const NOT_ATTACHED_TO_ACTIVE_PAGE: &str = "Not attached to an active page";

/// An inbound notification from the remote end.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectorEvent {
    /// The event method name (e.g. `Page.loadEventFired`).
    pub method: String,
    /// The event parameters; an empty object when the wire omits them.
    pub params: Value,
}

/// An inbound answer to a previously issued command.
///
/// Exactly one of `result` and `error` is populated. A wire response
/// carrying neither is treated as an implicit empty result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectorResponse {
    /// The command id this response correlates to.
    pub id: i64,
    /// The decoded result object on success.
    pub result: Option<Value>,
    /// The serialized error object on failure; empty on success.
    pub error: String,
}

/// The two kinds of inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InspectorMessage {
    /// A notification.
    Event(InspectorEvent),
    /// A command response.
    Response(InspectorResponse),
}

/// One parsed inbound message together with its routing key.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// Session the message belongs to; empty for the root session.
    pub session_id: String,
    /// The decoded message.
    pub message: InspectorMessage,
}

/// Parses one raw inbound message.
///
/// # Errors
///
/// Returns [`DevToolsError::Unknown`] when the text is not JSON, is not an
/// object, or is neither a method-bearing event nor an id-bearing
/// response.
pub fn parse_inspector_message(raw: &str) -> Result<RoutedMessage, DevToolsError> {
    let Some(root) = serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
    else {
        return Err(bad_message(raw));
    };

    let session_id = root
        .get("sessionId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    if let Some(id_value) = root.get("id") {
        let Some(id) = id_value.as_i64() else {
            return Err(bad_message(raw));
        };
        return Ok(RoutedMessage {
            session_id,
            message: InspectorMessage::Response(decode_response_body(id, &root)),
        });
    }

    let Some(method) = root.get("method").and_then(Value::as_str) else {
        return Err(bad_message(raw));
    };
    let mut params = root
        .get("params")
        .filter(|value| value.is_object())
        .cloned()
        .unwrap_or_else(empty_object);

    if method == BINDING_CALLED_METHOD {
        match unwrap_bidi_payload(&mut params) {
            Ok(None) => {}
            Ok(Some(tunneled)) => return Ok(tunneled),
            Err(()) => return Err(bad_message(raw)),
        }
    }

    Ok(RoutedMessage {
        session_id,
        message: InspectorMessage::Event(InspectorEvent {
            method: method.to_owned(),
            params,
        }),
    })
}

/// Classifies a serialized remote error object into a typed failure.
///
/// Checked in this precedence: empty or unparseable error text; known
/// message phrases regardless of numeric code; the numeric-code table;
/// otherwise the generic fallback carrying the original JSON.
#[must_use]
pub fn parse_inspector_error(error_json: &str) -> DevToolsError {
    let Some(error) = serde_json::from_str::<Value>(error_json)
        .ok()
        .filter(Value::is_object)
    else {
        return DevToolsError::unknown("inspector error with no error message");
    };

    let message = error.get("message").and_then(Value::as_str);
    let code = error.get("code").and_then(Value::as_i64);

    if let Some(classified) = message.and_then(classify_known_message) {
        return classified;
    }

    match code {
        Some(METHOD_NOT_FOUND_CODE) => DevToolsError::UnknownCommand {
            message: message.unwrap_or("method not found").to_owned(),
        },
        Some(SESSION_NOT_FOUND_CODE) => DevToolsError::NoSuchFrame {
            message: message.unwrap_or("inspector detached").to_owned(),
        },
        Some(INVALID_PARAMS_CODE) => match message {
            Some(NO_TARGET_WITH_GIVEN_ID) => DevToolsError::NoSuchWindow {
                message: NO_TARGET_WITH_GIVEN_ID.to_owned(),
            },
            _ => DevToolsError::InvalidArgument {
                message: message.unwrap_or_default().to_owned(),
            },
        },
        _ => DevToolsError::unknown(format!("unhandled inspector error: {error_json}")),
    }
}

/// Maps the remote error phrases whose numeric code is too generic to act
/// on. The server reports most of these under its catch-all code, so the
/// message content is the only reliable signal.
fn classify_known_message(message: &str) -> Option<DevToolsError> {
    match message {
        DEFAULT_CONTEXT_ERROR | CONTEXT_ERROR | UNIQUE_CONTEXT_ID_NOT_FOUND => {
            Some(DevToolsError::NoSuchExecutionContext {
                message: message.to_owned(),
            })
        }
        INVALID_URL | OPAQUE_ORIGINS | PUSH_PERMISSION => Some(DevToolsError::InvalidArgument {
            message: message.to_owned(),
        }),
        INSECURE_CONTEXT => Some(DevToolsError::InvalidArgument {
            message: "feature cannot be used in insecure context".to_owned(),
        }),
        NO_SUCH_FRAME | FRAME_NOT_IN_TARGET => Some(DevToolsError::NoSuchFrame {
            message: message.to_owned(),
        }),
        NO_NODE_FOR_BACKEND_ID | NO_NODE_WITH_GIVEN_ID => Some(DevToolsError::NoSuchElement {
            message: message.to_owned(),
        }),
        CONTEXT_DESTROYED | TARGET_NAVIGATED_OR_CLOSED | NOT_ATTACHED_TO_ACTIVE_PAGE => {
            Some(DevToolsError::AbortedByNavigation {
                message: message.to_owned(),
            })
        }
        _ => None,
    }
}

fn decode_response_body(id: i64, root: &Value) -> InspectorResponse {
    let result = root
        .get("result")
        .filter(|value| value.is_object())
        .cloned();
    let error = root.get("error").filter(|value| value.is_object());

    match (result, error) {
        (Some(result), _) => InspectorResponse {
            id,
            result: Some(result),
            error: String::new(),
        },
        (None, Some(error)) => InspectorResponse {
            id,
            result: None,
            error: error.to_string(),
        },
        // Some commands legitimately answer with neither key; treat the
        // response as an implicit empty result.
        (None, None) => InspectorResponse {
            id,
            result: Some(empty_object()),
            error: String::new(),
        },
    }
}

/// Unwraps a BiDi payload carried by a `Runtime.bindingCalled` event.
///
/// Returns `Ok(None)` when the event is not BiDi traffic (the caller keeps
/// it as-is), `Ok(Some(message))` when the payload was a CDP tunnel
/// message that replaces the event wholesale, and `Err(())` on a malformed
/// payload.
fn unwrap_bidi_payload(params: &mut Value) -> Result<Option<RoutedMessage>, ()> {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        warn!(
            target: CODEC_TARGET,
            "name is missing in the Runtime.bindingCalled params"
        );
        return Err(());
    };
    if name != BIDI_RESPONSE_BINDING && name != BIDI_DEBUG_BINDING {
        return Ok(None);
    }

    let Some(payload_text) = params.get("payload").and_then(Value::as_str) else {
        warn!(
            target: CODEC_TARGET,
            "payload is missing in the Runtime.bindingCalled params"
        );
        return Err(());
    };
    let Some(mut payload) = serde_json::from_str::<Value>(payload_text)
        .ok()
        .filter(Value::is_object)
    else {
        warn!(target: CODEC_TARGET, "unable to deserialize the BiDi payload");
        return Err(());
    };

    let channel = payload
        .get(CHANNEL_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    if channel == CDP_TUNNEL_CHANNEL {
        return parse_cdp_tunnel_message(&payload).map(Some).ok_or(());
    }

    if let Some(trimmed) = channel.strip_suffix(BIDI_CHANNEL_SUFFIX) {
        payload[CHANNEL_FIELD] = Value::from(trimmed);
    }

    // Replace the serialized payload with the decoded value so downstream
    // consumers do not deserialize twice.
    params["payload"] = payload;
    Ok(None)
}

/// Re-frames a CDP tunnel payload into a plain event or response.
fn parse_cdp_tunnel_message(payload: &Value) -> Option<RoutedMessage> {
    let method = payload.get("method").and_then(Value::as_str);

    if let Some(method) = method.filter(|m| m.starts_with(CDP_EVENT_PREFIX)) {
        let Some(inner) = payload.get("params").filter(|value| value.is_object()) else {
            warn!(
                target: CODEC_TARGET,
                wrapper = method,
                "params field is missing in the tunneled event payload"
            );
            return None;
        };
        let Some(cdp_method) = inner.get("method").and_then(Value::as_str) else {
            warn!(
                target: CODEC_TARGET,
                wrapper = method,
                "params.method is missing in the tunneled event payload"
            );
            return None;
        };
        let session_id = inner
            .get("session")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let cdp_params = inner
            .get("params")
            .filter(|value| value.is_object())
            .cloned()
            .unwrap_or_else(empty_object);
        return Some(RoutedMessage {
            session_id,
            message: InspectorMessage::Event(InspectorEvent {
                method: cdp_method.to_owned(),
                params: cdp_params,
            }),
        });
    }

    let Some(tunnel_id) = payload.get("id").and_then(Value::as_i64) else {
        warn!(target: CODEC_TARGET, "tunneled CDP response has no id");
        return None;
    };
    let session_id = payload
        .get("session")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    // Tunneled commands carry the negated CDP id so they cannot collide
    // with ordinary BiDi ids; negate back before correlation.
    Some(RoutedMessage {
        session_id,
        message: InspectorMessage::Response(decode_response_body(-tunnel_id, payload)),
    })
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn bad_message(raw: &str) -> DevToolsError {
    DevToolsError::unknown(format!("bad inspector message: {raw}"))
}
