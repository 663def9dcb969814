//! Envelope conversions between the two protocols.

use serde_json::{Map, Value, json};

use super::{CDP_TUNNEL_CHANNEL, CDP_TUNNEL_METHOD, CHANNEL_FIELD, MAPPER_ENTRY_POINT};
use crate::error::DevToolsError;

/// Wraps a CDP command into a CDP-over-BiDi tunnel command.
///
/// The wrapped command carries the reserved tunnel method and channel and
/// the negated CDP id, so tunneled ids can never collide with ordinary
/// BiDi ids issued by external consumers.
///
/// # Errors
///
/// Returns [`DevToolsError::Unknown`] when the command lacks an integer
/// `id` or a string `method`.
pub fn wrap_cdp_command_in_bidi_command(cdp_command: &Value) -> Result<Value, DevToolsError> {
    let Some(id) = cdp_command.get("id").and_then(Value::as_i64) else {
        return Err(DevToolsError::unknown("CDP command has no 'id' field"));
    };
    let Some(method) = cdp_command.get("method").and_then(Value::as_str) else {
        return Err(DevToolsError::unknown("CDP command has no 'method' field"));
    };

    let mut params = Map::new();
    params.insert("cdpMethod".to_owned(), Value::from(method));
    if let Some(session) = cdp_command.get("sessionId").and_then(Value::as_str) {
        params.insert("cdpSession".to_owned(), Value::from(session));
    }
    if let Some(cdp_params) = cdp_command.get("params").filter(|value| value.is_object()) {
        params.insert("cdpParams".to_owned(), cdp_params.clone());
    }

    let mut command = Map::new();
    command.insert("id".to_owned(), Value::from(-id));
    command.insert("method".to_owned(), Value::from(CDP_TUNNEL_METHOD));
    command.insert(CHANNEL_FIELD.to_owned(), Value::from(CDP_TUNNEL_CHANNEL));
    command.insert("params".to_owned(), Value::Object(params));
    Ok(Value::Object(command))
}

/// Wraps a BiDi command into the `Runtime.evaluate` command that feeds it
/// to the mapper running in `mapper_session_id`.
///
/// # Errors
///
/// Returns [`DevToolsError::Unknown`] when the mapper session id is empty
/// or the BiDi command cannot be serialized.
pub fn wrap_bidi_command_in_cdp_command(
    cdp_command_id: i64,
    bidi_command: &Value,
    mapper_session_id: &str,
) -> Result<Value, DevToolsError> {
    if mapper_session_id.is_empty() {
        return Err(DevToolsError::unknown("mapper session id must not be empty"));
    }
    let serialized = serde_json::to_string(bidi_command)
        .map_err(|error| DevToolsError::unknown(format!("cannot serialize the BiDi command: {error}")))?;
    let argument = serde_json::to_string(&serialized)
        .map_err(|error| DevToolsError::unknown(format!("cannot quote the BiDi command: {error}")))?;
    let expression = format!("{MAPPER_ENTRY_POINT}({argument})");

    Ok(json!({
        "id": cdp_command_id,
        "method": "Runtime.evaluate",
        "params": {"expression": expression},
        "sessionId": mapper_session_id,
    }))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn tunnel_command_negates_the_id_and_nests_the_cdp_fields() {
        let cdp = json!({
            "id": 17,
            "method": "DOM.getDocument",
            "params": {"depth": 1},
            "sessionId": "S5"
        });
        let wrapped = wrap_cdp_command_in_bidi_command(&cdp).expect("wrap failed");
        assert_eq!(wrapped["id"], json!(-17));
        assert_eq!(wrapped["method"], json!(CDP_TUNNEL_METHOD));
        assert_eq!(wrapped[CHANNEL_FIELD], json!(CDP_TUNNEL_CHANNEL));
        assert_eq!(wrapped["params"]["cdpMethod"], json!("DOM.getDocument"));
        assert_eq!(wrapped["params"]["cdpSession"], json!("S5"));
        assert_eq!(wrapped["params"]["cdpParams"], json!({"depth": 1}));
    }

    #[rstest]
    fn tunnel_command_requires_id_and_method() {
        assert!(wrap_cdp_command_in_bidi_command(&json!({"method": "m"})).is_err());
        assert!(wrap_cdp_command_in_bidi_command(&json!({"id": 1})).is_err());
    }

    #[rstest]
    fn mapper_command_embeds_the_bidi_command_as_a_string_literal() {
        let bidi = json!({"id": 5, "method": "session.status", "params": {}});
        let wrapped =
            wrap_bidi_command_in_cdp_command(90, &bidi, "mapper_session").expect("wrap failed");
        assert_eq!(wrapped["id"], json!(90));
        assert_eq!(wrapped["method"], json!("Runtime.evaluate"));
        assert_eq!(wrapped["sessionId"], json!("mapper_session"));

        let expression = wrapped["params"]["expression"]
            .as_str()
            .expect("expression missing");
        let inner = expression
            .strip_prefix("onBidiMessage(")
            .and_then(|rest| rest.strip_suffix(')'))
            .expect("expression shape");
        let quoted: String = serde_json::from_str(inner).expect("argument is a string literal");
        let recovered: serde_json::Value =
            serde_json::from_str(&quoted).expect("argument holds a BiDi command");
        assert_eq!(recovered, bidi);
    }

    #[rstest]
    fn mapper_command_rejects_an_empty_session() {
        let bidi = json!({"id": 5, "method": "session.status"});
        assert!(wrap_bidi_command_in_cdp_command(90, &bidi, "").is_err());
    }
}
