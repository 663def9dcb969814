//! BiDi operations exposed on the connection.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use tracing::debug;

use super::tracker::BidiTracker;
use super::{
    BIDI_CHANNEL_SUFFIX, BIDI_RESPONSE_BINDING, BIDI_TARGET, CDP_TUNNEL_CHANNEL, CHANNEL_FIELD,
    MAPPER_ENTRY_POINT,
};
use crate::client::{ClientHandle, CommandOptions, DevToolsConnection};
use crate::deadline::Deadline;
use crate::error::DevToolsError;
use crate::listener::DevToolsListener;

impl DevToolsConnection {
    /// Posts a BiDi command to the mapper without waiting for an answer.
    ///
    /// A command carrying a channel has the reserved plain-BiDi suffix
    /// appended, so the mapper's answer can be told apart from tunnel
    /// traffic and the suffix stripped again on the way back.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] when no tunnel session is set up
    /// or the command is not an object, and
    /// [`DevToolsError::Disconnected`] when the write fails.
    pub fn post_bidi_command(
        &mut self,
        client: ClientHandle,
        command: Value,
    ) -> Result<(), DevToolsError> {
        let channel = command
            .get(CHANNEL_FIELD)
            .and_then(Value::as_str)
            .map(|channel| format!("{channel}{BIDI_CHANNEL_SUFFIX}"))
            .unwrap_or_default();
        self.post_bidi_command_internal(client, channel, command)
    }

    pub(crate) fn post_bidi_command_internal(
        &mut self,
        client: ClientHandle,
        channel: String,
        mut command: Value,
    ) -> Result<(), DevToolsError> {
        if !command.is_object() {
            return Err(DevToolsError::unknown("BiDi command must be an object"));
        }
        let tunnel_session_id = self.record(client)?.tunnel_session_id.clone();
        if tunnel_session_id.is_empty() {
            return Err(DevToolsError::unknown(
                "unable to send BiDi commands without BiDi server session id",
            ));
        }
        if !channel.is_empty() {
            command[CHANNEL_FIELD] = Value::from(channel);
        }

        let serialized = serde_json::to_string(&command).map_err(|error| {
            DevToolsError::unknown(format!("cannot serialize the BiDi command: {error}"))
        })?;
        let argument = serde_json::to_string(&serialized).map_err(|error| {
            DevToolsError::unknown(format!("cannot quote the BiDi command: {error}"))
        })?;
        let expression = format!("{MAPPER_ENTRY_POINT}({argument})");

        debug!(target: BIDI_TARGET, session_id = %tunnel_session_id, "posting BiDi command");
        self.send_command_internal(
            client,
            "Runtime.evaluate",
            json!({"expression": expression}),
            CommandOptions::posted(&tunnel_session_id),
        )
        .map(|_| ())
    }

    /// Sends a BiDi command and waits for the response on its channel.
    ///
    /// The call registers the tracker it needs and fully unregisters it on
    /// every exit path: the listener count observed by the caller before
    /// and after the call is identical.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] naming the violated
    /// precondition when the command lacks an `id` or a non-empty channel
    /// ending in a reserved suffix, and [`DevToolsError::Timeout`] when no
    /// matching response arrives before the deadline.
    pub fn send_bidi_command(
        &mut self,
        client: ClientHandle,
        command: Value,
        deadline: &Deadline,
    ) -> Result<Value, DevToolsError> {
        let Some(expected_id) = command.get("id").filter(|id| id.is_number()).cloned() else {
            return Err(DevToolsError::unknown("BiDi command must contain an 'id' field"));
        };
        let channel = command
            .get(CHANNEL_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if channel.is_empty()
            || !(channel.ends_with(BIDI_CHANNEL_SUFFIX) || channel.ends_with(CDP_TUNNEL_CHANNEL))
        {
            return Err(DevToolsError::unknown(format!(
                "BiDi command must contain a non-empty string '{CHANNEL_FIELD}' ending in \
                 '{BIDI_CHANNEL_SUFFIX}' or '{CDP_TUNNEL_CHANNEL}'"
            )));
        }

        let captured: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let tracker: Rc<dyn DevToolsListener> = {
            let captured = Rc::clone(&captured);
            let channel = channel.clone();
            let expected_id = expected_id.clone();
            Rc::new(BidiTracker::new(Box::new(move |payload| {
                let payload_channel = payload
                    .get(CHANNEL_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if payload.get("id") == Some(&expected_id)
                    && payload_channel == channel
                    && captured.borrow().is_none()
                {
                    *captured.borrow_mut() = Some(payload.clone());
                }
                Ok(())
            })))
        };

        self.add_listener(client, Rc::clone(&tracker))?;
        let outcome = self.post_bidi_command(client, command).and_then(|()| {
            let captured = Rc::clone(&captured);
            self.handle_events_until(client, move || Ok(captured.borrow().is_some()), deadline)
        });
        self.remove_listener(client, &tracker)?;
        outcome?;

        captured
            .borrow_mut()
            .take()
            .ok_or_else(|| DevToolsError::timeout("BiDi response did not arrive"))
    }

    /// Boots the BiDi mapper inside the client's page and records the
    /// client as the connection's CDP tunnel.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] when the client is not a main
    /// page, is not connected, already tunnels, or the mapper script
    /// throws while starting.
    pub fn start_bidi_server(
        &mut self,
        client: ClientHandle,
        mapper_script: &str,
        deadline: &Deadline,
    ) -> Result<(), DevToolsError> {
        if !self.is_main_page(client) {
            return Err(DevToolsError::unknown(
                "BiDi server can only be started by a page client",
            ));
        }
        if !self.is_connected(client) {
            return Err(DevToolsError::unknown(
                "BiDi server setup requires existing connection",
            ));
        }
        if !self.record(client)?.tunnel_session_id.is_empty() {
            return Err(DevToolsError::unknown(
                "BiDi tunnel is already set up in this client",
            ));
        }

        let target_id = self.record(client)?.id.clone();
        let root = self.root_of(client)?;
        self.send_command_and_ignore_response(
            root,
            "Target.exposeDevToolsProtocol",
            json!({"bindingName": "cdp", "targetId": target_id}),
        )?;
        self.send_command_and_ignore_response(
            client,
            "Runtime.addBinding",
            json!({"name": BIDI_RESPONSE_BINDING}),
        )?;
        // Interact with the mapper tab once so closing it later still
        // triggers beforeunload.
        self.send_command_and_ignore_response(
            client,
            "Runtime.evaluate",
            json!({"expression": "document.body.click()", "userGesture": true}),
        )?;

        let result = self.send_command_and_get_result_with_timeout(
            client,
            "Runtime.evaluate",
            json!({"expression": mapper_script}),
            deadline,
        )?;
        check_mapper_exception(&result)?;

        let window_id = serde_json::to_string(&target_id).map_err(|error| {
            DevToolsError::unknown(format!("cannot serialize the target id: {error}"))
        })?;
        let result = self.send_command_and_get_result_with_timeout(
            client,
            "Runtime.evaluate",
            json!({
                "expression": format!("window.runMapperInstance({window_id})"),
                "awaitPromise": true,
            }),
            deadline,
        )?;
        check_mapper_exception(&result)?;

        let session_id = self.record(client)?.session_id.clone();
        self.record_mut(client)?.tunnel_session_id = session_id;
        Ok(())
    }
}

fn check_mapper_exception(result: &Value) -> Result<(), DevToolsError> {
    if result.get("exceptionDetails").is_some() {
        let description = result
            .get("result")
            .and_then(|inner| inner.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(DevToolsError::unknown(format!(
            "failed to initialize BiDi mapper: {description}"
        )));
    }
    Ok(())
}
