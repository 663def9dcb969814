//! Command dispatch, the blocking receive loop and notification passes.

use std::rc::Rc;

use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::CLIENT_TARGET;
use super::connection::DevToolsConnection;
use super::record::{ClientHandle, CommandNotification, PendingResponse, ResponseState};
use crate::bidi::{wrap_bidi_command_in_cdp_command, wrap_cdp_command_in_bidi_command};
use crate::codec::{InspectorEvent, InspectorMessage, parse_inspector_error, parse_inspector_message};
use crate::deadline::Deadline;
use crate::error::DevToolsError;
use crate::transport::ReceiveResult;

/// How a single command send behaves.
#[derive(Clone, Copy)]
pub(crate) struct CommandOptions<'a> {
    pub expect_response: bool,
    pub wait_for_response: bool,
    pub ignore_response: bool,
    pub client_command_id: Option<i64>,
    pub deadline: Option<&'a Deadline>,
    pub session_override: Option<&'a str>,
    pub bypass_dialog_block: bool,
}

impl<'a> CommandOptions<'a> {
    fn base() -> Self {
        Self {
            expect_response: true,
            wait_for_response: true,
            ignore_response: false,
            client_command_id: None,
            deadline: None,
            session_override: None,
            bypass_dialog_block: false,
        }
    }

    /// Send, then block until the response arrives.
    pub fn waiting(deadline: Option<&'a Deadline>) -> Self {
        Self {
            deadline,
            ..Self::base()
        }
    }

    /// Send and discard the response whenever it arrives.
    pub fn ignored() -> Self {
        Self {
            wait_for_response: false,
            ignore_response: true,
            ..Self::base()
        }
    }

    /// Send a command that has no id-correlated response at all.
    pub fn fire_and_forget(client_command_id: Option<i64>) -> Self {
        Self {
            expect_response: false,
            wait_for_response: false,
            client_command_id,
            ..Self::base()
        }
    }

    /// Send past the alert block: used by the connect handshake and the
    /// dialog-handling command, which must go through even while a dialog
    /// is open.
    pub fn past_dialog_block() -> Self {
        Self {
            bypass_dialog_block: true,
            ..Self::base()
        }
    }

    /// Send on behalf of another session with the response discarded.
    pub fn posted(session_override: &'a str) -> Self {
        Self {
            wait_for_response: false,
            ignore_response: true,
            session_override: Some(session_override),
            ..Self::base()
        }
    }
}

impl DevToolsConnection {
    /// Sends a command and waits for it to resolve, discarding the result.
    ///
    /// # Errors
    ///
    /// See [`Self::send_command_and_get_result`].
    pub fn send_command(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
    ) -> Result<(), DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::waiting(None))
            .map(|_| ())
    }

    /// Sends a command bounded by `deadline`, discarding the result.
    ///
    /// # Errors
    ///
    /// See [`Self::send_command_and_get_result`].
    pub fn send_command_with_timeout(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
        deadline: &Deadline,
    ) -> Result<(), DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::waiting(Some(deadline)))
            .map(|_| ())
    }

    /// Sends a command and returns its decoded result.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Disconnected`] when the transport is gone,
    /// [`DevToolsError::Timeout`] when the deadline expires,
    /// [`DevToolsError::UnexpectedAlertOpen`] when a dialog blocks the
    /// command, or the classified remote error.
    pub fn send_command_and_get_result(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
    ) -> Result<Value, DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::waiting(None))
            .and_then(expect_result)
    }

    /// Sends a command bounded by `deadline` and returns its result.
    ///
    /// # Errors
    ///
    /// See [`Self::send_command_and_get_result`].
    pub fn send_command_and_get_result_with_timeout(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
        deadline: &Deadline,
    ) -> Result<Value, DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::waiting(Some(deadline)))
            .and_then(expect_result)
    }

    /// Sends a command and silently discards its eventual response.
    ///
    /// The call returns as soon as the write succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Disconnected`] when the write fails.
    pub fn send_command_and_ignore_response(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
    ) -> Result<(), DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::ignored())
            .map(|_| ())
    }

    /// Sends a command that expects no id-correlated response at all.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Disconnected`] when the write fails.
    pub fn send_async_command(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
    ) -> Result<(), DevToolsError> {
        self.send_command_internal(client, method, params, CommandOptions::fire_and_forget(None))
            .map(|_| ())
    }

    /// Sends a command on behalf of an external caller that correlates
    /// responses itself, using the caller's own command id.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Disconnected`] when the write fails.
    pub fn send_command_from_websocket(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
        client_command_id: i64,
    ) -> Result<(), DevToolsError> {
        self.send_command_internal(
            client,
            method,
            params,
            CommandOptions::fire_and_forget(Some(client_command_id)),
        )
        .map(|_| ())
    }

    /// Pumps inbound messages until `predicate` reports satisfaction.
    ///
    /// The predicate is re-evaluated whenever no buffered message remains.
    /// Reads are sliced by the configured poll interval so the predicate
    /// can observe progress made by other sessions while the primary
    /// deadline keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Timeout`] when `deadline` expires, a
    /// predicate error as-is, or any error raised while processing a
    /// message routed to this client or the root.
    pub fn handle_events_until<F>(
        &mut self,
        client: ClientHandle,
        mut predicate: F,
        deadline: &Deadline,
    ) -> Result<(), DevToolsError>
    where
        F: FnMut() -> Result<bool, DevToolsError>,
    {
        if !self.is_connected(client) {
            return Err(DevToolsError::disconnected("not connected to DevTools"));
        }
        loop {
            if !self.transport.has_buffered_message() && predicate()? {
                return Ok(());
            }
            let slice = Deadline::bounded_by(self.timings.poll_interval, deadline);
            match self.process_next_message(None, client, &slice) {
                Ok(()) => {}
                Err(DevToolsError::Timeout { .. }) => {
                    if deadline.is_expired() {
                        let message = format!(
                            "timed out receiving message from renderer: {:.3}",
                            deadline.duration_secs()
                        );
                        error!(target: CLIENT_TARGET, "{message}");
                        return Err(DevToolsError::timeout(message));
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Drains buffered inbound messages without blocking.
    ///
    /// # Errors
    ///
    /// See [`Self::handle_events_until`].
    pub fn handle_received_events(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        self.handle_events_until(client, || Ok(true), &Deadline::expired())
    }

    pub(crate) fn send_command_internal(
        &mut self,
        client: ClientHandle,
        method: &str,
        params: Value,
        options: CommandOptions<'_>,
    ) -> Result<Option<Value>, DevToolsError> {
        if self.is_null(client) || !self.transport.is_connected() {
            return Err(DevToolsError::disconnected("not connected to DevTools"));
        }
        let command_id = options
            .client_command_id
            .unwrap_or_else(|| self.advance_next_message_id());

        let record = self.record(client)?;
        let session_id = options
            .session_override
            .map_or_else(|| record.session_id.clone(), str::to_owned);
        let tunnel_session_id = record.tunnel_session_id.clone();

        let mut command = json!({"id": command_id, "method": method, "params": params});
        if !session_id.is_empty() {
            command["sessionId"] = Value::from(session_id.clone());
        }
        // A client with a tunnel sends everything through the mapper except
        // traffic addressed to the mapper session itself.
        if !tunnel_session_id.is_empty() && tunnel_session_id != session_id {
            let bidi_command = wrap_cdp_command_in_bidi_command(&command)?;
            let outer_id = self.advance_next_message_id();
            command = wrap_bidi_command_in_cdp_command(outer_id, &bidi_command, &tunnel_session_id)?;
        }
        let message = command.to_string();

        debug!(
            target: CLIENT_TARGET,
            method,
            id = command_id,
            session_id = %session_id,
            "sending command"
        );

        if options.expect_response {
            let record = self.record_mut(client)?;
            let state = if options.ignore_response {
                ResponseState::Ignored
            } else if record.is_dialog_open() && !options.bypass_dialog_block {
                ResponseState::Blocked
            } else {
                ResponseState::Waiting
            };
            record.pending.insert(
                command_id,
                PendingResponse {
                    state,
                    method: method.to_owned(),
                    deadline: options.deadline.copied().unwrap_or_else(Deadline::none),
                    response: None,
                },
            );
        }

        if !self.transport.send(&message) {
            self.record_mut(client)?.pending.remove(&command_id);
            self.note_transport_loss();
            return Err(DevToolsError::disconnected(
                "unable to send message to renderer",
            ));
        }

        if !(options.expect_response && options.wait_for_response) {
            return Ok(None);
        }
        let wait_deadline = options
            .deadline
            .copied()
            .unwrap_or_else(|| Deadline::from_now(self.timings.command_deadline));
        self.wait_for_pending(client, command_id, &wait_deadline)
    }

    fn wait_for_pending(
        &mut self,
        client: ClientHandle,
        command_id: i64,
        deadline: &Deadline,
    ) -> Result<Option<Value>, DevToolsError> {
        loop {
            let state = self
                .record(client)?
                .pending
                .get(&command_id)
                .map(|entry| entry.state);
            match state {
                Some(ResponseState::Waiting) => {
                    if let Err(error) = self.process_next_message(Some(command_id), client, deadline)
                    {
                        let received = self
                            .record(client)
                            .ok()
                            .and_then(|record| record.pending.get(&command_id))
                            .is_some_and(|entry| entry.state == ResponseState::Received);
                        if received {
                            self.record_mut(client)?.pending.remove(&command_id);
                        }
                        return Err(error);
                    }
                }
                Some(ResponseState::Blocked) => {
                    if let Some(entry) = self.record_mut(client)?.pending.get_mut(&command_id) {
                        entry.state = ResponseState::Ignored;
                    }
                    let message = self
                        .dialog_message(client)
                        .map(|text| format!("{{Alert text : {text}}}"))
                        .unwrap_or_else(|_| "blocked by a modal dialog".to_owned());
                    return Err(DevToolsError::UnexpectedAlertOpen { message });
                }
                Some(ResponseState::Received) => {
                    let entry = self
                        .record_mut(client)?
                        .pending
                        .remove(&command_id)
                        .ok_or_else(|| {
                            DevToolsError::unknown("pending entry vanished while resolving")
                        })?;
                    let response = entry.response.ok_or_else(|| {
                        DevToolsError::unknown("received state without a response")
                    })?;
                    return match response.result {
                        Some(result) => Ok(Some(result)),
                        None => Err(parse_inspector_error(&response.error)),
                    };
                }
                Some(ResponseState::Ignored) => return Ok(None),
                // A transport loss failed every pending entry.
                None => {
                    return Err(DevToolsError::disconnected("not connected to DevTools"));
                }
            }
        }
    }

    /// Pulls and routes one inbound message on behalf of `caller`.
    ///
    /// Notification backlogs are drained first, in case a previous pass
    /// was interrupted by a reentrant call; the resolved state of
    /// `expected_id` is then re-checked before blocking on the wire.
    fn process_next_message(
        &mut self,
        expected_id: Option<i64>,
        caller: ClientHandle,
        deadline: &Deadline,
    ) -> Result<(), DevToolsError> {
        self.drain_notifications(caller)?;
        if let Some(id) = expected_id {
            let resolved = self
                .record(caller)?
                .pending
                .get(&id)
                .is_none_or(|entry| entry.state != ResponseState::Waiting);
            if resolved {
                return Ok(());
            }
        }
        self.fail_if_crashed_or_detached(caller)?;

        let parent = self.record(caller)?.parent;
        if let Some(parent) = parent {
            self.drain_notifications(parent)?;
            self.fail_if_crashed_or_detached(parent)?;
        }

        let raw = match self.transport.receive(deadline) {
            ReceiveResult::Message(text) => text,
            ReceiveResult::Disconnected => {
                error!(target: CLIENT_TARGET, "unable to receive message from renderer");
                self.fail_all_pending();
                return Err(DevToolsError::disconnected(
                    "unable to receive message from renderer",
                ));
            }
            ReceiveResult::TimedOut => {
                return Err(DevToolsError::timeout(format!(
                    "timed out receiving message from renderer: {:.3}",
                    deadline.duration_secs()
                )));
            }
        };
        self.handle_message(&raw, caller)
    }

    fn handle_message(&mut self, raw: &str, caller: ClientHandle) -> Result<(), DevToolsError> {
        let routed = match parse_inspector_message(raw) {
            Ok(routed) => routed,
            Err(parse_error) => {
                error!(target: CLIENT_TARGET, message = raw, "bad inspector message");
                return Err(parse_error);
            }
        };

        let root = self.root();
        let target = {
            let root_record = self.record(root)?;
            if routed.session_id.is_empty() || routed.session_id == root_record.session_id {
                root
            } else if let Some(child) = root_record.children.get(&routed.session_id) {
                *child
            } else {
                // Sessions of target types tracked elsewhere share the
                // socket; their traffic is not ours to fail on.
                return Ok(());
            }
        };

        let status = match routed.message {
            InspectorMessage::Event(event) => self.process_event(target, event),
            InspectorMessage::Response(response) => self.process_command_response(target, response),
        };
        if target == caller || target == root {
            status
        } else {
            // The whole connection makes progress independently of the
            // caller's session; a failure in another session updates that
            // client's state without failing the caller.
            if let Err(error) = status {
                warn!(
                    target: CLIENT_TARGET,
                    error = %error,
                    "error while processing a message for another session"
                );
            }
            Ok(())
        }
    }

    fn process_event(
        &mut self,
        target: ClientHandle,
        event: InspectorEvent,
    ) -> Result<(), DevToolsError> {
        debug!(
            target: CLIENT_TARGET,
            method = %event.method,
            session_id = %self.record(target)?.session_id,
            "received event"
        );
        let method = event.method.clone();
        if method == "Page.javascriptDialogOpening" {
            self.handle_dialog_opening(target, &event.params)?;
        } else if method == "Page.javascriptDialogClosed" {
            self.handle_dialog_closed(target)?;
        }

        {
            let record = self.record_mut(target)?;
            record.unnotified_event = record.listeners.iter().cloned().collect();
            record.current_event = Some(Rc::new(event));
        }
        let pass = self.ensure_event_notified(target);
        if let Ok(record) = self.record_mut(target) {
            record.current_event = None;
        }
        pass?;

        if method == "Inspector.detached" {
            return Err(DevToolsError::TargetDetached {
                message: "received Inspector.detached event".to_owned(),
            });
        }
        if method == "Inspector.targetCrashed" {
            self.record_mut(target)?.crashed = true;
            return Err(DevToolsError::TargetCrashed {
                message: "tab crashed".to_owned(),
            });
        }
        Ok(())
    }

    fn process_command_response(
        &mut self,
        target: ClientHandle,
        response: crate::codec::InspectorResponse,
    ) -> Result<(), DevToolsError> {
        let (method, deadline) = {
            let record = self.record_mut(target)?;
            let Some(entry) = record.pending.get_mut(&response.id) else {
                // A detached session's late response arrives without a
                // session id and lands at the root; it belongs to nobody.
                if record.parent.is_none() && response.result.is_none() {
                    let classified = parse_inspector_error(&response.error);
                    if matches!(classified, DevToolsError::NoSuchFrame { .. }) {
                        return Ok(());
                    }
                }
                return Err(DevToolsError::unknown("unexpected command response"));
            };
            let method = entry.method.clone();
            let deadline = entry.deadline;
            if entry.state == ResponseState::Ignored {
                record.pending.remove(&response.id);
                debug!(
                    target: CLIENT_TARGET,
                    method = %method,
                    id = response.id,
                    "discarding ignored response"
                );
            } else {
                entry.state = ResponseState::Received;
                entry.response = Some(response.clone());
            }
            (method, deadline)
        };
        debug!(
            target: CLIENT_TARGET,
            method = %method,
            id = response.id,
            session_id = %self.record(target)?.session_id,
            "received response"
        );

        if response.result.is_some() {
            let record = self.record_mut(target)?;
            record.unnotified_command = record.listeners.iter().cloned().collect();
            record.current_command = Some(Rc::new(CommandNotification {
                method,
                result: response.result,
                deadline,
            }));
            let pass = self.ensure_command_notified(target);
            if let Ok(record) = self.record_mut(target) {
                record.current_command = None;
            }
            pass?;
        }
        Ok(())
    }

    fn drain_notifications(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        self.ensure_connect_notified(client)?;
        self.ensure_event_notified(client)?;
        self.ensure_command_notified(client)
    }

    pub(crate) fn ensure_connect_notified(
        &mut self,
        client: ClientHandle,
    ) -> Result<(), DevToolsError> {
        loop {
            let Some(listener) = self.record_mut(client)?.unnotified_connect.pop_front() else {
                return Ok(());
            };
            listener.on_connected(self, client)?;
        }
    }

    fn ensure_event_notified(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        loop {
            let record = self.record_mut(client)?;
            let Some(listener) = record.unnotified_event.pop_front() else {
                return Ok(());
            };
            let Some(event) = record.current_event.clone() else {
                record.unnotified_event.clear();
                return Ok(());
            };
            if let Err(pass_error) = listener.on_event(self, client, &event.method, &event.params) {
                if let Ok(record) = self.record_mut(client) {
                    record.unnotified_event.clear();
                }
                return Err(pass_error);
            }
        }
    }

    fn ensure_command_notified(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        loop {
            let record = self.record_mut(client)?;
            let Some(listener) = record.unnotified_command.pop_front() else {
                return Ok(());
            };
            let Some(notification) = record.current_command.clone() else {
                record.unnotified_command.clear();
                return Ok(());
            };
            listener.on_command_success(
                self,
                client,
                &notification.method,
                notification.result.as_ref(),
                &notification.deadline,
            )?;
        }
    }

    fn fail_if_crashed_or_detached(&self, client: ClientHandle) -> Result<(), DevToolsError> {
        let record = self.record(client)?;
        if record.crashed {
            return Err(DevToolsError::TargetCrashed {
                message: "tab crashed".to_owned(),
            });
        }
        if record.detached {
            return Err(DevToolsError::TargetDetached {
                message: "target detached".to_owned(),
            });
        }
        Ok(())
    }

    /// Write failure: the affected entry is already removed by the caller.
    fn note_transport_loss(&mut self) {
        self.transport_was_lost = true;
        for record in self.clients.iter_mut().flatten() {
            record.connected = false;
        }
    }

    /// Receive failure: every still-pending entry on the connection fails.
    fn fail_all_pending(&mut self) {
        self.transport_was_lost = true;
        for record in self.clients.iter_mut().flatten() {
            record.connected = false;
            record.pending.clear();
        }
    }
}

fn expect_result(result: Option<Value>) -> Result<Value, DevToolsError> {
    result.ok_or_else(|| DevToolsError::unknown("command completed without a result"))
}
