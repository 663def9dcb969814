//! JavaScript dialog bookkeeping and handling.

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::CLIENT_TARGET;
use super::connection::DevToolsConnection;
use super::dispatch::CommandOptions;
use super::record::ClientHandle;
use crate::error::DevToolsError;

impl DevToolsConnection {
    /// Whether the client currently has an unhandled dialog.
    #[must_use]
    pub fn is_dialog_open(&self, client: ClientHandle) -> bool {
        self.record(client)
            .map(|record| record.is_dialog_open())
            .unwrap_or(false)
    }

    /// Message of the oldest unhandled dialog.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::NoSuchAlert`] when no dialog is open.
    pub fn dialog_message(&self, client: ClientHandle) -> Result<String, DevToolsError> {
        self.record(client)?
            .dialogs
            .messages
            .front()
            .cloned()
            .ok_or_else(no_such_alert)
    }

    /// Kind of the oldest unhandled dialog (`alert`, `confirm`, …).
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::NoSuchAlert`] when no dialog is open.
    pub fn dialog_kind(&self, client: ClientHandle) -> Result<String, DevToolsError> {
        self.record(client)?
            .dialogs
            .kinds
            .front()
            .cloned()
            .ok_or_else(no_such_alert)
    }

    /// Controls whether `beforeunload` dialogs are accepted on arrival.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn set_auto_accept_beforeunload(
        &mut self,
        client: ClientHandle,
        value: bool,
    ) -> Result<(), DevToolsError> {
        self.record_mut(client)?.dialogs.autoaccept_beforeunload = value;
        Ok(())
    }

    /// Answers the oldest unhandled dialog.
    ///
    /// The dialog command bypasses alert blocking, otherwise an open
    /// dialog could never be dismissed. The send is retried once to cover
    /// a renderer race where the first attempt races the dialog teardown.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::NoSuchAlert`] when no dialog is open, or
    /// the failure of the dialog command itself.
    pub fn handle_dialog(
        &mut self,
        client: ClientHandle,
        accept: bool,
        prompt_text: Option<&str>,
    ) -> Result<(), DevToolsError> {
        if !self.is_dialog_open(client) {
            return Err(no_such_alert());
        }
        let prompt = prompt_text.map_or_else(
            || {
                self.record(client)
                    .map(|record| record.dialogs.prompt_text.clone())
                    .unwrap_or_default()
            },
            str::to_owned,
        );
        let params = json!({"accept": accept, "promptText": prompt});
        if let Err(first_attempt) = self.send_command_internal(
            client,
            "Page.handleJavaScriptDialog",
            params.clone(),
            CommandOptions::past_dialog_block(),
        ) {
            warn!(
                target: CLIENT_TARGET,
                error = %first_attempt,
                "dialog command failed, retrying once"
            );
            self.send_command_internal(
                client,
                "Page.handleJavaScriptDialog",
                params,
                CommandOptions::past_dialog_block(),
            )?;
        }
        // The queues may have been cleared while waiting for the response.
        let record = self.record_mut(client)?;
        record.dialogs.messages.pop_front();
        record.dialogs.kinds.pop_front();
        Ok(())
    }

    pub(crate) fn handle_dialog_opening(
        &mut self,
        client: ClientHandle,
        params: &Value,
    ) -> Result<(), DevToolsError> {
        let Some(message) = params.get("message").and_then(Value::as_str) else {
            return Err(DevToolsError::unknown(
                "dialog event missing or invalid 'message'",
            ));
        };
        let Some(kind) = params.get("type").and_then(Value::as_str) else {
            return Err(DevToolsError::unknown("dialog has invalid 'type'"));
        };
        let Some(prompt_text) = params.get("defaultPrompt").and_then(Value::as_str) else {
            return Err(DevToolsError::unknown(
                "dialog event missing or invalid 'defaultPrompt'",
            ));
        };
        debug!(
            target: CLIENT_TARGET,
            kind,
            "dialog opened"
        );

        let record = self.record_mut(client)?;
        record.dialogs.messages.push_back(message.to_owned());
        record.dialogs.kinds.push_back(kind.to_owned());
        record.dialogs.prompt_text = prompt_text.to_owned();

        if kind == "beforeunload" && record.dialogs.autoaccept_beforeunload {
            return self.handle_dialog(client, true, None);
        }
        Ok(())
    }

    /// The browser only reports this once every dialog is gone, including
    /// any the user closed manually.
    pub(crate) fn handle_dialog_closed(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        let record = self.record_mut(client)?;
        record.dialogs.messages.clear();
        record.dialogs.kinds.clear();
        Ok(())
    }
}

fn no_such_alert() -> DevToolsError {
    DevToolsError::NoSuchAlert {
        message: "no dialog is open".to_owned(),
    }
}
