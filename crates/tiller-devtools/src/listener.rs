//! Observer interface over connection, event and command notifications.

use serde_json::Value;

use crate::client::{ClientHandle, DevToolsConnection};
use crate::deadline::Deadline;
use crate::error::DevToolsError;

/// An observer registered on a client.
///
/// Methods take `&self` because notification is reentrant: a handler may
/// send commands through the connection it was notified from, and those
/// sends may complete further notification passes before the handler
/// returns. Implementations keep their state behind interior mutability.
/// Listeners are registered as `Rc` values and are notified in
/// registration order.
pub trait DevToolsListener {
    /// Whether the listener wants the connected notification at all.
    fn listens_to_connections(&self) -> bool {
        true
    }

    /// Called once per successful handshake of the client.
    ///
    /// # Errors
    ///
    /// An error aborts the blocking call that triggered the notification.
    fn on_connected(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
    ) -> Result<(), DevToolsError> {
        let _ = (connection, client);
        Ok(())
    }

    /// Called for every inbound event routed to the client.
    ///
    /// # Errors
    ///
    /// An error clears the remaining notification pass and aborts the
    /// blocking call that triggered it.
    fn on_event(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
        method: &str,
        params: &Value,
    ) -> Result<(), DevToolsError> {
        let _ = (connection, client, method, params);
        Ok(())
    }

    /// Called after a command resolved without error.
    ///
    /// # Errors
    ///
    /// An error aborts the blocking call that triggered the notification.
    fn on_command_success(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
        method: &str,
        result: Option<&Value>,
        command_deadline: &Deadline,
    ) -> Result<(), DevToolsError> {
        let _ = (connection, client, method, result, command_deadline);
        Ok(())
    }
}
