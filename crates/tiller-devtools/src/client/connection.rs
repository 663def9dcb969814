//! Connection construction, attachment and the connect sequence.

use std::rc::Rc;

use serde_json::json;
use tiller_config::ProtocolTimings;
use tracing::{debug, warn};

use super::CLIENT_TARGET;
use super::dispatch::CommandOptions;
use super::record::{ClientHandle, ClientRecord};
use crate::error::DevToolsError;
use crate::listener::DevToolsListener;
use crate::transport::Transport;

/// Callback run exactly once after a successful reconnect, before the
/// reconnected state is handed back to callers.
pub type FrontendCloser = Box<dyn FnMut() -> Result<(), DevToolsError>>;

/// Caches the native built-ins before page scripts can patch them. The
/// snapshot is installed for every new document and evaluated once in the
/// current one as part of the connect handshake.
const BOOTSTRAP_SCRIPT: &str = "(function () {\
window.__tiller_Array = window.Array;\
window.__tiller_Object = window.Object;\
window.__tiller_Promise = window.Promise;\
window.__tiller_Proxy = window.Proxy;\
window.__tiller_Symbol = window.Symbol;\
window.__tiller_JSON = window.JSON;\
}) ();";

/// One transport and the arena of logical sessions multiplexed over it.
pub struct DevToolsConnection {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) url: String,
    pub(crate) clients: Vec<Option<ClientRecord>>,
    pub(crate) root: ClientHandle,
    pub(crate) next_id: i64,
    /// Set when a loss is detected after a successful connect; consumed by
    /// the frontend closer on the next successful reconnect.
    pub(crate) transport_was_lost: bool,
    pub(crate) frontend_closer: Option<FrontendCloser>,
    pub(crate) timings: ProtocolTimings,
}

impl DevToolsConnection {
    /// Builds a connection around `transport` with default timings.
    ///
    /// The root client is created immediately; it is not connected until
    /// [`Self::connect_if_necessary`] runs.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        url: impl Into<String>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self::with_timings(id, session_id, url, transport, ProtocolTimings::default())
    }

    /// Builds a connection with explicit timings.
    #[must_use]
    pub fn with_timings(
        id: impl Into<String>,
        session_id: impl Into<String>,
        url: impl Into<String>,
        transport: Box<dyn Transport>,
        timings: ProtocolTimings,
    ) -> Self {
        let root_record = ClientRecord::new(id, session_id, true);
        Self {
            transport,
            url: url.into(),
            clients: vec![Some(root_record)],
            root: ClientHandle(0),
            next_id: 1,
            transport_was_lost: false,
            frontend_closer: None,
            timings,
        }
    }

    /// Handle of the root client.
    #[must_use]
    pub fn root(&self) -> ClientHandle {
        self.root
    }

    /// Creates a detached (null) client record.
    ///
    /// The record is unusable until [`Self::attach`] links it under the
    /// root.
    pub fn create_client(
        &mut self,
        id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> ClientHandle {
        let handle = ClientHandle(self.clients.len());
        self.clients
            .push(Some(ClientRecord::new(id, session_id, false)));
        handle
    }

    /// Tears down a client record and discards its correlation state.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for the root client or a stale
    /// handle.
    pub fn release_client(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        if client == self.root {
            return Err(DevToolsError::unknown("the root client cannot be released"));
        }
        let record = self
            .clients
            .get_mut(client.0)
            .and_then(Option::take)
            .ok_or_else(stale_handle)?;
        if let Some(parent) = record.parent
            && let Ok(parent_record) = self.record_mut(parent)
        {
            parent_record.children.remove(&record.session_id);
        }
        Ok(())
    }

    /// Makes `client` a child of `parent`.
    ///
    /// All commands of the child are routed via the parent, and the parent
    /// demultiplexes inbound messages back to it by session id. When the
    /// parent is already connected the child immediately runs its own
    /// connect sequence.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] when `parent` itself has a
    /// parent (the hierarchy is flat) or when `client` is not null.
    pub fn attach(
        &mut self,
        client: ClientHandle,
        parent: ClientHandle,
    ) -> Result<(), DevToolsError> {
        if self.record(parent)?.parent.is_some() {
            return Err(DevToolsError::unknown(
                "a client can be attached only to a root client",
            ));
        }
        if !self.is_null(client) {
            return Err(DevToolsError::unknown(
                "attaching a non-null client to a new parent is prohibited",
            ));
        }
        let parent_connected = self.is_connected(parent);
        let session_id = self.record(client)?.session_id.clone();

        self.record_mut(client)?.parent = Some(parent);
        self.record_mut(parent)?.children.insert(session_id, client);

        if parent_connected {
            self.synthesize_connect(client)?;
        }
        Ok(())
    }

    /// Connects and configures the remote end.
    ///
    /// Does nothing when already connected. Opens the transport (root
    /// only), runs the frontend closer exactly once when the open follows
    /// a detected loss, and performs the two-command handshake for the
    /// root and every attached child. Listeners are notified of the
    /// connection once their client's handshake completes.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Disconnected`] when the transport cannot
    /// be opened and [`DevToolsError::Unknown`] for a null client.
    pub fn connect_if_necessary(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        if self.is_null(client) {
            return Err(DevToolsError::unknown(
                "null client cannot be connected; attach it to a root client first",
            ));
        }
        if self.is_connected(client) {
            return Ok(());
        }
        let root = self.root_of(client)?;

        if !self.transport.is_connected() {
            debug!(target: CLIENT_TARGET, url = %self.url, "opening transport");
            let url = self.url.clone();
            if !self.transport.connect(&url) {
                return Err(DevToolsError::disconnected("unable to connect to renderer"));
            }
            for record in self.clients.iter_mut().flatten() {
                record.reset_wire_state();
            }
            if self.transport_was_lost {
                self.transport_was_lost = false;
                self.run_frontend_closer()?;
            }
        }

        if !self.record(root)?.connected {
            self.synthesize_connect(root)?;
            let children: Vec<ClientHandle> =
                self.record(root)?.children.values().copied().collect();
            for child in children {
                if !self.record(child)?.connected {
                    self.synthesize_connect(child)?;
                }
            }
        } else if client != root && !self.record(client)?.connected {
            self.synthesize_connect(client)?;
        }
        Ok(())
    }

    /// Registers a listener on the client.
    ///
    /// Registration order is notification order. Listeners must outlive
    /// the calls that notify them, which `Rc` guarantees.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn add_listener(
        &mut self,
        client: ClientHandle,
        listener: Rc<dyn DevToolsListener>,
    ) -> Result<(), DevToolsError> {
        if self.is_connected(client) && listener.listens_to_connections() {
            warn!(
                target: CLIENT_TARGET,
                client = %self.record(client)?.id,
                "subscribing a connection listener to an already connected client; \
                 the connection notification will not arrive"
            );
        }
        self.record_mut(client)?.listeners.push(listener);
        Ok(())
    }

    /// Removes a listener registered on the client, cursors included.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn remove_listener(
        &mut self,
        client: ClientHandle,
        listener: &Rc<dyn DevToolsListener>,
    ) -> Result<(), DevToolsError> {
        let record = self.record_mut(client)?;
        record
            .listeners
            .retain(|candidate| !Rc::ptr_eq(candidate, listener));
        record
            .unnotified_connect
            .retain(|candidate| !Rc::ptr_eq(candidate, listener));
        record
            .unnotified_event
            .retain(|candidate| !Rc::ptr_eq(candidate, listener));
        record
            .unnotified_command
            .retain(|candidate| !Rc::ptr_eq(candidate, listener));
        Ok(())
    }

    /// Number of listeners currently registered on the client.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn listener_count(&self, client: ClientHandle) -> Result<usize, DevToolsError> {
        Ok(self.record(client)?.listeners.len())
    }

    /// Installs the callback run once per successful reconnect.
    pub fn set_frontend_closer(&mut self, closer: FrontendCloser) {
        self.frontend_closer = Some(closer);
    }

    /// Stable identifier of the client.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn client_id(&self, client: ClientHandle) -> Result<&str, DevToolsError> {
        Ok(self.record(client)?.id.as_str())
    }

    /// Session id of the client; empty for the root.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn session_id(&self, client: ClientHandle) -> Result<&str, DevToolsError> {
        Ok(self.record(client)?.session_id.as_str())
    }

    /// Whether the client has neither a transport nor a parent.
    #[must_use]
    pub fn is_null(&self, client: ClientHandle) -> bool {
        self.record(client)
            .map(|record| !record.is_root && record.parent.is_none())
            .unwrap_or(true)
    }

    /// Whether the client's handshake completed over a live transport.
    #[must_use]
    pub fn is_connected(&self, client: ClientHandle) -> bool {
        self.record(client)
            .map(|record| record.connected && self.transport.is_connected())
            .unwrap_or(false)
    }

    /// Whether the client's renderer crashed.
    #[must_use]
    pub fn was_crashed(&self, client: ClientHandle) -> bool {
        self.record(client)
            .map(|record| record.crashed)
            .unwrap_or(false)
    }

    /// Whether the client fronts a main page target.
    #[must_use]
    pub fn is_main_page(&self, client: ClientHandle) -> bool {
        self.record(client)
            .map(|record| record.is_main_page)
            .unwrap_or(false)
    }

    /// Marks the client as fronting a main page target.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn set_main_page(&mut self, client: ClientHandle, value: bool) -> Result<(), DevToolsError> {
        self.record_mut(client)?.is_main_page = value;
        Ok(())
    }

    /// Marks the client's target as detached.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn set_detached(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        self.record_mut(client)?.detached = true;
        Ok(())
    }

    /// The id the next command will be assigned.
    #[must_use]
    pub fn next_message_id(&self) -> i64 {
        self.next_id
    }

    /// Session id of the BiDi mapper; empty when no tunnel is set up.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] for a stale handle.
    pub fn tunnel_session_id(&self, client: ClientHandle) -> Result<&str, DevToolsError> {
        Ok(self.record(client)?.tunnel_session_id.as_str())
    }

    /// Records the BiDi mapper session the client tunnels through.
    ///
    /// # Errors
    ///
    /// Returns [`DevToolsError::Unknown`] when a tunnel is already set up.
    pub fn set_tunnel_session_id(
        &mut self,
        client: ClientHandle,
        session_id: impl Into<String>,
    ) -> Result<(), DevToolsError> {
        let record = self.record_mut(client)?;
        if !record.tunnel_session_id.is_empty() {
            return Err(DevToolsError::unknown(
                "BiDi tunnel is already set up in this client",
            ));
        }
        record.tunnel_session_id = session_id.into();
        Ok(())
    }

    pub(crate) fn record(&self, client: ClientHandle) -> Result<&ClientRecord, DevToolsError> {
        self.clients
            .get(client.0)
            .and_then(Option::as_ref)
            .ok_or_else(stale_handle)
    }

    pub(crate) fn record_mut(
        &mut self,
        client: ClientHandle,
    ) -> Result<&mut ClientRecord, DevToolsError> {
        self.clients
            .get_mut(client.0)
            .and_then(Option::as_mut)
            .ok_or_else(stale_handle)
    }

    pub(crate) fn root_of(&self, client: ClientHandle) -> Result<ClientHandle, DevToolsError> {
        let record = self.record(client)?;
        if record.is_root {
            Ok(client)
        } else {
            record.parent.ok_or_else(|| {
                DevToolsError::unknown("null client has no transport path to a root")
            })
        }
    }

    pub(crate) fn advance_next_message_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn run_frontend_closer(&mut self) -> Result<(), DevToolsError> {
        if let Some(mut closer) = self.frontend_closer.take() {
            let result = closer();
            self.frontend_closer = Some(closer);
            result?;
        }
        Ok(())
    }

    /// Runs the two-command handshake and the connect notification pass.
    fn synthesize_connect(&mut self, client: ClientHandle) -> Result<(), DevToolsError> {
        debug!(
            target: CLIENT_TARGET,
            client = %self.record(client)?.id,
            session_id = %self.record(client)?.session_id,
            "configuring remote end"
        );
        self.send_command_internal(
            client,
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": BOOTSTRAP_SCRIPT}),
            CommandOptions::past_dialog_block(),
        )?;
        self.send_command_internal(
            client,
            "Runtime.evaluate",
            json!({"expression": BOOTSTRAP_SCRIPT}),
            CommandOptions::past_dialog_block(),
        )?;

        let record = self.record_mut(client)?;
        record.connected = true;
        record.unnotified_connect = record
            .listeners
            .iter()
            .filter(|listener| listener.listens_to_connections())
            .cloned()
            .collect();
        self.ensure_connect_notified(client)
    }
}

fn stale_handle() -> DevToolsError {
    DevToolsError::unknown("stale client handle")
}
