//! Per-client state stored in the connection arena.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde_json::Value;

use crate::codec::{InspectorEvent, InspectorResponse};
use crate::deadline::Deadline;
use crate::listener::DevToolsListener;

/// Stable handle to a client record within a connection's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub(crate) usize);

/// Lifecycle of one outstanding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseState {
    /// The client is waiting for the response.
    Waiting,
    /// The response is blocked by a dialog that was open when the command
    /// was issued.
    Blocked,
    /// The client no longer cares about the response.
    Ignored,
    /// The response has been received.
    Received,
}

/// Bookkeeping for one outstanding command.
pub(crate) struct PendingResponse {
    pub state: ResponseState,
    pub method: String,
    pub deadline: Deadline,
    pub response: Option<InspectorResponse>,
}

/// The command-success notification currently being delivered.
pub(crate) struct CommandNotification {
    pub method: String,
    pub result: Option<Value>,
    pub deadline: Deadline,
}

/// Dialog bookkeeping for one client.
///
/// The browser reports dialogs in order; the closed event only arrives
/// once every dialog is gone, so the queues are cleared wholesale then.
#[derive(Default)]
pub(crate) struct DialogState {
    pub messages: VecDeque<String>,
    pub kinds: VecDeque<String>,
    pub prompt_text: String,
    pub autoaccept_beforeunload: bool,
}

/// One logical protocol session.
///
/// Invariant: a record with a parent has no children and vice versa; the
/// hierarchy is at most one level deep.
pub(crate) struct ClientRecord {
    pub id: String,
    pub session_id: String,
    pub is_root: bool,
    pub parent: Option<ClientHandle>,
    pub children: HashMap<String, ClientHandle>,
    /// Whether the handshake has completed since the last (re)connect.
    pub connected: bool,
    pub crashed: bool,
    pub detached: bool,
    pub is_main_page: bool,
    /// Session id of the BiDi mapper when commands are tunneled.
    pub tunnel_session_id: String,
    pub listeners: Vec<Rc<dyn DevToolsListener>>,
    pub unnotified_connect: VecDeque<Rc<dyn DevToolsListener>>,
    pub unnotified_event: VecDeque<Rc<dyn DevToolsListener>>,
    pub current_event: Option<Rc<InspectorEvent>>,
    pub unnotified_command: VecDeque<Rc<dyn DevToolsListener>>,
    pub current_command: Option<Rc<CommandNotification>>,
    pub pending: HashMap<i64, PendingResponse>,
    pub dialogs: DialogState,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>, is_root: bool) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            is_root,
            parent: None,
            children: HashMap::new(),
            connected: false,
            crashed: false,
            detached: false,
            is_main_page: false,
            tunnel_session_id: String::new(),
            listeners: Vec::new(),
            unnotified_connect: VecDeque::new(),
            unnotified_event: VecDeque::new(),
            current_event: None,
            unnotified_command: VecDeque::new(),
            current_command: None,
            pending: HashMap::new(),
            dialogs: DialogState::default(),
        }
    }

    pub fn is_dialog_open(&self) -> bool {
        !self.dialogs.messages.is_empty()
    }

    /// Discards correlation and notification state after a transport loss.
    pub fn reset_wire_state(&mut self) {
        self.connected = false;
        self.pending.clear();
        self.unnotified_connect.clear();
        self.unnotified_event.clear();
        self.current_event = None;
        self.unnotified_command.clear();
        self.current_command = None;
    }
}
