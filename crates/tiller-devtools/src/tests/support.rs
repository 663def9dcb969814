//! Scripted transports and recording listeners shared by the tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde_json::{Value, json};

use crate::bidi::{CDP_TUNNEL_CHANNEL, CDP_TUNNEL_METHOD, CHANNEL_FIELD, MAPPER_ENTRY_POINT};
use crate::client::{ClientHandle, DevToolsConnection};
use crate::deadline::Deadline;
use crate::error::DevToolsError;
use crate::listener::DevToolsListener;
use crate::transport::{ReceiveResult, Transport};

const ADD_SCRIPT_METHOD: &str = "Page.addScriptToEvaluateOnNewDocument";
const EVALUATE_METHOD: &str = "Runtime.evaluate";

/// How the mock answers user commands once a session's handshake is done.
pub enum Mode {
    /// Answer every command with the default response.
    Echo,
    /// Enqueue an event for `event_session` before the default response.
    EchoWithEvent {
        /// Session the event is tagged with.
        event_session: String,
    },
    /// Accept writes silently; the test drives the inbound queue.
    Scripted,
    /// Drop the connection on the first user command, then echo.
    DropFirstCommand,
    /// Behave as a BiDi mapper living in `mapper_session`.
    Bidi {
        /// Session the mapper answers from.
        mapper_session: String,
    },
}

#[derive(Default)]
struct SessionState {
    add_script_handled: bool,
    runtime_eval_handled: bool,
    connect_complete: bool,
}

/// Scripted in-memory transport answering the connect handshake itself.
///
/// The handshake expects exactly the two setup commands per session, each
/// once; anything else fails the test.
pub struct MockTransport {
    connected: bool,
    connection_count: usize,
    command_count: usize,
    fail_connect_attempt: Option<usize>,
    mode: Mode,
    sessions: HashMap<String, SessionState>,
    queued: Rc<RefCell<VecDeque<String>>>,
    sent: Rc<RefCell<Vec<Value>>>,
}

impl MockTransport {
    pub fn new(mode: Mode) -> Self {
        Self {
            connected: false,
            connection_count: 0,
            command_count: 0,
            fail_connect_attempt: None,
            mode,
            sessions: HashMap::new(),
            queued: Rc::new(RefCell::new(VecDeque::new())),
            sent: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Makes the n-th connect attempt (1-based) fail.
    pub fn fail_connect_attempt(mut self, attempt: usize) -> Self {
        self.fail_connect_attempt = Some(attempt);
        self
    }

    /// Shared handle to the inbound queue.
    pub fn queue_handle(&self) -> Rc<RefCell<VecDeque<String>>> {
        Rc::clone(&self.queued)
    }

    /// Shared handle to the log of sent commands.
    pub fn sent_handle(&self) -> Rc<RefCell<Vec<Value>>> {
        Rc::clone(&self.sent)
    }

    fn enqueue(&self, message: String) {
        self.queued.borrow_mut().push_back(message);
    }

    fn enqueue_handshake_response(&mut self, id: i64, method: &str, session: &str) -> bool {
        let state = self.sessions.entry(session.to_owned()).or_default();
        match method {
            ADD_SCRIPT_METHOD => {
                assert!(
                    !state.add_script_handled,
                    "duplicate handshake command {method} for session '{session}'"
                );
                state.add_script_handled = true;
            }
            EVALUATE_METHOD => {
                assert!(
                    !state.runtime_eval_handled,
                    "duplicate handshake command {method} for session '{session}'"
                );
                state.runtime_eval_handled = true;
            }
            other => panic!("unexpected handshake method: {other}"),
        }
        state.connect_complete = state.add_script_handled && state.runtime_eval_handled;
        self.enqueue(response_message(id, json!({"param": 1}), session));
        true
    }

    fn on_user_command(&mut self, id: i64, method: &str, params: &Value, session: &str) -> bool {
        match &self.mode {
            Mode::Echo => {
                self.enqueue(response_message(id, default_result(params), session));
                true
            }
            Mode::EchoWithEvent { event_session } => {
                let event_session = event_session.clone();
                self.enqueue(event_message("event", json!({}), &event_session));
                self.enqueue(response_message(id, default_result(params), session));
                true
            }
            Mode::Scripted => true,
            Mode::DropFirstCommand => {
                self.command_count += 1;
                if self.command_count == 1 {
                    self.connected = false;
                    self.sessions.clear();
                    self.queued.borrow_mut().clear();
                    false
                } else {
                    self.enqueue(response_message(id, default_result(params), session));
                    true
                }
            }
            Mode::Bidi { mapper_session } => {
                let mapper_session = mapper_session.clone();
                self.on_mapper_command(id, method, params, session, &mapper_session)
            }
        }
    }

    /// Emulates the mapper: answers the outer evaluate, then surfaces the
    /// BiDi (or tunneled CDP) response through the response binding.
    fn on_mapper_command(
        &mut self,
        id: i64,
        method: &str,
        params: &Value,
        session: &str,
        mapper_session: &str,
    ) -> bool {
        assert_eq!(method, EVALUATE_METHOD, "mapper only accepts evaluate");
        assert_eq!(session, mapper_session, "mapper commands must target the mapper session");
        let expression = params
            .get("expression")
            .and_then(Value::as_str)
            .expect("evaluate without expression");
        let inner = expression
            .strip_prefix(MAPPER_ENTRY_POINT)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
            .expect("expression is not a mapper invocation");
        let argument: String =
            serde_json::from_str(inner).expect("mapper argument is a string literal");
        let bidi: Value = serde_json::from_str(&argument).expect("mapper argument holds a command");

        self.enqueue(response_message(
            id,
            json!({"result": {"type": "undefined"}}),
            session,
        ));

        let bidi_id = bidi.get("id").cloned().expect("BiDi command without id");
        let bidi_method = bidi
            .get("method")
            .and_then(Value::as_str)
            .expect("BiDi command without method");

        let payload = if bidi_method == CDP_TUNNEL_METHOD {
            let tunnel_id = bidi_id.as_i64().expect("tunnel id is integral");
            assert!(tunnel_id < 0, "tunneled commands must use negative ids");
            let tunnel_params = bidi.get("params").cloned().unwrap_or_else(|| json!({}));
            let cdp_session = tunnel_params
                .get("cdpSession")
                .cloned()
                .unwrap_or_else(|| json!(""));
            let cdp_params = tunnel_params.get("cdpParams").cloned().unwrap_or_else(|| json!({}));
            json!({
                "id": tunnel_id,
                CHANNEL_FIELD: CDP_TUNNEL_CHANNEL,
                "session": cdp_session,
                "result": default_result(&cdp_params),
            })
        } else {
            let mut payload = json!({
                "id": bidi_id,
                "result": default_result(&bidi.get("params").cloned().unwrap_or_else(|| json!({}))),
            });
            if let Some(channel) = bidi.get(CHANNEL_FIELD) {
                payload[CHANNEL_FIELD] = channel.clone();
            }
            payload
        };
        self.enqueue(binding_event_message(&payload, mapper_session));
        true
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, url: &str) -> bool {
        assert_eq!(url, "http://url", "unexpected connect url");
        self.connection_count += 1;
        self.connected = self.fail_connect_attempt != Some(self.connection_count);
        self.connected
    }

    fn send(&mut self, message: &str) -> bool {
        assert!(self.connected, "send on a disconnected transport");
        let command: Value = serde_json::from_str(message).expect("sent message is JSON");
        self.sent.borrow_mut().push(command.clone());

        let id = command.get("id").and_then(Value::as_i64).expect("command id");
        let method = command
            .get("method")
            .and_then(Value::as_str)
            .expect("command method")
            .to_owned();
        let params = command.get("params").cloned().unwrap_or_else(|| json!({}));
        let session = command
            .get("sessionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let handshake_done = self
            .sessions
            .get(&session)
            .is_some_and(|state| state.connect_complete);
        if handshake_done {
            self.on_user_command(id, &method, &params, &session)
        } else {
            self.enqueue_handshake_response(id, &method, &session)
        }
    }

    fn receive(&mut self, deadline: &Deadline) -> ReceiveResult {
        let _ = deadline;
        if let Some(message) = self.queued.borrow_mut().pop_front() {
            return ReceiveResult::Message(message);
        }
        if self.connected {
            ReceiveResult::TimedOut
        } else {
            ReceiveResult::Disconnected
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn has_buffered_message(&self) -> bool {
        !self.queued.borrow().is_empty()
    }
}

/// Default result the mock answers with: echoes a ping, else `{"param":1}`.
pub fn default_result(params: &Value) -> Value {
    params
        .get("ping")
        .and_then(Value::as_i64)
        .map_or_else(|| json!({"param": 1}), |ping| json!({"pong": ping}))
}

/// Serializes a response message tagged with `session`.
pub fn response_message(id: i64, result: Value, session: &str) -> String {
    let mut message = json!({"id": id, "result": result});
    if !session.is_empty() {
        message["sessionId"] = Value::from(session);
    }
    message.to_string()
}

/// Serializes an event message tagged with `session`.
pub fn event_message(method: &str, params: Value, session: &str) -> String {
    let mut message = json!({"method": method, "params": params});
    if !session.is_empty() {
        message["sessionId"] = Value::from(session);
    }
    message.to_string()
}

/// Serializes a `Runtime.bindingCalled` event carrying `payload`.
pub fn binding_event_message(payload: &Value, session: &str) -> String {
    event_message(
        "Runtime.bindingCalled",
        json!({"name": "sendBidiResponse", "payload": payload.to_string()}),
        session,
    )
}

/// Pushes a raw message into a shared queue handle.
pub fn push_message(queue: &Rc<RefCell<VecDeque<String>>>, message: String) {
    queue.borrow_mut().push_back(message);
}

type SuccessCallback = Box<dyn Fn(&mut DevToolsConnection, ClientHandle)>;

/// Records every notification it receives, in order.
#[derive(Default)]
pub struct RecordingListener {
    records: RefCell<Vec<(String, String)>>,
    callback: RefCell<Option<SuccessCallback>>,
}

impl RecordingListener {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_success_callback(callback: SuccessCallback) -> Rc<Self> {
        let listener = Self::default();
        *listener.callback.borrow_mut() = Some(callback);
        Rc::new(listener)
    }

    pub fn records(&self) -> Vec<(String, String)> {
        self.records.borrow().clone()
    }
}

impl DevToolsListener for RecordingListener {
    fn on_connected(
        &self,
        _connection: &mut DevToolsConnection,
        _client: ClientHandle,
    ) -> Result<(), DevToolsError> {
        self.records
            .borrow_mut()
            .push(("connected".to_owned(), String::new()));
        Ok(())
    }

    fn on_event(
        &self,
        _connection: &mut DevToolsConnection,
        _client: ClientHandle,
        method: &str,
        _params: &Value,
    ) -> Result<(), DevToolsError> {
        self.records
            .borrow_mut()
            .push(("event".to_owned(), method.to_owned()));
        Ok(())
    }

    fn on_command_success(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
        method: &str,
        _result: Option<&Value>,
        _command_deadline: &Deadline,
    ) -> Result<(), DevToolsError> {
        self.records
            .borrow_mut()
            .push(("command".to_owned(), method.to_owned()));
        if let Some(callback) = self.callback.borrow().as_ref() {
            callback(connection, client);
        }
        Ok(())
    }
}

/// Sends a command from inside the first event notification and records
/// the out-of-order pong it resolves to.
pub struct PingingListener {
    ping: i64,
    pong: Cell<i64>,
    handled: Cell<bool>,
}

impl PingingListener {
    pub fn new(ping: i64) -> Rc<Self> {
        Rc::new(Self {
            ping,
            // Start different so the test observes the update.
            pong: Cell::new(ping + 1),
            handled: Cell::new(false),
        })
    }

    pub fn ping(&self) -> i64 {
        self.ping
    }

    pub fn pong(&self) -> i64 {
        self.pong.get()
    }
}

impl DevToolsListener for PingingListener {
    fn on_event(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
        method: &str,
        _params: &Value,
    ) -> Result<(), DevToolsError> {
        if self.handled.get() {
            return Ok(());
        }
        self.handled.set(true);
        assert_eq!(method, "event");
        let result =
            connection.send_command_and_get_result(client, "method", json!({"ping": self.ping}))?;
        let pong = result
            .get("pong")
            .and_then(Value::as_i64)
            .ok_or_else(|| DevToolsError::Unknown {
                message: "result does not contain 'pong' field".to_owned(),
            })?;
        self.pong.set(pong);
        Ok(())
    }
}

/// Sends a command from its connect notification and checks ordering.
pub struct ConnectProbeListener {
    method: String,
    connected_seen: Cell<bool>,
    event_seen: Cell<bool>,
}

impl ConnectProbeListener {
    pub fn new(method: &str) -> Rc<Self> {
        Rc::new(Self {
            method: method.to_owned(),
            connected_seen: Cell::new(false),
            event_seen: Cell::new(false),
        })
    }

    pub fn verify_called(&self) {
        assert!(self.connected_seen.get(), "on_connected never ran");
        assert!(self.event_seen.get(), "on_event never ran");
    }
}

impl DevToolsListener for ConnectProbeListener {
    fn on_connected(
        &self,
        connection: &mut DevToolsConnection,
        client: ClientHandle,
    ) -> Result<(), DevToolsError> {
        assert!(!self.connected_seen.get());
        assert!(!self.event_seen.get());
        self.connected_seen.set(true);
        connection.send_command(client, &self.method, json!({}))
    }

    fn on_event(
        &self,
        _connection: &mut DevToolsConnection,
        _client: ClientHandle,
        _method: &str,
        _params: &Value,
    ) -> Result<(), DevToolsError> {
        assert!(self.connected_seen.get(), "event arrived before connect");
        self.event_seen.set(true);
        Ok(())
    }
}

/// Fails the first event notification with the supplied error.
pub struct FailingEventListener {
    error: DevToolsError,
}

impl FailingEventListener {
    pub fn new(error: DevToolsError) -> Rc<Self> {
        Rc::new(Self { error })
    }
}

impl DevToolsListener for FailingEventListener {
    fn on_event(
        &self,
        _connection: &mut DevToolsConnection,
        _client: ClientHandle,
        _method: &str,
        _params: &Value,
    ) -> Result<(), DevToolsError> {
        Err(self.error.clone())
    }
}
