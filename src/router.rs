//! Data-channel event routing.
//!
//! Raw channel messages are decoded into [`ServerEvent`]s and mapped to a
//! list of actions by a pure dispatch function; the router then performs
//! the actions (callback invocations and channel writes). Function calls
//! naming a locally-registered function are answered on the channel
//! without surfacing to the application; everything else is delegated to
//! the `on_function_call` callback.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{ClientEvent, FunctionCallRequest, ServerEvent};

// ── Channel writer ──────────────────────────────────────────────────────

/// Ordered, cloneable writer onto the outbound side of the data channel.
///
/// Writes are queued synchronously, so two consecutive sends from one
/// caller can never interleave with another writer's events.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelWriter {
    /// Create a writer and the receiving end the connection drains.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Serialize and queue one client event.
    pub fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let bytes = serde_json::to_vec(event)?;
        self.tx
            .send(bytes)
            .map_err(|_| crate::error::VoiceError::NotConnected)
    }

    /// Queue the function-result pair: the output item followed by a
    /// response trigger. No await point between the two sends, so the pair
    /// is atomic with respect to other writers.
    pub fn send_function_result(&self, call_id: &str, result: &Value) -> Result<()> {
        self.send_event(&ClientEvent::function_output(call_id, result)?)?;
        self.send_event(&ClientEvent::ResponseCreate)
    }
}

// ── Local function table ────────────────────────────────────────────────

/// Handler signature for a locally-served function.
pub type LocalFunction = fn(&Map<String, Value>) -> Value;

/// Declarative name-to-handler table for functions answered on-device.
pub struct LocalFunctionTable {
    handlers: HashMap<&'static str, LocalFunction>,
}

impl LocalFunctionTable {
    /// Empty table; every function call is delegated.
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register a handler.
    pub fn with(mut self, name: &'static str, handler: LocalFunction) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    /// Look up a handler by function name.
    pub fn get(&self, name: &str) -> Option<&LocalFunction> {
        self.handlers.get(name)
    }

    /// Registered function names, for session configuration.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

impl Default for LocalFunctionTable {
    /// The built-in device-control functions.
    fn default() -> Self {
        Self::empty()
            .with("set_device_volume", set_device_volume)
            .with("adjust_device_volume", adjust_device_volume)
            .with("quiet_device", quiet_device)
            .with("stop_audio", stop_audio)
    }
}

fn set_device_volume(args: &Map<String, Value>) -> Value {
    let volume = args.get("volume_level").and_then(Value::as_i64).unwrap_or(50);
    info!(volume, "set device volume");
    json!({"success": true, "volume": volume})
}

fn adjust_device_volume(args: &Map<String, Value>) -> Value {
    let action = args.get("action").and_then(Value::as_str).unwrap_or("increase");
    info!(action, "adjust device volume");
    json!({"success": true, "action": action})
}

fn quiet_device(_args: &Map<String, Value>) -> Value {
    info!("quiet device");
    json!({"success": true, "volume": 0})
}

fn stop_audio(_args: &Map<String, Value>) -> Value {
    info!("stop audio");
    json!({"success": true, "message": "Audio stopped"})
}

// ── Dispatch ────────────────────────────────────────────────────────────

/// One effect the router must perform for a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterAction {
    /// Surface a completed user transcript.
    UserTranscript(String),
    /// Surface a streaming assistant transcript chunk.
    AssistantDelta(String),
    /// Surface a final assistant transcript.
    AssistantTranscript(String),
    /// Answer a locally-served function call on the channel.
    RespondLocal {
        /// Correlation identifier of the call.
        call_id: String,
        /// Handler result to write back.
        result: Value,
    },
    /// Hand a non-local function call to the application.
    Delegate(FunctionCallRequest),
}

/// Map one decoded event to its actions. Pure: no I/O, no state.
///
/// Unknown event types and events with no routing consequence map to an
/// empty action list.
pub fn route(event: &ServerEvent, table: &LocalFunctionTable) -> Vec<RouterAction> {
    match event {
        ServerEvent::InputTranscriptCompleted { transcript } => {
            vec![RouterAction::UserTranscript(transcript.clone())]
        }
        ServerEvent::TranscriptDelta { delta } => {
            vec![RouterAction::AssistantDelta(delta.clone())]
        }
        ServerEvent::TranscriptDone { transcript } => {
            vec![RouterAction::AssistantTranscript(transcript.clone())]
        }
        ServerEvent::OutputItemDone { item } => match FunctionCallRequest::from_item(item) {
            Some(call) => match table.get(&call.name) {
                Some(handler) => vec![RouterAction::RespondLocal {
                    call_id: call.call_id.clone(),
                    result: handler(&call.arguments),
                }],
                None => vec![RouterAction::Delegate(call)],
            },
            None => Vec::new(),
        },
        ServerEvent::Error { error } => {
            error!(error_type = %error.error_type, message = %error.message, "server error");
            Vec::new()
        }
        ServerEvent::SessionCreated { .. } => {
            debug!("server session created");
            Vec::new()
        }
        ServerEvent::SpeechStarted => {
            debug!("speech started");
            Vec::new()
        }
        ServerEvent::SpeechStopped => {
            debug!("speech stopped");
            Vec::new()
        }
        ServerEvent::ResponseDone | ServerEvent::Unknown => Vec::new(),
    }
}

// ── Callbacks ───────────────────────────────────────────────────────────

type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;
type FunctionCallback = Arc<dyn Fn(FunctionCallRequest) + Send + Sync>;

/// Application callbacks for surfaced events. All optional; an unset
/// callback means the event is silently dropped at the surface.
#[derive(Clone, Default)]
pub struct RouterCallbacks {
    on_user_transcript: Option<TextCallback>,
    on_assistant_delta: Option<TextCallback>,
    on_assistant_transcript: Option<TextCallback>,
    on_function_call: Option<FunctionCallback>,
}

impl RouterCallbacks {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke when the user's transcript completes.
    pub fn on_user_transcript(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_user_transcript = Some(Arc::new(f));
        self
    }

    /// Invoke for each assistant transcript chunk.
    pub fn on_assistant_delta(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_assistant_delta = Some(Arc::new(f));
        self
    }

    /// Invoke when the assistant's transcript completes.
    pub fn on_assistant_transcript(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_assistant_transcript = Some(Arc::new(f));
        self
    }

    /// Invoke for function calls not served locally.
    pub fn on_function_call(
        mut self,
        f: impl Fn(FunctionCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_function_call = Some(Arc::new(f));
        self
    }
}

// ── Router ──────────────────────────────────────────────────────────────

/// Decodes inbound channel messages and performs the resulting actions.
pub struct EventRouter {
    table: LocalFunctionTable,
    callbacks: RouterCallbacks,
    writer: ChannelWriter,
}

impl EventRouter {
    /// Build a router over a channel writer.
    pub fn new(table: LocalFunctionTable, callbacks: RouterCallbacks, writer: ChannelWriter) -> Self {
        Self { table, callbacks, writer }
    }

    /// Handle one raw channel message. A message that is not valid UTF-8
    /// JSON is logged and dropped; routing continues with the next one.
    pub fn handle_raw(&self, bytes: &[u8]) {
        let event: ServerEvent = match serde_json::from_slice(bytes) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable channel message");
                return;
            }
        };
        self.handle(&event);
    }

    /// Handle one decoded event.
    pub fn handle(&self, event: &ServerEvent) {
        for action in route(event, &self.table) {
            self.perform(action);
        }
    }

    fn perform(&self, action: RouterAction) {
        match action {
            RouterAction::UserTranscript(text) => {
                if let Some(cb) = &self.callbacks.on_user_transcript {
                    cb(&text);
                }
            }
            RouterAction::AssistantDelta(text) => {
                if let Some(cb) = &self.callbacks.on_assistant_delta {
                    cb(&text);
                }
            }
            RouterAction::AssistantTranscript(text) => {
                if let Some(cb) = &self.callbacks.on_assistant_transcript {
                    cb(&text);
                }
            }
            RouterAction::RespondLocal { call_id, result } => {
                debug!(%call_id, "answering function call locally");
                if let Err(e) = self.writer.send_function_result(&call_id, &result) {
                    warn!(%call_id, error = %e, "failed to write function result");
                }
            }
            RouterAction::Delegate(call) => {
                if let Some(cb) = &self.callbacks.on_function_call {
                    cb(call);
                } else {
                    warn!(name = %call.name, "unhandled function call");
                }
            }
        }
    }
}
