use std::sync::{Arc, PoisonError, RwLock};

use dipc_frame::{Frame, Opcode};
use serde_json::Value;
use tracing::trace;

use crate::error::ClientError;
use crate::handshake::ReadyEvent;

/// An unsolicited inbound frame: a dispatched event or an unmatched response.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub opcode: Opcode,
    /// `cmd` field (`DISPATCH` for pushed events).
    pub cmd: Option<String>,
    /// `evt` field.
    pub evt: Option<String>,
    /// `nonce` field, set on responses nobody was waiting for.
    pub nonce: Option<String>,
    /// `data` field, `Null` when absent.
    pub data: Value,
    /// Full payload as received.
    pub payload: Value,
}

impl Event {
    pub fn from_frame(frame: Frame) -> Self {
        let field = |key: &str| frame.str_field(key).map(str::to_string);
        let cmd = field("cmd");
        let evt = field("evt");
        let nonce = field("nonce");
        let data = frame.payload.get("data").cloned().unwrap_or(Value::Null);
        Self {
            opcode: frame.opcode,
            cmd,
            evt,
            nonce,
            data,
            payload: frame.payload,
        }
    }
}

/// Receives connection notifications. Every hook defaults to a no-op.
///
/// Inbound hooks (`on_ready`, `on_event`, `on_close` when the peer initiates,
/// `on_disconnect`) run on the receive-loop thread and hold it up until they
/// return. `on_sent` runs on the thread that sent.
pub trait EventHandler: Send + Sync {
    /// Handshake completed.
    fn on_ready(&self, _ready: &ReadyEvent) {}

    /// A frame that answered no pending command.
    fn on_event(&self, _event: &Event) {}

    /// A frame was written to the peer.
    fn on_sent(&self, _opcode: Opcode, _payload: &Value) {}

    /// The connection was closed locally.
    fn on_close(&self) {}

    /// The connection was lost after reaching `Connected`.
    fn on_disconnect(&self, _reason: &ClientError) {}
}

/// Fans notifications out to registered handlers, in registration order.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn ready(&self, ready: &ReadyEvent) {
        for handler in self.snapshot() {
            handler.on_ready(ready);
        }
    }

    pub fn event(&self, event: &Event) {
        trace!(evt = ?event.evt, cmd = ?event.cmd, "dispatching event");
        for handler in self.snapshot() {
            handler.on_event(event);
        }
    }

    pub fn sent(&self, opcode: Opcode, payload: &Value) {
        for handler in self.snapshot() {
            handler.on_sent(opcode, payload);
        }
    }

    pub fn closed(&self) {
        for handler in self.snapshot() {
            handler.on_close();
        }
    }

    pub fn disconnected(&self, reason: &ClientError) {
        for handler in self.snapshot() {
            handler.on_disconnect(reason);
        }
    }

    // Handlers may call add_handler while being notified.
    fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn on_event(&self, event: &Event) {
            self.seen
                .lock()
                .unwrap()
                .push(event.evt.clone().unwrap_or_default());
        }

        fn on_close(&self) {
            self.seen.lock().unwrap().push("close".to_string());
        }
    }

    /// Registers another recorder the first time it sees an event.
    struct Spawner {
        dispatcher: Arc<Dispatcher>,
        child: Arc<Recorder>,
        spawned: Mutex<bool>,
    }

    impl EventHandler for Spawner {
        fn on_event(&self, _event: &Event) {
            let mut spawned = self.spawned.lock().unwrap();
            if !*spawned {
                *spawned = true;
                self.dispatcher.add_handler(self.child.clone());
            }
        }
    }

    #[test]
    fn event_fields_extracted_from_frame() {
        let frame = Frame::new(
            Opcode::Frame,
            json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "nonce": null, "data": {"secret": "abc"}}),
        );
        let event = Event::from_frame(frame.clone());

        assert_eq!(event.opcode, Opcode::Frame);
        assert_eq!(event.cmd.as_deref(), Some("DISPATCH"));
        assert_eq!(event.evt.as_deref(), Some("ACTIVITY_JOIN"));
        assert_eq!(event.nonce, None);
        assert_eq!(event.data, json!({"secret": "abc"}));
        assert_eq!(event.payload, frame.payload);
    }

    #[test]
    fn handlers_called_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        dispatcher.add_handler(first.clone());
        dispatcher.add_handler(second.clone());

        dispatcher.event(&Event::from_frame(Frame::new(
            Opcode::Frame,
            json!({"evt": "ACTIVITY_SPECTATE"}),
        )));
        dispatcher.closed();

        assert_eq!(*first.seen.lock().unwrap(), ["ACTIVITY_SPECTATE", "close"]);
        assert_eq!(*second.seen.lock().unwrap(), ["ACTIVITY_SPECTATE", "close"]);
    }

    #[test]
    fn handler_may_register_handlers_while_notified() {
        let dispatcher = Arc::new(Dispatcher::new());
        let child = Arc::new(Recorder::default());
        dispatcher.add_handler(Arc::new(Spawner {
            dispatcher: Arc::clone(&dispatcher),
            child: child.clone(),
            spawned: Mutex::new(false),
        }));

        let event = Event::from_frame(Frame::new(Opcode::Frame, json!({"evt": "A"})));
        dispatcher.event(&event);
        assert!(child.seen.lock().unwrap().is_empty(), "snapshot excludes new handler");

        dispatcher.event(&event);
        assert_eq!(*child.seen.lock().unwrap(), ["A"]);
        assert_eq!(dispatcher.handler_count(), 2);
    }
}
