use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use dipc_frame::Frame;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::commands::EVT_ERROR;
use crate::error::{ClientError, Result};
use crate::handshake::error_details;

/// Outcome delivered to a command's continuation: the response payload.
pub type CommandResult = Result<Value>;

/// Runs once with the command's outcome.
pub type Continuation = Box<dyn FnOnce(CommandResult) + Send + 'static>;

struct PendingCommand {
    cmd: Option<String>,
    continuation: Continuation,
    submitted_at: Instant,
}

#[derive(Default)]
struct PendingMap {
    entries: HashMap<String, PendingCommand>,
    /// Set by `fail_all`; later submits are refused.
    sealed: Option<String>,
}

/// Matches nonce-tagged commands to their responses.
///
/// Every command accepted by [`submit`](Correlator::submit) has its
/// continuation run exactly once: on a matching response, on
/// [`fail`](Correlator::fail), or on [`fail_all`](Correlator::fail_all).
/// Continuations always run after the map lock is released.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<PendingMap>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a fresh nonce into `payload` and register `continuation` under it.
    ///
    /// `payload` must be a JSON object. On error nothing is registered and the
    /// continuation is dropped without running.
    pub fn submit(&self, payload: &mut Value, continuation: Continuation) -> Result<String> {
        let object = payload.as_object_mut().ok_or_else(|| {
            ClientError::InvalidPayload("command payload must be a JSON object".to_string())
        })?;
        let nonce = uuid::Uuid::new_v4().to_string();
        object.insert("nonce".to_string(), Value::String(nonce.clone()));
        let cmd = object.get("cmd").and_then(Value::as_str).map(str::to_string);

        let mut pending = self.lock();
        if let Some(reason) = &pending.sealed {
            return Err(ClientError::Disconnected(reason.clone()));
        }
        trace!(%nonce, cmd = ?cmd, "command submitted");
        pending.entries.insert(
            nonce.clone(),
            PendingCommand {
                cmd,
                continuation,
                submitted_at: Instant::now(),
            },
        );
        Ok(nonce)
    }

    /// Resolve the pending command whose nonce `frame` carries.
    ///
    /// An `ERROR` response fails the command with
    /// [`ClientError::CommandFailed`]. Returns the frame back when it answers
    /// no pending command.
    pub fn resolve(&self, frame: Frame) -> Option<Frame> {
        let Some(nonce) = frame.nonce().map(str::to_string) else {
            return Some(frame);
        };
        if frame.str_field("evt") == Some(EVT_ERROR) {
            let (code, message) = error_details(&frame.payload);
            return if self.fail(&nonce, ClientError::CommandFailed { code, message }) {
                None
            } else {
                Some(frame)
            };
        }

        let Some(entry) = self.take(&nonce) else {
            return Some(frame);
        };
        (entry.continuation)(Ok(frame.payload));
        None
    }

    /// Fail one pending command. Returns false if it was already resolved.
    pub fn fail(&self, nonce: &str, err: ClientError) -> bool {
        match self.take(nonce) {
            Some(entry) => {
                (entry.continuation)(Err(err));
                true
            }
            None => false,
        }
    }

    /// Drop a pending command without running its continuation.
    ///
    /// Used when the command never reached the wire and the caller reports
    /// the failure synchronously. Returns false if it was already resolved.
    pub fn cancel(&self, nonce: &str) -> bool {
        self.lock().entries.remove(nonce).is_some()
    }

    /// Fail every pending command and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingCommand> = {
            let mut pending = self.lock();
            if pending.sealed.is_none() {
                pending.sealed = Some(reason.to_string());
            }
            pending.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        if count > 0 {
            debug!(count, reason, "failing pending commands");
        }
        for entry in drained {
            (entry.continuation)(Err(ClientError::Disconnected(reason.to_string())));
        }
        count
    }

    /// Number of commands awaiting a response.
    pub fn pending(&self) -> usize {
        self.lock().entries.len()
    }

    fn take(&self, nonce: &str) -> Option<PendingCommand> {
        let entry = self.lock().entries.remove(nonce)?;
        debug!(
            cmd = ?entry.cmd,
            elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
            "command settled"
        );
        Some(entry)
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Awaitable result of [`Connection::send_command`](crate::Connection::send_command).
///
/// Block on it with [`wait`](CommandHandle::wait), or `.await` it.
#[derive(Debug)]
pub struct CommandHandle {
    nonce: String,
    rx: oneshot::Receiver<CommandResult>,
}

impl CommandHandle {
    pub(crate) fn new(nonce: String, rx: oneshot::Receiver<CommandResult>) -> Self {
        Self { nonce, rx }
    }

    /// Nonce the command was sent with.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Block the current thread until the command resolves.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle there.
    pub fn wait(self) -> CommandResult {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(dropped()))
    }
}

impl Future for CommandHandle {
    type Output = CommandResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped())))
    }
}

/// Build a continuation that feeds a [`CommandHandle`].
pub(crate) fn handle_channel() -> (Continuation, oneshot::Receiver<CommandResult>) {
    let (tx, rx) = oneshot::channel();
    let continuation: Continuation = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (continuation, rx)
}

fn dropped() -> ClientError {
    ClientError::Disconnected("command dropped before resolution".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use dipc_frame::Opcode;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    type Log = Arc<Mutex<Vec<(usize, CommandResult)>>>;

    fn recording(log: &Log, id: usize) -> Continuation {
        let log = Arc::clone(log);
        Box::new(move |result| log.lock().unwrap().push((id, result)))
    }

    fn response(nonce: &str, data: Value) -> Frame {
        Frame::new(
            Opcode::Frame,
            json!({"cmd": "SET_ACTIVITY", "nonce": nonce, "data": data}),
        )
    }

    #[test]
    fn submit_stamps_unique_nonces() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut first = json!({"cmd": "SET_ACTIVITY", "args": {}});
        let mut second = json!({"cmd": "SET_ACTIVITY", "args": {}});

        let n1 = correlator.submit(&mut first, recording(&log, 1)).unwrap();
        let n2 = correlator.submit(&mut second, recording(&log, 2)).unwrap();

        assert_ne!(n1, n2);
        assert_eq!(first["nonce"], n1.as_str());
        assert_eq!(second["nonce"], n2.as_str());
        assert_eq!(correlator.pending(), 2);
    }

    #[test]
    fn out_of_order_responses_then_teardown() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let nonces: Vec<String> = (1..=3)
            .map(|id| {
                let mut payload = json!({"cmd": "SET_ACTIVITY", "args": {}});
                correlator.submit(&mut payload, recording(&log, id)).unwrap()
            })
            .collect();

        assert!(correlator.resolve(response(&nonces[1], json!({"n": 2}))).is_none());
        assert!(correlator.resolve(response(&nonces[0], json!({"n": 1}))).is_none());
        assert_eq!(correlator.fail_all("peer went away"), 1);
        assert_eq!(correlator.fail_all("again"), 0);

        let log = log.lock().unwrap();
        let ids: Vec<usize> = log.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(log[0].1.as_ref().unwrap()["data"], json!({"n": 2}));
        assert_eq!(log[1].1.as_ref().unwrap()["data"], json!({"n": 1}));
        assert_eq!(
            log[2].1.as_ref().unwrap_err().kind(),
            ErrorKind::TransportClosed
        );
    }

    #[test]
    fn duplicate_response_is_not_resolved_twice() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut payload = json!({"cmd": "SUBSCRIBE"});
        let nonce = correlator.submit(&mut payload, recording(&log, 1)).unwrap();

        assert!(correlator.resolve(response(&nonce, json!(1))).is_none());
        let again = correlator.resolve(response(&nonce, json!(2)));

        assert!(again.is_some(), "late duplicate is handed back as an event");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn unmatched_frames_are_handed_back() {
        let correlator = Correlator::new();
        let event = Frame::new(
            Opcode::Frame,
            json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "data": {"secret": "s"}}),
        );
        assert_eq!(correlator.resolve(event.clone()), Some(event));

        let stranger = response("not-a-pending-nonce", json!({}));
        assert!(correlator.resolve(stranger).is_some());
    }

    #[test]
    fn error_event_fails_the_command() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut payload = json!({"cmd": "SET_ACTIVITY", "args": {}});
        let nonce = correlator.submit(&mut payload, recording(&log, 1)).unwrap();

        let frame = Frame::new(
            Opcode::Frame,
            json!({
                "cmd": "SET_ACTIVITY",
                "evt": "ERROR",
                "nonce": nonce,
                "data": {"code": 4000, "message": "child \"activity\" fails"}
            }),
        );
        assert!(correlator.resolve(frame).is_none());

        let log = log.lock().unwrap();
        match &log[0].1 {
            Err(ClientError::CommandFailed { code, .. }) => assert_eq!(*code, 4000),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn error_for_settled_command_is_handed_back() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut payload = json!({"cmd": "SUBSCRIBE"});
        let nonce = correlator.submit(&mut payload, recording(&log, 1)).unwrap();
        assert!(correlator.resolve(response(&nonce, json!({}))).is_none());

        let late_error = Frame::new(
            Opcode::Frame,
            json!({"cmd": "SUBSCRIBE", "evt": "ERROR", "nonce": nonce, "data": {"code": 5000}}),
        );
        assert!(correlator.resolve(late_error).is_some());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].1.is_ok());
    }

    #[test]
    fn sealed_correlator_refuses_submits() {
        let correlator = Correlator::new();
        correlator.fail_all("closed");

        let log: Log = Arc::default();
        let mut payload = json!({"cmd": "SET_ACTIVITY"});
        let err = correlator
            .submit(&mut payload, recording(&log, 1))
            .unwrap_err();

        assert!(matches!(err, ClientError::Disconnected(reason) if reason == "closed"));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn non_object_payload_rejected() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut payload = json!(["SET_ACTIVITY"]);

        let err = correlator
            .submit(&mut payload, recording(&log, 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn fail_and_cancel_remove_entries() {
        let correlator = Correlator::new();
        let log: Log = Arc::default();
        let mut a = json!({"cmd": "A"});
        let mut b = json!({"cmd": "B"});
        let na = correlator.submit(&mut a, recording(&log, 1)).unwrap();
        let nb = correlator.submit(&mut b, recording(&log, 2)).unwrap();

        assert!(correlator.fail(&na, ClientError::Disconnected("x".into())));
        assert!(!correlator.fail(&na, ClientError::Disconnected("x".into())));
        assert!(correlator.cancel(&nb));
        assert!(!correlator.cancel(&nb));

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1, "cancel does not run the continuation");
        assert_eq!(log[0].0, 1);
    }

    #[test]
    fn handle_resolves_blocking_and_async() {
        let correlator = Correlator::new();

        let (continuation, rx) = handle_channel();
        let mut payload = json!({"cmd": "SUBSCRIBE"});
        let nonce = correlator.submit(&mut payload, continuation).unwrap();
        let handle = CommandHandle::new(nonce.clone(), rx);
        correlator.resolve(response(&nonce, json!({"ok": true})));
        assert_eq!(handle.wait().unwrap()["data"], json!({"ok": true}));

        let (continuation, rx) = handle_channel();
        let mut payload = json!({"cmd": "SUBSCRIBE"});
        let nonce = correlator.submit(&mut payload, continuation).unwrap();
        let handle = CommandHandle::new(nonce, rx);
        correlator.fail_all("gone");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = runtime.block_on(handle);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::TransportClosed);
    }
}
