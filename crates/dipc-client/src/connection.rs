//! Connection lifecycle: endpoint probing, handshake, the receive loop and teardown.
//!
//! A [`Connection`] runs one session at a time. Each successful `connect`
//! creates a fresh session (transport, writer, correlator, receive thread)
//! tagged with a generation number; a receive loop that outlives its session
//! never changes the state of a newer one.

use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use dipc_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, Opcode};
use dipc_transport::{probe, EndpointCandidate, Locator, Transport};
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::commands::Command;
use crate::correlator::{handle_channel, CommandHandle, CommandResult, Continuation, Correlator};
use crate::dispatcher::{Dispatcher, Event, EventHandler};
use crate::error::{ClientError, Result};
use crate::handshake::{close_reason, evaluate_reply, handshake_payload, ClientConfig, ReadyEvent};
use crate::state::ConnectionState;

const RECEIVE_THREAD_NAME: &str = "dipc-recv";

/// A client connection to the local peer.
///
/// All methods take `&self`; a connection can be shared across threads
/// behind an `Arc` and used by many senders at once.
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    dispatcher: Dispatcher,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    session: Option<Arc<Session>>,
    receiver: Option<JoinHandle<()>>,
    endpoint: Option<EndpointCandidate>,
    ready: Option<ReadyEvent>,
}

struct Session {
    generation: u64,
    transport: Arc<dyn Transport>,
    writer: Mutex<FrameWriter<Arc<dyn Transport>>>,
    correlator: Correlator,
}

type HandshakeSender = SyncSender<Result<ReadyEvent>>;

impl Connection {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                dispatcher: Dispatcher::new(),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    generation: 0,
                    session: None,
                    receiver: None,
                    endpoint: None,
                    ready: None,
                }),
            }),
        }
    }

    /// Register a handler for connection notifications.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.shared.dispatcher.add_handler(handler);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Endpoint the current (or last) session connected to.
    pub fn endpoint(&self) -> Option<EndpointCandidate> {
        self.shared.lock().endpoint.clone()
    }

    /// READY event of the current (or last) session.
    pub fn ready(&self) -> Option<ReadyEvent> {
        self.shared.lock().ready.clone()
    }

    /// Probe `locator`, handshake, and block until the peer is ready.
    ///
    /// Allowed from `Idle`, `Closed` and `Disconnected`. On failure the
    /// connection ends in `Disconnected` (or `Closed` if `close` raced it).
    pub fn connect(&self, locator: &dyn Locator) -> Result<ReadyEvent> {
        let config = &self.shared.config;
        let handshake = handshake_payload(config)?;

        let (generation, stale_receiver) = {
            let mut inner = self.shared.lock();
            if !inner.state.can_connect() {
                return Err(ClientError::AlreadyConnected(inner.state));
            }
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            inner.session = None;
            inner.endpoint = None;
            inner.ready = None;
            (inner.generation, inner.receiver.take())
        };
        join_receiver(stale_receiver);

        let (candidate, transport) = match probe(locator, config.connect_timeout) {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, "no endpoint accepted");
                self.shared.abort_connect(generation);
                return Err(ClientError::ConnectFailed(err));
            }
        };
        debug!(index = candidate.index, path = ?candidate.path, "connected, sending handshake");

        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
        };
        let session = Arc::new(Session {
            generation,
            transport: Arc::clone(&transport),
            writer: Mutex::new(FrameWriter::with_config(
                Arc::clone(&transport),
                frame_config.clone(),
            )),
            correlator: Correlator::new(),
        });

        if let Err(err) = self.shared.write(&session, Opcode::Handshake, &handshake) {
            transport.close();
            self.shared.abort_connect(generation);
            return Err(ClientError::HandshakeFailed(format!(
                "failed to send handshake: {err}"
            )));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut inner = self.shared.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                drop(inner);
                transport.close();
                self.shared.abort_connect(generation);
                return Err(ClientError::Disconnected(
                    "connection closed while connecting".to_string(),
                ));
            }

            let shared = Arc::clone(&self.shared);
            let loop_session = Arc::clone(&session);
            let spawned = thread::Builder::new()
                .name(RECEIVE_THREAD_NAME.to_string())
                .spawn(move || {
                    let reader = FrameReader::with_config(
                        Arc::clone(&loop_session.transport),
                        frame_config,
                    );
                    run_receive_loop(&shared, &loop_session, reader, tx);
                });
            match spawned {
                Ok(handle) => {
                    inner.state = ConnectionState::AwaitingReady;
                    inner.session = Some(Arc::clone(&session));
                    inner.receiver = Some(handle);
                    inner.endpoint = Some(candidate);
                }
                Err(err) => {
                    inner.state = ConnectionState::Disconnected;
                    drop(inner);
                    transport.close();
                    return Err(ClientError::Transport(err.into()));
                }
            }
        }

        match rx.recv_timeout(config.handshake_timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => self.shared.abandon_handshake(&session, &rx),
            Err(RecvTimeoutError::Disconnected) => Err(handshake_interrupted()),
        }
    }

    /// Send one frame. Requires `Connected`; no I/O happens otherwise.
    pub fn send(&self, opcode: Opcode, payload: &Value) -> Result<()> {
        let session = self.shared.live_session()?;
        self.shared
            .write(&session, opcode, payload)
            .map_err(|err| self.shared.write_failed(&session, err))
    }

    /// Send a command and run `continuation` with its response.
    ///
    /// `Ok(nonce)` means the continuation will run exactly once: with the
    /// response, or with a failure if the connection goes away first. On
    /// `Err` it never runs.
    pub fn submit<F>(&self, payload: Value, continuation: F) -> Result<String>
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        self.submit_boxed(payload, Box::new(continuation))
    }

    /// Send a command and get a handle to await its response.
    pub fn send_command(&self, payload: Value) -> Result<CommandHandle> {
        let (continuation, rx) = handle_channel();
        let nonce = self.submit_boxed(payload, continuation)?;
        Ok(CommandHandle::new(nonce, rx))
    }

    /// `SET_ACTIVITY` for this process; `None` clears the presence.
    pub fn set_activity(&self, activity: Option<Value>) -> Result<CommandHandle> {
        self.send_command(Command::set_activity(std::process::id(), activity).into_payload())
    }

    /// `SUBSCRIBE` to `evt`.
    pub fn subscribe(&self, evt: &str) -> Result<CommandHandle> {
        self.send_command(Command::subscribe(evt, Value::Null).into_payload())
    }

    /// `UNSUBSCRIBE` from `evt`.
    pub fn unsubscribe(&self, evt: &str) -> Result<CommandHandle> {
        self.send_command(Command::unsubscribe(evt, Value::Null).into_payload())
    }

    /// Close the connection.
    ///
    /// From `Connected` this sends CLOSE, releases the transport, stops the
    /// receive loop, fails pending commands and fires `on_close`. From
    /// `Disconnected` it only releases resources. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    fn submit_boxed(&self, mut payload: Value, continuation: Continuation) -> Result<String> {
        let session = self.shared.live_session()?;
        let nonce = session.correlator.submit(&mut payload, continuation)?;

        match self.shared.write(&session, Opcode::Frame, &payload) {
            Ok(()) => Ok(nonce),
            Err(err) => {
                let cancelled = session.correlator.cancel(&nonce);
                let err = self.shared.write_failed(&session, err);
                if cancelled {
                    Err(err)
                } else {
                    // Already resolved by the loop or by teardown.
                    Ok(nonce)
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Connection")
            .field("client_id", &self.shared.config.client_id)
            .field("state", &inner.state)
            .field("endpoint", &inner.endpoint)
            .field("handlers", &self.shared.dispatcher.handler_count())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_session(&self) -> Result<Arc<Session>> {
        let inner = self.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected, Some(session)) => Ok(Arc::clone(session)),
            (state, _) => Err(ClientError::NotConnected(*state)),
        }
    }

    /// Write one frame under the session's writer lock and fire `on_sent`.
    fn write(
        &self,
        session: &Session,
        opcode: Opcode,
        payload: &Value,
    ) -> std::result::Result<(), FrameError> {
        {
            let mut writer = session
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            writer.send(opcode, payload)?;
        }
        trace!(%opcode, "frame sent");
        self.dispatcher.sent(opcode, payload);
        Ok(())
    }

    /// Map a write failure to the caller's error; I/O failures drop the session.
    fn write_failed(&self, session: &Session, err: FrameError) -> ClientError {
        match err {
            FrameError::PayloadTooLarge { .. } | FrameError::MalformedPayload(_) => err.into(),
            other => {
                warn!(error = %other, "write failed");
                self.disconnect(session, ClientError::Frame(other));
                ClientError::Frame(FrameError::TransportClosed)
            }
        }
    }

    /// Finish a `connect` that never got a live session.
    fn abort_connect(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.state = match inner.state {
            ConnectionState::Closing => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        };
    }

    fn mark_connected(&self, session: &Session, ready: &ReadyEvent) -> bool {
        let mut inner = self.lock();
        if inner.generation != session.generation || inner.state != ConnectionState::AwaitingReady
        {
            return false;
        }
        inner.state = ConnectionState::Connected;
        inner.ready = Some(ready.clone());
        true
    }

    /// The READY wait timed out: give up unless the loop already decided.
    fn abandon_handshake(
        &self,
        session: &Session,
        rx: &mpsc::Receiver<Result<ReadyEvent>>,
    ) -> Result<ReadyEvent> {
        let abandoned = {
            let mut inner = self.lock();
            if inner.generation == session.generation
                && inner.state == ConnectionState::AwaitingReady
            {
                inner.state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        };

        if abandoned {
            debug!(timeout = ?self.config.handshake_timeout, "handshake timed out");
            session.transport.close();
            session.correlator.fail_all("handshake timed out");
            return Err(ClientError::HandshakeFailed(format!(
                "no READY within {:?}",
                self.config.handshake_timeout
            )));
        }
        rx.recv().unwrap_or_else(|_| Err(handshake_interrupted()))
    }

    /// Drive `session` to `Disconnected`. Returns false when it was already
    /// torn down, is closing, or has been replaced by a newer session.
    fn disconnect(&self, session: &Session, reason: ClientError) -> bool {
        let was_connected = {
            let mut inner = self.lock();
            let live = inner.generation == session.generation
                && matches!(
                    inner.state,
                    ConnectionState::Connected
                        | ConnectionState::Connecting
                        | ConnectionState::AwaitingReady
                );
            if !live {
                drop(inner);
                session.transport.close();
                return false;
            }
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            was_connected
        };

        session.transport.close();
        session.correlator.fail_all(&reason.to_string());
        if was_connected {
            warn!(error = %reason, "connection lost");
            self.dispatcher.disconnected(&reason);
        } else {
            debug!(error = %reason, "handshake aborted");
        }
        true
    }

    fn close(&self) {
        let (previous, session, receiver) = {
            let mut inner = self.lock();
            let previous = inner.state;
            match previous {
                ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                    return
                }
                ConnectionState::Connecting => {
                    // connect() observes this and finishes in Closed.
                    inner.state = ConnectionState::Closing;
                    return;
                }
                ConnectionState::AwaitingReady
                | ConnectionState::Connected
                | ConnectionState::Disconnected => {}
            }
            inner.state = ConnectionState::Closing;
            (previous, inner.session.take(), inner.receiver.take())
        };

        if let Some(session) = &session {
            if previous == ConnectionState::Connected {
                if let Err(err) = self.write(session, Opcode::Close, &json!({})) {
                    debug!(error = %err, "failed to send CLOSE");
                }
            }
            session.transport.close();
        }
        join_receiver(receiver);
        if let Some(session) = &session {
            session.correlator.fail_all("connection closed");
        }

        self.lock().state = ConnectionState::Closed;
        if previous == ConnectionState::Connected {
            info!("connection closed");
            self.dispatcher.closed();
        }
    }
}

fn run_receive_loop(
    shared: &Shared,
    session: &Session,
    mut reader: FrameReader<Arc<dyn Transport>>,
    handshake: HandshakeSender,
) {
    let mut handshake = Some(handshake);

    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                let err = ClientError::from(err);
                match handshake.take() {
                    Some(tx) => {
                        let failure = ClientError::HandshakeFailed(err.to_string());
                        if shared.disconnect(session, err) {
                            let _ = tx.send(Err(failure));
                        }
                    }
                    None => {
                        shared.disconnect(session, err);
                    }
                }
                break;
            }
        };
        trace!(opcode = %frame.opcode, "frame received");

        if let Some(tx) = handshake.take() {
            if matches!(frame.opcode, Opcode::Ping | Opcode::Pong) {
                trace!(opcode = %frame.opcode, "ignoring keepalive during handshake");
                handshake = Some(tx);
                continue;
            }
            match evaluate_reply(&frame) {
                Ok(ready) => {
                    if !shared.mark_connected(session, &ready) {
                        break;
                    }
                    info!(version = ?ready.version, "peer ready");
                    shared.dispatcher.ready(&ready);
                    let _ = tx.send(Ok(ready));
                }
                Err(err) => {
                    let reason = ClientError::Disconnected(err.to_string());
                    if shared.disconnect(session, reason) {
                        let _ = tx.send(Err(err));
                    }
                    break;
                }
            }
            continue;
        }

        match frame.opcode {
            Opcode::Frame => {
                if let Some(unmatched) = session.correlator.resolve(frame) {
                    shared.dispatcher.event(&Event::from_frame(unmatched));
                }
            }
            Opcode::Ping | Opcode::Pong => {
                trace!(opcode = %frame.opcode, "ignoring keepalive");
            }
            Opcode::Close => {
                let (code, message) = close_reason(&frame.payload);
                info!(?code, %message, "peer closed connection");
                shared.disconnect(session, ClientError::PeerClosed { code, message });
                break;
            }
            Opcode::Handshake => {
                warn!("peer sent HANDSHAKE on an established connection");
                shared.disconnect(
                    session,
                    ClientError::UnexpectedFrame("HANDSHAKE after READY".to_string()),
                );
                break;
            }
        }
    }
    trace!(generation = session.generation, "receive loop exited");
}

fn join_receiver(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        // Called from a handler on the loop itself; it exits on its own.
        return;
    }
    if handle.join().is_err() {
        warn!("receive loop panicked");
    }
}

fn handshake_interrupted() -> ClientError {
    ClientError::HandshakeFailed("connection closed during handshake".to_string())
}
