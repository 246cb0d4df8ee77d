use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dipc_client::{
    ClientConfig, ClientError, CommandHandle, CommandResult, Connection, Event, EventHandler,
};
use tokio::runtime::Runtime;
use tokio::sync::watch;

use crate::cmd::{parse_duration, Context, ListenArgs};
use crate::exit::{client_error, code_for, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::print_event;

enum Notice {
    Event(Event),
    Lost { code: i32, message: String },
    Interrupted,
}

/// Forwards receive-loop notifications to the printing thread.
struct Forwarder {
    tx: Mutex<Sender<Notice>>,
}

impl Forwarder {
    fn forward(&self, notice: Notice) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(notice);
        }
    }
}

impl EventHandler for Forwarder {
    fn on_event(&self, event: &Event) {
        self.forward(Notice::Event(event.clone()));
    }

    fn on_disconnect(&self, reason: &ClientError) {
        self.forward(Notice::Lost {
            code: code_for(reason.kind()),
            message: reason.to_string(),
        });
    }
}

pub fn run(args: ListenArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let (tx, rx) = mpsc::channel();
    let (interrupt_tx, mut interrupted) = watch::channel(false);
    install_ctrlc_handler(tx.clone(), interrupt_tx)?;

    let connection = Connection::new(ClientConfig {
        handshake_timeout: timeout,
        ..ClientConfig::new(args.client_id.clone())
    });
    connection.add_handler(Arc::new(Forwarder { tx: Mutex::new(tx) }));
    let locator = ctx.locator();
    connection
        .connect(locator.as_ref())
        .map_err(|err| client_error("connect failed", err))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    for evt in &args.subscribe {
        let handle = connection
            .subscribe(evt)
            .map_err(|err| client_error(&format!("subscribe {evt} failed"), err))?;
        match await_subscribed(&runtime, handle, &mut interrupted, timeout)? {
            Some(result) => {
                result.map_err(|err| client_error(&format!("subscribe {evt} failed"), err))?;
            }
            None => {
                connection.close();
                return Ok(SUCCESS);
            }
        }
        tracing::info!(%evt, "subscribed");
    }

    let mut printed = 0usize;
    let result = loop {
        match rx.recv() {
            Ok(Notice::Event(event)) => {
                print_event(&event, ctx.format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            Ok(Notice::Lost { code, message }) => {
                break Err(CliError::new(code, format!("connection lost: {message}")));
            }
            Ok(Notice::Interrupted) | Err(_) => break Ok(SUCCESS),
        }
    };

    connection.close();
    result
}

/// Wait for a subscription response. `None` means Ctrl-C arrived first.
fn await_subscribed(
    runtime: &Runtime,
    handle: CommandHandle,
    interrupted: &mut watch::Receiver<bool>,
    timeout: Duration,
) -> CliResult<Option<CommandResult>> {
    let nonce = handle.nonce().to_string();
    runtime.block_on(async {
        tokio::select! {
            response = tokio::time::timeout(timeout, handle) => response.map(Some).map_err(|_| {
                CliError::new(
                    TIMEOUT,
                    format!("no response to subscription {nonce} within {timeout:?}"),
                )
            }),
            _ = interrupted.wait_for(|set| *set) => Ok(None),
        }
    })
}

fn install_ctrlc_handler(tx: Sender<Notice>, interrupt: watch::Sender<bool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        interrupt.send_replace(true);
        let _ = tx.send(Notice::Interrupted);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
