use std::time::Duration;

use dipc_client::{ClientConfig, Command, CommandHandle, CommandResult, Connection};
use serde_json::Value;

use crate::cmd::{parse_duration, Context, SendArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT, USAGE};
use crate::output::print_response;

pub fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command = build_command(&args)?;

    let connection = Connection::new(ClientConfig {
        handshake_timeout: timeout,
        ..ClientConfig::new(args.client_id.clone())
    });
    let locator = ctx.locator();
    connection
        .connect(locator.as_ref())
        .map_err(|err| client_error("connect failed", err))?;

    let handle = connection
        .send_command(command.into_payload())
        .map_err(|err| client_error("send failed", err))?;
    let outcome = await_response(handle, timeout);
    connection.close();

    let response = outcome?.map_err(|err| client_error("command failed", err))?;
    print_response(&response, ctx.format);
    Ok(SUCCESS)
}

fn build_command(args: &SendArgs) -> CliResult<Command> {
    let cmd_args = match &args.args {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))?;
            if !value.is_object() {
                return Err(CliError::new(USAGE, "--args must be a JSON object"));
            }
            value
        }
        None => Value::Null,
    };

    Ok(Command {
        evt: args.evt.clone(),
        ..Command::new(args.cmd.clone(), cmd_args)
    })
}

/// Await `handle` on a current-thread runtime, bounded by `timeout`.
fn await_response(handle: CommandHandle, timeout: Duration) -> CliResult<CommandResult> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;

    let nonce = handle.nonce().to_string();
    runtime
        .block_on(async { tokio::time::timeout(timeout, handle).await })
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("no response to command {nonce} within {timeout:?}"),
            )
        })
}
