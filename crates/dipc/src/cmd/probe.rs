use dipc_transport::Transport;

use crate::cmd::{parse_duration, Context, ProbeArgs};
use crate::exit::{CliResult, NO_PEER, SUCCESS};
use crate::output::{print_probe, ProbeRow};

/// Try every candidate (without handshaking) and report which accept.
///
/// Unlike connecting, probing does not stop at the first live endpoint.
pub fn run(args: ProbeArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let locator = ctx.locator();

    let rows: Vec<ProbeRow> = locator
        .candidates()
        .into_iter()
        .map(|candidate| {
            let outcome = locator.open(&candidate, timeout);
            let path = candidate.path.display().to_string();
            match outcome {
                Ok(transport) => {
                    transport.close();
                    ProbeRow {
                        index: candidate.index,
                        path,
                        accepting: true,
                        error: None,
                    }
                }
                Err(err) => {
                    tracing::debug!(index = candidate.index, error = %err, "candidate refused");
                    ProbeRow {
                        index: candidate.index,
                        path,
                        accepting: false,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect();

    print_probe(&rows, ctx.format);

    if rows.iter().any(|row| row.accepting) {
        Ok(SUCCESS)
    } else {
        Ok(NO_PEER)
    }
}
