use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dipc_client::Event;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One endpoint candidate as reported by `dipc probe`.
#[derive(Debug, Serialize)]
pub struct ProbeRow {
    pub index: u8,
    pub path: String,
    pub accepting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    cmd: Option<&'a str>,
    evt: Option<&'a str>,
    nonce: Option<&'a str>,
    data: &'a Value,
    timestamp: String,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    cmd: Option<&'a str>,
    evt: Option<&'a str>,
    data: &'a Value,
    timestamp: String,
}

pub fn print_response(payload: &Value, format: OutputFormat) {
    let field = |key: &str| payload.get(key).and_then(Value::as_str);
    let data = payload.get("data").unwrap_or(&Value::Null);
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                cmd: field("cmd"),
                evt: field("evt"),
                nonce: field("nonce"),
                data,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CMD", "NONCE", "DATA"])
                .add_row(vec![
                    field("cmd").unwrap_or("-").to_string(),
                    field("nonce").unwrap_or("-").to_string(),
                    compact(data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "cmd={} nonce={} data={}",
                field("cmd").unwrap_or("-"),
                field("nonce").unwrap_or("-"),
                pretty(data)
            );
        }
    }
}

pub fn print_event(event: &Event, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                cmd: event.cmd.as_deref(),
                evt: event.evt.as_deref(),
                data: &event.data,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVT", "CMD", "DATA"])
                .add_row(vec![
                    event.evt.clone().unwrap_or_else(|| "-".to_string()),
                    event.cmd.clone().unwrap_or_else(|| "-".to_string()),
                    compact(&event.data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "evt={} data={}",
                event.evt.as_deref().unwrap_or("-"),
                pretty(&event.data)
            );
        }
    }
}

pub fn print_probe(rows: &[ProbeRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "ENDPOINT", "STATUS"]);
            for row in rows {
                table.add_row(vec![row.index.to_string(), row.path.clone(), status(row)]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("[{}] {} {}", row.index, row.path, status(row));
            }
        }
    }
}

fn status(row: &ProbeRow) -> String {
    match (&row.error, row.accepting) {
        (_, true) => "accepting".to_string(),
        (Some(err), false) => format!("refused ({err})"),
        (None, false) => "refused".to_string(),
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
