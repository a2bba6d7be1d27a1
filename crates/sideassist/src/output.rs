use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use sideassist_bus::Message;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

#[derive(Serialize)]
struct MessageOutput<'a> {
    topic: &'a str,
    retain: bool,
    payload_size: usize,
    payload: Value,
    timestamp: String,
}

#[derive(Serialize)]
struct VerdictOutput<'a> {
    value: &'a Value,
    accepted: bool,
}

#[derive(Serialize)]
struct ValidationOutput<'a> {
    rule: &'a Value,
    accepted: bool,
    results: Vec<VerdictOutput<'a>>,
}

pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                topic: &message.topic,
                retain: message.retain,
                payload_size: message.payload.len(),
                payload: payload_json(message.payload.as_ref()),
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
                .set_header(vec!["TOPIC", "RETAIN", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    message.topic.clone(),
                    message.retain.to_string(),
                    message.payload.len().to_string(),
                    payload_preview(message.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "topic={} retain={} size={} payload={}",
                message.topic,
                message.retain,
                message.payload.len(),
                payload_preview(message.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(message.payload.as_ref());
            print_raw(b"\n");
        }
    }
}

pub fn print_verdicts(rule: &Value, verdicts: &[(Value, bool)], format: OutputFormat) {
    let accepted = verdicts.iter().all(|(_, ok)| *ok);
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let out = ValidationOutput {
                rule,
                accepted,
                results: verdicts
                    .iter()
                    .map(|(value, accepted)| VerdictOutput {
                        value,
                        accepted: *accepted,
                    })
                    .collect(),
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
                .set_header(vec!["VALUE", "VERDICT"]);
            for (value, ok) in verdicts {
                table.add_row(vec![value.to_string(), verdict(*ok).to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("rule: {rule}");
            for (value, ok) in verdicts {
                println!("  {:<8} {value}", verdict(*ok));
            }
        }
    }
}

pub fn print_json(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Pretty | OutputFormat::Table => println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        ),
        OutputFormat::Raw => print_raw(value.to_string().as_bytes()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn verdict(accepted: bool) -> &'static str {
    if accepted {
        "accept"
    } else {
        "reject"
    }
}

/// Payload as JSON when it parses, else as a string.
fn payload_json(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(payload).unwrap_or_else(|_| Value::String(payload_preview(payload)))
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
