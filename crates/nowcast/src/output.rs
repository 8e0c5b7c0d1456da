use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nowcast_frame::{Payload, WireVersion};
use nowcast_peer::{AppMessage, StatsSnapshot};
use serde::Serialize;

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
    source: String,
    kind: String,
    payload_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    brightness: Option<u8>,
    timestamp: String,
}

pub fn print_message(message: &AppMessage, format: OutputFormat) {
    let (pattern, brightness) = payload_fields(&message.payload);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                source: message.source.to_string(),
                kind: message.kind.to_string(),
                payload_type: message.payload.payload_type().name(),
                pattern,
                brightness,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "KIND", "TYPE", "VALUE"])
                .add_row(vec![
                    message.source.to_string(),
                    message.kind.to_string(),
                    message.payload.payload_type().name().to_string(),
                    payload_value(&message.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "source={} kind={} type={} value={}",
                message.source,
                message.kind,
                message.payload.payload_type(),
                payload_value(&message.payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(message.payload.body());
            print_raw(b"\n");
        }
    }
}

/// Per-node summary printed when a node or simulation stops.
#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub role: &'static str,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub peers: usize,
    pub messages: u64,
    pub stats: StatsSnapshot,
}

pub fn print_reports(reports: &[NodeReport], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reports),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "ROLE", "ADDRESS", "STATE", "PEERS", "MESSAGES", "RECEIVED", "DISCARDED",
                    "OVERFLOW", "SENT", "FAILED",
                ]);
            for report in reports {
                let stats = &report.stats;
                table.add_row(vec![
                    report.role.to_string(),
                    report.address.clone(),
                    report.state.clone().unwrap_or_else(|| "-".to_string()),
                    report.peers.to_string(),
                    report.messages.to_string(),
                    stats.received.to_string(),
                    (stats.decode_discards + stats.sequence_discards).to_string(),
                    stats.overflow.to_string(),
                    stats.sent.to_string(),
                    stats.send_failures.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for report in reports {
                let stats = &report.stats;
                println!(
                    "role={} address={} state={} peers={} messages={} received={} \
                     decode_discards={} sequence_discards={} overflow={} sent={} send_failures={}",
                    report.role,
                    report.address,
                    report.state.as_deref().unwrap_or("-"),
                    report.peers,
                    report.messages,
                    stats.received,
                    stats.decode_discards,
                    stats.sequence_discards,
                    stats.overflow,
                    stats.sent,
                    stats.send_failures
                );
            }
        }
    }
}

/// A single encoded or decoded frame.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub wire_version: WireVersion,
    pub sequence: u16,
    pub checksum: String,
    pub payload_type: &'static str,
    pub payload_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    pub frame: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl FrameReport {
    pub fn new(
        wire_version: WireVersion,
        sequence: u16,
        checksum: u16,
        payload: &Payload,
        bytes: &[u8],
    ) -> Self {
        let (pattern, brightness) = payload_fields(payload);
        Self {
            wire_version,
            sequence,
            checksum: format!("{checksum:#06x}"),
            payload_type: payload.payload_type().name(),
            payload_len: payload.body().len(),
            pattern: pattern.map(str::to_owned),
            brightness,
            frame: to_hex(bytes),
            bytes: bytes.to_vec(),
        }
    }
}

pub fn print_frame(report: &FrameReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "CRC", "TYPE", "VALUE", "FRAME"])
                .add_row(vec![
                    report.sequence.to_string(),
                    report.checksum.clone(),
                    report.payload_type.to_string(),
                    frame_value(report),
                    report.frame.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", report.frame),
        OutputFormat::Raw => print_raw(&report.bytes),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Lowercase hex without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse hex, ignoring whitespace and `:` separators.
pub fn from_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).map_err(|_| "invalid hex".to_string())?;
            u8::from_str_radix(text, 16).map_err(|_| format!("invalid hex byte '{text}'"))
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_fields(payload: &Payload) -> (Option<&str>, Option<u8>) {
    match payload {
        Payload::ChangePattern { name } => (Some(name.as_str()), None),
        Payload::ChangeBrightness { level } => (None, Some(*level)),
        _ => (None, None),
    }
}

fn payload_value(payload: &Payload) -> String {
    match payload_fields(payload) {
        (Some(name), _) => name.to_string(),
        (_, Some(level)) => level.to_string(),
        _ => "-".to_string(),
    }
}

fn frame_value(report: &FrameReport) -> String {
    match (&report.pattern, report.brightness) {
        (Some(name), _) => name.clone(),
        (_, Some(level)) => level.to_string(),
        _ => "-".to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
