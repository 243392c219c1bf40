use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use greybus_core::{GreybusConfig, Protocol};
use greybus_message::Message;
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
struct ResponseOutput<'a> {
    cport: u16,
    op_type: u8,
    operation_id: u16,
    result: &'a str,
    result_code: u8,
    payload_size: usize,
    payload: String,
}

pub fn print_response(cport: u16, response: &Message, format: OutputFormat) {
    let result = response.result();
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                cport,
                op_type: response.op_type(),
                operation_id: response.operation_id(),
                result: result.name(),
                result_code: response.result_code(),
                payload_size: response.payload_len(),
                payload: to_hex(response.payload()),
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
                .set_header(vec!["CPORT", "TYPE", "ID", "RESULT", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    cport.to_string(),
                    format!("0x{:02x}", response.op_type()),
                    response.operation_id().to_string(),
                    result.name().to_string(),
                    response.payload_len().to_string(),
                    to_hex(response.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "cport={} type=0x{:02x} id={} result={} size={} payload={}",
                cport,
                response.op_type(),
                response.operation_id(),
                result.name(),
                response.payload_len(),
                to_hex(response.payload())
            );
        }
        OutputFormat::Raw => print_raw(response.payload()),
    }
}

#[derive(Serialize)]
struct CportRow {
    cport: usize,
    bundle: u8,
    protocol: String,
    protocol_id: u8,
}

#[derive(Serialize)]
struct ConfigOutput {
    cport_count: usize,
    queue_capacity: usize,
    worker_name: String,
    cports: Vec<CportRow>,
}

pub fn print_config(config: &GreybusConfig, format: OutputFormat) {
    let rows: Vec<CportRow> = config
        .cports
        .iter()
        .enumerate()
        .map(|(cport, entry)| CportRow {
            cport,
            bundle: entry.bundle,
            protocol: protocol_label(entry.protocol),
            protocol_id: entry.protocol.id(),
        })
        .collect();

    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let out = ConfigOutput {
                cport_count: rows.len(),
                queue_capacity: config.queue_capacity,
                worker_name: config.worker_name.clone(),
                cports: rows,
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
                .set_header(vec!["CPORT", "BUNDLE", "PROTOCOL", "ID"]);
            for row in &rows {
                table.add_row(vec![
                    row.cport.to_string(),
                    row.bundle.to_string(),
                    row.protocol.clone(),
                    format!("0x{:02x}", row.protocol_id),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!(
                    "cport={} bundle={} protocol={} id=0x{:02x}",
                    row.cport, row.bundle, row.protocol, row.protocol_id
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn protocol_label(protocol: Protocol) -> String {
    match protocol {
        Protocol::Unknown(_) => protocol.to_string(),
        named => named.name().to_string(),
    }
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
