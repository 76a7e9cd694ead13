use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use opperlink_frame::AttributeCommand;
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

/// One reassembled line and what the grammar made of it.
#[derive(Debug, Serialize)]
pub struct FrameRow {
    pub line: String,
    pub attribute: String,
    pub values: Vec<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameRow {
    pub fn accepted(command: &AttributeCommand, line: &str) -> Self {
        Self {
            line: line.to_string(),
            attribute: command.attribute.tag().to_string(),
            values: command.value.clone(),
            valid: true,
            error: None,
        }
    }

    pub fn rejected(line: &str, error: impl ToString) -> Self {
        let attribute = line
            .strip_prefix(opperlink_frame::ATTRIBUTE_TOKEN_PREFIX)
            .and_then(|rest| rest.split('=').next())
            .unwrap_or_default();
        Self {
            line: line.to_string(),
            attribute: attribute.to_string(),
            values: Vec::new(),
            valid: false,
            error: Some(error.to_string()),
        }
    }
}

pub fn print_frames(rows: &[FrameRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                println!(
                    "{}",
                    serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ATTRIBUTE", "VALUES", "VALID", "LINE"]);
            for row in rows {
                table.add_row(vec![
                    row.attribute.clone(),
                    row.values.join(","),
                    row.valid.to_string(),
                    row.line.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                match &row.error {
                    None => println!("{} [{}]", row.attribute, row.values.join(", ")),
                    Some(err) => println!("{} rejected: {err}", row.line),
                }
            }
        }
        OutputFormat::Raw => {
            for row in rows {
                print_raw(format!("{}\r\n", row.line).as_bytes());
            }
        }
    }
}

/// An encoded command split into outbound writes.
#[derive(Debug, Serialize)]
pub struct EncodedOutput {
    pub line: String,
    pub size: usize,
    pub transfer_unit: u16,
    pub chunk_len: usize,
    pub chunks: Vec<String>,
}

pub fn print_encoded(out: &EncodedOutput, wire: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHUNK", "SIZE", "HEX"]);
            for (index, chunk) in out.chunks.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    (chunk.len() / 2).to_string(),
                    chunk.clone(),
                ]);
            }
            println!("{}", out.line);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "line={} size={} transfer_unit={} chunks={}",
                out.line,
                out.size,
                out.transfer_unit,
                out.chunks.len()
            );
            for chunk in &out.chunks {
                println!("  {chunk}");
            }
        }
        OutputFormat::Raw => print_raw(wire),
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationRow<'a> {
    pub line: &'a str,
    pub valid: bool,
}

pub fn print_validation(rows: &[ValidationRow<'_>], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                println!(
                    "{}",
                    serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LINE", "VALID"]);
            for row in rows {
                table.add_row(vec![row.line.to_string(), row.valid.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in rows {
                let verdict = if row.valid { "ok" } else { "invalid" };
                println!("{verdict}\t{}", row.line);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}
