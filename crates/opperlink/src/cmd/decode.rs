use opperlink_frame::{decode_chunk, FrameReassembler, GrammarRegistry};
use tracing::{debug, warn};

use crate::cmd::{read_input, DecodeArgs, InputFormat};
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frames, FrameRow, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = read_input(args.file.as_ref())?;
    let capture = match args.input {
        InputFormat::Text => raw,
        InputFormat::Hex => parse_hex(&String::from_utf8_lossy(&raw))?,
    };

    let registry = GrammarRegistry::new();
    let (rows, pending) = decode_capture(&registry, &capture, usize::from(args.chunk_size));
    if !pending.is_empty() {
        warn!(pending = %pending, "capture ends inside a line");
    }

    let rows: Vec<FrameRow> = rows
        .into_iter()
        .filter(|row| row.valid || args.show_rejected)
        .collect();
    print_frames(&rows, format);
    Ok(SUCCESS)
}

/// Feed `capture` through the reassembler in `chunk_size` pieces.
///
/// Returns one row per completed line plus whatever was left unterminated.
pub(crate) fn decode_capture(
    registry: &GrammarRegistry,
    capture: &[u8],
    chunk_size: usize,
) -> (Vec<FrameRow>, String) {
    let mut reassembler = FrameReassembler::new();
    let mut rows = Vec::new();

    for chunk in capture.chunks(chunk_size.max(1)) {
        for line in reassembler.push(&decode_chunk(chunk)) {
            match registry.parse(&line) {
                Ok(command) => rows.push(FrameRow::accepted(&command, &line)),
                Err(err) => {
                    debug!(%err, "dropping line");
                    rows.push(FrameRow::rejected(&line, err));
                }
            }
        }
    }

    (rows, reassembler.pending().to_string())
}

/// Parse hex digits, ignoring whitespace and an optional `0x` per word.
pub(crate) fn parse_hex(text: &str) -> CliResult<Vec<u8>> {
    let mut digits = Vec::with_capacity(text.len());
    for word in text.split_whitespace() {
        let word = word.strip_prefix("0x").unwrap_or(word);
        for ch in word.chars() {
            let nibble = ch.to_digit(16).ok_or_else(|| {
                CliError::new(DATA_INVALID, format!("invalid hex digit {ch:?}"))
            })?;
            digits.push(nibble as u8);
        }
    }

    if digits.len() % 2 != 0 {
        return Err(CliError::new(DATA_INVALID, "odd number of hex digits"));
    }

    Ok(digits
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}
