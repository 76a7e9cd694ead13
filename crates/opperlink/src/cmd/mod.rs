use clap::{Args, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod validate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reassemble captured notifications and decode each line.
    Decode(DecodeArgs),
    /// Encode one attribute command and show its outbound chunks.
    Encode(EncodeArgs),
    /// Check lines against the attribute grammars.
    Validate(ValidateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Validate(args) => validate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum InputFormat {
    /// Captured bytes as hex digits; whitespace is ignored.
    Hex,
    /// Plain text; `\r\n` delimiters are taken literally.
    Text,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file. Reads stdin when omitted.
    pub file: Option<PathBuf>,
    /// How the capture is written.
    #[arg(long, value_enum, default_value = "text")]
    pub input: InputFormat,
    /// Bytes per simulated notification.
    #[arg(long, default_value = "20", value_parser = clap::value_parser!(u16).range(1..))]
    pub chunk_size: u16,
    /// Also print lines the grammar rejected.
    #[arg(long)]
    pub show_rejected: bool,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Attribute tag, e.g. WGT or REF1.
    pub attribute: String,
    /// Value tokens; more than one becomes a comma-separated list.
    #[arg(allow_negative_numbers = true)]
    pub values: Vec<String>,
    /// Transfer unit the link negotiated.
    #[arg(long, default_value = "23")]
    pub transfer_unit: u16,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Lines to check. Reads one per line from stdin when omitted.
    pub lines: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Include build and feature details.
    #[arg(long)]
    pub extended: bool,
}

/// Read a file, or all of stdin when `path` is `None`.
pub(crate) fn read_input(path: Option<&PathBuf>) -> CliResult<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err)),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|err| io_error("read stdin", err))?;
            Ok(buf)
        }
    }
}
