use std::io::BufRead;

use opperlink_frame::GrammarRegistry;

use crate::cmd::ValidateArgs;
use crate::exit::{io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_validation, OutputFormat, ValidationRow};

pub fn run(args: ValidateArgs, format: OutputFormat) -> CliResult<i32> {
    let lines = if args.lines.is_empty() {
        let mut lines = Vec::new();
        for line in std::io::stdin().lock().lines() {
            let line = line.map_err(|err| io_error("read stdin", err))?;
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    } else {
        args.lines
    };

    let registry = GrammarRegistry::new();
    let rows: Vec<ValidationRow<'_>> = lines
        .iter()
        .map(|line| ValidationRow {
            line,
            valid: registry.validate(line),
        })
        .collect();
    print_validation(&rows, format);

    if rows.iter().all(|row| row.valid) {
        Ok(SUCCESS)
    } else {
        Ok(DATA_INVALID)
    }
}
