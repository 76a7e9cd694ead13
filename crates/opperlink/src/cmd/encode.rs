use opperlink_device::chunk_len;
use opperlink_frame::{encode, Attribute, GrammarRegistry, Value};

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_encoded, to_hex, EncodedOutput, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let attribute = Attribute::from_tag(&args.attribute);
    let value = value_from(args.values);
    let wire = encode(&attribute, value.as_ref());

    let line = String::from_utf8_lossy(&wire)
        .trim_end_matches(opperlink_frame::LINE_DELIMITER)
        .to_string();
    GrammarRegistry::new()
        .parse(&line)
        .map_err(|err| frame_error("encode", err))?;

    let max = chunk_len(args.transfer_unit);
    let out = EncodedOutput {
        line,
        size: wire.len(),
        transfer_unit: args.transfer_unit,
        chunk_len: max,
        chunks: wire.chunks(max).map(to_hex).collect(),
    };
    print_encoded(&out, &wire, format);
    Ok(SUCCESS)
}

fn value_from(mut values: Vec<String>) -> Option<Value> {
    match values.len() {
        0 => None,
        1 => values.pop().map(Value::from),
        _ => Some(Value::from(values)),
    }
}
