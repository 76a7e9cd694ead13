use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::attribute::Attribute;
use crate::error::{FrameError, Result};

/// Prefix of every attribute token.
pub const ATTRIBUTE_TOKEN_PREFIX: &str = "ATT+";

/// Line terminator.
pub const LINE_DELIMITER: &str = "\r\n";

const VALUE_SEPARATOR: char = '=';
const TOKEN_SEPARATOR: char = ',';

/// A decoded, grammar-checked command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeCommand {
    /// The attribute tag.
    pub attribute: Attribute,
    /// Value tokens in wire order. Empty for value-less commands.
    pub value: Vec<String>,
}

impl AttributeCommand {
    /// Create a command from an attribute and its tokens.
    pub fn new<I, S>(attribute: Attribute, value: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attribute,
            value: value.into_iter().map(Into::into).collect(),
        }
    }

    /// Value token at `index`.
    pub fn token(&self, index: usize) -> Option<&str> {
        self.value.get(index).map(String::as_str)
    }

    /// Parse the token at `index` as a number.
    pub fn number<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.token(index)?.parse().ok()
    }
}

impl fmt::Display for AttributeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ATTRIBUTE_TOKEN_PREFIX}{}", self.attribute)?;
        if !self.value.is_empty() {
            write!(f, "{VALUE_SEPARATOR}{}", self.value.join(","))?;
        }
        Ok(())
    }
}

/// An outbound command value: one scalar or a list of tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    /// Value tokens as they appear on the wire.
    pub fn tokens(&self) -> Vec<&str> {
        match self {
            Self::Scalar(token) => vec![token.as_str()],
            Self::List(tokens) => tokens.iter().map(String::as_str).collect(),
        }
    }

    fn wire(&self) -> String {
        match self {
            Self::Scalar(token) => token.clone(),
            Self::List(tokens) => tokens.join(","),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Scalar(value.to_string())
                }
            }
        )*
    };
}

scalar_from!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl<T: fmt::Display> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.iter().map(ToString::to_string).collect())
    }
}

impl<T: fmt::Display, const N: usize> From<[T; N]> for Value {
    fn from(values: [T; N]) -> Self {
        Self::List(values.iter().map(ToString::to_string).collect())
    }
}

/// Encode a command into its wire text, delimiter included.
pub fn encode_str(attribute: &Attribute, value: Option<&Value>) -> String {
    let mut line = String::with_capacity(32);
    line.push_str(ATTRIBUTE_TOKEN_PREFIX);
    line.push_str(attribute.tag());
    if let Some(value) = value {
        line.push(VALUE_SEPARATOR);
        line.push_str(&value.wire());
    }
    line.push_str(LINE_DELIMITER);
    line
}

/// Encode a command into wire bytes.
///
/// Wire format:
/// ```text
/// ATT+<TAG>[=<v1>[,<v2>...]]\r\n
/// ```
pub fn encode(attribute: &Attribute, value: Option<&Value>) -> Bytes {
    let line = encode_str(attribute, value);
    let mut dst = BytesMut::with_capacity(line.len());
    dst.put_slice(line.as_bytes());
    dst.freeze()
}

/// Decode one frame (delimiter already removed) into a command.
///
/// This does not check the value grammar; run
/// [`GrammarRegistry::validate`](crate::grammar::GrammarRegistry::validate)
/// first.
pub fn decode(line: &str) -> Result<AttributeCommand> {
    let body = line
        .strip_prefix(ATTRIBUTE_TOKEN_PREFIX)
        .ok_or_else(|| FrameError::MissingPrefix(line.to_string()))?;

    let (tag, value) = match body.split_once(VALUE_SEPARATOR) {
        Some((tag, rest)) => (tag, rest.split(TOKEN_SEPARATOR).map(str::to_string).collect()),
        None => (body, Vec::new()),
    };

    if tag.is_empty() {
        return Err(FrameError::EmptyAttribute(line.to_string()));
    }

    Ok(AttributeCommand {
        attribute: Attribute::from_tag(tag),
        value,
    })
}

/// Turn one notification payload into text: one character per byte, NULs removed.
pub fn decode_chunk(payload: &[u8]) -> String {
    payload
        .iter()
        .filter(|&&byte| byte != 0)
        .map(|&byte| char::from(byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarRegistry;

    #[test]
    fn encode_without_value_omits_separator() {
        assert_eq!(encode_str(&Attribute::Reboot, None), "ATT+RST\r\n");
        assert_eq!(
            encode(&Attribute::HealthCheck, None).as_ref(),
            b"ATT+CHECK\r\n"
        );
    }

    #[test]
    fn encode_scalar_and_list_values() {
        assert_eq!(
            encode_str(&Attribute::IdleTimeout, Some(&Value::from(10u32))),
            "ATT+IDLE=10\r\n"
        );
        assert_eq!(
            encode_str(&Attribute::CalibrationReference, Some(&Value::from([100, 200]))),
            "ATT+REF1=100,200\r\n"
        );
        assert_eq!(
            encode_str(&Attribute::Accuracy, Some(&Value::from(0.5f64))),
            "ATT+ACCURACY=0.5\r\n"
        );
    }

    #[test]
    fn whole_number_floats_encode_without_fraction() {
        assert_eq!(
            encode_str(&Attribute::LockThreshold, Some(&Value::from(10.0f64))),
            "ATT+LOCK=10\r\n"
        );
    }

    #[test]
    fn decode_splits_on_first_separator() {
        let cmd = decode("ATT+BAT=99,0").unwrap();
        assert_eq!(cmd, AttributeCommand::new(Attribute::Battery, ["99", "0"]));

        let cmd = decode("ATT+VER=a=b").unwrap();
        assert_eq!(cmd.attribute, Attribute::Other("VER".to_string()));
        assert_eq!(cmd.value, vec!["a=b"]);
    }

    #[test]
    fn decode_value_less_command() {
        let cmd = decode("ATT+CHECK").unwrap();
        assert_eq!(cmd.attribute, Attribute::HealthCheck);
        assert!(cmd.value.is_empty());
    }

    #[test]
    fn decode_rejects_missing_prefix_and_empty_tag() {
        assert!(matches!(
            decode("WGT=1,2,1"),
            Err(FrameError::MissingPrefix(_))
        ));
        assert!(matches!(decode("ATT+=1"), Err(FrameError::EmptyAttribute(_))));
    }

    #[test]
    fn round_trip_for_every_known_grammar() {
        let registry = GrammarRegistry::new();
        let cases: Vec<(Attribute, Option<Value>)> = vec![
            (Attribute::Weight, Some(Value::from(["-1.23", "1721251", "1"]))),
            (Attribute::Acknowledge, Some(Value::from(0u8))),
            (Attribute::Battery, Some(Value::from([99, 0]))),
            (Attribute::IdleTimeout, Some(Value::from(10u32))),
            (Attribute::Accuracy, Some(Value::from(1.23f64))),
            (Attribute::LockThreshold, Some(Value::from(10.5f64))),
            (Attribute::Filter, Some(Value::from(20u32))),
            (Attribute::AutoClose, Some(Value::from(5u32))),
            (Attribute::ZeroReference, Some(Value::from(-8123i64))),
            (Attribute::CalibrationReference, Some(Value::from(["91234", "500.5"]))),
            (Attribute::HealthCheck, None),
            (Attribute::PowerOff, None),
            (Attribute::FactoryReset, None),
            (Attribute::Reboot, None),
        ];

        for (attribute, value) in cases {
            let wire = encode_str(&attribute, value.as_ref());
            let line = wire.trim_end_matches(LINE_DELIMITER);
            assert!(registry.validate(line), "{line} should validate");

            let cmd = decode(line).unwrap();
            assert_eq!(cmd.attribute, attribute);
            let expected: Vec<String> = value
                .map(|v| v.tokens().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            assert_eq!(cmd.value, expected);
        }
    }

    #[test]
    fn display_matches_wire_text() {
        let cmd = AttributeCommand::new(Attribute::Weight, ["12.5", "100", "1"]);
        assert_eq!(cmd.to_string(), "ATT+WGT=12.5,100,1");
        assert_eq!(
            AttributeCommand::new(Attribute::Reboot, Vec::<String>::new()).to_string(),
            "ATT+RST"
        );
    }

    #[test]
    fn numeric_token_access() {
        let cmd = AttributeCommand::new(Attribute::Weight, ["-1.5", "1721251", "0"]);
        assert_eq!(cmd.number::<f64>(0), Some(-1.5));
        assert_eq!(cmd.number::<i64>(1), Some(1_721_251));
        assert_eq!(cmd.number::<u8>(5), None);
    }

    #[test]
    fn chunk_decoding_strips_nul_bytes() {
        assert_eq!(decode_chunk(b"ATT+\0ACK=0\r\n\0\0"), "ATT+ACK=0\r\n");
        assert_eq!(decode_chunk(&[0x41, 0xE9]), "A\u{e9}");
    }
}
