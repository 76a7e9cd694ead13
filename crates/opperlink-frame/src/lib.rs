//! Attribute-command wire layer.
//!
//! Every message on the link is one text line:
//! - `ATT+<TAG>` names the attribute
//! - an optional `=<v1>,<v2>,...` carries the value tokens
//! - `\r\n` terminates the line
//!
//! Notifications arrive in transfer-unit sized pieces, so lines are
//! reassembled first, validated against the grammar registered for their
//! tag, and only then decoded into an [`AttributeCommand`].

pub mod attribute;
pub mod codec;
pub mod error;
pub mod grammar;
pub mod reassembler;

pub use attribute::Attribute;
pub use codec::{
    decode, decode_chunk, encode, encode_str, AttributeCommand, Value, ATTRIBUTE_TOKEN_PREFIX,
    LINE_DELIMITER,
};
pub use error::{FrameError, Result};
pub use grammar::{validate, Grammar, GrammarRegistry, Token};
pub use reassembler::FrameReassembler;
