//! Self-describing binary codec for S-expression-shaped values.
//!
//! Every encoded value leads with a one-byte tag, so decoding never needs
//! an external schema. Integers use the narrowest tag that fits (see
//! [`tags`]), strings and symbols are length-prefixed UTF-8, and pair
//! structures serialize their cons-cell shape directly. Symbols can travel
//! as 2-byte indices into a session [`SymbolTable`] negotiated elsewhere.

pub mod decode;
pub mod encode;
pub mod error;
pub mod symtab;
pub mod tags;
pub mod value;

pub use decode::decode;
pub use encode::{encode, encode_into, MAX_DEPTH};
pub use error::{CodecError, Result};
pub use symtab::{StaticSymbolTable, SymbolTable};
pub use value::Value;
