//! The self-describing payload encoding: a dynamically typed, ordered, arbitrarily
//!  nested list value with mutually inverse binary and text renderings.

mod binary;
mod bottle;
mod text;
mod value;

pub use bottle::Bottle;
pub use value::{vocab, vocab_str, Value};

pub use binary::binary_to_text;
