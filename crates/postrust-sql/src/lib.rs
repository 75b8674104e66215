//! Safe SQL identifier and literal escaping for Postrust.

pub mod identifier;

pub use identifier::{escape_ident, quote_literal, from_qi, QualifiedIdentifier};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{escape_ident, quote_literal, from_qi};
}
