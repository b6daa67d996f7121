//! Metadata tokens identifying members across every loaded module.
//!
//! A [`Token`] is the identity of a member descriptor: the high byte names the metadata
//! table, the low 24 bits the row. Rows are allocated by the
//! [`crate::metadata::registry::MemberRegistry`] from one counter per table, so a token is
//! unique across all modules the registry holds (original and generated alike).

use std::fmt;
use std::hash::{Hash, Hasher};

/// `TypeDef` table - type definitions
pub const TABLE_TYPEDEF: u8 = 0x02;
/// `Field` table
pub const TABLE_FIELD: u8 = 0x04;
/// `MethodDef` table - methods and constructors
pub const TABLE_METHODDEF: u8 = 0x06;
/// `Event` table
pub const TABLE_EVENT: u8 = 0x14;
/// `Property` table
pub const TABLE_PROPERTY: u8 = 0x17;
/// `TypeSpec` table - constructed types (instantiations, arrays, pointers)
pub const TABLE_TYPESPEC: u8 = 0x1B;
/// `GenericParam` table
pub const TABLE_GENERICPARAM: u8 = 0x2A;
/// `MethodSpec` table - generic method instantiations
pub const TABLE_METHODSPEC: u8 = 0x2B;

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index
    #[must_use]
    pub const fn from_parts(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token points into one of the type tables
    #[must_use]
    pub const fn is_type(&self) -> bool {
        matches!(
            self.table(),
            TABLE_TYPEDEF | TABLE_TYPESPEC | TABLE_GENERICPARAM
        )
    }

    /// Returns true if the token points at a method or method instantiation
    #[must_use]
    pub const fn is_method(&self) -> bool {
        matches!(self.table(), TABLE_METHODDEF | TABLE_METHODSPEC)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TABLE_METHODDEF, 7);
        assert_eq!(token.value(), 0x0600_0007);
        assert_eq!(token.table(), TABLE_METHODDEF);
        assert_eq!(token.row(), 7);
    }

    #[test]
    fn test_token_row_is_masked() {
        let token = Token::from_parts(TABLE_FIELD, 0x0100_0001);
        assert_eq!(token.table(), TABLE_FIELD);
        assert_eq!(token.row(), 1);
    }

    #[test]
    fn test_token_kinds() {
        assert!(Token::from_parts(TABLE_TYPEDEF, 1).is_type());
        assert!(Token::from_parts(TABLE_TYPESPEC, 1).is_type());
        assert!(Token::from_parts(TABLE_GENERICPARAM, 1).is_type());
        assert!(!Token::from_parts(TABLE_FIELD, 1).is_type());

        assert!(Token::from_parts(TABLE_METHODDEF, 1).is_method());
        assert!(Token::from_parts(TABLE_METHODSPEC, 1).is_method());
        assert!(!Token::from_parts(TABLE_PROPERTY, 1).is_method());
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x0600_0001)), "0x06000001");
        let debug_str = format!("{:?}", Token(0x0600_0001));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }
}
