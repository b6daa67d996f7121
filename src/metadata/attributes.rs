//! Attribute flags for types, methods, fields and generic parameters.
//!
//! The flag values follow ECMA-335 §II.23.1 so descriptors built from real metadata can be
//! carried over unchanged. [`Visibility`] folds the different per-table access encodings into a
//! single enum the accessibility oracle reasons about.

use bitflags::bitflags;
use strum::Display;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Type definition flags (§II.23.1.15)
    pub struct TypeAttributes: u32 {
        /// Class has no public scope
        const NOT_PUBLIC = 0x0000_0000;
        /// Class has public scope
        const PUBLIC = 0x0000_0001;
        /// Class is nested with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Class is nested with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Class is nested with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Class is nested with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Class is nested with family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Class is nested with family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Initialize the class before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

impl TypeAttributes {
    /// Mask selecting the visibility bits
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;

    /// Decodes the visibility bits
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        match self.bits() & Self::VISIBILITY_MASK {
            0x1 | 0x2 => Visibility::Public,
            0x3 => Visibility::Private,
            0x4 => Visibility::Family,
            0x6 => Visibility::FamilyAndAssembly,
            0x7 => Visibility::FamilyOrAssembly,
            _ => Visibility::Assembly,
        }
    }

    /// Returns true for nested visibility encodings
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.bits() & Self::VISIBILITY_MASK >= Self::NESTED_PUBLIC.bits()
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method definition flags (§II.23.1.10)
    pub struct MethodAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method may not be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, depending upon the name of the method
        const RT_SPECIAL_NAME = 0x1000;
    }
}

impl MethodAttributes {
    /// Mask selecting the member access bits
    pub const MEMBER_ACCESS_MASK: u32 = 0x0007;

    /// Decodes the member access bits
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        Visibility::from_member_access(self.bits() & Self::MEMBER_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field definition flags (§II.23.1.5)
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written to after init
        const INIT_ONLY = 0x0020;
        /// Value is compile time constant
        const LITERAL = 0x0040;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
    }
}

impl FieldAttributes {
    /// Mask selecting the field access bits
    pub const FIELD_ACCESS_MASK: u32 = 0x0007;

    /// Decodes the field access bits
    #[must_use]
    pub fn visibility(&self) -> Visibility {
        Visibility::from_member_access(self.bits() & Self::FIELD_ACCESS_MASK)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Generic parameter flags (§II.23.1.7)
    pub struct GenericParamAttributes: u16 {
        /// The generic parameter is covariant
        const COVARIANT = 0x0001;
        /// The generic parameter is contravariant
        const CONTRAVARIANT = 0x0002;
        /// The generic parameter has the `class` special constraint
        const REFERENCE_TYPE_CONSTRAINT = 0x0004;
        /// The generic parameter has the `valuetype` special constraint
        const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT = 0x0008;
        /// The generic parameter has the `.ctor` special constraint
        const DEFAULT_CONSTRUCTOR_CONSTRAINT = 0x0010;
    }
}

/// Declared visibility of a member, independent of the table it lives in.
///
/// Types use the nested encodings of [`TypeAttributes`], methods and fields the member access
/// encodings; both collapse to these six levels. Compiler-controlled members decode as
/// [`Visibility::Private`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Visibility {
    /// `public`
    #[strum(serialize = "public")]
    Public,
    /// `private`
    #[strum(serialize = "private")]
    Private,
    /// `internal`
    #[strum(serialize = "internal")]
    Assembly,
    /// `protected`
    #[strum(serialize = "protected")]
    Family,
    /// `protected internal`
    #[strum(serialize = "protected internal")]
    FamilyOrAssembly,
    /// `private protected`
    #[strum(serialize = "private protected")]
    FamilyAndAssembly,
}

impl Visibility {
    fn from_member_access(bits: u32) -> Self {
        match bits {
            0x2 => Visibility::FamilyAndAssembly,
            0x3 => Visibility::Assembly,
            0x4 => Visibility::Family,
            0x5 => Visibility::FamilyOrAssembly,
            0x6 => Visibility::Public,
            _ => Visibility::Private,
        }
    }

    /// Returns true for the protected family (`protected`, `protected internal`,
    /// `private protected`)
    #[must_use]
    pub fn is_family(&self) -> bool {
        matches!(
            self,
            Visibility::Family | Visibility::FamilyOrAssembly | Visibility::FamilyAndAssembly
        )
    }
}
