//! Runtime helpers invoked by synthesized instruction sequences.
//!
//! When a member cannot be referenced directly, the rewriter reaches it through the runtime's
//! reflection surface instead: resolve a metadata token to a `Type`, `FieldInfo` or
//! `MethodBase`, then operate on that object. Each [`Intrinsic`] names one such entry point
//! of the core library. They are always public, so calling them from generated code is legal.

use strum::{Display, EnumIter};

/// Core library entry points used by rewritten code.
///
/// `Display` yields the fully qualified member the helper stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Intrinsic {
    /// `int32 token -> Type`
    #[strum(serialize = "System.Reflection.Module::ResolveType")]
    ResolveType,
    /// `int32 token -> FieldInfo`
    #[strum(serialize = "System.Reflection.Module::ResolveField")]
    ResolveField,
    /// `int32 token -> MethodBase`
    #[strum(serialize = "System.Reflection.Module::ResolveMethod")]
    ResolveMethod,
    /// `FieldInfo, object instance -> object`
    #[strum(serialize = "System.Reflection.FieldInfo::GetValue")]
    FieldGetValue,
    /// `FieldInfo, object instance, object value -> void`
    #[strum(serialize = "System.Reflection.FieldInfo::SetValue")]
    FieldSetValue,
    /// `Type, object -> bool`
    #[strum(serialize = "System.Type::IsInstanceOfType")]
    IsInstanceOfType,
    /// `Type element, int32 length -> Array`
    #[strum(serialize = "System.Array::CreateInstance")]
    CreateArray,
    /// `object -> Type`
    #[strum(serialize = "System.Object::GetType")]
    GetType,
    /// `object -> object`; under a `constrained.` prefix the receiver is a value address
    #[strum(serialize = "System.Object::MemberwiseClone")]
    MemberwiseClone,
    /// `MethodBase -> RuntimeMethodHandle`
    #[strum(serialize = "System.Reflection.MethodBase::get_MethodHandle")]
    GetMethodHandle,
    /// `RuntimeMethodHandle& -> native int`
    #[strum(serialize = "System.RuntimeMethodHandle::GetFunctionPointer")]
    GetFunctionPointer,
    /// `Type runtime type, MethodBase declared -> MethodBase`, the override the runtime type
    /// would dispatch to
    #[strum(serialize = "System.Type::GetMethod")]
    ResolveVirtual,
    /// `Type -> native int`
    #[strum(serialize = "System.RuntimeTypeHandle::get_Value")]
    TypeHandleValue,
    /// `string format, object, object -> string`
    #[strum(serialize = "System.String::Format")]
    FormatString,
    /// `-> NullReferenceException`
    #[strum(serialize = "System.NullReferenceException::.ctor")]
    NewNullReferenceException,
    /// `string message -> InvalidCastException`
    #[strum(serialize = "System.InvalidCastException::.ctor")]
    NewInvalidCastException,
}

impl Intrinsic {
    /// Number of stack values the helper consumes
    #[must_use]
    pub fn pops(&self) -> usize {
        match self {
            Intrinsic::NewNullReferenceException => 0,
            Intrinsic::ResolveType
            | Intrinsic::ResolveField
            | Intrinsic::ResolveMethod
            | Intrinsic::GetType
            | Intrinsic::MemberwiseClone
            | Intrinsic::GetMethodHandle
            | Intrinsic::GetFunctionPointer
            | Intrinsic::TypeHandleValue
            | Intrinsic::NewInvalidCastException => 1,
            Intrinsic::FieldGetValue
            | Intrinsic::IsInstanceOfType
            | Intrinsic::CreateArray
            | Intrinsic::ResolveVirtual => 2,
            Intrinsic::FieldSetValue | Intrinsic::FormatString => 3,
        }
    }

    /// Returns true if the helper leaves a result on the stack
    #[must_use]
    pub fn pushes(&self) -> bool {
        !matches!(self, Intrinsic::FieldSetValue)
    }
}
