//! Arrays, generic instantiations and generic method instantiations built over members of the
//! copied graph.
//!
//! The fixture mirrors:
//!
//! ```text
//! public class Demo.Outer {
//!     private struct Secret { public long value; }
//!     private class Cell<T> { public T item; }
//!
//!     private Secret[] items;
//!     private Secret[] spare;
//!     private Cell<Secret> cells;
//!
//!     private T Id<T>(T value) => value;
//!     public int Run(int value) => Id<int>(Id<int>(value));
//!     public static int Count(int length) => new Secret[length].Length;
//! }
//! ```
//!
//! Every shape only involves members the copy defines itself, so the copy must reference the
//! rebuilt shapes directly, even in a strict session.

use std::sync::Arc;

use cilreplica::{
    assembly::OpCode,
    emulation::{EmValue, EmulatedProbe, ExecutionOutcome, Runtime},
    metadata::{
        attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
        builder::{FieldBuilder, MethodBuilder, TypeBuilder},
        members::TypeKind,
    },
    rewrite::RuntimeFamily,
    CopyOptions, Error, GraphCopier, MemberRegistry, Result, Token,
};

struct Outer {
    registry: Arc<MemberRegistry>,
    outer: Token,
    secret_array: Token,
    secret_cells: Token,
    id_of_int: Token,
}

fn outer() -> Result<Outer> {
    let registry = Arc::new(MemberRegistry::new());
    let core = *registry.core();

    let outer = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Outer")
        .public()
        .build()?
        .token;
    let secret = TypeBuilder::new(registry.clone(), "Demo.dll")
        .value_type("Demo", "Secret")
        .nested_in(outer, TypeAttributes::NESTED_PRIVATE)
        .build()?
        .token;
    FieldBuilder::new(registry.clone(), secret, "value")
        .flags(FieldAttributes::PUBLIC)
        .field_type(core.int64)
        .build()?;
    let cell = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Cell")
        .nested_in(outer, TypeAttributes::NESTED_PRIVATE)
        .generic_parameter("T")
        .build()?;
    let item_type = cell
        .generic_params
        .iter()
        .next()
        .map(|(_, param)| *param)
        .ok_or(Error::MemberNotFound(cell.token))?;
    FieldBuilder::new(registry.clone(), cell.token, "item")
        .flags(FieldAttributes::PUBLIC)
        .field_type(item_type)
        .build()?;

    let secret_array = registry.intern_type(TypeKind::Array { element: secret })?;
    let secret_cells = registry.intern_type(TypeKind::Instantiation {
        definition: cell.token,
        arguments: vec![secret],
    })?;
    for (name, ty) in [
        ("items", secret_array),
        ("spare", secret_array),
        ("cells", secret_cells),
    ] {
        FieldBuilder::new(registry.clone(), outer, name)
            .flags(FieldAttributes::PRIVATE)
            .field_type(ty)
            .build()?;
    }

    let id = MethodBuilder::new(registry.clone(), outer, "Id")
        .flags(MethodAttributes::PRIVATE | MethodAttributes::HIDE_BY_SIG)
        .generic_parameter("T")
        .returns_generic(0)
        .generic_parameter_argument(0)
        .implementation(|asm| {
            asm.ldarg(1)?.ret()?;
            Ok(())
        })
        .build()?
        .token;
    let id_of_int = registry.intern_method(id, &[core.int32])?;
    MethodBuilder::new(registry.clone(), outer, "Run")
        .flags(MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG)
        .returns(core.int32)
        .parameter(core.int32)
        .implementation(move |asm| {
            asm.ldarg(0)?
                .ldarg(0)?
                .ldarg(1)?
                .callvirt(id_of_int)?
                .callvirt(id_of_int)?
                .ret()?;
            Ok(())
        })
        .build()?;
    MethodBuilder::new(registry.clone(), outer, "Count")
        .flags(
            MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG,
        )
        .returns(core.int32)
        .parameter(core.int32)
        .implementation(move |asm| {
            asm.ldarg(0)?.newarr(secret)?.ldlen()?.conv_i4()?.ret()?;
            Ok(())
        })
        .build()?;

    Ok(Outer {
        registry,
        outer,
        secret_array,
        secret_cells,
        id_of_int,
    })
}

/// Copies `Outer` in a strict session and returns the copied type
fn copy_strict(fixture: &Outer, suffix: &str) -> Result<(Token, cilreplica::CopyReport)> {
    let options = CopyOptions::strict().with_module_suffix(suffix);
    let mut copier = GraphCopier::with_options(fixture.registry.clone(), options);
    copier.add_original_type(fixture.outer)?;
    let probe = EmulatedProbe::new(fixture.registry.clone(), RuntimeFamily::CoreClr);
    let module = copier.create_assembly(&probe, None)?;
    let copy = module
        .find_type("Demo", "Outer")
        .ok_or(Error::MemberNotFound(fixture.outer))?;
    Ok((copy, *module.report()))
}

#[test]
fn shapes_over_copied_types_are_rebuilt_once() -> Result<()> {
    let fixture = outer()?;
    let (copy, report) = copy_strict(&fixture, "Shapes")?;
    let registry = &fixture.registry;
    assert_eq!(report.illegal_access_warnings, 0);

    let copied_secret = registry
        .find_nested(copy, "Secret")
        .ok_or(Error::MemberNotFound(copy))?
        .token;
    let copied_cell = registry
        .find_nested(copy, "Cell")
        .ok_or(Error::MemberNotFound(copy))?
        .token;
    let field_type = |name: &str| {
        registry
            .find_field(copy, name)
            .and_then(|field| field.field_type())
            .ok_or(Error::MemberNotFound(copy))
    };

    let items = field_type("items")?;
    assert_ne!(items, fixture.secret_array);
    assert_eq!(
        registry.type_def(items)?.kind,
        TypeKind::Array {
            element: copied_secret
        }
    );
    // Both fields used the same original shape and share its rebuilt copy
    assert_eq!(field_type("spare")?, items);

    let cells = field_type("cells")?;
    assert_ne!(cells, fixture.secret_cells);
    assert_eq!(
        registry.type_def(cells)?.kind,
        TypeKind::Instantiation {
            definition: copied_cell,
            arguments: vec![copied_secret],
        }
    );
    Ok(())
}

#[test]
fn calls_to_private_generic_methods_of_the_graph_stay_direct() -> Result<()> {
    let fixture = outer()?;
    let (copy, report) = copy_strict(&fixture, "Generic")?;
    let registry = &fixture.registry;
    assert_eq!(report.synthesized, 0);

    let copied_id = registry
        .find_method(copy, "Id")
        .ok_or(Error::MemberNotFound(copy))?
        .token;
    let run = registry
        .find_method(copy, "Run")
        .ok_or(Error::MemberNotFound(copy))?;
    let body = run.body().ok_or(Error::MemberNotFound(run.token))?;
    let targets: Vec<Token> = body
        .instructions
        .iter()
        .filter(|instruction| instruction.opcode == OpCode::Callvirt)
        .filter_map(|instruction| instruction.member())
        .collect();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0], targets[1]);
    assert_ne!(targets[0], fixture.id_of_int);
    let instantiation = registry.method(targets[0])?.instantiation.clone();
    assert_eq!(
        instantiation,
        Some((copied_id, vec![registry.core().int32]))
    );

    let mut runtime = Runtime::new(registry.clone(), RuntimeFamily::CoreClr);
    let original_run = registry
        .find_method(fixture.outer, "Run")
        .ok_or(Error::MemberNotFound(fixture.outer))?
        .token;
    let original_this = EmValue::ObjectRef(runtime.allocate_instance(fixture.outer)?);
    let copied_this = EmValue::ObjectRef(runtime.allocate_instance(copy)?);
    let original = runtime.invoke(original_run, &[original_this, EmValue::I32(5)])?;
    let replica = runtime.invoke(run.token, &[copied_this, EmValue::I32(5)])?;
    assert_eq!(original, ExecutionOutcome::Returned(Some(EmValue::I32(5))));
    assert_eq!(original, replica);
    Ok(())
}

#[test]
fn arrays_of_copied_private_types_are_created_directly() -> Result<()> {
    let fixture = outer()?;
    let (copy, _) = copy_strict(&fixture, "Arrays")?;
    let registry = &fixture.registry;

    let count = registry
        .find_method(copy, "Count")
        .ok_or(Error::MemberNotFound(copy))?;
    let body = count.body().ok_or(Error::MemberNotFound(count.token))?;
    assert!(body
        .instructions
        .iter()
        .any(|instruction| instruction.opcode == OpCode::Newarr));

    let mut runtime = Runtime::new(registry.clone(), RuntimeFamily::CoreClr);
    assert_eq!(
        runtime.invoke(count.token, &[EmValue::I32(4)])?,
        ExecutionOutcome::Returned(Some(EmValue::I32(4)))
    );
    Ok(())
}
