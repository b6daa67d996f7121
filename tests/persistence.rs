//! Generated module listings and their persistence.

use std::{fs, sync::Arc};

use tempfile::TempDir;

use cilreplica::{
    emulation::EmulatedProbe,
    metadata::{
        attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
        builder::{FieldBuilder, MethodBuilder, PropertyBuilder, TypeBuilder},
    },
    rewrite::RuntimeFamily,
    Error, GraphCopier, MemberRegistry, Result, Token,
};

/// `public class Shop.Counter` with a private field, an accessor pair, a property and a
/// private nested `Entry`
fn counter(registry: &Arc<MemberRegistry>) -> Result<Token> {
    let core = *registry.core();
    let counter = TypeBuilder::new(registry.clone(), "Shop.dll")
        .class("Shop", "Counter")
        .public()
        .build()?
        .token;
    let count = FieldBuilder::new(registry.clone(), counter, "count")
        .flags(FieldAttributes::PRIVATE)
        .field_type(core.int32)
        .build()?
        .token;
    let getter = MethodBuilder::new(registry.clone(), counter, "get_Count")
        .flags(MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME)
        .returns(core.int32)
        .implementation(move |asm| {
            asm.ldarg(0)?.ldfld(count)?.ret()?;
            Ok(())
        })
        .build()?
        .token;
    MethodBuilder::new(registry.clone(), counter, "Bump")
        .flags(MethodAttributes::PUBLIC)
        .implementation(move |asm| {
            asm.ldarg(0)?
                .ldarg(0)?
                .ldfld(count)?
                .ldc_i4(1)?
                .add()?
                .stfld(count)?;
            Ok(())
        })
        .build()?;
    PropertyBuilder::new(registry.clone(), counter, "Count")
        .property_type(core.int32)
        .getter(getter)
        .build()?;
    TypeBuilder::new(registry.clone(), "Shop.dll")
        .class("Shop", "Entry")
        .nested_in(counter, TypeAttributes::NESTED_PRIVATE)
        .build()?;
    Ok(counter)
}

#[test]
fn listings_are_persisted_next_to_the_module_name() -> Result<()> {
    let registry = Arc::new(MemberRegistry::new());
    let counter = counter(&registry)?;
    let temp = TempDir::new()?;
    let dir = temp.path();

    let mut copier = GraphCopier::new(registry.clone());
    copier.add_original_type(counter)?;
    let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
    let module = copier.create_assembly(&probe, Some(dir))?;

    assert_eq!(module.name(), "Shop.Replica");
    let path = module.path().ok_or(Error::MemberNotFound(counter))?;
    assert_eq!(path, dir.join("Shop.Replica.il"));

    let written = fs::read_to_string(path)?;
    assert_eq!(written, module.listing());
    assert!(written.starts_with(".module Shop.Replica\n"));
    assert!(written.contains(".class public Shop.Counter"));
    assert!(written.contains("  .class nested private Shop.Counter/Entry"));
    assert!(written.contains(".field private System.Int32 count"));
    assert!(written.contains(".property System.Int32 Count"));
    assert!(written.contains("ldfld Shop.Counter::count"));
    // No staging file is left behind
    assert_eq!(fs::read_dir(dir)?.count(), 1);
    Ok(())
}

#[test]
fn copies_live_in_their_own_module() -> Result<()> {
    let registry = Arc::new(MemberRegistry::new());
    let counter = counter(&registry)?;

    let mut copier = GraphCopier::new(registry.clone());
    copier.add_original_type(counter)?;
    let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::Mono);
    let module = copier.create_assembly(&probe, None)?;

    assert!(module.path().is_none());
    let copy = module
        .find_type("Shop", "Counter")
        .ok_or(Error::MemberNotFound(counter))?;
    assert_ne!(copy, counter);
    assert_eq!(registry.type_def(copy)?.module, "Shop.Replica");
    assert_eq!(registry.module_types("Shop.Replica"), module.types());
    assert_eq!(module.report().types, 2);
    // count, get_Count, Bump and the Count property
    assert_eq!(module.report().members, 4);
    assert_eq!(module.report().synthesized, 0);
    assert!(registry.type_def(copy)?.is_baked());

    // `Bump` fell off its end; its copy is terminated
    let bump = registry
        .find_method(copy, "Bump")
        .ok_or(Error::MemberNotFound(copy))?;
    let last = bump.body().and_then(|body| body.instructions.last().cloned());
    assert_eq!(last.map(|instruction| instruction.opcode), Some(cilreplica::assembly::OpCode::Ret));

    // A second session cannot reuse the module name
    assert!(matches!(
        copier.create_assembly(&probe, None),
        Err(Error::Emit(_))
    ));
    Ok(())
}
