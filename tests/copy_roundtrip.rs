//! End-to-end tests: copy a graph of private nested types, then run originals and copies side
//! by side on the reference runtime and compare what they do.
//!
//! The fixture mirrors:
//!
//! ```text
//! public class Demo.Vault {
//!     private static int withdrawals;
//!     private int balance;
//!     private static int Fee(int amount) => amount / 10;
//!
//!     private class Coin { }
//!     private struct Pair { public int tag; public long value; }
//!
//!     private class Teller {
//!         internal Ledger ledger;
//!         public static int Withdraw(Vault vault, int amount) {
//!             withdrawals = withdrawals + 1;
//!             vault.balance = vault.balance - (amount + Fee(amount));
//!             return vault.balance;
//!         }
//!         public static object AsCoin(object value) => (Coin)value;
//!     }
//!
//!     private class Ledger {
//!         internal Teller teller;
//!         public static Teller Owner(Ledger ledger) => ledger.teller;
//!         public static long RoundTrip(long value) { /* through a boxed Pair */ }
//!     }
//! }
//! ```
//!
//! Only `Teller` and `Ledger` are copied, so every access to `Vault`, `Coin` and `Pair`
//! becomes a synthesized sequence in the copies.

use std::sync::Arc;

use cilreplica::{
    emulation::{EmValue, EmulatedProbe, ExecutionOutcome, Runtime},
    metadata::{
        attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
        builder::{FieldBuilder, MethodBuilder, TypeBuilder},
    },
    rewrite::RuntimeFamily,
    CopyOptions, Error, GraphCopier, MemberRegistry, Result, Token,
};

const PUBLIC_STATIC: MethodAttributes = MethodAttributes::PUBLIC
    .union(MethodAttributes::STATIC)
    .union(MethodAttributes::HIDE_BY_SIG);
const PRIVATE_STATIC: MethodAttributes = MethodAttributes::PRIVATE
    .union(MethodAttributes::STATIC)
    .union(MethodAttributes::HIDE_BY_SIG);

struct Vault {
    registry: Arc<MemberRegistry>,
    vault: Token,
    withdrawals: Token,
    balance: Token,
    coin: Token,
    teller: Token,
    ledger: Token,
    withdraw: Token,
    as_coin: Token,
    round_trip: Token,
}

fn vault() -> Result<Vault> {
    let registry = Arc::new(MemberRegistry::new());
    let core = *registry.core();

    let vault = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Vault")
        .public()
        .build()?
        .token;
    let withdrawals = FieldBuilder::new(registry.clone(), vault, "withdrawals")
        .flags(FieldAttributes::PRIVATE | FieldAttributes::STATIC)
        .field_type(core.int32)
        .build()?
        .token;
    let balance = FieldBuilder::new(registry.clone(), vault, "balance")
        .flags(FieldAttributes::PRIVATE)
        .field_type(core.int32)
        .build()?
        .token;
    let fee = MethodBuilder::new(registry.clone(), vault, "Fee")
        .flags(PRIVATE_STATIC)
        .returns(core.int32)
        .parameter(core.int32)
        .implementation(|asm| {
            asm.ldarg(0)?.ldc_i4(10)?.div()?.ret()?;
            Ok(())
        })
        .build()?
        .token;

    let coin = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Coin")
        .nested_in(vault, TypeAttributes::NESTED_PRIVATE)
        .build()?
        .token;
    let pair = TypeBuilder::new(registry.clone(), "Demo.dll")
        .value_type("Demo", "Pair")
        .nested_in(vault, TypeAttributes::NESTED_PRIVATE)
        .build()?
        .token;
    FieldBuilder::new(registry.clone(), pair, "tag")
        .flags(FieldAttributes::PUBLIC)
        .field_type(core.int32)
        .build()?;
    let pair_value = FieldBuilder::new(registry.clone(), pair, "value")
        .flags(FieldAttributes::PUBLIC)
        .field_type(core.int64)
        .build()?
        .token;

    let teller = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Teller")
        .nested_in(vault, TypeAttributes::NESTED_PRIVATE)
        .build()?
        .token;
    let ledger = TypeBuilder::new(registry.clone(), "Demo.dll")
        .class("Demo", "Ledger")
        .nested_in(vault, TypeAttributes::NESTED_PRIVATE)
        .build()?
        .token;
    FieldBuilder::new(registry.clone(), teller, "ledger")
        .flags(FieldAttributes::ASSEMBLY)
        .field_type(ledger)
        .build()?;
    let ledger_teller = FieldBuilder::new(registry.clone(), ledger, "teller")
        .flags(FieldAttributes::ASSEMBLY)
        .field_type(teller)
        .build()?
        .token;

    let withdraw = MethodBuilder::new(registry.clone(), teller, "Withdraw")
        .flags(PUBLIC_STATIC)
        .returns(core.int32)
        .parameter(vault)
        .parameter(core.int32)
        .implementation(move |asm| {
            asm.ldsfld(withdrawals)?
                .ldc_i4(1)?
                .add()?
                .stsfld(withdrawals)?
                .ldarg(0)?
                .ldarg(0)?
                .ldfld(balance)?
                .ldarg(1)?
                .ldarg(1)?
                .call(fee)?
                .add()?
                .sub()?
                .stfld(balance)?
                .ldarg(0)?
                .ldfld(balance)?
                .ret()?;
            Ok(())
        })
        .build()?
        .token;
    let as_coin = MethodBuilder::new(registry.clone(), teller, "AsCoin")
        .flags(PUBLIC_STATIC)
        .returns(core.object)
        .parameter(core.object)
        .implementation(move |asm| {
            asm.ldarg(0)?.castclass(coin)?.ret()?;
            Ok(())
        })
        .build()?
        .token;

    MethodBuilder::new(registry.clone(), ledger, "Owner")
        .flags(PUBLIC_STATIC)
        .returns(teller)
        .parameter(ledger)
        .implementation(move |asm| {
            asm.ldarg(0)?.ldfld(ledger_teller)?.ret()?;
            Ok(())
        })
        .build()?;
    let round_trip = MethodBuilder::new(registry.clone(), ledger, "RoundTrip")
        .flags(PUBLIC_STATIC)
        .returns(core.int64)
        .parameter(core.int64)
        .local(pair)
        .local(core.object)
        .implementation(move |asm| {
            asm.ldloca(0)?
                .ldarg(0)?
                .stfld(pair_value)?
                .ldloc(0)?
                .box_type(pair)?
                .stloc(1)?
                .ldloc(1)?
                .unbox_any(pair)?
                .stloc(0)?
                .ldloca(0)?
                .ldfld(pair_value)?
                .ret()?;
            Ok(())
        })
        .build()?
        .token;

    Ok(Vault {
        registry,
        vault,
        withdrawals,
        balance,
        coin,
        teller,
        ledger,
        withdraw,
        as_coin,
        round_trip,
    })
}

/// Copies of the fixture's nested types and their methods
struct Copied {
    teller: Token,
    ledger: Token,
    withdraw: Token,
    as_coin: Token,
    round_trip: Token,
}

/// Copies `Teller` and `Ledger` into a module whose suffix names the family
fn copy(fixture: &Vault, family: RuntimeFamily) -> Result<Copied> {
    let registry = &fixture.registry;
    let options = CopyOptions::new().with_module_suffix(&format!("Replica{family}"));
    let mut copier = GraphCopier::with_options(registry.clone(), options);
    copier
        .add_original_type(fixture.teller)?
        .add_original_type(fixture.ledger)?;
    let probe = EmulatedProbe::new(registry.clone(), family);
    let module = copier.create_assembly(&probe, None)?;

    let container = module
        .find_type("Demo", "Vault")
        .ok_or(Error::MemberNotFound(fixture.vault))?;
    let teller = registry
        .find_nested(container, "Teller")
        .ok_or(Error::MemberNotFound(fixture.teller))?
        .token;
    let ledger = registry
        .find_nested(container, "Ledger")
        .ok_or(Error::MemberNotFound(fixture.ledger))?
        .token;
    let method = |ty: Token, name: &str| {
        registry
            .find_method(ty, name)
            .map(|method| method.token)
            .ok_or(Error::MemberNotFound(ty))
    };
    Ok(Copied {
        teller,
        ledger,
        withdraw: method(teller, "Withdraw")?,
        as_coin: method(teller, "AsCoin")?,
        round_trip: method(ledger, "RoundTrip")?,
    })
}

/// Type and message of a managed exception, the parts that must agree between runs
fn thrown(outcome: &ExecutionOutcome) -> Option<(Token, Option<String>)> {
    outcome
        .exception()
        .map(|exception| (exception.exception_type, exception.message.clone()))
}

fn new_vault(runtime: &mut Runtime, fixture: &Vault, balance: i32) -> Result<EmValue> {
    let vault = EmValue::ObjectRef(runtime.allocate_instance(fixture.vault)?);
    runtime.set_field(&vault, fixture.balance, &EmValue::I32(balance))?;
    Ok(vault)
}

#[test]
fn copied_nested_types_reference_each_other() -> Result<()> {
    let fixture = vault()?;
    let copied = copy(&fixture, RuntimeFamily::CoreClr)?;
    let registry = &fixture.registry;

    assert_ne!(copied.teller, fixture.teller);
    assert_ne!(copied.ledger, fixture.ledger);
    let ledger_field = registry
        .find_field(copied.teller, "ledger")
        .ok_or(Error::MemberNotFound(copied.teller))?;
    let teller_field = registry
        .find_field(copied.ledger, "teller")
        .ok_or(Error::MemberNotFound(copied.ledger))?;
    assert_eq!(ledger_field.field_type(), Some(copied.ledger));
    assert_eq!(teller_field.field_type(), Some(copied.teller));

    let owner = registry
        .find_method(copied.ledger, "Owner")
        .ok_or(Error::MemberNotFound(copied.ledger))?;
    assert_eq!(owner.signature().map(|s| s.return_type), Some(copied.teller));
    let body = owner.body().ok_or(Error::MemberNotFound(owner.token))?;
    assert!(body
        .instructions
        .iter()
        .any(|instruction| instruction.member() == Some(teller_field.token)));

    // The enclosing type is only a container: `Coin` and `Pair` are not copied along
    let container = registry
        .type_def(copied.teller)?
        .enclosing
        .ok_or(Error::MemberNotFound(copied.teller))?;
    assert!(registry.find_nested(container, "Coin").is_none());
    assert!(registry.find_nested(container, "Pair").is_none());
    Ok(())
}

#[test]
fn private_members_of_the_enclosing_type_are_reached_through_reflection() -> Result<()> {
    let fixture = vault()?;
    for family in [RuntimeFamily::CoreClr, RuntimeFamily::Mono] {
        let copied = copy(&fixture, family)?;
        let body = fixture
            .registry
            .method(copied.withdraw)?
            .body()
            .cloned()
            .ok_or(Error::MemberNotFound(copied.withdraw))?;
        for hidden in [fixture.withdrawals, fixture.balance] {
            assert!(!body
                .instructions
                .iter()
                .any(|instruction| instruction.member() == Some(hidden)));
        }

        let mut runtime = Runtime::new(fixture.registry.clone(), family);
        let original_vault = new_vault(&mut runtime, &fixture, 100)?;
        let copied_vault = new_vault(&mut runtime, &fixture, 100)?;

        let original = runtime.invoke(fixture.withdraw, &[original_vault.clone(), EmValue::I32(30)])?;
        let replica = runtime.invoke(copied.withdraw, &[copied_vault.clone(), EmValue::I32(30)])?;
        assert_eq!(original, ExecutionOutcome::Returned(Some(EmValue::I32(67))));
        assert_eq!(original, replica);
        assert_eq!(
            runtime.get_field(&original_vault, fixture.balance)?,
            runtime.get_field(&copied_vault, fixture.balance)?
        );

        // Both runs updated the one static of the original type
        assert_eq!(
            runtime.get_field(&EmValue::Null, fixture.withdrawals)?,
            EmValue::I32(2)
        );
    }
    Ok(())
}

#[test]
fn null_instances_raise_the_same_exception() -> Result<()> {
    let fixture = vault()?;
    let copied = copy(&fixture, RuntimeFamily::CoreClr)?;
    let mut runtime = Runtime::new(fixture.registry.clone(), RuntimeFamily::CoreClr);

    let original = runtime.invoke(fixture.withdraw, &[EmValue::Null, EmValue::I32(5)])?;
    let replica = runtime.invoke(copied.withdraw, &[EmValue::Null, EmValue::I32(5)])?;

    let expected = fixture.registry.core().null_reference_exception;
    assert_eq!(thrown(&original).map(|(ty, _)| ty), Some(expected));
    assert_eq!(thrown(&original), thrown(&replica));
    Ok(())
}

#[test]
fn failed_casts_to_private_types_raise_the_same_exception() -> Result<()> {
    let fixture = vault()?;
    let copied = copy(&fixture, RuntimeFamily::CoreClr)?;
    let mut runtime = Runtime::new(fixture.registry.clone(), RuntimeFamily::CoreClr);

    let text = runtime.new_string("gold")?;
    let original = runtime.invoke(fixture.as_coin, &[text.clone()])?;
    let replica = runtime.invoke(copied.as_coin, &[text])?;
    let (exception_type, message) = thrown(&original).ok_or(Error::MemberNotFound(fixture.as_coin))?;
    assert_eq!(exception_type, fixture.registry.core().invalid_cast_exception);
    assert_eq!(
        message.as_deref(),
        Some("Unable to cast object of type 'System.String' to type 'Demo.Vault/Coin'.")
    );
    assert_eq!(thrown(&original), thrown(&replica));

    let coin = EmValue::ObjectRef(runtime.allocate_instance(fixture.coin)?);
    assert_eq!(
        runtime.invoke(copied.as_coin, &[coin.clone()])?,
        ExecutionOutcome::Returned(Some(coin))
    );
    assert_eq!(
        runtime.invoke(copied.as_coin, &[EmValue::Null])?,
        ExecutionOutcome::Returned(Some(EmValue::Null))
    );
    Ok(())
}

#[test]
fn private_value_types_box_and_unbox_under_both_families() -> Result<()> {
    let fixture = vault()?;
    for family in [RuntimeFamily::CoreClr, RuntimeFamily::Mono] {
        let copied = copy(&fixture, family)?;
        let mut runtime = Runtime::new(fixture.registry.clone(), family);
        for value in [0_i64, 42, -7, i64::MAX] {
            let original = runtime.invoke(fixture.round_trip, &[EmValue::I64(value)])?;
            let replica = runtime.invoke(copied.round_trip, &[EmValue::I64(value)])?;
            assert_eq!(original, ExecutionOutcome::Returned(Some(EmValue::I64(value))));
            assert_eq!(original, replica, "{family} round trip of {value}");
        }
    }
    Ok(())
}

#[test]
fn reports_count_rewrites_and_kept_references() -> Result<()> {
    let fixture = vault()?;
    let options = CopyOptions::new().with_module_suffix("Counted");
    let mut copier = GraphCopier::with_options(fixture.registry.clone(), options);
    copier.add_original_type(fixture.teller)?;
    let probe = EmulatedProbe::new(fixture.registry.clone(), RuntimeFamily::CoreClr);
    let module = copier.create_assembly(&probe, None)?;

    let report = module.report();
    // Teller and the container standing in for Vault; Ledger stays the original
    assert_eq!(report.types, 2);
    assert_eq!(module.types().len(), 2);
    // withdrawals (load and store), balance (two loads and a store), Fee, the Coin cast
    assert_eq!(report.synthesized, 7);
    // The `ledger` field keeps the private original Ledger as its type
    assert!(report.illegal_access_warnings >= 1);
    // The container bakes first, Teller once its methods and container are done
    assert_eq!(report.finalize_iterations, 2);
    Ok(())
}

#[test]
fn strict_sessions_reject_references_that_stay_inaccessible() -> Result<()> {
    let fixture = vault()?;
    let mut copier = GraphCopier::with_options(
        fixture.registry.clone(),
        CopyOptions::strict().with_module_suffix("Strict"),
    );
    copier.add_original_type(fixture.ledger)?;
    let probe = EmulatedProbe::new(fixture.registry.clone(), RuntimeFamily::CoreClr);

    // The `teller` field of the copy would keep the private, uncopied Teller type
    match copier.create_assembly(&probe, None) {
        Err(Error::IllegalAccess { target, .. }) => assert_eq!(target, "Demo.Vault/Teller"),
        other => panic!("expected an illegal access error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn failed_sessions_leave_the_module_name_free() -> Result<()> {
    let fixture = vault()?;
    let registry = &fixture.registry;
    let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);

    let mut strict = GraphCopier::with_options(
        registry.clone(),
        CopyOptions::strict().with_module_suffix("Retry"),
    );
    strict.add_original_type(fixture.ledger)?;
    assert!(matches!(
        strict.create_assembly(&probe, None),
        Err(Error::IllegalAccess { .. })
    ));
    assert!(registry.module_types("Demo.Retry").is_empty());

    let mut lenient =
        GraphCopier::with_options(registry.clone(), CopyOptions::new().with_module_suffix("Retry"));
    lenient.add_original_type(fixture.ledger)?;
    let module = lenient.create_assembly(&probe, None)?;
    assert_eq!(module.name(), "Demo.Retry");
    // The enclosing container and Ledger, none of the abandoned definitions
    assert_eq!(module.types().len(), 2);
    assert_eq!(registry.module_types("Demo.Retry"), module.types());

    let container = module
        .find_type("Demo", "Vault")
        .ok_or(Error::MemberNotFound(fixture.vault))?;
    assert!(registry.find_nested(container, "Ledger").is_some());
    Ok(())
}

#[test]
fn requesting_the_enclosing_type_copies_the_whole_graph() -> Result<()> {
    let fixture = vault()?;
    let registry = &fixture.registry;
    let mut copier = GraphCopier::with_options(
        registry.clone(),
        CopyOptions::strict().with_module_suffix("Whole"),
    );
    copier.add_original_type(fixture.vault)?;
    let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
    let module = copier.create_assembly(&probe, None)?;

    // Vault and its four nested types; every reference stays inside the copy
    let report = module.report();
    assert_eq!(report.types, 5);
    assert_eq!(report.synthesized, 0);
    assert_eq!(report.illegal_access_warnings, 0);

    let vault = module
        .find_type("Demo", "Vault")
        .ok_or(Error::MemberNotFound(fixture.vault))?;
    let nested = |name: &str| {
        registry
            .find_nested(vault, name)
            .map(|ty| ty.token)
            .ok_or(Error::MemberNotFound(vault))
    };
    let (teller, ledger) = (nested("Teller")?, nested("Ledger")?);
    let method = |ty: Token, name: &str| {
        registry
            .find_method(ty, name)
            .map(|method| method.token)
            .ok_or(Error::MemberNotFound(ty))
    };
    let field = |ty: Token, name: &str| {
        registry
            .find_field(ty, name)
            .map(|field| field.token)
            .ok_or(Error::MemberNotFound(ty))
    };
    let balance = field(vault, "balance")?;
    let withdrawals = field(vault, "withdrawals")?;
    assert_eq!(
        registry.field(field(teller, "ledger")?)?.field_type(),
        Some(ledger)
    );
    assert_eq!(
        registry.field(field(ledger, "teller")?)?.field_type(),
        Some(teller)
    );

    let mut runtime = Runtime::new(registry.clone(), RuntimeFamily::CoreClr);
    let original_vault = new_vault(&mut runtime, &fixture, 100)?;
    let copied_vault = EmValue::ObjectRef(runtime.allocate_instance(vault)?);
    runtime.set_field(&copied_vault, balance, &EmValue::I32(100))?;

    let original = runtime.invoke(fixture.withdraw, &[original_vault, EmValue::I32(30)])?;
    let replica = runtime.invoke(method(teller, "Withdraw")?, &[copied_vault, EmValue::I32(30)])?;
    assert_eq!(original, ExecutionOutcome::Returned(Some(EmValue::I32(67))));
    assert_eq!(original, replica);
    // Each run counted on the static of its own type
    assert_eq!(
        runtime.get_field(&EmValue::Null, fixture.withdrawals)?,
        EmValue::I32(1)
    );
    assert_eq!(runtime.get_field(&EmValue::Null, withdrawals)?, EmValue::I32(1));

    let text = runtime.new_string("gold")?;
    let original = runtime.invoke(fixture.as_coin, &[text.clone()])?;
    let replica = runtime.invoke(method(teller, "AsCoin")?, &[text])?;
    assert!(thrown(&original).is_some());
    assert_eq!(thrown(&original), thrown(&replica));

    let round_trip = method(ledger, "RoundTrip")?;
    for value in [3_i64, -300] {
        let original = runtime.invoke(fixture.round_trip, &[EmValue::I64(value)])?;
        let replica = runtime.invoke(round_trip, &[EmValue::I64(value)])?;
        assert_eq!(original, replica);
    }
    Ok(())
}
