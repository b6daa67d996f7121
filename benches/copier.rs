//! Benchmarks for graph copying and the reference runtime.
//!
//! - Copying a graph of nested types whose bodies reach private members of their container
//! - Executing a copied body against its original

extern crate cilreplica;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use cilreplica::{
    emulation::{EmValue, EmulatedProbe, Runtime},
    metadata::{
        attributes::{FieldAttributes, MethodAttributes, TypeAttributes},
        builder::{FieldBuilder, MethodBuilder, TypeBuilder},
    },
    rewrite::RuntimeFamily,
    GraphCopier, MemberRegistry, Token,
};

const NESTED: usize = 32;

/// `Bench.Host` with a private static counter and `NESTED` private nested types, each with a
/// method incrementing the counter `n` times
fn host() -> (Arc<MemberRegistry>, Vec<Token>) {
    let registry = Arc::new(MemberRegistry::new());
    let int32 = registry.core().int32;
    let host = TypeBuilder::new(registry.clone(), "Bench.dll")
        .class("Bench", "Host")
        .public()
        .build()
        .unwrap()
        .token;
    let counter = FieldBuilder::new(registry.clone(), host, "counter")
        .flags(FieldAttributes::PRIVATE | FieldAttributes::STATIC)
        .field_type(int32)
        .build()
        .unwrap()
        .token;

    let mut nested = Vec::with_capacity(NESTED);
    for index in 0..NESTED {
        let ty = TypeBuilder::new(registry.clone(), "Bench.dll")
            .class("Bench", &format!("Worker{index}"))
            .nested_in(host, TypeAttributes::NESTED_PRIVATE)
            .build()
            .unwrap()
            .token;
        MethodBuilder::new(registry.clone(), ty, "Run")
            .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC)
            .returns(int32)
            .parameter(int32)
            .implementation(move |asm| {
                let top = cilreplica::assembly::Label(0);
                let done = cilreplica::assembly::Label(1);
                asm.mark_label(top)?
                    .ldarg(0)?
                    .brfalse(done)?
                    .ldsfld(counter)?
                    .ldc_i4(1)?
                    .add()?
                    .stsfld(counter)?
                    .ldarg(0)?
                    .ldc_i4(1)?
                    .sub()?
                    .starg(0)?
                    .br(top)?
                    .mark_label(done)?
                    .ldsfld(counter)?
                    .ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        nested.push(ty);
    }
    (registry, nested)
}

fn bench_copy_nested_graph(c: &mut Criterion) {
    c.bench_function("copy_nested_graph", |b| {
        b.iter_batched(
            host,
            |(registry, nested)| {
                let mut copier = GraphCopier::new(registry.clone());
                for ty in nested {
                    copier.add_original_type(ty).unwrap();
                }
                let probe = EmulatedProbe::new(registry, RuntimeFamily::CoreClr);
                black_box(copier.create_assembly(&probe, None).unwrap())
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_run_original_and_copy(c: &mut Criterion) {
    let (registry, nested) = host();
    let mut copier = GraphCopier::new(registry.clone());
    copier.add_original_type(nested[0]).unwrap();
    let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
    let module = copier.create_assembly(&probe, None).unwrap();
    let container = module.find_type("Bench", "Host").unwrap();
    let copy = registry.find_nested(container, "Worker0").unwrap().token;

    let original = registry.find_method(nested[0], "Run").unwrap().token;
    let copied = registry.find_method(copy, "Run").unwrap().token;

    let mut group = c.benchmark_group("run_counter_loop");
    for (name, method) in [("original", original), ("copy", copied)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut runtime = Runtime::new(registry.clone(), RuntimeFamily::CoreClr);
                black_box(runtime.invoke(method, &[EmValue::I32(black_box(100))]).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_copy_nested_graph, bench_run_original_and_copy);
criterion_main!(benches);
