use criterion::{criterion_group, criterion_main, Bencher, Criterion};
use ctxvars::{Context, ContextVar, ExecutionContextStack};
use std::hint::black_box;

fn populated(vars: &[ContextVar<i64>], stack: &mut ExecutionContextStack) {
    for (i, var) in vars.iter().enumerate() {
        var.set(stack, i as i64);
    }
}

fn bench_get(b: &mut Bencher<'_>, size: usize, cached: bool) {
    let vars: Vec<ContextVar<i64>> = (0..size)
        .map(|i| {
            let var = ContextVar::new(format!("var{}", i));
            if cached {
                var
            } else {
                var.without_cache()
            }
        })
        .collect();
    let mut stack = ExecutionContextStack::new();
    populated(&vars, &mut stack);
    let var = &vars[size / 2];
    b.iter(|| black_box(var.get(&mut stack)))
}

fn bench_set_reset(b: &mut Bencher<'_>, size: usize) {
    let vars: Vec<ContextVar<i64>> = (0..size).map(|i| ContextVar::new(format!("var{}", i))).collect();
    let mut stack = ExecutionContextStack::new();
    populated(&vars, &mut stack);
    let var = &vars[size / 2];
    b.iter(|| {
        let token = var.set(&mut stack, -1);
        var.reset(&mut stack, &token).unwrap();
    })
}

fn bench_run(b: &mut Bencher<'_>, size: usize) {
    let vars: Vec<ContextVar<i64>> = (0..size).map(|i| ContextVar::new(format!("var{}", i))).collect();
    let mut stack = ExecutionContextStack::new();
    populated(&vars, &mut stack);
    b.iter(|| {
        let context: Context = stack.copy_current();
        context.run(&mut stack, |stack| vars[0].get(stack)).unwrap()
    })
}

fn context_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("context");
    for size in &[10, 100, 1000] {
        group.bench_function(&format!("get_cached_{}", size), |b| bench_get(b, *size, true));
        group.bench_function(&format!("get_uncached_{}", size), |b| bench_get(b, *size, false));
        group.bench_function(&format!("set_reset_{}", size), |b| bench_set_reset(b, *size));
        group.bench_function(&format!("copy_run_{}", size), |b| bench_run(b, *size));
    }
    group.finish();
}

criterion_group!(benches, context_benches);
criterion_main!(benches);
