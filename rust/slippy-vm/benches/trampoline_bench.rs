//! Criterion benchmarks for the compile-and-run pipeline.
//!
//! Tail-recursive loops stress the trampoline; `fib` stresses the save
//! stack and non-tail calls.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slippy_compiler::generate_src;
use slippy_vm::{Machine, Value};

const LOOP: &str = "(define (loop n) (if (<= n 0) 0 (loop (- n 1))))";
const FIB: &str = "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))";

fn bench_tail_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("tail_loop");
    for n in [1_000u64, 10_000, 100_000] {
        let mut machine = Machine::default();
        if machine.eval(LOOP).is_err() {
            eprintln!("Skipping tail_loop/{}: definition failed", n);
            continue;
        }
        let call = match generate_src(&format!("(loop {})", n)) {
            Ok(program) => program,
            Err(e) => {
                eprintln!("Skipping tail_loop/{}: {}", n, e);
                continue;
            }
        };
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("iterations", n), &call, |b, program| {
            b.iter(|| {
                let result = machine.execute(black_box(program.clone()));
                assert_eq!(result.ok(), Some(Value::Int(0)));
            });
        });
    }
    group.finish();
}

fn bench_fib(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib");
    for n in [10, 15, 20] {
        let mut machine = Machine::default();
        if let Err(e) = machine.eval(FIB) {
            eprintln!("Skipping fib/{}: {}", n, e);
            continue;
        }
        let call = match generate_src(&format!("(fib {})", n)) {
            Ok(program) => program,
            Err(e) => {
                eprintln!("Skipping fib/{}: {}", n, e);
                continue;
            }
        };
        group.bench_with_input(BenchmarkId::new("run", n), &call, |b, program| {
            b.iter(|| machine.execute(black_box(program.clone())));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let source = format!("{}\n{}\n(fib 10)\n(loop 10)", FIB, LOOP);
    c.bench_function("generate_src", |b| b.iter(|| generate_src(black_box(&source))));
}

criterion_group!(benches, bench_tail_loop, bench_fib, bench_compile);
criterion_main!(benches);
