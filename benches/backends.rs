mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gslang::backend::Backend;
use gslang::backend::interpreter::Interpreter;
use gslang::backend::vm::Vm;
use gslang::bytecode::compile;

fn bench_backends(c: &mut Criterion) {
    for (name, path) in common::WORKLOADS {
        let program = common::load_program(path);

        c.bench_function(&format!("interpreter_{name}"), |b| {
            b.iter(|| {
                let mut backend = Interpreter::new();
                let execution = backend.run(black_box(&program)).expect("interpreter run");
                black_box(execution);
            })
        });

        c.bench_function(&format!("vm_compile_{name}"), |b| {
            b.iter(|| {
                let code = compile(black_box(&program));
                black_box(code);
            })
        });

        c.bench_function(&format!("vm_total_{name}"), |b| {
            b.iter(|| {
                let mut backend = Vm::new();
                let execution = backend.run(black_box(&program)).expect("vm run");
                black_box(execution);
            })
        });
    }
}

criterion_group!(benches, bench_backends);
criterion_main!(benches);
