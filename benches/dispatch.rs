//! Benchmark suite for the dispatch boundary.
//!
//! Measures marshalling overhead (arity check + positional decode + pack)
//! against the cost of the delegate kernels behind it.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use despachar::{Device, Op};

fn benchmark_marshalling_overhead(c: &mut Criterion) {
    let mut device: Device<f32> = Device::host();
    let h = device.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];

    c.bench_function("dispatch_get_device", |b| {
        b.iter(|| {
            let out = device.invoke(Op::GetDevice, black_box(&[])).unwrap();
            black_box(out)
        });
    });

    c.bench_function("dispatch_set_single_element", |b| {
        b.iter(|| {
            device
                .invoke(Op::Set, black_box(&[1.0, h, 0.5, 0.0]))
                .unwrap();
        });
    });

    c.bench_function("dispatch_rejected_arity", |b| {
        b.iter(|| {
            let (code, _) = device.invoke_raw(Op::Dot.id(), black_box(&[1.0]));
            black_box(code)
        });
    });
}

fn benchmark_kernel_sizes(c: &mut Criterion) {
    let mut device: Device<f32> = Device::host();
    let mut group = c.benchmark_group("axpy");

    for n in [64_usize, 1024, 16_384] {
        let hx = device.invoke(Op::AllocMemory, &[n as f32]).unwrap()[0];
        let hy = device.invoke(Op::AllocMemory, &[n as f32]).unwrap()[0];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                device
                    .invoke(Op::Axpy, black_box(&[n as f32, 0.5, hx, hy]))
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_marshalling_overhead, benchmark_kernel_sizes);
criterion_main!(benches);
