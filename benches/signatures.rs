//! Benchmarks for signature parsing and encoding.
//!
//! Covers method, field, property, local variable, type specification and method
//! specification blobs, from trivial to deeply nested generic instantiations.

extern crate cilpe;

use cilpe::metadata::signatures::{
    encode_method_signature, parse_field_signature, parse_local_var_signature,
    parse_method_signature, parse_method_spec_signature, parse_property_signature,
    parse_type_spec_signature, SignatureParser,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

#[rustfmt::skip]
const METHODS: &[(&str, &[u8])] = &[
    // void M()
    ("void_no_params", &[0x00, 0x00, 0x01]),
    // int M(int, string, bool)
    ("primitives", &[0x00, 0x03, 0x08, 0x08, 0x0E, 0x02]),
    // instance void M(int)
    ("instance", &[0x20, 0x01, 0x01, 0x08]),
    // instance !!1 M<T, U>(!!0)
    ("generic", &[0x30, 0x02, 0x01, 0x1E, 0x01, 0x1E, 0x00]),
    // void M(ref int, ref string)
    ("byref", &[0x00, 0x02, 0x01, 0x10, 0x08, 0x10, 0x0E]),
    // void M(int, ..., string)
    ("vararg", &[0x05, 0x02, 0x01, 0x08, 0x41, 0x0E]),
    // List<Dictionary<string, int[]>> M(int x 8)
    ("nested_generic", &[
        0x00, 0x08, 0x15, 0x12, 0x49, 0x01, 0x15, 0x12, 0x4D, 0x02, 0x0E, 0x1D, 0x08,
        0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08,
    ]),
];

#[rustfmt::skip]
const FIELDS: &[(&str, &[u8])] = &[
    ("primitive", &[0x06, 0x08]),
    ("szarray", &[0x06, 0x1D, 0x08]),
    ("class", &[0x06, 0x12, 0x49]),
    // int[0..4, 0..4]
    ("md_array", &[0x06, 0x14, 0x08, 0x02, 0x02, 0x04, 0x04, 0x02, 0x00, 0x00]),
    ("modreq_volatile", &[0x06, 0x1F, 0x49, 0x08]),
];

fn bench_method_signatures(c: &mut Criterion) {
    let mut group = c.benchmark_group("sig_method");
    for (name, signature) in METHODS {
        group.bench_with_input(BenchmarkId::from_parameter(name), signature, |b, signature| {
            b.iter(|| black_box(parse_method_signature(black_box(signature)).unwrap()));
        });
    }
    group.finish();
}

fn bench_field_signatures(c: &mut Criterion) {
    let mut group = c.benchmark_group("sig_field");
    for (name, signature) in FIELDS {
        group.bench_with_input(BenchmarkId::from_parameter(name), signature, |b, signature| {
            b.iter(|| black_box(parse_field_signature(black_box(signature)).unwrap()));
        });
    }
    group.finish();
}

fn bench_other_signatures(c: &mut Criterion) {
    // instance string Item(int)
    let property = [0x28, 0x01, 0x0E, 0x08];
    // int, string, bool, object, pinned ref int
    let locals = [0x07, 0x05, 0x08, 0x0E, 0x02, 0x1C, 0x45, 0x10, 0x08];
    // List<int>
    let type_spec = [0x15, 0x12, 0x49, 0x01, 0x08];
    // <int, string>
    let method_spec = [0x0A, 0x02, 0x08, 0x0E];

    c.bench_function("sig_property_indexer", |b| {
        b.iter(|| black_box(parse_property_signature(black_box(&property)).unwrap()));
    });
    c.bench_function("sig_local_vars", |b| {
        b.iter(|| black_box(parse_local_var_signature(black_box(&locals)).unwrap()));
    });
    c.bench_function("sig_type_spec_generic", |b| {
        b.iter(|| black_box(parse_type_spec_signature(black_box(&type_spec)).unwrap()));
    });
    c.bench_function("sig_method_spec", |b| {
        b.iter(|| black_box(parse_method_spec_signature(black_box(&method_spec)).unwrap()));
    });
}

fn bench_deep_nesting(c: &mut Criterion) {
    // FIELD followed by 40 nested SZARRAYs of I4
    let mut signature = vec![0x06];
    signature.extend(std::iter::repeat(0x1D).take(40));
    signature.push(0x08);

    c.bench_function("sig_field_nested_40", |b| {
        b.iter(|| {
            let mut parser = SignatureParser::with_max_depth(black_box(&signature), 64);
            black_box(parser.parse_field_signature().unwrap())
        });
    });
}

fn bench_method_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("sig_method_encode");
    for (name, signature) in METHODS {
        let parsed = parse_method_signature(signature).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &parsed, |b, parsed| {
            b.iter(|| black_box(encode_method_signature(black_box(parsed)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_method_signatures,
    bench_field_signatures,
    bench_other_signatures,
    bench_deep_nesting,
    bench_method_encoding
);
criterion_main!(benches);
