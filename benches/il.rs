//! Benchmarks for IL decoding, encoding and method body framing.

extern crate cilpe;

use cilpe::{
    assembly::{decode_stream, encode_instructions, InstructionAssembler, Operand},
    metadata::{method::MethodBody, streams::UserStringHeapBuilder, token::Token},
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

/// A loop summing `count` locals, repeated `blocks` times.
fn synthetic_method(blocks: usize) -> Vec<u8> {
    let mut assembler = InstructionAssembler::new();
    for _ in 0..blocks {
        let head = assembler.define_label();
        let exit = assembler.define_label();
        assembler.emit("ldc.i4.0", Operand::None).unwrap();
        assembler.emit("stloc.0", Operand::None).unwrap();
        assembler.mark_label(head).unwrap();
        assembler.emit("ldloc.0", Operand::None).unwrap();
        assembler.emit("ldc.i4", Operand::Int32(1000)).unwrap();
        assembler.branch("bge", exit).unwrap();
        assembler.emit("ldloc.0", Operand::None).unwrap();
        assembler.emit("ldc.i4.1", Operand::None).unwrap();
        assembler.emit("add", Operand::None).unwrap();
        assembler.emit("stloc.0", Operand::None).unwrap();
        assembler
            .emit("call", Operand::Token(Token::new(0x0A00_0001)))
            .unwrap();
        assembler.branch("br", head).unwrap();
        assembler.mark_label(exit).unwrap();
    }
    assembler.emit("ret", Operand::None).unwrap();
    assembler.finish(&mut UserStringHeapBuilder::new()).unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("il_decode");
    for blocks in [1, 16, 256] {
        let code = synthetic_method(blocks);
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(blocks), &code, |b, code| {
            b.iter(|| black_box(decode_stream(black_box(code), None).unwrap()));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("il_encode");
    for blocks in [1, 16, 256] {
        let instructions = decode_stream(&synthetic_method(blocks), None).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(blocks),
            &instructions,
            |b, instructions| {
                b.iter(|| {
                    let mut strings = UserStringHeapBuilder::new();
                    black_box(encode_instructions(black_box(instructions), &mut strings).unwrap())
                });
            },
        );
    }
    group.finish();
}

fn bench_body(c: &mut Criterion) {
    #[rustfmt::skip]
    let tiny = [0x0A, 0x02, 0x2A];
    let mut fat_body = MethodBody::new(synthetic_method(64));
    fat_body.max_stack = 16;
    let fat = fat_body.to_bytes().unwrap();

    c.bench_function("body_read_tiny", |b| {
        b.iter(|| black_box(MethodBody::read(black_box(&tiny)).unwrap()));
    });
    c.bench_function("body_read_fat", |b| {
        b.iter(|| black_box(MethodBody::read(black_box(&fat)).unwrap()));
    });
    c.bench_function("body_write_fat", |b| {
        b.iter(|| black_box(black_box(&fat_body).to_bytes().unwrap()));
    });
}

criterion_group!(benches, bench_decode, bench_encode, bench_body);
criterion_main!(benches);
