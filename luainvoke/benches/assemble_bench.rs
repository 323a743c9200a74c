use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use luainvoke::assemble::{assemble, ScriptContext};
use luainvoke::embedded::EmbeddedRealm;
use luainvoke::{Capture, MemoryRealm, ScriptInvoker};

fn make_lib(lines: usize) -> String {
    let chunk = "local function helper(x) return x * 2 end\n";
    chunk.repeat(lines)
}

fn make_realm(libs: usize, lines: usize) -> (MemoryRealm, Vec<String>) {
    let mut realm = MemoryRealm::new("bench");
    let names: Vec<String> = (0..libs).map(|i| format!("lib{i}.lua")).collect();
    let body = make_lib(lines);
    for name in &names {
        realm.insert(name, body.as_bytes());
    }
    (realm, names)
}

fn bench_assemble(c: &mut Criterion) {
    let (small, small_names) = make_realm(2, 10); // ~1k
    let (large, large_names) = make_realm(20, 500); // ~440k
    let main = "return helper(21)\n";

    let mut g = c.benchmark_group("assemble");

    g.bench_function("two_small_libs", |b| {
        let ctx = ScriptContext::new(Some(&small), &EmbeddedRealm);
        b.iter(|| assemble(black_box(&ctx), black_box(&small_names), &mut Cursor::new(main)))
    });
    g.bench_function("twenty_large_libs", |b| {
        let ctx = ScriptContext::new(Some(&large), &EmbeddedRealm);
        b.iter(|| assemble(black_box(&ctx), black_box(&large_names), &mut Cursor::new(main)))
    });
    g.bench_function("bundled_libs", |b| {
        let ctx = ScriptContext::new(None, &EmbeddedRealm);
        let names = vec!["fmt.lua".to_owned(), "stringx.lua".to_owned()];
        b.iter(|| assemble(black_box(&ctx), black_box(&names), &mut Cursor::new(main)))
    });

    g.finish();
}

fn bench_invoke(c: &mut Criterion) {
    let mut g = c.benchmark_group("invoke");

    // Full lifecycle: internal handle creation, configuration, teardown.
    g.bench_function("return_constant", |b| {
        b.iter(|| {
            let mut inv = ScriptInvoker::from_source("return 1");
            inv.set_input(Cursor::new(Vec::new()));
            inv.invoke_with(Capture::new(), Capture::new())
        })
    });

    g.finish();
}

criterion_group!(benches, bench_assemble, bench_invoke);
criterion_main!(benches);
