use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use keygrep_rs::{compile, CompileOptions, Hit, Pattern, Vm};

const BUF_LEN: usize = 4 * 1024 * 1024; // 4 MiB

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn fill_ascii(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let v = (self.next_u64() & 0xff) as u8;
            *b = b'a' + (v % 26);
        }
    }
}

fn ascii_patterns(exprs: &[&str]) -> Vec<Pattern> {
    exprs
        .iter()
        .enumerate()
        .map(|(i, e)| Pattern {
            expr: e.to_string(),
            fixed_string: false,
            case_insensitive: false,
            index: i as u32,
            encoding: "ASCII".to_string(),
        })
        .collect()
}

fn bench_scan(c: &mut Criterion) {
    let mut rng = XorShift64::new(0x9e37_79b9_7f4a_7c15);
    let mut buf = vec![0u8; BUF_LEN];
    rng.fill_ascii(&mut buf);
    // Plant a few occurrences so the match path is exercised too.
    for at in (0..BUF_LEN - 8).step_by(BUF_LEN / 16) {
        buf[at..at + 6].copy_from_slice(b"needle");
    }

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(BUF_LEN as u64));

    let sets: &[(&str, &[&str])] = &[
        ("one_literal", &["needle"]),
        ("keywords", &["needle", "haystack", "quux", "grep"]),
        ("regex", &["ne+dle", "ha[xy]stack", "q.ux"]),
    ];
    for (name, exprs) in sets {
        let compiled = compile(&ascii_patterns(exprs), CompileOptions::default()).unwrap();
        group.bench_function(*name, |b| {
            let mut vm = Vm::new(compiled.program.clone());
            b.iter(|| {
                let mut hits = 0u64;
                let mut sink = |_: &Hit| hits += 1;
                vm.search(black_box(&buf), 0, &mut sink);
                vm.close_out(buf.len() as u64, &mut sink);
                black_box(hits)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
