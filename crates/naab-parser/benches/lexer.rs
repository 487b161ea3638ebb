//! Lexer throughput benchmark.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use naab_parser::Lexer;

fn bench_lexer(c: &mut Criterion) {
    let source = r#"
function fib(n) {
    if n < 2 { return n }
    return fib(n - 1) + fib(n - 2)
}

let xs = [1, 2, 3, 4, 5]
for x in xs {
    print(fib(x))
}

let y = <<js [xs] return xs.length >>
"#
    .repeat(100);

    c.bench_function("lex_program", |b| {
        b.iter(|| {
            let tokens = Lexer::new(black_box(&source)).tokenize().unwrap();
            black_box(tokens.len())
        })
    });
}

criterion_group!(benches, bench_lexer);
criterion_main!(benches);
