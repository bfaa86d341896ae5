use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hiero_core::decoder::{Decoder, Segment};
use hiero_core::grammar::{Grammar, LoadOptions};
use hiero_core::lm::{ArpaLm, LmBackend};
use hiero_core::model::ModelSet;
use hiero_core::settings::{default_toml, parse_settings_toml};
use hiero_core::symbol::SymbolTable;

const GRAMMAR: &str = "\
[X] ||| le ||| the ||| 0.2
[X] ||| chat ||| cat ||| 0.3
[X] ||| chat ||| chat ||| 1.5
[X] ||| noir ||| black ||| 0.4
[X] ||| le chat ||| the cat ||| 0.3
[X] ||| [X,1] noir ||| black [X,1] ||| 0.6
[X] ||| le [X,1] noir ||| the black [X,1] ||| 0.5
[X] ||| dort ||| sleeps ||| 0.2
[X] ||| dort ||| is sleeping ||| 0.9
[X] ||| [X,1] dort ||| [X,1] sleeps ||| 0.4
[X] ||| sur ||| on ||| 0.3
[X] ||| le tapis ||| the mat ||| 0.3
[X] ||| tapis ||| carpet ||| 0.5
[X] ||| [X,1] sur [X,2] ||| [X,1] on [X,2] ||| 0.4
";

const ARPA: &str = "\\data\\
ngram 1=11
ngram 2=6

\\1-grams:
-1.0 </s>
-99 <s> -0.3
-1.1 the -0.4
-1.6 cat -0.3
-1.9 black -0.2
-1.7 sleeps -0.1
-1.3 on -0.2
-1.8 mat
-2.2 carpet
-1.9 is -0.1
-2.1 sleeping

\\2-grams:
-0.4 <s> the
-0.8 the cat
-0.9 the black
-0.6 black cat
-0.7 cat sleeps
-0.5 on the
\\end\\
";

fn bench_decoder() -> Decoder {
    let settings = parse_settings_toml(default_toml()).unwrap();
    let symbols = Arc::new(SymbolTable::new());
    let lm: Arc<dyn LmBackend> =
        Arc::new(ArpaLm::from_text(ARPA, &symbols, settings.lm.ceiling_cost).unwrap());
    let models =
        Arc::new(ModelSet::from_specs(&settings.models, &symbols, Some(lm), &settings.lm).unwrap());
    let grammar =
        Grammar::from_text(GRAMMAR, &symbols, &models, &LoadOptions::regular(&settings)).unwrap();
    Decoder::new(symbols, grammar, models, &settings).unwrap()
}

static INPUTS: &[(&str, &str)] = &[
    ("short", "le chat dort"),
    ("medium", "le chat noir dort sur le tapis"),
    ("long", "le chat noir dort sur le tapis le chat dort sur le tapis noir"),
];

fn bench_decode(c: &mut Criterion) {
    let decoder = bench_decoder();
    let mut group = c.benchmark_group("decode/sentence");
    for &(label, line) in INPUTS {
        let segment = Segment::parse(line, 0);
        group.bench_with_input(
            BenchmarkId::new(label, segment.words.len()),
            &segment,
            |b, segment| {
                b.iter(|| decoder.decode(segment).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
