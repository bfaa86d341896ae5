//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::decoder::Decoder;
use crate::grammar::{Grammar, LoadOptions};
use crate::lm::{ArpaLm, LmBackend};
use crate::model::ModelSet;
use crate::settings::{default_toml, parse_settings_toml, Settings};
use crate::symbol::SymbolTable;

/// Small trigram model over `a b c d`.
pub const TEST_ARPA: &str = "\\data\\
ngram 1=6
ngram 2=7
ngram 3=3

\\1-grams:
-0.6 </s>
-99 <s> -0.3
-0.5 a -0.2
-0.7 b -0.4
-0.9 c -0.1
-1.2 d

\\2-grams:
-0.2 <s> a -0.15
-0.4 a b -0.25
-0.3 b c
-0.5 b a -0.05
-0.6 c </s>
-0.35 a a
-0.45 c a -0.3

\\3-grams:
-0.1 <s> a b
-0.2 a b c
-0.15 c a b
\\end\\
";

pub fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// ARPA text of a unigram model with the given log10 probabilities.
pub fn unigram_arpa(entries: &[(&str, f64)]) -> String {
    let mut text = format!("\\data\\\nngram 1={}\n\n\\1-grams:\n", entries.len());
    for (word, logp) in entries {
        text.push_str(&format!("{logp} {word}\n"));
    }
    text.push_str("\\end\\\n");
    text
}

/// Built-in defaults, independent of the process-wide settings.
pub fn test_settings() -> Settings {
    parse_settings_toml(default_toml()).unwrap()
}

pub fn test_decoder(grammar: &str, arpa: &str, settings: &Settings) -> Decoder {
    let symbols = Arc::new(SymbolTable::new());
    let lm: Arc<dyn LmBackend> =
        Arc::new(ArpaLm::from_text(arpa, &symbols, settings.lm.ceiling_cost).unwrap());
    let models = Arc::new(
        ModelSet::from_specs(&settings.models, &symbols, Some(lm), &settings.lm).unwrap(),
    );
    let grammar =
        Grammar::from_text(grammar, &symbols, &models, &LoadOptions::regular(settings)).unwrap();
    Decoder::new(symbols, grammar, models, settings).unwrap()
}

/// The one-rule grammar and unigram model whose best output for `a b` is
/// `X Y`.
pub fn xy_decoder(settings: &Settings) -> Decoder {
    let arpa = unigram_arpa(&[
        ("<s>", -99.0),
        ("</s>", -0.5),
        ("X", -0.5),
        ("Y", -0.5),
    ]);
    test_decoder("[X] ||| a b ||| X Y ||| 1.0\n", &arpa, settings)
}
