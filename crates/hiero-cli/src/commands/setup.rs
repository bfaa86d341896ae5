//! Loading shared by the commands that decode: settings, language
//! models, grammar and the decoder itself.

use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use hiero_core::decoder::Decoder;
use hiero_core::grammar::{Grammar, LoadOptions};
use hiero_core::lm::{ArpaLm, InterpolatedLm, LmBackend, RemoteLm};
use hiero_core::model::ModelSet;
use hiero_core::settings::{init_custom, settings, Settings};
use hiero_core::symbol::SymbolTable;

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Settings file (default: built-in settings)
    #[arg(long)]
    pub config: Option<String>,
    /// Grammar file, text or compiled
    #[arg(long)]
    pub grammar: String,
    /// ARPA language model file (repeat to interpolate)
    #[arg(long)]
    pub lm: Vec<String>,
    /// Remote language model server, host:port (repeat to interpolate)
    #[arg(long)]
    pub lm_server: Vec<String>,
    /// Interpolation weight per LM, files first, then servers
    #[arg(long)]
    pub lm_weight: Vec<f64>,
}

/// Install `config` as the process-wide settings (built-in defaults when
/// absent) and return a copy.
pub fn load_settings(config: Option<&str>) -> Settings {
    if let Some(file) = config {
        let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
        die!(init_custom(content), "Error in {file}: {}");
    }
    settings().clone()
}

/// Open every configured LM. Several backends are interpolated with the
/// given weights, or uniformly when none are given.
pub fn load_lm(
    args: &ModelArgs,
    symbols: &Arc<SymbolTable>,
    settings: &Settings,
) -> Option<Arc<dyn LmBackend>> {
    let mut backends: Vec<Arc<dyn LmBackend>> = Vec::new();
    for file in &args.lm {
        let lm = die!(
            ArpaLm::open(Path::new(file), symbols, settings.lm.ceiling_cost),
            "Error loading LM {file}: {}"
        );
        info!(file = %file, order = lm.order(), ngrams = lm.num_ngrams(), "loaded ARPA model");
        backends.push(Arc::new(lm));
    }
    for addr in &args.lm_server {
        let lm = die!(RemoteLm::connect(addr, Arc::clone(symbols)), "Error: {}");
        backends.push(Arc::new(lm));
    }

    match backends.len() {
        0 => None,
        1 => backends.pop(),
        n => {
            let weights = if args.lm_weight.is_empty() {
                vec![1.0 / n as f64; n]
            } else if args.lm_weight.len() == n {
                args.lm_weight.clone()
            } else {
                eprintln!(
                    "Error: {} LM weights given for {n} language models",
                    args.lm_weight.len()
                );
                process::exit(1);
            };
            let lm = die!(
                InterpolatedLm::new(backends.into_iter().zip(weights).collect()),
                "Error: {}"
            );
            Some(Arc::new(lm))
        }
    }
}

/// Build the models, load the grammar and assemble a decoder.
pub fn build_decoder(args: &ModelArgs, settings: &Settings) -> Decoder {
    let symbols = Arc::new(SymbolTable::new());
    let lm = load_lm(args, &symbols, settings);
    let models = Arc::new(die!(
        ModelSet::from_specs(&settings.models, &symbols, lm, &settings.lm),
        "Error building models: {}"
    ));

    let path = Path::new(&args.grammar);
    let grammar = die!(
        Grammar::load_file(path, &symbols, &models, &LoadOptions::regular(settings)),
        "Error loading grammar {}: {}",
        args.grammar
    );
    info!(
        file = %args.grammar,
        rules = grammar.num_rules(),
        pruned = grammar.num_pruned(),
        "loaded grammar"
    );
    die!(
        Decoder::new(symbols, grammar, models, settings),
        "Error building decoder: {}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(grammar: &str, lm: &str) -> ModelArgs {
        ModelArgs {
            config: None,
            grammar: grammar.to_string(),
            lm: vec![lm.to_string()],
            lm_server: Vec::new(),
            lm_weight: Vec::new(),
        }
    }

    #[test]
    fn test_build_decoder_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let grammar = dir.path().join("grammar.txt");
        let lm = dir.path().join("lm.arpa");
        fs::write(&grammar, "[X] ||| a b ||| X Y ||| 1.0\n").unwrap();
        fs::write(
            &lm,
            "\\data\\\nngram 1=4\n\n\\1-grams:\n-99 <s>\n-0.5 </s>\n-0.5 X\n-0.5 Y\n\\end\\\n",
        )
        .unwrap();

        let settings = load_settings(None);
        let decoder = build_decoder(
            &args(grammar.to_str().unwrap(), lm.to_str().unwrap()),
            &settings,
        );
        let result = decoder
            .decode(&hiero_core::decoder::Segment::parse("a b", 0))
            .unwrap();
        assert_eq!(result.derivations[0].hyp, "X Y");
    }

    #[test]
    fn test_two_lms_are_interpolated() {
        let dir = tempfile::tempdir().unwrap();
        let lm = dir.path().join("lm.arpa");
        fs::write(&lm, "\\data\\\nngram 1=2\n\n\\1-grams:\n-1 <s>\n-1 </s>\n\\end\\\n").unwrap();
        let lm = lm.to_str().unwrap().to_string();

        let mut a = args("unused", &lm);
        a.lm.push(lm.clone());
        let symbols = Arc::new(SymbolTable::new());
        let backend = load_lm(&a, &symbols, &load_settings(None)).unwrap();
        assert_eq!(backend.order(), 1);
        let cost = backend.ngram_cost(&[symbols.eos()]).unwrap();
        assert!((cost - 1.0).abs() < 1e-6);
    }
}
