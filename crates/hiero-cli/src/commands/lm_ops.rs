use std::net::TcpListener;
use std::path::Path;
use std::process;
use std::sync::Arc;

use hiero_core::lm::{serve, ArpaLm, LmBackend, LmScorer};
use hiero_core::symbol::SymbolTable;

use super::setup::load_settings;

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

fn open_arpa(file: &str, config: Option<&str>, symbols: &SymbolTable) -> ArpaLm {
    let settings = load_settings(config);
    die!(
        ArpaLm::open(Path::new(file), symbols, settings.lm.ceiling_cost),
        "Error loading LM {file}: {}"
    )
}

/// Serve an ARPA model over TCP until the process is killed.
pub fn serve_lm(file: &str, addr: &str, config: Option<&str>) {
    let symbols = Arc::new(SymbolTable::new());
    let lm: Arc<dyn LmBackend> = Arc::new(open_arpa(file, config, &symbols));
    let listener = die!(TcpListener::bind(addr), "Error binding {addr}: {}");
    eprintln!("Serving {file} (order {}) on {addr}", lm.order());
    die!(serve(listener, lm, symbols), "Error: {}");
}

/// Print the `<s> ... </s>` cost of each sentence.
pub fn score(file: &str, sentences: &[String], config: Option<&str>) {
    let symbols = SymbolTable::new();
    let lm: Arc<dyn LmBackend> = Arc::new(open_arpa(file, config, &symbols));
    let scorer = LmScorer::new(lm, symbols.bos(), symbols.eos(), false, false);
    for sentence in sentences {
        let words = symbols.intern_all(sentence.split_whitespace());
        let cost = die!(scorer.sentence_cost(&words), "Error scoring: {}");
        println!("{cost:.4}\t{sentence}");
    }
}
