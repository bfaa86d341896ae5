use std::fs;
use std::process;

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

pub fn settings_export() {
    print!("{}", hiero_core::settings::default_toml());
}

pub fn settings_validate(file: &str) {
    let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
    let s = die!(
        hiero_core::settings::parse_settings_toml(&content),
        "Error: {}"
    );
    println!(
        "OK: lm order={}, {} models, span_limit={}, max_n_items={}, top_n={}, threads={}",
        s.lm.order,
        s.models.len(),
        s.grammar.span_limit,
        s.pruning.max_n_items,
        s.nbest.top_n,
        s.parallel.num_threads,
    );
}
