use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process;

use hiero_core::grammar::{
    format_rule, is_compiled, read_records, records_from_text, write_records, RuleId, RuleRecord,
};
use hiero_core::symbol::SymbolTable;

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

fn load_records(file: &str) -> (Vec<RuleRecord>, bool) {
    let path = Path::new(file);
    let compiled = die!(is_compiled(path), "Error reading {file}: {}");
    let records = if compiled {
        die!(read_records(path), "Error reading compiled grammar: {}")
    } else {
        let text = die!(fs::read_to_string(path), "Error reading {file}: {}");
        die!(records_from_text(&text), "Error parsing {file}: {}")
    };
    (records, compiled)
}

pub fn compile(input_file: &str, output_file: &str) {
    let text = die!(fs::read_to_string(input_file), "Error reading {input_file}: {}");
    let records = die!(records_from_text(&text), "Error parsing {input_file}: {}");
    eprintln!("Parsed {} rules", records.len());
    die!(
        write_records(Path::new(output_file), &records),
        "Error writing grammar: {}"
    );
    let size = fs::metadata(output_file).map(|m| m.len()).unwrap_or(0);
    eprintln!("Wrote {output_file} ({size} bytes)");
}

pub fn info(file: &str) {
    let (records, compiled) = load_records(file);

    let mut by_arity: BTreeMap<usize, usize> = BTreeMap::new();
    let mut by_lhs: BTreeMap<&str, usize> = BTreeMap::new();
    let mut max_features = 0;
    for r in &records {
        *by_arity.entry(r.arity()).or_default() += 1;
        *by_lhs.entry(r.lhs.as_str()).or_default() += 1;
        max_features = max_features.max(r.features.len());
    }

    println!("Format: {}", if compiled { "compiled" } else { "text" });
    println!("Rules: {}", records.len());
    println!("Score columns: {max_features}");
    println!("By arity:");
    for (arity, count) in &by_arity {
        println!("  {arity}: {count}");
    }
    println!("By left-hand side:");
    for (lhs, count) in &by_lhs {
        println!("  [{lhs}]: {count}");
    }
}

/// Print a grammar, text or compiled, in text form.
pub fn dump(file: &str) {
    let (records, _) = load_records(file);
    let symbols = SymbolTable::new();
    let owner = symbols.intern("pt");
    for (index, record) in records.iter().enumerate() {
        let id = RuleId {
            grammar: 0,
            index: index as u32,
        };
        let rule = die!(record.to_rule(&symbols, id, owner), "Error in rule {index}: {}");
        println!("{}", die!(format_rule(&rule, &symbols), "Error formatting rule: {}"));
    }
}
