use std::process;

use hiero_core::decoder::Segment;
use hiero_core::explain::{explain, format_text};

use super::setup::{build_decoder, load_settings, ModelArgs};

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

pub fn explain_cmd(args: &ModelArgs, sentence: &str, n: usize, json: bool) {
    let settings = load_settings(args.config.as_deref());
    let decoder = build_decoder(args, &settings);
    let segment = Segment::parse(sentence, 0);
    let result = die!(explain(&decoder, &segment, n), "Error: {}");
    if json {
        println!(
            "{}",
            die!(serde_json::to_string_pretty(&result), "Error serializing: {}")
        );
    } else {
        print!("{}", format_text(&result));
    }
}
