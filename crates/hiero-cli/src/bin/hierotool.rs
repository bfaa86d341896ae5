use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hiero_cli::commands::decode_ops::{self, DecodeOptions};
use hiero_cli::commands::setup::ModelArgs;
use hiero_cli::commands::{explain_ops, lm_ops};
use hiero_cli::trace_init;

#[derive(Parser)]
#[command(name = "hierotool", about = "Hierarchical phrase-based decoder")]
struct Cli {
    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Write a JSON span trace to this directory (requires --features trace)
    #[arg(long, global = true)]
    trace_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate sentences, one per line, into n-best lists
    Decode {
        #[command(flatten)]
        models: ModelArgs,
        /// Input file (default: stdin)
        #[arg(long)]
        input: Option<String>,
        /// N-best output file (default: stdout)
        #[arg(long)]
        output: Option<String>,
        /// Decoder threads (overrides parallel.num_threads)
        #[arg(long)]
        threads: Option<usize>,
        /// Derivations per sentence (overrides nbest.top_n)
        #[arg(short, long)]
        top_n: Option<usize>,
        /// Save every sentence's hypergraph under this directory
        #[arg(long)]
        disk_hg: Option<String>,
    },
    /// Show chart statistics and scored derivations for one sentence
    Explain {
        #[command(flatten)]
        models: ModelArgs,
        /// Source sentence
        sentence: String,
        /// Number of derivations
        #[arg(short, long, default_value = "5")]
        n: usize,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print n-best lists from saved hypergraphs
    DumpHg {
        /// Directory holding hypergraphs.items and hypergraphs.rules
        dir: String,
        /// Derivations per sentence
        #[arg(short, long, default_value = "1")]
        n: usize,
    },
    /// Serve an ARPA language model over TCP
    ServeLm {
        /// ARPA file
        lm: String,
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:9090")]
        addr: String,
        /// Settings file (for lm.ceiling_cost)
        #[arg(long)]
        config: Option<String>,
    },
    /// Score sentences with an ARPA language model
    LmScore {
        /// ARPA file
        lm: String,
        /// Sentences to score
        sentences: Vec<String>,
        /// Settings file (for lm.ceiling_cost)
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    match &cli.trace_dir {
        Some(dir) => trace_init::init_tracing(dir),
        None => trace_init::init_stderr(cli.verbose),
    }

    match cli.command {
        Command::Decode {
            models,
            input,
            output,
            threads,
            top_n,
            disk_hg,
        } => {
            let opts = DecodeOptions {
                input,
                output,
                threads,
                top_n,
                disk_hg,
            };
            decode_ops::decode(&models, &opts);
        }
        Command::Explain {
            models,
            sentence,
            n,
            json,
        } => explain_ops::explain_cmd(&models, &sentence, n, json),
        Command::DumpHg { dir, n } => decode_ops::dump_hypergraphs(&dir, n),
        Command::ServeLm { lm, addr, config } => lm_ops::serve_lm(&lm, &addr, config.as_deref()),
        Command::LmScore {
            lm,
            sentences,
            config,
        } => lm_ops::score(&lm, &sentences, config.as_deref()),
    }
}
