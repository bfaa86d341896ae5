use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use hiero_core::decoder::{decode_corpus, write_nbest, Segment};
use hiero_core::disk_hg::{DiskHyperGraphReader, DiskHyperGraphWriter};
use hiero_core::kbest::{format_nbest_line, KBestExtractor, KBestOptions};
use hiero_core::model::ModelSet;
use hiero_core::symbol::SymbolTable;

use super::setup::{build_decoder, load_settings, ModelArgs};

macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            process::exit(1);
        })
    };
}

pub struct DecodeOptions {
    pub input: Option<String>,
    pub output: Option<String>,
    pub threads: Option<usize>,
    pub top_n: Option<usize>,
    /// Directory for `hypergraphs.items` and `hypergraphs.rules`.
    pub disk_hg: Option<String>,
}

/// Read segments from a file, or stdin when `input` is `None` or `-`.
/// Blank lines are kept so ids stay aligned with line numbers.
pub fn read_segments(input: Option<&str>) -> io::Result<Vec<Segment>> {
    let reader: Box<dyn BufRead> = match input {
        None | Some("-") => Box::new(io::stdin().lock()),
        Some(path) => Box::new(io::BufReader::new(File::open(path)?)),
    };
    let mut segments = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        segments.push(Segment::parse(&line?, idx as u64));
    }
    Ok(segments)
}

fn open_output(output: Option<&str>) -> io::Result<Box<dyn Write>> {
    Ok(match output {
        None | Some("-") => Box::new(io::stdout().lock()),
        Some(path) => Box::new(File::create(path)?),
    })
}

pub fn decode(args: &ModelArgs, opts: &DecodeOptions) {
    let mut settings = load_settings(args.config.as_deref());
    if let Some(threads) = opts.threads {
        settings.parallel.num_threads = threads;
    }
    if let Some(top_n) = opts.top_n {
        settings.nbest.top_n = top_n;
    }
    let hg_dir = match (&opts.disk_hg, settings.parallel.save_disk_hg) {
        (Some(dir), _) => Some(PathBuf::from(dir)),
        (None, true) => Some(PathBuf::from(".")),
        (None, false) => None,
    };

    let decoder = build_decoder(args, &settings);
    let segments = die!(read_segments(opts.input.as_deref()), "Error reading input: {}");
    let mut out = BufWriter::new(die!(
        open_output(opts.output.as_deref()),
        "Error opening output: {}"
    ));

    let mut disk = hg_dir.as_deref().map(|dir| {
        die!(fs::create_dir_all(dir), "Error creating {}: {}", dir.display());
        die!(
            DiskHyperGraphWriter::create(&dir.join("hypergraphs.items"), Arc::clone(decoder.symbols())),
            "Error creating hypergraph file: {}"
        )
    });

    let options = decoder.kbest_options();
    let started = Instant::now();
    let stats = die!(
        decode_corpus(
            &decoder,
            &segments,
            settings.parallel.num_threads,
            |_, segment, result| {
                match result {
                    Ok(r) => {
                        if let Some(w) = disk.as_mut() {
                            w.append(segment.id, &r.hypergraph).map_err(io::Error::other)?;
                        }
                        write_nbest(&mut out, segment.id, &r.derivations, &options)
                    }
                    Err(_) => write_nbest(&mut out, segment.id, &[], &options),
                }
            },
        ),
        "Error writing output: {}"
    );
    die!(out.flush(), "Error writing output: {}");

    if let (Some(w), Some(dir)) = (disk, hg_dir.as_deref()) {
        let n = die!(
            w.finish(&dir.join("hypergraphs.rules")),
            "Error writing hypergraph rules: {}"
        );
        info!(sentences = n, dir = %dir.display(), "saved hypergraphs");
    }

    let elapsed = started.elapsed();
    info!(
        decoded = stats.decoded,
        failed = stats.failed,
        threads = settings.parallel.num_threads,
        elapsed_ms = elapsed.as_millis() as u64,
        "decoding finished"
    );
    eprintln!(
        "Decoded {} sentences ({} failed) in {:.2}s",
        stats.decoded,
        stats.failed,
        elapsed.as_secs_f64()
    );
}

/// Print the n-best lists of a disk hypergraph file pair.
pub fn dump_hypergraphs(dir: &str, n: usize) {
    let dir = Path::new(dir);
    let symbols = Arc::new(SymbolTable::new());
    let reader = die!(
        DiskHyperGraphReader::open(
            &dir.join("hypergraphs.items"),
            &dir.join("hypergraphs.rules"),
            Arc::clone(&symbols),
        ),
        "Error opening hypergraphs: {}"
    );
    let models = ModelSet::new();
    let options = KBestOptions {
        unique: false,
        tree: false,
        features: false,
        combined_cost: true,
    };
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for entry in reader {
        let (sent_id, hg) = die!(entry, "Error reading hypergraph: {}");
        for d in KBestExtractor::new(&hg, &symbols, &models, options).take(n) {
            let d = die!(d, "Error extracting derivation: {}");
            die!(
                writeln!(out, "{}", format_nbest_line(sent_id, &d, &options)),
                "Error writing output: {}"
            );
        }
    }
    die!(out.flush(), "Error writing output: {}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_segments_keeps_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        fs::write(&path, "a b\n\n<seg id=\"7\"> c </seg>\n").unwrap();

        let segments = read_segments(path.to_str()).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].id, 0);
        assert_eq!(segments[0].words, vec!["a", "b"]);
        assert!(segments[1].words.is_empty());
        assert_eq!(segments[2].id, 7);
        assert_eq!(segments[2].words, vec!["c"]);
    }
}
