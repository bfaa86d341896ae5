use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use crate::kbest::{format_nbest_line, Derivation, KBestOptions};

use super::{DecodeError, Decoder, Segment, SentenceResult};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchStats {
    pub decoded: usize,
    pub failed: usize,
}

impl BatchStats {
    fn record(&mut self, segment: &Segment, result: &Result<SentenceResult, DecodeError>) {
        match result {
            Ok(_) => self.decoded += 1,
            Err(e) => {
                self.failed += 1;
                warn!(id = segment.id, error = %e, "sentence failed");
            }
        }
    }
}

/// Decode `segments` on up to `threads` workers, each taking a contiguous
/// range. `sink` sees every result exactly once, in input order, with the
/// segment's index. A sink error stops the workers and is returned.
pub fn decode_corpus<F>(
    decoder: &Decoder,
    segments: &[Segment],
    threads: usize,
    mut sink: F,
) -> io::Result<BatchStats>
where
    F: FnMut(usize, &Segment, Result<SentenceResult, DecodeError>) -> io::Result<()>,
{
    // New words get their ids here, in input order, before any worker runs.
    for segment in segments {
        decoder
            .symbols()
            .intern_all(segment.words.iter().map(String::as_str));
    }

    let mut stats = BatchStats::default();
    let threads = threads.clamp(1, segments.len().max(1));
    if threads == 1 {
        for (index, segment) in segments.iter().enumerate() {
            let result = decoder.decode(segment);
            stats.record(segment, &result);
            sink(index, segment, result)?;
        }
        info!(decoded = stats.decoded, failed = stats.failed, "batch finished");
        return Ok(stats);
    }

    let chunk = segments.len().div_ceil(threads);
    let cancel = AtomicBool::new(false);
    let outcome = thread::scope(|scope| -> io::Result<()> {
        let (tx, rx) = mpsc::channel();
        for (k, range) in segments.chunks(chunk).enumerate() {
            let tx = tx.clone();
            let cancel = &cancel;
            let base = k * chunk;
            let spawned = thread::Builder::new()
                .name(format!("hiero-decoder-{k}"))
                .spawn_scoped(scope, move || {
                    for (offset, segment) in range.iter().enumerate() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = decoder.decode_with_cancel(segment, Some(cancel));
                        if tx.send((base + offset, result)).is_err() {
                            break;
                        }
                    }
                });
            if let Err(e) = spawned {
                cancel.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }
        drop(tx);

        // Results arrive in completion order; release them in input order.
        let mut reorder = BTreeMap::new();
        let mut next = 0;
        for (index, result) in rx {
            reorder.insert(index, result);
            while let Some(result) = reorder.remove(&next) {
                let segment = &segments[next];
                stats.record(segment, &result);
                if let Err(e) = sink(next, segment, result) {
                    cancel.store(true, Ordering::Relaxed);
                    return Err(e);
                }
                next += 1;
            }
        }
        Ok(())
    });
    outcome?;
    info!(
        decoded = stats.decoded,
        failed = stats.failed,
        threads,
        "batch finished"
    );
    Ok(stats)
}

/// Write one n-best line per derivation. A sentence without derivations
/// gets a single line with an empty hypothesis.
pub fn write_nbest<W: Write>(
    out: &mut W,
    sent_id: u64,
    derivations: &[Derivation],
    options: &KBestOptions,
) -> io::Result<()> {
    if derivations.is_empty() {
        let empty = Derivation {
            words: Vec::new(),
            hyp: String::new(),
            cost: 0.0,
            tree: None,
            model_costs: None,
        };
        let options = KBestOptions {
            tree: false,
            ..*options
        };
        return writeln!(out, "{}", format_nbest_line(sent_id, &empty, &options));
    }
    for d in derivations {
        writeln!(out, "{}", format_nbest_line(sent_id, d, options))?;
    }
    Ok(())
}
