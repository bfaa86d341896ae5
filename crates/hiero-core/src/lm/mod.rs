//! N-gram language models and LM equivalence states.
//!
//! `LmBackend` is the seam between the decoder and a concrete model: an
//! in-process ARPA table, a remote server, or an interpolation of several.
//! `LmScorer` turns backend queries into incremental per-item costs and the
//! compact boundary states used for hypothesis recombination.

mod arpa;
mod interpolated;
mod remote;
mod state;

pub use arpa::ArpaLm;
pub use interpolated::InterpolatedLm;
pub use remote::{serve, RemoteLm};
pub use state::{LmScorer, LmState, LmTransition};

use std::io;

use crate::symbol::{SymbolError, SymbolId};

#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("remote LM: {0}")]
    Remote(String),

    #[error("LM configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

/// Backend queries. Costs are `-log10` probabilities.
pub trait LmBackend: Send + Sync {
    fn order(&self) -> usize;

    /// Cost of the last word of `ngram` given the preceding words. Only the
    /// last `order()` words are consulted.
    fn ngram_cost(&self, ngram: &[SymbolId]) -> Result<f64, LmError>;

    /// Backoff cost of `context` (0 when it carries no backoff weight).
    fn backoff_cost(&self, _context: &[SymbolId]) -> Result<f64, LmError> {
        Ok(0.0)
    }

    /// Whether the backend guarantees ARPA backoff semantics, which state
    /// minimization relies on.
    fn supports_state_minimization(&self) -> bool {
        false
    }

    /// Length of the shortest suffix of `context` that scores every future
    /// word exactly like the full context.
    fn right_state_len(&self, context: &[SymbolId]) -> usize {
        context.len()
    }

    /// First `i` such that no n-gram extends `words[..=i]` to the left,
    /// and whether the word at `i` still owes backoff weights of its outer
    /// context.
    fn left_boundary(&self, _words: &[SymbolId]) -> Option<(usize, bool)> {
        None
    }

    /// Re-establish external resources (connections). No-op by default.
    fn reload(&self) -> Result<(), LmError> {
        Ok(())
    }
}
