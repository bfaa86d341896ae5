//! Per-sentence decoding and the batch coordinator.

mod batch;
mod segment;

#[cfg(test)]
mod tests;

pub use batch::{decode_corpus, write_nbest, BatchStats};
pub use segment::Segment;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::chart::{CellSummary, Chart, ChartStats, PassThrough};
use crate::grammar::{glue_grammar, Grammar, GrammarError};
use crate::hypergraph::HyperGraph;
use crate::kbest::{Derivation, KBestExtractor, KBestOptions};
use crate::model::{ModelError, ModelSet};
use crate::settings::Settings;
use crate::symbol::{SymbolError, SymbolId, SymbolTable};

/// Failure to decode one sentence. Never fatal for a batch.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty input sentence")]
    EmptyInput,

    #[error("no derivation covers the whole sentence")]
    NoDerivation,

    #[error("decoding cancelled")]
    Cancelled,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

pub struct SentenceResult {
    pub id: u64,
    /// Best first, at most `nbest.top_n`.
    pub derivations: Vec<Derivation>,
    pub hypergraph: HyperGraph,
    pub stats: ChartStats,
    pub cells: Vec<CellSummary>,
}

/// Everything needed to decode sentences, shared read-only across workers.
pub struct Decoder {
    symbols: Arc<SymbolTable>,
    grammars: Vec<Arc<Grammar>>,
    models: Arc<ModelSet>,
    settings: Settings,
    goal: SymbolId,
    pass_through: Option<PassThrough>,
}

impl Decoder {
    /// Pair `grammar` with a glue grammar built from `settings`.
    pub fn new(
        symbols: Arc<SymbolTable>,
        grammar: Grammar,
        models: Arc<ModelSet>,
        settings: &Settings,
    ) -> Result<Self, GrammarError> {
        let glue = glue_grammar(&symbols, &models, settings)?;
        let goal = symbols.intern_nonterminal(&settings.grammar.goal_symbol)?;
        let pass_through = if settings.grammar.pass_through_unknown {
            Some(PassThrough {
                lhs: symbols.intern_nonterminal(&settings.grammar.default_non_terminal)?,
                owner: symbols.intern(&settings.grammar.oov_owner),
            })
        } else {
            None
        };
        Ok(Self {
            symbols,
            grammars: vec![Arc::new(grammar), Arc::new(glue)],
            models,
            settings: settings.clone(),
            goal,
            pass_through,
        })
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn grammars(&self) -> &[Arc<Grammar>] {
        &self.grammars
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn kbest_options(&self) -> KBestOptions {
        KBestOptions::from_settings(&self.settings.nbest)
    }

    pub fn decode(&self, segment: &Segment) -> Result<SentenceResult, DecodeError> {
        self.decode_with_cancel(segment, None)
    }

    /// Decode one segment, keeping up to `nbest.top_n` derivations.
    pub fn decode_with_cancel(
        &self,
        segment: &Segment,
        cancel: Option<&AtomicBool>,
    ) -> Result<SentenceResult, DecodeError> {
        self.decode_with_options(segment, cancel, self.kbest_options(), self.settings.nbest.top_n)
    }

    pub fn decode_with_options(
        &self,
        segment: &Segment,
        cancel: Option<&AtomicBool>,
        options: KBestOptions,
        top_n: usize,
    ) -> Result<SentenceResult, DecodeError> {
        let _span = debug_span!("decode", id = segment.id, words = segment.words.len()).entered();
        let sentence = self.symbols.intern_all(segment.words.iter().map(String::as_str));
        let chart = Chart::new(
            &sentence,
            &self.grammars,
            &self.models,
            &self.settings.pruning,
            self.goal,
            self.pass_through,
        );
        let out = chart.expand(cancel)?;
        let derivations = KBestExtractor::new(&out.hypergraph, &self.symbols, &self.models, options)
            .take(top_n)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            derivations = derivations.len(),
            best = derivations.first().map(|d| d.cost),
            "sentence decoded"
        );
        Ok(SentenceResult {
            id: segment.id,
            derivations,
            hypergraph: out.hypergraph,
            stats: out.stats,
            cells: out.cells,
        })
    }
}
