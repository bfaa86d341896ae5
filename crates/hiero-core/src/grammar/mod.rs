//! Synchronous grammar storage.
//!
//! Rules are indexed by source pattern in a trie whose nodes carry rule
//! bins. Each grammar knows which spans it may be applied to: regular
//! grammars up to a span limit, the glue grammar only on spans starting at
//! the sentence beginning.

mod binary;
mod glue;
mod rule;
#[cfg(test)]
mod tests;
mod trie;

pub use binary::{read_records, records_from_text, write_records, MAGIC, VERSION};
pub use glue::glue_grammar;
pub use rule::{
    format_rule, nonterminal_at, Rule, RuleId, RuleRecord, SourceToken, TargetToken, OOV_GRAMMAR,
};
pub use trie::{NodeId, RuleBin, Trie};

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::model::{ModelError, ModelSet};
use crate::settings::Settings;
use crate::symbol::{SymbolError, SymbolId, SymbolTable};

pub const REGULAR_GRAMMAR: u16 = 0;
pub const GLUE_GRAMMAR: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected HGRB)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error("rule count mismatch: header says {expected}, body has {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("scoring rule: {0}")]
    Model(#[from] ModelError),
}

/// Per-grammar loading parameters.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub grammar_id: u16,
    pub owner: String,
    /// `None` restricts the grammar to spans starting at 0.
    pub span_limit: Option<usize>,
    pub max_n_rules: usize,
    pub rule_relative_threshold: f64,
}

impl LoadOptions {
    pub fn regular(settings: &Settings) -> Self {
        Self {
            grammar_id: REGULAR_GRAMMAR,
            owner: settings.grammar.phrase_owner.clone(),
            span_limit: Some(settings.grammar.span_limit),
            max_n_rules: settings.pruning.max_n_rules,
            rule_relative_threshold: settings.pruning.rule_relative_threshold,
        }
    }

    pub fn glue(settings: &Settings) -> Self {
        Self {
            grammar_id: GLUE_GRAMMAR,
            owner: settings.grammar.glue_owner.clone(),
            span_limit: None,
            max_n_rules: settings.pruning.max_n_rules,
            rule_relative_threshold: settings.pruning.rule_relative_threshold,
        }
    }
}

pub struct Grammar {
    id: u16,
    owner: SymbolId,
    span_limit: Option<usize>,
    trie: Trie,
    num_rules: usize,
    num_pruned: usize,
}

impl Grammar {
    pub fn new(id: u16, owner: SymbolId, span_limit: Option<usize>) -> Self {
        Self {
            id,
            owner,
            span_limit,
            trie: Trie::new(),
            num_rules: 0,
            num_pruned: 0,
        }
    }

    /// Build, score and finalize a grammar from parsed records. Rule ids
    /// follow record order.
    pub fn from_records<I>(
        records: I,
        symbols: &SymbolTable,
        models: &ModelSet,
        opts: &LoadOptions,
    ) -> Result<Self, GrammarError>
    where
        I: IntoIterator<Item = RuleRecord>,
    {
        let owner = symbols.intern(&opts.owner);
        let mut grammar = Grammar::new(opts.grammar_id, owner, opts.span_limit);
        for (index, record) in records.into_iter().enumerate() {
            let id = RuleId {
                grammar: opts.grammar_id,
                index: index as u32,
            };
            let mut rule = record.to_rule(symbols, id, owner)?;
            models.score_rule(&mut rule)?;
            grammar.add_rule(rule);
        }
        grammar.finalize(opts.max_n_rules, opts.rule_relative_threshold);
        Ok(grammar)
    }

    /// Load a text grammar (`LHS ||| SOURCE ||| TARGET ||| SCORES`).
    pub fn from_text(
        text: &str,
        symbols: &SymbolTable,
        models: &ModelSet,
        opts: &LoadOptions,
    ) -> Result<Self, GrammarError> {
        Self::from_records(records_from_text(text)?, symbols, models, opts)
    }

    /// Load a grammar file, text or compiled (detected by magic bytes).
    pub fn load_file(
        path: &Path,
        symbols: &SymbolTable,
        models: &ModelSet,
        opts: &LoadOptions,
    ) -> Result<Self, GrammarError> {
        let records = if is_compiled(path)? {
            read_records(path)?
        } else {
            records_from_text(&std::fs::read_to_string(path)?)?
        };
        Self::from_records(records, symbols, models, opts)
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.num_rules += 1;
        self.trie.insert(Arc::new(rule));
    }

    /// Sort every bin and apply the rule-count and threshold limits.
    pub fn finalize(&mut self, max_n_rules: usize, rule_relative_threshold: f64) {
        let mut pruned = 0;
        let mut bins = 0;
        for bin in self.trie.bins_mut() {
            pruned += bin.sort_and_prune(max_n_rules, rule_relative_threshold);
            bins += 1;
        }
        self.num_pruned += pruned;
        self.num_rules -= pruned;
        info!(
            grammar = self.id,
            rules = self.num_rules,
            bins,
            pruned,
            nodes = self.trie.num_nodes(),
            "grammar finalized"
        );
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn owner(&self) -> SymbolId {
        self.owner
    }

    pub fn span_limit(&self) -> Option<usize> {
        self.span_limit
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn num_rules(&self) -> usize {
        self.num_rules
    }

    pub fn num_pruned(&self) -> usize {
        self.num_pruned
    }

    /// Whether this grammar may build items over `[i, j)`.
    pub fn filter_span(&self, i: usize, j: usize) -> bool {
        match self.span_limit {
            Some(limit) => j - i <= limit,
            None => i == 0,
        }
    }

    pub fn rules_for(&self, pattern: &[SymbolId]) -> Option<&RuleBin> {
        self.trie
            .lookup(pattern)
            .and_then(|node| self.trie.rule_bin(node))
    }

    /// Whether a single-word rule covers `word`.
    pub fn has_lexical_rule(&self, word: SymbolId) -> bool {
        self.rules_for(&[word]).is_some_and(|b| b.arity() == 0)
    }

    /// All kept rules, in no particular order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.trie.bins().flat_map(|b| b.rules().iter())
    }
}

/// Check the first bytes of a file for the compiled-grammar magic.
pub fn is_compiled(path: &Path) -> io::Result<bool> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < head.len() {
        match file.read(&mut head[read..])? {
            0 => break,
            n => read += n,
        }
    }
    Ok(read == head.len() && &head == MAGIC)
}
