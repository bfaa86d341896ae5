use std::sync::Arc;

use tracing::info;

use crate::symbol::SymbolId;

use super::{LmBackend, LmError};

/// Boundary words of an item that an n-gram model still needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LmState {
    /// The whole yield; it is shorter than the model context, so none of it
    /// has been scored yet.
    Open(Box<[SymbolId]>),
    /// `left` words are unscored because their context lies outside the
    /// item. `backoff` marks that the first word after `left` was scored
    /// without the backoff weights of that outside context. `right` is the
    /// context future words will see.
    Closed {
        left: Box<[SymbolId]>,
        backoff: bool,
        right: Box<[SymbolId]>,
    },
}

impl LmState {
    /// Words whose cost depends on what precedes the item.
    pub fn left_words(&self) -> &[SymbolId] {
        match self {
            LmState::Open(words) => words,
            LmState::Closed { left, .. } => left,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmTransition {
    pub cost: f64,
    pub state: LmState,
    /// Context-free estimate for the unscored left words. Pruning only.
    pub bonus: f64,
}

/// Left-to-right scan over a rule target with antecedent states spliced in.
struct Walk<'a> {
    lm: &'a dyn LmBackend,
    max_context: usize,
    pending: Vec<SymbolId>,
    closed: bool,
    backoff: bool,
    context: Vec<SymbolId>,
    cost: f64,
}

impl<'a> Walk<'a> {
    fn new(lm: &'a dyn LmBackend) -> Self {
        Self {
            lm,
            max_context: lm.order().saturating_sub(1),
            pending: Vec::new(),
            closed: false,
            backoff: false,
            context: Vec::new(),
            cost: 0.0,
        }
    }

    fn push_word(&mut self, word: SymbolId) -> Result<(), LmError> {
        if !self.closed && self.pending.len() < self.max_context {
            self.pending.push(word);
        } else {
            self.closed = true;
            let mut ngram = self.context.clone();
            ngram.push(word);
            self.cost += self.lm.ngram_cost(&ngram)?;
        }
        self.context.push(word);
        if self.context.len() > self.max_context {
            self.context.remove(0);
        }
        Ok(())
    }

    fn push_state(&mut self, state: &LmState) -> Result<(), LmError> {
        match state {
            LmState::Open(words) => {
                for &w in words.iter() {
                    self.push_word(w)?;
                }
            }
            LmState::Closed {
                left,
                backoff,
                right,
            } => {
                for &w in left.iter() {
                    self.push_word(w)?;
                }
                if *backoff {
                    // Contexts longer than `left` reach into our words now.
                    let upper = self.max_context.min(self.context.len());
                    for len in left.len() + 1..=upper {
                        let ctx = &self.context[self.context.len() - len..];
                        self.cost += self.lm.backoff_cost(ctx)?;
                    }
                    if !self.closed && self.context.len() < self.max_context {
                        self.backoff = true;
                    }
                }
                self.closed = true;
                self.context.clear();
                self.context.extend_from_slice(right);
            }
        }
        Ok(())
    }

    fn prefix_cost(&self, words: &[SymbolId]) -> Result<f64, LmError> {
        let mut cost = 0.0;
        for k in 0..words.len() {
            cost += self.lm.ngram_cost(&words[..=k])?;
        }
        Ok(cost)
    }

    fn finish(mut self, minimize_left: bool, minimize_right: bool) -> Result<LmTransition, LmError> {
        if !self.closed {
            let bonus = self.prefix_cost(&self.pending)?;
            return Ok(LmTransition {
                cost: self.cost,
                state: LmState::Open(self.pending.into_boxed_slice()),
                bonus,
            });
        }

        let mut left = std::mem::take(&mut self.pending);
        let mut backoff = self.backoff;
        if minimize_left {
            if let Some((boundary, owes_backoff)) = self.lm.left_boundary(&left) {
                // Nothing outside can precede left[..=boundary] in an n-gram,
                // so the rest of the pending words score internally.
                for k in boundary..left.len() {
                    self.cost += self.lm.ngram_cost(&left[..=k])?;
                }
                left.truncate(boundary);
                backoff = owes_backoff;
            }
        }

        let keep = if minimize_right {
            self.lm.right_state_len(&self.context)
        } else {
            self.context.len()
        };
        let right: Box<[SymbolId]> = self.context[self.context.len() - keep..].into();
        let bonus = self.prefix_cost(&left)?;

        Ok(LmTransition {
            cost: self.cost,
            state: LmState::Closed {
                left: left.into_boxed_slice(),
                backoff,
                right,
            },
            bonus,
        })
    }
}

/// Computes incremental LM costs and equivalence states.
///
/// The costs of every transition in a complete derivation plus
/// `final_cost` of its top state add up to `sentence_cost` of its yield.
pub struct LmScorer {
    lm: Arc<dyn LmBackend>,
    bos: SymbolId,
    eos: SymbolId,
    minimize_left: bool,
    minimize_right: bool,
}

impl LmScorer {
    pub fn new(
        lm: Arc<dyn LmBackend>,
        bos: SymbolId,
        eos: SymbolId,
        use_left_equivalent_state: bool,
        use_right_equivalent_state: bool,
    ) -> Self {
        let supported = lm.supports_state_minimization();
        if !supported && (use_left_equivalent_state || use_right_equivalent_state) {
            info!("LM backend cannot minimize states; keeping full boundary words");
        }
        Self {
            lm,
            bos,
            eos,
            minimize_left: supported && use_left_equivalent_state,
            minimize_right: supported && use_right_equivalent_state,
        }
    }

    pub fn backend(&self) -> &Arc<dyn LmBackend> {
        &self.lm
    }

    pub fn order(&self) -> usize {
        self.lm.order()
    }

    /// Score `target` (terminals and placeholders) given the antecedents'
    /// states, indexed by placeholder.
    pub fn transition(&self, target: &[SymbolId], antecedents: &[&LmState]) -> Result<LmTransition, LmError> {
        let mut walk = Walk::new(self.lm.as_ref());
        for &sym in target {
            match sym.placeholder_index() {
                Some(k) => {
                    let state = antecedents.get(k).ok_or_else(|| {
                        LmError::Config(format!("placeholder [{}] has no antecedent", k + 1))
                    })?;
                    walk.push_state(state)?;
                }
                None => walk.push_word(sym)?,
            }
        }
        walk.finish(self.minimize_left, self.minimize_right)
    }

    /// Cost of wrapping a complete item in `<s>` and `</s>`.
    pub fn final_cost(&self, state: &LmState) -> Result<f64, LmError> {
        let mut walk = Walk::new(self.lm.as_ref());
        walk.closed = true;
        walk.context.push(self.bos);
        walk.push_state(state)?;
        walk.push_word(self.eos)?;
        Ok(walk.cost)
    }

    /// Context-free estimate: each run of target terminals scored alone.
    pub fn estimate(&self, target: &[SymbolId]) -> Result<f64, LmError> {
        let mut cost = 0.0;
        for chunk in target.split(|s| s.placeholder_index().is_some()) {
            for k in 0..chunk.len() {
                cost += self.lm.ngram_cost(&chunk[..=k])?;
            }
        }
        Ok(cost)
    }

    /// Flat cost of `<s> words </s>`.
    pub fn sentence_cost(&self, words: &[SymbolId]) -> Result<f64, LmError> {
        let mut seq = Vec::with_capacity(words.len() + 2);
        seq.push(self.bos);
        seq.extend_from_slice(words);
        seq.push(self.eos);
        let mut cost = 0.0;
        for k in 1..seq.len() {
            cost += self.lm.ngram_cost(&seq[..=k])?;
        }
        Ok(cost)
    }
}
