use std::f64::consts::LOG10_E;

use crate::grammar::Rule;
use crate::symbol::SymbolId;

use super::{FeatureFunction, ModelError};

/// Charges every emitted target word.
pub struct WordPenalty;

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &str {
        "word_penalty"
    }

    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError> {
        Ok(LOG10_E * rule.target_word_count() as f64)
    }
}

/// One column of the rule feature vector, for rules of one owner.
pub struct PhraseModel {
    owner: SymbolId,
    column: usize,
}

impl PhraseModel {
    pub fn new(owner: SymbolId, column: usize) -> Self {
        Self { owner, column }
    }
}

impl FeatureFunction for PhraseModel {
    fn name(&self) -> &str {
        "phrase_model"
    }

    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError> {
        if rule.owner != self.owner {
            return Ok(0.0);
        }
        Ok(rule.features.get(self.column).copied().unwrap_or(0.0) as f64)
    }
}

/// Constant charge per rule application of one owner.
pub struct PhrasePenalty {
    owner: SymbolId,
}

impl PhrasePenalty {
    pub fn new(owner: SymbolId) -> Self {
        Self { owner }
    }
}

impl FeatureFunction for PhrasePenalty {
    fn name(&self) -> &str {
        "phrase_penalty"
    }

    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError> {
        Ok(if rule.owner == self.owner { LOG10_E } else { 0.0 })
    }
}

/// Phrase penalty restricted to rules whose arity lies in a range.
pub struct ArityPhrasePenalty {
    owner: SymbolId,
    min_arity: usize,
    max_arity: usize,
}

impl ArityPhrasePenalty {
    pub fn new(owner: SymbolId, min_arity: usize, max_arity: usize) -> Self {
        Self {
            owner,
            min_arity,
            max_arity,
        }
    }
}

impl FeatureFunction for ArityPhrasePenalty {
    fn name(&self) -> &str {
        "arity_phrase_penalty"
    }

    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError> {
        let applies = rule.owner == self.owner
            && (self.min_arity..=self.max_arity).contains(&rule.arity);
        Ok(if applies { LOG10_E } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{RuleId, RuleRecord};
    use crate::symbol::SymbolTable;
    use crate::testutil::close;

    fn rule(symbols: &SymbolTable, line: &str, owner: &str) -> Rule {
        RuleRecord::parse(line)
            .unwrap()
            .to_rule(symbols, RuleId { grammar: 0, index: 7 }, symbols.intern(owner))
            .unwrap()
    }

    #[test]
    fn test_word_penalty_counts_terminals() {
        let symbols = SymbolTable::new();
        let r = rule(&symbols, "[X] ||| a [X,1] b ||| c [X,1] d e ||| 0", "pt");
        assert!(close(WordPenalty.estimate(&r).unwrap(), 3.0 * LOG10_E));
    }

    #[test]
    fn test_phrase_model_column_and_owner() {
        let symbols = SymbolTable::new();
        let r = rule(&symbols, "[X] ||| a ||| b ||| 0.25 1.5", "pt");
        let pt = symbols.intern("pt");
        assert!(close(PhraseModel::new(pt, 1).estimate(&r).unwrap(), 1.5));
        // missing column
        assert!(close(PhraseModel::new(pt, 4).estimate(&r).unwrap(), 0.0));
        let other = PhraseModel::new(symbols.intern("glue"), 0);
        assert!(close(other.estimate(&r).unwrap(), 0.0));
    }

    #[test]
    fn test_phrase_penalties() {
        let symbols = SymbolTable::new();
        let pt = symbols.intern("pt");
        let r = rule(&symbols, "[X] ||| a [X,1] [X,2] ||| [X,2] [X,1] ||| 0", "pt");
        assert!(close(PhrasePenalty::new(pt).estimate(&r).unwrap(), LOG10_E));
        assert!(close(ArityPhrasePenalty::new(pt, 1, 2).estimate(&r).unwrap(), LOG10_E));
        assert!(close(ArityPhrasePenalty::new(pt, 0, 1).estimate(&r).unwrap(), 0.0));
    }
}
