//! Scoring models.
//!
//! Every model can estimate a rule in isolation. Stateful models also
//! compute an exact incremental cost when a rule is applied to antecedent
//! items, producing a new state that becomes part of the item signature.

mod lm;
mod stateless;

pub use lm::LanguageModel;
pub use stateless::{ArityPhrasePenalty, PhraseModel, PhrasePenalty, WordPenalty};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::grammar::Rule;
use crate::hypergraph::Span;
use crate::lm::{LmBackend, LmError, LmState};
use crate::settings::LmSettings;
use crate::symbol::SymbolTable;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Lm(#[from] LmError),

    #[error("a language model feature is configured but no LM backend was given")]
    MissingLm,

    #[error("loaded LM has order {loaded}, above the configured lm.order {configured}")]
    LmOrder { configured: usize, loaded: usize },
}

/// Per-model state carried by items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ModelState {
    #[default]
    None,
    Lm(LmState),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub cost: f64,
    pub state: ModelState,
    /// Pruning-only estimate of cost still to come.
    pub bonus: f64,
}

pub trait FeatureFunction: Send + Sync {
    fn name(&self) -> &str;

    fn is_stateless(&self) -> bool {
        true
    }

    /// Context-free cost of a rule.
    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError>;

    /// Exact cost of applying `rule` to antecedents with the given states.
    fn transition(
        &self,
        rule: &Rule,
        _antecedents: &[&ModelState],
        _span: Span,
    ) -> Result<Transition, ModelError> {
        Ok(Transition {
            cost: self.estimate(rule)?,
            state: ModelState::None,
            bonus: 0.0,
        })
    }

    /// Cost of turning a complete item into a sentence.
    fn final_transition(&self, _state: &ModelState) -> Result<f64, ModelError> {
        Ok(0.0)
    }
}

pub struct WeightedModel {
    pub model: Box<dyn FeatureFunction>,
    pub weight: f64,
}

/// Models in a fixed order; the index is the model id used for state
/// vectors and cost breakdowns.
#[derive(Default)]
pub struct ModelSet {
    models: Vec<WeightedModel>,
    stateful: Vec<usize>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, model: Box<dyn FeatureFunction>, weight: f64) {
        if !model.is_stateless() {
            self.stateful.push(self.models.len());
        }
        self.models.push(WeightedModel { model, weight });
    }

    /// Build models from configuration. `lm` backs the `lm` model kind.
    pub fn from_specs(
        specs: &[ModelSpec],
        symbols: &SymbolTable,
        lm: Option<Arc<dyn LmBackend>>,
        lm_settings: &LmSettings,
    ) -> Result<Self, ModelError> {
        let mut set = ModelSet::new();
        for spec in specs {
            let model: Box<dyn FeatureFunction> = match spec {
                ModelSpec::Lm { .. } => {
                    let backend = lm.clone().ok_or(ModelError::MissingLm)?;
                    if backend.order() > lm_settings.order {
                        return Err(ModelError::LmOrder {
                            configured: lm_settings.order,
                            loaded: backend.order(),
                        });
                    }
                    Box::new(LanguageModel::new(backend, symbols, lm_settings))
                }
                ModelSpec::WordPenalty { .. } => Box::new(WordPenalty),
                ModelSpec::PhraseModel { owner, column, .. } => {
                    Box::new(PhraseModel::new(symbols.intern(owner), *column))
                }
                ModelSpec::PhrasePenalty { owner, .. } => {
                    Box::new(PhrasePenalty::new(symbols.intern(owner)))
                }
                ModelSpec::ArityPhrasePenalty {
                    owner,
                    min_arity,
                    max_arity,
                    ..
                } => Box::new(ArityPhrasePenalty::new(
                    symbols.intern(owner),
                    *min_arity,
                    *max_arity,
                )),
            };
            set.push(model, spec.weight());
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, index: usize) -> &WeightedModel {
        &self.models[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WeightedModel> {
        self.models.iter()
    }

    /// Indices of the stateful models.
    pub fn stateful(&self) -> &[usize] {
        &self.stateful
    }

    pub fn weights(&self) -> Vec<f64> {
        self.models.iter().map(|m| m.weight).collect()
    }

    /// Fill `stateless_cost` and `est_cost` of a freshly built rule.
    pub fn score_rule(&self, rule: &mut Rule) -> Result<(), ModelError> {
        let mut stateless = 0.0;
        let mut est = 0.0;
        for m in &self.models {
            let cost = m.weight * m.model.estimate(rule)?;
            est += cost;
            if m.model.is_stateless() {
                stateless += cost;
            }
        }
        rule.stateless_cost = stateless;
        rule.est_cost = est;
        Ok(())
    }

    /// Weighted final-transition cost of a complete item's states.
    pub fn weighted_final(&self, states: &[ModelState]) -> Result<f64, ModelError> {
        let mut cost = 0.0;
        for &i in &self.stateful {
            let m = &self.models[i];
            cost += m.weight * m.model.final_transition(&states[i])?;
        }
        Ok(cost)
    }
}

/// Model configuration, one `[[models]]` table each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Lm {
        weight: f64,
    },
    WordPenalty {
        weight: f64,
    },
    PhraseModel {
        owner: String,
        column: usize,
        weight: f64,
    },
    PhrasePenalty {
        owner: String,
        weight: f64,
    },
    ArityPhrasePenalty {
        owner: String,
        min_arity: usize,
        max_arity: usize,
        weight: f64,
    },
}

impl ModelSpec {
    pub fn weight(&self) -> f64 {
        match self {
            ModelSpec::Lm { weight }
            | ModelSpec::WordPenalty { weight }
            | ModelSpec::PhraseModel { weight, .. }
            | ModelSpec::PhrasePenalty { weight, .. }
            | ModelSpec::ArityPhrasePenalty { weight, .. } => *weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{RuleId, RuleRecord};
    use crate::settings::parse_settings_toml;
    use crate::settings::DEFAULT_SETTINGS_TOML;
    use crate::testutil::close;
    use std::f64::consts::LOG10_E;

    fn rule(symbols: &SymbolTable, line: &str, owner: &str) -> Rule {
        RuleRecord::parse(line)
            .unwrap()
            .to_rule(symbols, RuleId { grammar: 0, index: 0 }, symbols.intern(owner))
            .unwrap()
    }

    #[test]
    fn test_score_rule_splits_stateless_cost() {
        let symbols = SymbolTable::new();
        let mut set = ModelSet::new();
        set.push(Box::new(WordPenalty), 2.0);
        set.push(Box::new(PhraseModel::new(symbols.intern("pt"), 1)), 0.5);
        let mut r = rule(&symbols, "[X] ||| a [X,1] ||| b c [X,1] ||| 1.0 3.0", "pt");
        set.score_rule(&mut r).unwrap();
        // 2 * log10(e) * 2 words + 0.5 * 3.0
        let expected = 2.0 * LOG10_E * 2.0 + 1.5;
        assert!(close(r.stateless_cost, expected));
        assert!(close(r.est_cost, expected));
        assert!(set.stateful().is_empty());
    }

    #[test]
    fn test_from_specs_requires_lm() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        let symbols = SymbolTable::new();
        let err = ModelSet::from_specs(&s.models, &symbols, None, &s.lm).err().unwrap();
        assert!(matches!(err, ModelError::MissingLm));
    }

    #[test]
    fn test_from_specs_orders_models() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        let symbols = SymbolTable::new();
        let specs: Vec<ModelSpec> = s
            .models
            .iter()
            .filter(|m| !matches!(m, ModelSpec::Lm { .. }))
            .cloned()
            .collect();
        let set = ModelSet::from_specs(&specs, &symbols, None, &s.lm).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(0).model.name(), "phrase_model");
        assert_eq!(set.get(1).model.name(), "word_penalty");
        assert!(close(set.get(1).weight, 0.5));
    }

    #[test]
    fn test_from_specs_rejects_lm_above_configured_order() {
        use crate::lm::ArpaLm;
        use crate::testutil::TEST_ARPA;

        let mut s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        let symbols = SymbolTable::new();
        let lm: Arc<dyn LmBackend> =
            Arc::new(ArpaLm::from_text(TEST_ARPA, &symbols, s.lm.ceiling_cost).unwrap());
        assert!(ModelSet::from_specs(&s.models, &symbols, Some(lm.clone()), &s.lm).is_ok());

        s.lm.order = 2;
        let err = ModelSet::from_specs(&s.models, &symbols, Some(lm), &s.lm).err().unwrap();
        assert!(matches!(
            err,
            ModelError::LmOrder {
                configured: 2,
                loaded: 3
            }
        ));
    }
}
