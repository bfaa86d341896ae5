use std::sync::Arc;

use crate::grammar::Rule;
use crate::hypergraph::Span;
use crate::lm::{LmBackend, LmScorer, LmState};
use crate::settings::LmSettings;
use crate::symbol::SymbolTable;

use super::{FeatureFunction, ModelError, ModelState, Transition};

/// The n-gram language model as a stateful feature.
pub struct LanguageModel {
    scorer: LmScorer,
}

impl LanguageModel {
    pub fn new(lm: Arc<dyn LmBackend>, symbols: &SymbolTable, settings: &LmSettings) -> Self {
        Self {
            scorer: LmScorer::new(
                lm,
                symbols.bos(),
                symbols.eos(),
                settings.use_left_equivalent_state,
                settings.use_right_equivalent_state,
            ),
        }
    }

    pub fn scorer(&self) -> &LmScorer {
        &self.scorer
    }
}

fn lm_state(state: &ModelState) -> Option<&LmState> {
    match state {
        ModelState::Lm(s) => Some(s),
        ModelState::None => None,
    }
}

impl FeatureFunction for LanguageModel {
    fn name(&self) -> &str {
        "lm"
    }

    fn is_stateless(&self) -> bool {
        false
    }

    fn estimate(&self, rule: &Rule) -> Result<f64, ModelError> {
        Ok(self.scorer.estimate(&rule.target)?)
    }

    fn transition(
        &self,
        rule: &Rule,
        antecedents: &[&ModelState],
        _span: Span,
    ) -> Result<Transition, ModelError> {
        let states: Vec<&LmState> = antecedents.iter().filter_map(|s| lm_state(s)).collect();
        let t = self.scorer.transition(&rule.target, &states)?;
        Ok(Transition {
            cost: t.cost,
            state: ModelState::Lm(t.state),
            bonus: t.bonus,
        })
    }

    fn final_transition(&self, state: &ModelState) -> Result<f64, ModelError> {
        match lm_state(state) {
            Some(s) => Ok(self.scorer.final_cost(s)?),
            None => Ok(0.0),
        }
    }
}
