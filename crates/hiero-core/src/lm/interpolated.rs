use std::sync::Arc;

use crate::symbol::SymbolId;

use super::{LmBackend, LmError};

/// Linear interpolation of several backends in probability space.
pub struct InterpolatedLm {
    backends: Vec<(Arc<dyn LmBackend>, f64)>,
    order: usize,
}

impl InterpolatedLm {
    pub fn new(backends: Vec<(Arc<dyn LmBackend>, f64)>) -> Result<Self, LmError> {
        if backends.is_empty() {
            return Err(LmError::Config("no backends to interpolate".to_string()));
        }
        if let Some((_, w)) = backends.iter().find(|(_, w)| !(*w > 0.0) || !w.is_finite()) {
            return Err(LmError::Config(format!("interpolation weight {w} must be positive")));
        }
        let order = backends.iter().map(|(lm, _)| lm.order()).max().unwrap_or(1);
        Ok(Self { backends, order })
    }
}

impl LmBackend for InterpolatedLm {
    fn order(&self) -> usize {
        self.order
    }

    fn ngram_cost(&self, ngram: &[SymbolId]) -> Result<f64, LmError> {
        let mut prob = 0.0;
        for (lm, weight) in &self.backends {
            prob += weight * 10f64.powf(-lm.ngram_cost(ngram)?);
        }
        Ok(-prob.max(f64::MIN_POSITIVE).log10())
    }

    fn reload(&self) -> Result<(), LmError> {
        for (lm, _) in &self.backends {
            lm.reload()?;
        }
        Ok(())
    }
}
