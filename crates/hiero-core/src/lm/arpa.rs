use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use crate::symbol::{SymbolId, SymbolTable};

use super::{LmBackend, LmError};

#[derive(Debug, Clone, Copy)]
struct Entry {
    logp: f32,
    bow: f32,
}

/// Backoff n-gram model read from an ARPA file.
///
/// Besides the table it keeps two derived sets: `contexts` (proper prefixes
/// of n-grams plus n-grams with a backoff weight) decides how much right
/// context a state must keep, and `extendable` (proper suffixes of n-grams)
/// decides which left words still depend on outside context.
pub struct ArpaLm {
    order: usize,
    ngrams: HashMap<Box<[SymbolId]>, Entry>,
    contexts: HashSet<Box<[SymbolId]>>,
    extendable: HashSet<Box<[SymbolId]>>,
    unk: SymbolId,
    ceiling_cost: f64,
}

enum Section {
    Preamble,
    Data,
    Ngrams(usize),
}

impl ArpaLm {
    pub fn open(path: &Path, symbols: &SymbolTable, ceiling_cost: f64) -> Result<Self, LmError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text, symbols, ceiling_cost)
    }

    pub fn from_text(text: &str, symbols: &SymbolTable, ceiling_cost: f64) -> Result<Self, LmError> {
        let mut section = Section::Preamble;
        let mut declared: Vec<(usize, usize)> = Vec::new();
        let mut seen = vec![0usize; 1];
        let mut ngrams: HashMap<Box<[SymbolId]>, Entry> = HashMap::new();
        let mut order = 0;
        let mut has_data = false;
        let mut has_end = false;

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let parse_err = |reason: String| LmError::Parse { line: n + 1, reason };
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                section = Section::Data;
                has_data = true;
                continue;
            }
            if line == "\\end\\" {
                has_end = true;
                break;
            }
            if let Some(k) = line
                .strip_prefix('\\')
                .and_then(|r| r.strip_suffix("-grams:"))
            {
                if !has_data {
                    return Err(parse_err("n-gram section before \\data\\".to_string()));
                }
                let k: usize = k
                    .parse()
                    .map_err(|e| parse_err(format!("invalid section order '{k}': {e}")))?;
                if k == 0 {
                    return Err(parse_err("n-gram order must be positive".to_string()));
                }
                order = order.max(k);
                if seen.len() <= k {
                    seen.resize(k + 1, 0);
                }
                section = Section::Ngrams(k);
                continue;
            }
            match section {
                Section::Preamble => {}
                Section::Data => {
                    let spec = line
                        .strip_prefix("ngram ")
                        .ok_or_else(|| parse_err(format!("expected 'ngram N=count', got '{line}'")))?;
                    let (k, count) = spec
                        .split_once('=')
                        .ok_or_else(|| parse_err(format!("expected 'ngram N=count', got '{line}'")))?;
                    let k: usize = k
                        .trim()
                        .parse()
                        .map_err(|e| parse_err(format!("invalid order: {e}")))?;
                    let count: usize = count
                        .trim()
                        .parse()
                        .map_err(|e| parse_err(format!("invalid count: {e}")))?;
                    declared.push((k, count));
                }
                Section::Ngrams(k) => {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() != k + 1 && fields.len() != k + 2 {
                        return Err(parse_err(format!(
                            "expected {} or {} fields for a {k}-gram, got {}",
                            k + 1,
                            k + 2,
                            fields.len()
                        )));
                    }
                    let logp: f32 = fields[0]
                        .parse()
                        .map_err(|e| parse_err(format!("invalid log probability: {e}")))?;
                    let bow: f32 = match fields.get(k + 1) {
                        Some(b) => b
                            .parse()
                            .map_err(|e| parse_err(format!("invalid backoff weight: {e}")))?,
                        None => 0.0,
                    };
                    let key: Box<[SymbolId]> = fields[1..=k].iter().map(|w| symbols.intern(w)).collect();
                    ngrams.insert(key, Entry { logp, bow });
                    seen[k] += 1;
                }
            }
        }

        if !has_data {
            return Err(LmError::Parse {
                line: 0,
                reason: "missing \\data\\ header".to_string(),
            });
        }
        if !has_end {
            warn!("ARPA file has no \\end\\ marker");
        }
        if order == 0 {
            return Err(LmError::Parse {
                line: 0,
                reason: "no n-gram sections".to_string(),
            });
        }
        for (k, count) in declared {
            let actual = seen.get(k).copied().unwrap_or(0);
            if actual != count {
                warn!(order = k, declared = count, actual, "ARPA n-gram count mismatch");
            }
        }

        let mut contexts = HashSet::new();
        let mut extendable = HashSet::new();
        for (key, entry) in &ngrams {
            for l in 1..key.len() {
                contexts.insert(Box::<[SymbolId]>::from(&key[..l]));
                extendable.insert(Box::<[SymbolId]>::from(&key[l..]));
            }
            if entry.bow != 0.0 {
                contexts.insert(key.clone());
            }
        }

        info!(order, ngrams = ngrams.len(), "ARPA language model loaded");

        Ok(Self {
            order,
            ngrams,
            contexts,
            extendable,
            unk: symbols.unk(),
            ceiling_cost,
        })
    }

    pub fn num_ngrams(&self) -> usize {
        self.ngrams.len()
    }

    pub fn is_known(&self, word: SymbolId) -> bool {
        self.ngrams.contains_key(&[word][..])
    }

    fn map_context(&self, words: &[SymbolId]) -> Vec<SymbolId> {
        words
            .iter()
            .map(|&w| if self.is_known(w) { w } else { self.unk })
            .collect()
    }
}

impl LmBackend for ArpaLm {
    fn order(&self) -> usize {
        self.order
    }

    fn ngram_cost(&self, ngram: &[SymbolId]) -> Result<f64, LmError> {
        let Some(&word) = ngram.last() else {
            return Ok(0.0);
        };
        if !self.is_known(word) {
            return Ok(self.ceiling_cost);
        }
        let n = ngram.len().min(self.order);
        let ngram = &ngram[ngram.len() - n..];
        let mut key = self.map_context(&ngram[..n - 1]);
        key.push(word);

        let mut cost = 0.0;
        for start in 0..n {
            if let Some(e) = self.ngrams.get(&key[start..]) {
                return Ok(cost - e.logp as f64);
            }
            if let Some(e) = self.ngrams.get(&key[start..n - 1]) {
                cost -= e.bow as f64;
            }
        }
        // the unigram of a known word always matches above
        Ok(self.ceiling_cost)
    }

    fn backoff_cost(&self, context: &[SymbolId]) -> Result<f64, LmError> {
        let key = self.map_context(context);
        Ok(self
            .ngrams
            .get(key.as_slice())
            .map(|e| -(e.bow as f64))
            .unwrap_or(0.0))
    }

    fn supports_state_minimization(&self) -> bool {
        true
    }

    fn right_state_len(&self, context: &[SymbolId]) -> usize {
        let key = self.map_context(context);
        (1..=key.len())
            .rev()
            .find(|&len| self.contexts.contains(&key[key.len() - len..]))
            .unwrap_or(0)
    }

    fn left_boundary(&self, words: &[SymbolId]) -> Option<(usize, bool)> {
        let key = self.map_context(words);
        (0..key.len())
            .find(|&i| !self.extendable.contains(&key[..=i]))
            .map(|i| (i, self.is_known(words[i])))
    }
}
