use serde::{Deserialize, Serialize};

use crate::symbol::{SymbolError, SymbolId, SymbolTable, MAX_ARITY};

/// Grammar id reserved for per-sentence pass-through rules.
pub const OOV_GRAMMAR: u16 = u16::MAX;

/// Stable rule identity: owning grammar plus load order within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId {
    pub grammar: u16,
    pub index: u32,
}

/// A synchronous rule with its precomputed model estimates.
///
/// `source` mixes terminals with nonterminal category ids; `target` mixes
/// terminals with placeholders (`SymbolId::placeholder`) naming the source
/// nonterminal they expand.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub lhs: SymbolId,
    pub source: Box<[SymbolId]>,
    pub target: Box<[SymbolId]>,
    pub features: Box<[f32]>,
    pub owner: SymbolId,
    pub arity: usize,
    /// Weighted cost of the stateless models.
    pub stateless_cost: f64,
    /// Weighted context-free estimate over all models.
    pub est_cost: f64,
}

impl Rule {
    /// Number of terminals emitted on the target side.
    pub fn target_word_count(&self) -> usize {
        self.target.iter().filter(|s| s.is_terminal()).count()
    }

    pub fn is_pass_through(&self) -> bool {
        self.id.grammar == OOV_GRAMMAR
    }

    /// Copy a word through untranslated.
    pub fn pass_through(word: SymbolId, position: usize, lhs: SymbolId, owner: SymbolId) -> Self {
        Self {
            id: RuleId {
                grammar: OOV_GRAMMAR,
                index: position as u32,
            },
            lhs,
            source: Box::new([word]),
            target: Box::new([word]),
            features: Box::new([0.0]),
            owner,
            arity: 0,
            stateless_cost: 0.0,
            est_cost: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceToken {
    Word(String),
    NonTerminal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetToken {
    Word(String),
    /// 0-based index of the source nonterminal.
    Slot(u8),
}

/// Symbol-free rule form used by the text parser and the binary files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub lhs: String,
    pub source: Vec<SourceToken>,
    pub target: Vec<TargetToken>,
    pub features: Vec<f32>,
}

/// Split `[CAT,k]` / `[CAT]` into the category and optional label.
fn parse_nonterminal(token: &str) -> Option<(&str, Option<usize>)> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() {
        return None;
    }
    if let Some((cat, label)) = inner.rsplit_once(',') {
        if let Ok(k) = label.trim().parse::<usize>() {
            return Some((cat, Some(k)));
        }
    }
    Some((inner, None))
}

impl RuleRecord {
    /// Parse `LHS ||| SOURCE ||| TARGET ||| SCORES`.
    pub fn parse(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split("|||").map(str::trim).collect();
        if fields.len() != 4 {
            return Err(format!(
                "expected 4 fields separated by '|||', got {}",
                fields.len()
            ));
        }

        let lhs = match parse_nonterminal(fields[0]) {
            Some((cat, _)) => cat.to_string(),
            None => return Err(format!("left-hand side '{}' is not a nonterminal", fields[0])),
        };

        let mut labels: Vec<usize> = Vec::new();
        let mut source = Vec::new();
        for tok in fields[1].split_whitespace() {
            match parse_nonterminal(tok) {
                Some((cat, label)) => {
                    let label = label.unwrap_or(labels.len() + 1);
                    if labels.contains(&label) {
                        return Err(format!("duplicate nonterminal label {label} in source"));
                    }
                    labels.push(label);
                    source.push(SourceToken::NonTerminal(cat.to_string()));
                }
                None => source.push(SourceToken::Word(tok.to_string())),
            }
        }
        if source.is_empty() {
            return Err("empty source side".to_string());
        }
        if labels.len() > MAX_ARITY {
            return Err(format!(
                "{} nonterminals exceeds the maximum arity {MAX_ARITY}",
                labels.len()
            ));
        }

        let mut target = Vec::new();
        let mut unlabeled = 0;
        for tok in fields[2].split_whitespace() {
            match parse_nonterminal(tok) {
                Some((_, label)) => {
                    let label = label.unwrap_or_else(|| {
                        unlabeled += 1;
                        unlabeled
                    });
                    let slot = labels
                        .iter()
                        .position(|&l| l == label)
                        .ok_or_else(|| format!("target nonterminal {tok} has no source counterpart"))?;
                    target.push(TargetToken::Slot(slot as u8));
                }
                None => target.push(TargetToken::Word(tok.to_string())),
            }
        }

        let features = fields[3]
            .split_whitespace()
            .map(|f| {
                f.parse::<f32>()
                    .map_err(|e| format!("invalid feature value '{f}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            lhs,
            source,
            target,
            features,
        })
    }

    pub fn arity(&self) -> usize {
        self.source
            .iter()
            .filter(|t| matches!(t, SourceToken::NonTerminal(_)))
            .count()
    }

    /// Intern into a `Rule` with zeroed costs.
    pub fn to_rule(&self, symbols: &SymbolTable, id: RuleId, owner: SymbolId) -> Result<Rule, SymbolError> {
        let lhs = symbols.intern_nonterminal(&self.lhs)?;
        let source = self
            .source
            .iter()
            .map(|t| match t {
                SourceToken::Word(w) => Ok(symbols.intern(w)),
                SourceToken::NonTerminal(c) => symbols.intern_nonterminal(c),
            })
            .collect::<Result<Box<[_]>, _>>()?;
        let target = self
            .target
            .iter()
            .map(|t| match t {
                TargetToken::Word(w) => symbols.intern(w),
                TargetToken::Slot(k) => SymbolId::placeholder(*k as usize + 1),
            })
            .collect();
        Ok(Rule {
            id,
            lhs,
            arity: self.arity(),
            source,
            target,
            features: self.features.clone().into_boxed_slice(),
            owner,
            stateless_cost: 0.0,
            est_cost: 0.0,
        })
    }

    pub fn from_rule(rule: &Rule, symbols: &SymbolTable) -> Result<Self, SymbolError> {
        let source = rule
            .source
            .iter()
            .map(|&s| {
                let name = symbols.lookup(s)?.to_string();
                Ok(if s.is_nonterminal() {
                    SourceToken::NonTerminal(name)
                } else {
                    SourceToken::Word(name)
                })
            })
            .collect::<Result<Vec<_>, SymbolError>>()?;
        let target = rule
            .target
            .iter()
            .map(|&s| match s.placeholder_index() {
                Some(k) => Ok(TargetToken::Slot(k as u8)),
                None => Ok(TargetToken::Word(symbols.lookup(s)?.to_string())),
            })
            .collect::<Result<Vec<_>, SymbolError>>()?;
        Ok(Self {
            lhs: symbols.lookup(rule.lhs)?.to_string(),
            source,
            target,
            features: rule.features.to_vec(),
        })
    }
}

/// Render a rule back into the text grammar format.
pub fn format_rule(rule: &Rule, symbols: &SymbolTable) -> Result<String, SymbolError> {
    let mut src = Vec::with_capacity(rule.source.len());
    let mut nt = 0;
    for &s in rule.source.iter() {
        let name = symbols.lookup(s)?;
        if s.is_nonterminal() {
            nt += 1;
            src.push(format!("[{name},{nt}]"));
        } else {
            src.push(name.to_string());
        }
    }
    let mut tgt = Vec::with_capacity(rule.target.len());
    for &s in rule.target.iter() {
        match s.placeholder_index() {
            Some(k) => {
                let cat = symbols.lookup(nonterminal_at(rule, k))?;
                tgt.push(format!("[{cat},{}]", k + 1));
            }
            None => tgt.push(symbols.lookup(s)?.to_string()),
        }
    }
    let feats: Vec<String> = rule.features.iter().map(|f| f.to_string()).collect();
    Ok(format!(
        "[{}] ||| {} ||| {} ||| {}",
        symbols.lookup(rule.lhs)?,
        src.join(" "),
        tgt.join(" "),
        feats.join(" ")
    ))
}

/// Category of the k-th (0-based) source nonterminal.
pub fn nonterminal_at(rule: &Rule, k: usize) -> SymbolId {
    rule.source
        .iter()
        .copied()
        .filter(|s| s.is_nonterminal())
        .nth(k)
        .unwrap_or(rule.lhs)
}
