//! Shared symbol table mapping surface strings to dense integer ids.
//!
//! Nonterminals live below `NONTERMINAL_LIMIT`, terminals at or above
//! `TERMINAL_BASE`, so the kind of an id is a range check. The two kinds
//! have separate namespaces: the word `X` and the category `[X]` get
//! different ids. Ids `0..MAX_ARITY` are the target-side placeholders
//! `[1]`..`[8]` that point at the k-th source nonterminal of a rule.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Maximum number of nonterminals on a rule's source side.
pub const MAX_ARITY: usize = 8;
pub const NONTERMINAL_LIMIT: u32 = 10_000;
pub const TERMINAL_BASE: u32 = NONTERMINAL_LIMIT;

pub const BOS: &str = "<s>";
pub const EOS: &str = "</s>";
pub const UNK: &str = "<unk>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Placeholder for the k-th (1-based) source nonterminal.
    pub fn placeholder(k: usize) -> Self {
        debug_assert!((1..=MAX_ARITY).contains(&k));
        SymbolId(k as u32 - 1)
    }

    /// 0-based antecedent index if this is a placeholder.
    pub fn placeholder_index(self) -> Option<usize> {
        ((self.0 as usize) < MAX_ARITY).then_some(self.0 as usize)
    }

    pub fn is_nonterminal(self) -> bool {
        self.0 < NONTERMINAL_LIMIT
    }

    pub fn is_terminal(self) -> bool {
        self.0 >= TERMINAL_BASE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("unknown symbol id: {0}")]
    UnknownSymbol(u32),

    #[error("nonterminal space exhausted at '{0}'")]
    Exhausted(String),
}

#[derive(Default)]
struct Inner {
    terminal_ids: HashMap<Arc<str>, SymbolId>,
    nonterminal_ids: HashMap<Arc<str>, SymbolId>,
    terminals: Vec<Arc<str>>,
    nonterminals: Vec<Arc<str>>,
}

/// Append-only interning table, shared across threads behind an `Arc`.
pub struct SymbolTable {
    inner: RwLock<Inner>,
    bos: SymbolId,
    eos: SymbolId,
    unk: SymbolId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        for k in 1..=MAX_ARITY {
            let name: Arc<str> = Arc::from(format!("[{k}]"));
            inner.nonterminals.push(name);
        }
        let mut table = Self {
            inner: RwLock::new(inner),
            bos: SymbolId(0),
            eos: SymbolId(0),
            unk: SymbolId(0),
        };
        table.bos = table.intern(BOS);
        table.eos = table.intern(EOS);
        table.unk = table.intern(UNK);
        table
    }

    pub fn bos(&self) -> SymbolId {
        self.bos
    }

    pub fn eos(&self) -> SymbolId {
        self.eos
    }

    pub fn unk(&self) -> SymbolId {
        self.unk
    }

    /// Intern a terminal. Idempotent; concurrent callers get the same id.
    pub fn intern(&self, word: &str) -> SymbolId {
        if let Some(&id) = self.read().terminal_ids.get(word) {
            return id;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&id) = inner.terminal_ids.get(word) {
            return id;
        }
        let id = SymbolId(TERMINAL_BASE + inner.terminals.len() as u32);
        let name: Arc<str> = Arc::from(word);
        inner.terminals.push(Arc::clone(&name));
        inner.terminal_ids.insert(name, id);
        id
    }

    /// Intern every word, returning ids in order.
    pub fn intern_all<'a, I>(&self, words: I) -> Vec<SymbolId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        words.into_iter().map(|w| self.intern(w)).collect()
    }

    /// Intern a nonterminal category (name without brackets).
    pub fn intern_nonterminal(&self, name: &str) -> Result<SymbolId, SymbolError> {
        if let Some(&id) = self.read().nonterminal_ids.get(name) {
            return Ok(id);
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&id) = inner.nonterminal_ids.get(name) {
            return Ok(id);
        }
        let next = inner.nonterminals.len() as u32;
        if next >= NONTERMINAL_LIMIT {
            return Err(SymbolError::Exhausted(name.to_string()));
        }
        let name: Arc<str> = Arc::from(name);
        inner.nonterminals.push(Arc::clone(&name));
        inner.nonterminal_ids.insert(name, SymbolId(next));
        Ok(SymbolId(next))
    }

    /// Terminal id for `word` without interning it.
    pub fn get(&self, word: &str) -> Option<SymbolId> {
        self.read().terminal_ids.get(word).copied()
    }

    pub fn lookup(&self, id: SymbolId) -> Result<Arc<str>, SymbolError> {
        let inner = self.read();
        let slot = if id.is_nonterminal() {
            inner.nonterminals.get(id.0 as usize)
        } else {
            inner.terminals.get((id.0 - TERMINAL_BASE) as usize)
        };
        slot.cloned().ok_or(SymbolError::UnknownSymbol(id.0))
    }

    /// Join terminal ids into a space-separated string.
    pub fn render(&self, ids: &[SymbolId]) -> Result<String, SymbolError> {
        let mut out = String::new();
        for (i, &id) in ids.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&self.lookup(id)?);
        }
        Ok(out)
    }

    pub fn num_terminals(&self) -> usize {
        self.read().terminals.len()
    }

    pub fn num_nonterminals(&self) -> usize {
        self.read().nonterminals.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
