//! Hypergraphs saved to disk for later k-best extraction or training.
//!
//! Two files: an append-only items file with one frame per sentence
//! (`[len u32 LE][crc32 u32 LE][bincode payload]`), and a rules file
//! holding every grammar rule referenced by any saved sentence. Rules
//! made up per sentence (pass-through) are stored inline in the frame.
//! Symbols are stored by name so the files do not depend on id
//! assignment order.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::grammar::{Rule, RuleId, RuleRecord};
use crate::hypergraph::{Deduction, HyperGraph, ItemId, Span};
use crate::lm::LmState;
use crate::model::ModelState;
use crate::symbol::{SymbolError, SymbolId, SymbolTable};

pub const RULES_MAGIC: &[u8; 4] = b"HGRL";
pub const RULES_VERSION: u8 = 1;
// magic(4) + version(1)
const RULES_HEADER_SIZE: usize = 5;
const FRAME_HEADER_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DiskHgError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected HGRL)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("corrupt record at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("rule {0:?} is missing from the rules file")]
    MissingRule(RuleId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleEntry {
    id: RuleId,
    owner: String,
    record: RuleRecord,
    stateless_cost: f64,
    est_cost: f64,
}

impl RuleEntry {
    fn from_rule(rule: &Rule, symbols: &SymbolTable) -> Result<Self, SymbolError> {
        Ok(Self {
            id: rule.id,
            owner: symbols.lookup(rule.owner)?.to_string(),
            record: RuleRecord::from_rule(rule, symbols)?,
            stateless_cost: rule.stateless_cost,
            est_cost: rule.est_cost,
        })
    }

    fn to_rule(&self, symbols: &SymbolTable) -> Result<Rule, SymbolError> {
        let owner = symbols.intern(&self.owner);
        let mut rule = self.record.to_rule(symbols, self.id, owner)?;
        rule.stateless_cost = self.stateless_cost;
        rule.est_cost = self.est_cost;
        Ok(rule)
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum RuleRef {
    Grammar(RuleId),
    Inline(RuleEntry),
}

#[derive(Debug, Serialize, Deserialize)]
enum StateRecord {
    None,
    Open(Vec<String>),
    Closed {
        left: Vec<String>,
        backoff: bool,
        right: Vec<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct DeductionRecord {
    rule: Option<RuleRef>,
    antecedents: Vec<u32>,
    best_cost: f64,
    transition_cost: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemRecord {
    lhs: String,
    start: u32,
    end: u32,
    states: Vec<StateRecord>,
    bonus: f64,
    deductions: Vec<DeductionRecord>,
}

/// Items in topological order; the last one is the goal.
#[derive(Debug, Serialize, Deserialize)]
struct SentenceRecord {
    sent_id: u64,
    sentence_len: u32,
    items: Vec<ItemRecord>,
}

fn names(symbols: &SymbolTable, ids: &[SymbolId]) -> Result<Vec<String>, SymbolError> {
    ids.iter()
        .map(|&id| symbols.lookup(id).map(|s| s.to_string()))
        .collect()
}

fn state_record(state: &ModelState, symbols: &SymbolTable) -> Result<StateRecord, SymbolError> {
    Ok(match state {
        ModelState::None => StateRecord::None,
        ModelState::Lm(LmState::Open(words)) => StateRecord::Open(names(symbols, words)?),
        ModelState::Lm(LmState::Closed {
            left,
            backoff,
            right,
        }) => StateRecord::Closed {
            left: names(symbols, left)?,
            backoff: *backoff,
            right: names(symbols, right)?,
        },
    })
}

fn state_from_record(record: &StateRecord, symbols: &SymbolTable) -> ModelState {
    let ids = |words: &[String]| -> Box<[SymbolId]> {
        words.iter().map(|w| symbols.intern(w)).collect()
    };
    match record {
        StateRecord::None => ModelState::None,
        StateRecord::Open(words) => ModelState::Lm(LmState::Open(ids(words))),
        StateRecord::Closed {
            left,
            backoff,
            right,
        } => ModelState::Lm(LmState::Closed {
            left: ids(left),
            backoff: *backoff,
            right: ids(right),
        }),
    }
}

pub struct DiskHyperGraphWriter {
    path: PathBuf,
    file: BufWriter<File>,
    symbols: Arc<SymbolTable>,
    rules: BTreeMap<RuleId, RuleEntry>,
    sentences: usize,
}

impl DiskHyperGraphWriter {
    /// Create (or truncate) the items file.
    pub fn create(items_path: &Path, symbols: Arc<SymbolTable>) -> Result<Self, DiskHgError> {
        if let Some(parent) = items_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(items_path)?);
        Ok(Self {
            path: items_path.to_path_buf(),
            file,
            symbols,
            rules: BTreeMap::new(),
            sentences: 0,
        })
    }

    /// Append the part of `hg` reachable from its goal. A hypergraph
    /// without a goal is written as an empty record.
    pub fn append(&mut self, sent_id: u64, hg: &HyperGraph) -> Result<(), DiskHgError> {
        let order = hg.reachable();
        let mut renumber: HashMap<ItemId, u32> = HashMap::with_capacity(order.len());
        let mut items = Vec::with_capacity(order.len());
        for (pos, &id) in order.iter().enumerate() {
            renumber.insert(id, pos as u32);
            let item = hg.item(id);
            let mut deductions = Vec::with_capacity(item.deductions.len());
            for &d in &item.deductions {
                let ded = hg.deduction(d);
                let rule = match &ded.rule {
                    None => None,
                    Some(rule) if rule.is_pass_through() => {
                        Some(RuleRef::Inline(RuleEntry::from_rule(rule, &self.symbols)?))
                    }
                    Some(rule) => {
                        if !self.rules.contains_key(&rule.id) {
                            let entry = RuleEntry::from_rule(rule, &self.symbols)?;
                            self.rules.insert(rule.id, entry);
                        }
                        Some(RuleRef::Grammar(rule.id))
                    }
                };
                let antecedents = ded.antecedents.iter().map(|a| renumber[a]).collect();
                deductions.push(DeductionRecord {
                    rule,
                    antecedents,
                    best_cost: ded.best_cost,
                    transition_cost: ded.transition_cost,
                });
            }
            let states = item
                .states
                .iter()
                .map(|s| state_record(s, &self.symbols))
                .collect::<Result<Vec<_>, _>>()?;
            items.push(ItemRecord {
                lhs: self.symbols.lookup(item.lhs)?.to_string(),
                start: item.span.start as u32,
                end: item.span.end as u32,
                states,
                bonus: item.bonus,
                deductions,
            });
        }
        let record = SentenceRecord {
            sent_id,
            sentence_len: hg.sentence_len() as u32,
            items,
        };
        let payload = bincode::serialize(&record).map_err(DiskHgError::Serialize)?;
        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);
        self.file.write_all(&length.to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.sentences += 1;
        debug!(sent_id, items = record.items.len(), bytes = payload.len(), "hypergraph saved");
        Ok(())
    }

    /// Flush the items file and write every referenced rule atomically.
    pub fn write_rules(&mut self, rules_path: &Path) -> Result<(), DiskHgError> {
        self.file.flush()?;
        let entries: Vec<&RuleEntry> = self.rules.values().collect();
        let body = bincode::serialize(&entries).map_err(DiskHgError::Serialize)?;
        let mut buf = Vec::with_capacity(RULES_HEADER_SIZE + body.len());
        buf.extend_from_slice(RULES_MAGIC);
        buf.push(RULES_VERSION);
        buf.extend_from_slice(&body);
        let tmp = rules_path.with_extension("tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, rules_path)?;
        info!(
            items_path = %self.path.display(),
            sentences = self.sentences,
            rules = entries.len(),
            "disk hypergraphs written"
        );
        Ok(())
    }

    pub fn finish(mut self, rules_path: &Path) -> Result<usize, DiskHgError> {
        self.write_rules(rules_path)?;
        Ok(self.sentences)
    }
}

fn read_rules(path: &Path, symbols: &SymbolTable) -> Result<HashMap<RuleId, Arc<Rule>>, DiskHgError> {
    let bytes = fs::read(path)?;
    if bytes.len() < RULES_HEADER_SIZE {
        return Err(DiskHgError::InvalidHeader);
    }
    if &bytes[..4] != RULES_MAGIC {
        return Err(DiskHgError::InvalidMagic);
    }
    if bytes[4] != RULES_VERSION {
        return Err(DiskHgError::UnsupportedVersion(bytes[4]));
    }
    let entries: Vec<RuleEntry> =
        bincode::deserialize(&bytes[RULES_HEADER_SIZE..]).map_err(DiskHgError::Deserialize)?;
    let mut rules = HashMap::with_capacity(entries.len());
    for entry in &entries {
        rules.insert(entry.id, Arc::new(entry.to_rule(symbols)?));
    }
    Ok(rules)
}

/// Iterates `(sent_id, hypergraph)` in file order. A truncated or corrupt
/// frame yields one error and ends the iteration.
pub struct DiskHyperGraphReader {
    data: Vec<u8>,
    pos: usize,
    done: bool,
    rules: HashMap<RuleId, Arc<Rule>>,
    symbols: Arc<SymbolTable>,
}

impl DiskHyperGraphReader {
    pub fn open(items_path: &Path, rules_path: &Path, symbols: Arc<SymbolTable>) -> Result<Self, DiskHgError> {
        let rules = read_rules(rules_path, &symbols)?;
        let data = fs::read(items_path)?;
        Ok(Self {
            data,
            pos: 0,
            done: false,
            rules,
            symbols,
        })
    }

    fn corrupt(&mut self, reason: &str) -> DiskHgError {
        self.done = true;
        DiskHgError::Corrupt {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn next_record(&mut self) -> Result<SentenceRecord, DiskHgError> {
        let pos = self.pos;
        if pos + FRAME_HEADER_SIZE > self.data.len() {
            return Err(self.corrupt("truncated frame header"));
        }
        let length = u32::from_le_bytes([
            self.data[pos],
            self.data[pos + 1],
            self.data[pos + 2],
            self.data[pos + 3],
        ]) as usize;
        let expected_crc = u32::from_le_bytes([
            self.data[pos + 4],
            self.data[pos + 5],
            self.data[pos + 6],
            self.data[pos + 7],
        ]);
        let start = pos + FRAME_HEADER_SIZE;
        if length == 0 || start + length > self.data.len() {
            return Err(self.corrupt("truncated frame"));
        }
        let payload = &self.data[start..start + length];
        if crc32fast::hash(payload) != expected_crc {
            return Err(self.corrupt("checksum mismatch"));
        }
        let record = bincode::deserialize(payload).map_err(|e| {
            self.done = true;
            DiskHgError::Deserialize(e)
        })?;
        self.pos = start + length;
        Ok(record)
    }

    fn rebuild(&self, record: &SentenceRecord) -> Result<HyperGraph, DiskHgError> {
        let mut hg = HyperGraph::new(record.sentence_len as usize);
        for item in &record.items {
            let lhs = self.symbols.intern_nonterminal(&item.lhs)?;
            let states = item
                .states
                .iter()
                .map(|s| state_from_record(s, &self.symbols))
                .collect();
            let span = Span::new(item.start as usize, item.end as usize);
            let id = hg.add_item(lhs, span, states, item.bonus);
            for ded in &item.deductions {
                let rule = match &ded.rule {
                    None => None,
                    Some(RuleRef::Grammar(rule_id)) => Some(Arc::clone(
                        self.rules
                            .get(rule_id)
                            .ok_or(DiskHgError::MissingRule(*rule_id))?,
                    )),
                    Some(RuleRef::Inline(entry)) => Some(Arc::new(entry.to_rule(&self.symbols)?)),
                };
                hg.add_deduction(
                    id,
                    Deduction {
                        rule,
                        antecedents: ded.antecedents.iter().map(|&a| ItemId(a)).collect(),
                        best_cost: ded.best_cost,
                        transition_cost: ded.transition_cost,
                    },
                );
            }
        }
        if hg.num_items() > 0 {
            hg.set_goal(ItemId(hg.num_items() as u32 - 1));
        }
        Ok(hg)
    }
}

impl Iterator for DiskHyperGraphReader {
    type Item = Result<(u64, HyperGraph), DiskHgError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos == self.data.len() {
            return None;
        }
        let result = self
            .next_record()
            .and_then(|record| Ok((record.sent_id, self.rebuild(&record)?)));
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}
