//! Lazy k-best extraction over a finished hypergraph.
//!
//! Each item keeps the derivations found so far plus a frontier of
//! candidates, one per (deduction, antecedent ranks) point. The k-th best
//! derivation of an item is produced on demand and only asks antecedents
//! for the ranks it actually needs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::decoder::DecodeError;
use crate::hypergraph::{HyperGraph, ItemId};
use crate::model::{ModelError, ModelSet, ModelState};
use crate::settings::NbestSettings;
use crate::symbol::{SymbolId, SymbolTable};

#[derive(Debug, Clone, Copy, Default)]
pub struct KBestOptions {
    /// Skip derivations whose target string was already produced.
    pub unique: bool,
    /// Render the derivation tree.
    pub tree: bool,
    /// Recompute the per-model cost breakdown.
    pub features: bool,
    /// Append the combined cost to output lines.
    pub combined_cost: bool,
}

impl KBestOptions {
    pub fn from_settings(nbest: &NbestSettings) -> Self {
        Self {
            unique: nbest.use_unique_nbest,
            tree: nbest.use_tree_nbest,
            features: nbest.include_model_costs,
            combined_cost: nbest.add_combined_cost,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Derivation {
    #[serde(skip)]
    pub words: Vec<SymbolId>,
    pub hyp: String,
    pub cost: f64,
    pub tree: Option<String>,
    /// Unweighted cost per model, in model order.
    pub model_costs: Option<Vec<f64>>,
}

/// A grid point of one item: deduction position plus antecedent ranks.
#[derive(Debug, Clone)]
struct Cand {
    pos: usize,
    ranks: Box<[usize]>,
    cost: f64,
}

impl PartialEq for Cand {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cand {}

impl Ord for Cand {
    // Reversed for a min-heap: cheaper first, then earlier deduction, then
    // lower ranks.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.pos.cmp(&self.pos))
            .then_with(|| other.ranks.cmp(&self.ranks))
    }
}

impl PartialOrd for Cand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Entry {
    cand: Cand,
    words: Arc<[SymbolId]>,
}

#[derive(Default)]
struct VirtualItem {
    nbest: Vec<Entry>,
    heap: BinaryHeap<Cand>,
    seen: HashSet<(usize, Box<[usize]>)>,
    strings: HashSet<Arc<[SymbolId]>>,
    /// Last popped point; its successors enter the heap before the next pop.
    pending: Option<(usize, Box<[usize]>)>,
}

pub struct KBestExtractor<'a> {
    hg: &'a HyperGraph,
    symbols: &'a SymbolTable,
    models: &'a ModelSet,
    options: KBestOptions,
    states: Vec<Option<VirtualItem>>,
    next: usize,
}

impl<'a> KBestExtractor<'a> {
    pub fn new(hg: &'a HyperGraph, symbols: &'a SymbolTable, models: &'a ModelSet, options: KBestOptions) -> Self {
        let mut states = Vec::with_capacity(hg.num_items());
        states.resize_with(hg.num_items(), || None);
        Self {
            hg,
            symbols,
            models,
            options,
            states,
            next: 0,
        }
    }

    fn entry(&self, v: ItemId, k: usize) -> Option<&Entry> {
        self.states[v.0 as usize].as_ref().and_then(|s| s.nbest.get(k))
    }

    fn entry_cost(&self, v: ItemId, k: usize) -> f64 {
        self.entry(v, k).map_or(f64::INFINITY, |e| e.cand.cost)
    }

    fn point_cost(&self, v: ItemId, pos: usize, ranks: &[usize]) -> f64 {
        let ded = self.hg.deduction(self.hg.item(v).deductions[pos]);
        ded.antecedents
            .iter()
            .zip(ranks)
            .fold(ded.own_cost(), |acc, (&a, &r)| acc + self.entry_cost(a, r))
    }

    fn init(&mut self, v: ItemId) -> VirtualItem {
        let mut state = VirtualItem::default();
        let num_deds = self.hg.item(v).deductions.len();
        for pos in 0..num_deds {
            let ded = self.hg.deduction(self.hg.item(v).deductions[pos]);
            let ants = ded.antecedents.clone();
            if !ants.iter().all(|&a| self.kth(a, 0)) {
                continue;
            }
            let ranks: Box<[usize]> = vec![0; ants.len()].into();
            let cost = self.point_cost(v, pos, &ranks);
            state.seen.insert((pos, ranks.clone()));
            state.heap.push(Cand { pos, ranks, cost });
        }
        state
    }

    fn push_successors(&mut self, v: ItemId, state: &mut VirtualItem, pos: usize, ranks: &[usize]) {
        let ants = self.hg.deduction(self.hg.item(v).deductions[pos]).antecedents.clone();
        for (i, &ant) in ants.iter().enumerate() {
            let mut next: Box<[usize]> = ranks.into();
            next[i] += 1;
            if !state.seen.insert((pos, next.clone())) {
                continue;
            }
            if !self.kth(ant, next[i]) {
                continue;
            }
            let cost = self.point_cost(v, pos, &next);
            state.heap.push(Cand { pos, ranks: next, cost });
        }
    }

    fn yield_of(&self, v: ItemId, cand: &Cand) -> Arc<[SymbolId]> {
        let ded = self.hg.deduction(self.hg.item(v).deductions[cand.pos]);
        let mut out = Vec::new();
        match &ded.rule {
            None => {
                if let Some(e) = self.entry(ded.antecedents[0], cand.ranks[0]) {
                    out.extend_from_slice(&e.words);
                }
            }
            Some(rule) => {
                for &sym in rule.target.iter() {
                    match sym.placeholder_index() {
                        Some(k) => {
                            if let Some(e) = self.entry(ded.antecedents[k], cand.ranks[k]) {
                                out.extend_from_slice(&e.words);
                            }
                        }
                        None => out.push(sym),
                    }
                }
            }
        }
        out.into()
    }

    /// Make sure the k-th best derivation of `v` exists; false once the
    /// item has fewer than k + 1 derivations.
    fn kth(&mut self, v: ItemId, k: usize) -> bool {
        let idx = v.0 as usize;
        if self.states[idx].as_ref().is_some_and(|s| s.nbest.len() > k) {
            return true;
        }
        let mut state = match self.states[idx].take() {
            Some(s) => s,
            None => self.init(v),
        };
        while state.nbest.len() <= k {
            if let Some((pos, ranks)) = state.pending.take() {
                self.push_successors(v, &mut state, pos, &ranks);
            }
            let Some(cand) = state.heap.pop() else {
                break;
            };
            state.pending = Some((cand.pos, cand.ranks.clone()));
            let words = self.yield_of(v, &cand);
            if self.options.unique && !state.strings.insert(Arc::clone(&words)) {
                continue;
            }
            state.nbest.push(Entry { cand, words });
        }
        let found = state.nbest.len() > k;
        self.states[idx] = Some(state);
        found
    }

    fn tree(&self, v: ItemId, k: usize) -> Result<String, DecodeError> {
        let Some(entry) = self.entry(v, k) else {
            return Ok(String::new());
        };
        let ded = self.hg.deduction(self.hg.item(v).deductions[entry.cand.pos]);
        let ranks = &entry.cand.ranks;
        match &ded.rule {
            None => Ok(format!("(ROOT {})", self.tree(ded.antecedents[0], ranks[0])?)),
            Some(rule) => {
                let mut parts = Vec::with_capacity(rule.target.len());
                for &sym in rule.target.iter() {
                    match sym.placeholder_index() {
                        Some(i) => parts.push(self.tree(ded.antecedents[i], ranks[i])?),
                        None => parts.push(self.symbols.lookup(sym)?.to_string()),
                    }
                }
                Ok(format!("({} {})", self.symbols.lookup(rule.lhs)?, parts.join(" ")))
            }
        }
    }

    fn model_costs(&self, v: ItemId, k: usize, acc: &mut [f64]) -> Result<(), ModelError> {
        let Some(entry) = self.entry(v, k) else {
            return Ok(());
        };
        let item = self.hg.item(v);
        let ded = self.hg.deduction(item.deductions[entry.cand.pos]);
        match &ded.rule {
            None => {
                let states = &self.hg.item(ded.antecedents[0]).states;
                for &m in self.models.stateful() {
                    acc[m] += self.models.get(m).model.final_transition(&states[m])?;
                }
            }
            Some(rule) => {
                for (m, wm) in self.models.iter().enumerate() {
                    if wm.model.is_stateless() {
                        acc[m] += wm.model.estimate(rule)?;
                    } else {
                        let ant_states: Vec<&ModelState> = ded
                            .antecedents
                            .iter()
                            .map(|&a| &self.hg.item(a).states[m])
                            .collect();
                        acc[m] += wm.model.transition(rule, &ant_states, item.span)?.cost;
                    }
                }
            }
        }
        for (&a, &r) in ded.antecedents.iter().zip(entry.cand.ranks.iter()) {
            self.model_costs(a, r, acc)?;
        }
        Ok(())
    }

    fn materialize(&self, goal: ItemId, k: usize) -> Result<Option<Derivation>, DecodeError> {
        let Some(entry) = self.entry(goal, k) else {
            return Ok(None);
        };
        let words = entry.words.to_vec();
        let hyp = self.symbols.render(&words)?;
        let tree = if self.options.tree {
            Some(self.tree(goal, k)?)
        } else {
            None
        };
        let model_costs = if self.options.features {
            let mut acc = vec![0.0; self.models.len()];
            self.model_costs(goal, k, &mut acc)?;
            debug_assert!({
                let total: f64 = acc
                    .iter()
                    .zip(self.models.iter())
                    .map(|(c, wm)| c * wm.weight)
                    .sum();
                (total - entry.cand.cost).abs() < 1e-4 * entry.cand.cost.abs().max(1.0)
            });
            Some(acc)
        } else {
            None
        };
        Ok(Some(Derivation {
            words,
            hyp,
            cost: entry.cand.cost,
            tree,
            model_costs,
        }))
    }
}

impl Iterator for KBestExtractor<'_> {
    type Item = Result<Derivation, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let goal = self.hg.goal()?;
        let k = self.next;
        if !self.kth(goal, k) {
            return None;
        }
        self.next += 1;
        self.materialize(goal, k).transpose()
    }
}

fn format_score(cost: f64) -> String {
    let s = format!("{:.3}", -cost);
    if s == "-0.000" {
        "0.000".to_string()
    } else {
        s
    }
}

/// `id ||| hyp ||| scores ||| total`, scores negated. The tree replaces
/// the hypothesis when requested; the total is optional.
pub fn format_nbest_line(sent_id: u64, d: &Derivation, options: &KBestOptions) -> String {
    let text = match (&d.tree, options.tree) {
        (Some(tree), true) => tree.as_str(),
        _ => d.hyp.as_str(),
    };
    let scores = d
        .model_costs
        .as_ref()
        .map(|c| c.iter().map(|&c| format_score(c)).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let mut line = format!("{sent_id} ||| {text} ||| {scores}");
    if options.combined_cost {
        line.push_str(" ||| ");
        line.push_str(&format_score(d.cost));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_score_normalizes_negative_zero() {
        assert_eq!(format_score(0.0), "0.000");
        assert_eq!(format_score(0.0001), "0.000");
        assert_eq!(format_score(1.25), "-1.250");
        assert_eq!(format_score(-0.5), "0.500");
    }

    #[test]
    fn test_format_nbest_line() {
        let d = Derivation {
            words: Vec::new(),
            hyp: "X Y".to_string(),
            cost: 2.5,
            tree: Some("(ROOT (S X Y))".to_string()),
            model_costs: Some(vec![1.0, 0.5]),
        };
        let mut opts = KBestOptions {
            combined_cost: true,
            ..KBestOptions::default()
        };
        assert_eq!(format_nbest_line(3, &d, &opts), "3 ||| X Y ||| -1.000 -0.500 ||| -2.500");
        opts.combined_cost = false;
        opts.tree = true;
        assert_eq!(format_nbest_line(3, &d, &opts), "3 ||| (ROOT (S X Y)) ||| -1.000 -0.500");
    }
}
