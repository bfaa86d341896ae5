use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crate::hypergraph::{Deduction, HyperGraph, ItemId, Span};
use crate::model::ModelState;
use crate::settings::PruningSettings;
use crate::symbol::SymbolId;

use super::ChartStats;

/// A scored rule application not yet placed in a cell.
pub(crate) struct Candidate {
    pub lhs: SymbolId,
    pub span: Span,
    pub states: Box<[ModelState]>,
    pub bonus: f64,
    pub deduction: Deduction,
}

impl Candidate {
    pub fn est_total_cost(&self) -> f64 {
        self.deduction.best_cost + self.bonus
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    lhs: SymbolId,
    states: Box<[ModelState]>,
}

/// Heap entry ordered worst first: higher cost, then later item.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ranked {
    cost: f64,
    id: ItemId,
}

impl Eq for Ranked {}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost.total_cmp(&other.cost).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) enum Added {
    New(ItemId),
    Merged(ItemId),
    Pruned,
}

/// Items over one span. While the span is being built, items are merged by
/// signature and pruned by beam size and threshold; once finalized the cell
/// is read-only and grouped by left-hand side.
pub(crate) struct Cell {
    index: HashMap<Signature, ItemId>,
    live: HashMap<ItemId, f64>,
    worst: BinaryHeap<Ranked>,
    best_item_cost: f64,
    cut_off: f64,
    sorted: Vec<ItemId>,
    super_items: BTreeMap<SymbolId, Vec<ItemId>>,
}

impl Cell {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            live: HashMap::new(),
            worst: BinaryHeap::new(),
            best_item_cost: f64::INFINITY,
            cut_off: f64::INFINITY,
            sorted: Vec::new(),
            super_items: BTreeMap::new(),
        }
    }

    pub fn cut_off(&self) -> f64 {
        self.cut_off
    }

    pub fn best_item_cost(&self) -> f64 {
        self.best_item_cost
    }

    pub fn is_live(&self, id: ItemId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn lookup(&self, lhs: SymbolId, states: &[ModelState]) -> Option<ItemId> {
        let sig = Signature {
            lhs,
            states: states.into(),
        };
        self.index.get(&sig).copied()
    }

    /// Live items in creation order.
    pub fn live_items(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn add(
        &mut self,
        hg: &mut HyperGraph,
        cand: Candidate,
        pruning: &PruningSettings,
        stats: &mut ChartStats,
    ) -> Added {
        let est = cand.est_total_cost();
        if est >= self.cut_off {
            stats.prepruned += 1;
            return Added::Pruned;
        }
        let sig = Signature {
            lhs: cand.lhs,
            states: cand.states,
        };
        let added = match self.index.get(&sig) {
            Some(&id) => {
                hg.add_deduction(id, cand.deduction);
                stats.merged += 1;
                let new_est = hg.item(id).est_total_cost();
                if self.live.get(&id).is_some_and(|&old| new_est < old) {
                    self.live.insert(id, new_est);
                    self.worst.push(Ranked { cost: new_est, id });
                }
                Added::Merged(id)
            }
            None => {
                let id = hg.add_item(sig.lhs, cand.span, sig.states.clone(), cand.bonus);
                hg.add_deduction(id, cand.deduction);
                stats.added += 1;
                self.index.insert(sig, id);
                self.live.insert(id, est);
                self.worst.push(Ranked { cost: est, id });
                Added::New(id)
            }
        };
        if est < self.best_item_cost {
            self.best_item_cost = est;
            self.cut_off = est + pruning.relative_threshold;
        }
        self.prune(hg, pruning, stats);
        added
    }

    /// Re-rank items whose best cost dropped after they were added, then
    /// prune again.
    pub fn refresh(
        &mut self,
        hg: &HyperGraph,
        ids: &[ItemId],
        pruning: &PruningSettings,
        stats: &mut ChartStats,
    ) {
        for &id in ids {
            let est = hg.item(id).est_total_cost();
            if self.live.get(&id).is_some_and(|&old| est < old) {
                self.live.insert(id, est);
                self.worst.push(Ranked { cost: est, id });
                if est < self.best_item_cost {
                    self.best_item_cost = est;
                    self.cut_off = est + pruning.relative_threshold;
                }
            }
        }
        self.prune(hg, pruning, stats);
    }

    /// Drop items beyond the beam size or the threshold, worst first.
    fn prune(&mut self, hg: &HyperGraph, pruning: &PruningSettings, stats: &mut ChartStats) {
        while let Some(&top) = self.worst.peek() {
            if self.live.get(&top.id) != Some(&top.cost) {
                self.worst.pop();
                continue;
            }
            if self.live.len() <= pruning.max_n_items && top.cost < self.cut_off {
                break;
            }
            self.worst.pop();
            self.live.remove(&top.id);
            let item = hg.item(top.id);
            let sig = Signature {
                lhs: item.lhs,
                states: item.states.clone(),
            };
            self.index.remove(&sig);
            stats.pruned += 1;
        }
    }

    /// Sort live items by estimated cost and group them by left-hand side.
    pub fn finalize(&mut self, hg: &HyperGraph) {
        let mut ranked: Vec<Ranked> = self
            .live
            .iter()
            .map(|(&id, &cost)| Ranked { cost, id })
            .collect();
        ranked.sort_unstable();
        self.sorted = ranked.iter().map(|r| r.id).collect();
        self.super_items.clear();
        for r in &ranked {
            self.super_items
                .entry(hg.item(r.id).lhs)
                .or_default()
                .push(r.id);
        }
        self.index.clear();
        self.worst.clear();
    }

    #[cfg(test)]
    pub fn sorted(&self) -> &[ItemId] {
        &self.sorted
    }

    pub fn super_items(&self, lhs: SymbolId) -> &[ItemId] {
        self.super_items.get(&lhs).map_or(&[], |v| v.as_slice())
    }

    pub fn super_lhs(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.super_items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }
}
