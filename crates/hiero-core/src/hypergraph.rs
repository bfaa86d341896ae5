//! Packed forest of derivations for one sentence.
//!
//! Items and deductions live in arenas and refer to each other by index;
//! items pruned from the chart stay in the arena but become unreachable
//! from the goal.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::grammar::Rule;
use crate::model::ModelState;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeductionId(pub u32);

/// Half-open source span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct Item {
    pub lhs: SymbolId,
    pub span: Span,
    /// One state per model, indexed by model id.
    pub states: Box<[ModelState]>,
    /// Best first.
    pub deductions: Vec<DeductionId>,
    pub best_cost: f64,
    /// Future-cost estimate added for pruning.
    pub bonus: f64,
}

impl Item {
    /// Cost used to rank and prune items within a cell.
    pub fn est_total_cost(&self) -> f64 {
        self.best_cost + self.bonus
    }
}

#[derive(Debug, Clone)]
pub struct Deduction {
    /// `None` for deductions of the goal item.
    pub rule: Option<Arc<Rule>>,
    /// Ordered by source nonterminal position.
    pub antecedents: Box<[ItemId]>,
    pub best_cost: f64,
    /// Weighted stateful cost (the final transition for goal deductions).
    pub transition_cost: f64,
}

impl Deduction {
    /// Cost contributed by this hyperedge alone.
    pub fn own_cost(&self) -> f64 {
        self.rule.as_ref().map_or(0.0, |r| r.stateless_cost) + self.transition_cost
    }

    /// Lower cost first, then rule id, then antecedent ids.
    pub fn rank_cmp(&self, other: &Deduction) -> Ordering {
        self.best_cost
            .total_cmp(&other.best_cost)
            .then_with(|| {
                let a = self.rule.as_ref().map(|r| r.id);
                let b = other.rule.as_ref().map(|r| r.id);
                a.cmp(&b)
            })
            .then_with(|| self.antecedents.cmp(&other.antecedents))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HyperGraphStats {
    pub items: usize,
    pub deductions: usize,
}

#[derive(Debug, Default)]
pub struct HyperGraph {
    items: Vec<Item>,
    deductions: Vec<Deduction>,
    goal: Option<ItemId>,
    sentence_len: usize,
}

impl HyperGraph {
    pub fn new(sentence_len: usize) -> Self {
        Self {
            sentence_len,
            ..Self::default()
        }
    }

    pub fn sentence_len(&self) -> usize {
        self.sentence_len
    }

    pub fn add_item(&mut self, lhs: SymbolId, span: Span, states: Box<[ModelState]>, bonus: f64) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        self.items.push(Item {
            lhs,
            span,
            states,
            deductions: Vec::new(),
            best_cost: f64::INFINITY,
            bonus,
        });
        id
    }

    /// Attach a deduction, keeping the item's list best first.
    pub fn add_deduction(&mut self, item: ItemId, deduction: Deduction) -> DeductionId {
        debug_assert!(deduction
            .antecedents
            .iter()
            .all(|a| self.items[item.0 as usize].span.contains(self.items[a.0 as usize].span)));
        let id = DeductionId(self.deductions.len() as u32);
        let best = deduction.best_cost;
        self.deductions.push(deduction);

        let deductions = &self.deductions;
        let new = &deductions[id.0 as usize];
        let target = &mut self.items[item.0 as usize];
        let pos = target
            .deductions
            .partition_point(|&d| deductions[d.0 as usize].rank_cmp(new) != Ordering::Greater);
        target.deductions.insert(pos, id);
        if best < target.best_cost {
            target.best_cost = best;
        }
        id
    }

    /// Lower the cost of one of `item`'s deductions after an antecedent
    /// improved, restoring best-first order and the item's best cost.
    pub fn lower_deduction_cost(&mut self, item: ItemId, ded: DeductionId, best_cost: f64) {
        self.deductions[ded.0 as usize].best_cost = best_cost;
        let deductions = &self.deductions;
        let target = &mut self.items[item.0 as usize];
        target
            .deductions
            .sort_by(|a, b| deductions[a.0 as usize].rank_cmp(&deductions[b.0 as usize]));
        target.best_cost = target
            .deductions
            .first()
            .map_or(f64::INFINITY, |d| deductions[d.0 as usize].best_cost);
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0 as usize]
    }

    pub fn deduction(&self, id: DeductionId) -> &Deduction {
        &self.deductions[id.0 as usize]
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (ItemId(i as u32), item))
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_deductions(&self) -> usize {
        self.deductions.len()
    }

    pub fn goal(&self) -> Option<ItemId> {
        self.goal
    }

    pub fn set_goal(&mut self, goal: ItemId) {
        self.goal = Some(goal);
    }

    /// Items reachable from the goal, antecedents before consequents.
    pub fn reachable(&self) -> Vec<ItemId> {
        let Some(goal) = self.goal else {
            return Vec::new();
        };
        let mut order = Vec::new();
        let mut visited = vec![false; self.items.len()];
        // (item, next deduction index, next antecedent index)
        let mut stack = vec![(goal, 0usize, 0usize)];
        visited[goal.0 as usize] = true;
        while let Some(top) = stack.last_mut() {
            let (item, d, a) = *top;
            let deds = &self.items[item.0 as usize].deductions;
            if d == deds.len() {
                order.push(item);
                stack.pop();
                continue;
            }
            let ants = &self.deductions[deds[d].0 as usize].antecedents;
            if a == ants.len() {
                top.1 += 1;
                top.2 = 0;
                continue;
            }
            top.2 += 1;
            let ant = ants[a];
            if !visited[ant.0 as usize] {
                visited[ant.0 as usize] = true;
                stack.push((ant, 0, 0));
            }
        }
        order
    }

    pub fn stats(&self) -> HyperGraphStats {
        HyperGraphStats {
            items: self.items.len(),
            deductions: self.deductions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ded(cost: f64, ants: &[u32]) -> Deduction {
        Deduction {
            rule: None,
            antecedents: ants.iter().map(|&a| ItemId(a)).collect(),
            best_cost: cost,
            transition_cost: 0.0,
        }
    }

    #[test]
    fn test_deductions_sorted_best_first() {
        let mut hg = HyperGraph::new(2);
        let a = hg.add_item(SymbolId(8), Span::new(0, 1), Box::new([]), 0.0);
        let b = hg.add_item(SymbolId(8), Span::new(1, 2), Box::new([]), 0.0);
        let top = hg.add_item(SymbolId(9), Span::new(0, 2), Box::new([]), 0.5);
        hg.add_deduction(top, ded(3.0, &[a.0, b.0]));
        hg.add_deduction(top, ded(1.0, &[b.0]));
        hg.add_deduction(top, ded(2.0, &[a.0]));
        let costs: Vec<f64> = hg
            .item(top)
            .deductions
            .iter()
            .map(|&d| hg.deduction(d).best_cost)
            .collect();
        assert_eq!(costs, vec![1.0, 2.0, 3.0]);
        assert_eq!(hg.item(top).best_cost, 1.0);
        assert_eq!(hg.item(top).est_total_cost(), 1.5);
    }

    #[test]
    fn test_equal_cost_ties_by_antecedents() {
        let mut hg = HyperGraph::new(2);
        let a = hg.add_item(SymbolId(8), Span::new(0, 2), Box::new([]), 0.0);
        let b = hg.add_item(SymbolId(8), Span::new(0, 2), Box::new([]), 0.0);
        let top = hg.add_item(SymbolId(9), Span::new(0, 2), Box::new([]), 0.0);
        hg.add_deduction(top, ded(1.0, &[b.0]));
        hg.add_deduction(top, ded(1.0, &[a.0]));
        let first = hg.item(top).deductions[0];
        assert_eq!(&*hg.deduction(first).antecedents, &[a]);
    }

    #[test]
    fn test_reachable_is_topological() {
        let mut hg = HyperGraph::new(2);
        let a = hg.add_item(SymbolId(8), Span::new(0, 1), Box::new([]), 0.0);
        let b = hg.add_item(SymbolId(8), Span::new(1, 2), Box::new([]), 0.0);
        let _orphan = hg.add_item(SymbolId(8), Span::new(1, 2), Box::new([]), 0.0);
        let top = hg.add_item(SymbolId(9), Span::new(0, 2), Box::new([]), 0.0);
        hg.add_deduction(a, ded(0.0, &[]));
        hg.add_deduction(b, ded(0.0, &[]));
        hg.add_deduction(top, ded(1.0, &[a.0, b.0]));
        hg.set_goal(top);
        assert_eq!(hg.reachable(), vec![a, b, top]);
    }
}
