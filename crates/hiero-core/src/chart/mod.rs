//! Bottom-up CKY chart over one sentence.
//!
//! Spans are processed by increasing width. Each span first extends the
//! partial rule matches of every grammar, then completes the matched rule
//! bins against the finalized cells of narrower spans, then applies unary
//! rules until nothing new appears. Completed cells are read-only.

mod cell;
mod cube;
mod dot;

#[cfg(test)]
mod tests;

use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, debug_span};

use crate::decoder::DecodeError;
use crate::grammar::{Grammar, Rule};
use crate::hypergraph::{Deduction, HyperGraph, ItemId, Span};
use crate::model::{ModelError, ModelSet, ModelState};
use crate::settings::PruningSettings;
use crate::symbol::SymbolId;

use cell::{Added, Candidate, Cell};
use dot::DotChart;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartStats {
    pub added: usize,
    pub merged: usize,
    /// Items dropped from a cell after being added.
    pub pruned: usize,
    /// Candidates rejected before becoming items.
    pub prepruned: usize,
    pub fuzz1_pruned: usize,
    pub fuzz2_pruned: usize,
    pub dot_items: usize,
    pub unary_cycles: usize,
}

/// Item count and best estimate of one non-empty cell.
#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    pub start: usize,
    pub end: usize,
    pub items: usize,
    pub best_cost: f64,
}

pub struct ChartOutput {
    pub hypergraph: HyperGraph,
    pub stats: ChartStats,
    pub cells: Vec<CellSummary>,
}

/// How to cover a word no grammar translates.
#[derive(Debug, Clone, Copy)]
pub struct PassThrough {
    pub lhs: SymbolId,
    pub owner: SymbolId,
}

/// Applies rules to antecedents: stateless cost comes precomputed with the
/// rule, stateful models run their transitions.
pub(crate) struct Scorer<'a> {
    pub models: &'a ModelSet,
    pub pruning: &'a PruningSettings,
}

impl Scorer<'_> {
    pub fn candidate(
        &self,
        hg: &HyperGraph,
        rule: &Arc<Rule>,
        ants: &[ItemId],
        span: Span,
    ) -> Result<Candidate, ModelError> {
        let mut best = rule.stateless_cost;
        for &a in ants {
            best += hg.item(a).best_cost;
        }
        let mut states = vec![ModelState::None; self.models.len()];
        let mut transition = 0.0;
        let mut bonus = 0.0;
        for &m in self.models.stateful() {
            let wm = self.models.get(m);
            let ant_states: Vec<&ModelState> = ants.iter().map(|&a| &hg.item(a).states[m]).collect();
            let t = wm.model.transition(rule, &ant_states, span)?;
            transition += wm.weight * t.cost;
            bonus += wm.weight * t.bonus;
            states[m] = t.state;
        }
        Ok(Candidate {
            lhs: rule.lhs,
            span,
            states: states.into_boxed_slice(),
            bonus,
            deduction: Deduction {
                rule: Some(Arc::clone(rule)),
                antecedents: ants.into(),
                best_cost: best + transition,
                transition_cost: transition,
            },
        })
    }
}

pub struct Chart<'a> {
    sentence: &'a [SymbolId],
    grammars: &'a [Arc<Grammar>],
    models: &'a ModelSet,
    pruning: &'a PruningSettings,
    goal: SymbolId,
    pass_through: Option<PassThrough>,
    hg: HyperGraph,
    cells: Vec<Option<Cell>>,
    dots: Vec<DotChart>,
    stats: ChartStats,
}

impl<'a> Chart<'a> {
    pub fn new(
        sentence: &'a [SymbolId],
        grammars: &'a [Arc<Grammar>],
        models: &'a ModelSet,
        pruning: &'a PruningSettings,
        goal: SymbolId,
        pass_through: Option<PassThrough>,
    ) -> Self {
        let n = sentence.len();
        let dots: Vec<DotChart> = grammars.iter().map(|g| DotChart::new(g, n)).collect();
        let mut cells = Vec::with_capacity((n + 1) * (n + 1));
        cells.resize_with((n + 1) * (n + 1), || None);
        Self {
            sentence,
            grammars,
            models,
            pruning,
            goal,
            pass_through,
            hg: HyperGraph::new(n),
            cells,
            dots,
            stats: ChartStats::default(),
        }
    }

    fn index(&self, i: usize, j: usize) -> usize {
        i * (self.sentence.len() + 1) + j
    }

    /// Fill every span and connect the goal item. `cancel` is polled once
    /// per span.
    pub fn expand(mut self, cancel: Option<&AtomicBool>) -> Result<ChartOutput, DecodeError> {
        let n = self.sentence.len();
        if n == 0 {
            return Err(DecodeError::EmptyInput);
        }
        let _span = debug_span!("chart_expand", n).entered();

        for width in 1..=n {
            for i in 0..=n - width {
                if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                    return Err(DecodeError::Cancelled);
                }
                self.process_span(i, i + width)?;
            }
        }
        self.connect_goal()?;

        let mut cells = Vec::new();
        for i in 0..n {
            for j in i + 1..=n {
                if let Some(cell) = &self.cells[self.index(i, j)] {
                    if cell.len() > 0 {
                        cells.push(CellSummary {
                            start: i,
                            end: j,
                            items: cell.len(),
                            best_cost: cell.best_item_cost(),
                        });
                    }
                }
            }
        }
        debug!(
            items = self.hg.num_items(),
            deductions = self.hg.num_deductions(),
            added = self.stats.added,
            merged = self.stats.merged,
            pruned = self.stats.pruned,
            prepruned = self.stats.prepruned,
            dot_items = self.stats.dot_items,
            "chart expanded"
        );
        Ok(ChartOutput {
            hypergraph: self.hg,
            stats: self.stats,
            cells,
        })
    }

    fn process_span(&mut self, i: usize, j: usize) -> Result<(), DecodeError> {
        let span = Span::new(i, j);
        let mut cell = Cell::new();
        let (sentence, grammars, models, pruning) = (self.sentence, self.grammars, self.models, self.pruning);
        let pass_through = self.pass_through;
        let Chart {
            hg,
            cells,
            dots,
            stats,
            ..
        } = self;
        let scorer = Scorer { models, pruning };

        for (g, dot) in grammars.iter().zip(dots.iter_mut()) {
            stats.dot_items += dot.expand_cell(g, sentence, cells, i, j);
        }

        if j - i == 1 {
            if let Some(pt) = pass_through {
                let word = sentence[i];
                if !grammars.iter().any(|g| g.has_lexical_rule(word)) {
                    let mut rule = Rule::pass_through(word, i, pt.lhs, pt.owner);
                    models.score_rule(&mut rule)?;
                    let cand = scorer.candidate(hg, &Arc::new(rule), &[], span)?;
                    cell.add(hg, cand, pruning, stats);
                }
            }
        }

        let n = sentence.len();
        for (g, dot) in grammars.iter().zip(dots.iter()) {
            if !g.filter_span(i, j) {
                continue;
            }
            for item in dot.at(i, j) {
                let Some(bin) = g.trie().rule_bin(item.node) else {
                    continue;
                };
                if bin.arity() == 0 {
                    for rule in bin.rules() {
                        let cand = scorer.candidate(hg, rule, &[], span)?;
                        cell.add(hg, cand, pruning, stats);
                    }
                    continue;
                }
                let ants: Vec<&[ItemId]> = item
                    .ants
                    .iter()
                    .map(|a| {
                        cells[a.start * (n + 1) + a.end]
                            .as_ref()
                            .map_or(&[][..], |c| c.super_items(a.lhs))
                    })
                    .collect();
                if ants.iter().any(|a| a.is_empty()) {
                    continue;
                }
                if pruning.use_cube_prune {
                    cube::cube_prune(hg, &mut cell, &scorer, bin.rules(), &ants, span, stats)?;
                } else {
                    cube::exhaustive(hg, &mut cell, &scorer, bin.rules(), &ants, span, stats)?;
                }
            }
        }

        unary_closure(hg, &mut cell, &scorer, grammars, span, stats)?;
        cell.finalize(hg);

        for (g, dot) in grammars.iter().zip(dots.iter_mut()) {
            stats.dot_items += dot.start_dot_items(g, &cell, i, j);
        }
        let idx = i * (n + 1) + j;
        cells[idx] = Some(cell);
        Ok(())
    }

    /// One goal item with a deduction per complete goal-symbol item.
    fn connect_goal(&mut self) -> Result<(), DecodeError> {
        let n = self.sentence.len();
        let idx = self.index(0, n);
        let tops: Vec<ItemId> = match &self.cells[idx] {
            Some(cell) => cell.super_items(self.goal).to_vec(),
            None => Vec::new(),
        };
        if tops.is_empty() {
            return Err(DecodeError::NoDerivation);
        }
        let goal = self.hg.add_item(self.goal, Span::new(0, n), Box::new([]), 0.0);
        for top in tops {
            let item = self.hg.item(top);
            let fin = self.models.weighted_final(&item.states)?;
            let best = item.best_cost + fin;
            self.hg.add_deduction(
                goal,
                Deduction {
                    rule: None,
                    antecedents: Box::new([top]),
                    best_cost: best,
                    transition_cost: fin,
                },
            );
        }
        self.hg.set_goal(goal);
        Ok(())
    }
}

/// Agenda entry for unary closure, popped cheapest first.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    cost: f64,
    id: ItemId,
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn pending(hg: &HyperGraph, id: ItemId) -> Pending {
    Pending {
        cost: hg.item(id).est_total_cost(),
        id,
    }
}

/// Apply unary rules to the cell's items until no new item appears.
/// Items are expanded cheapest first; deductions that would close a cycle
/// through same-span items are skipped.
fn unary_closure(
    hg: &mut HyperGraph,
    cell: &mut Cell,
    scorer: &Scorer<'_>,
    grammars: &[Arc<Grammar>],
    span: Span,
    stats: &mut ChartStats,
) -> Result<(), DecodeError> {
    let mut agenda: BinaryHeap<Pending> = cell
        .live_items()
        .into_iter()
        .map(|id| pending(hg, id))
        .collect();
    let mut processed = HashSet::new();
    let mut unary = false;
    while let Some(Pending { id, .. }) = agenda.pop() {
        if !processed.insert(id) || !cell.is_live(id) {
            continue;
        }
        let lhs = hg.item(id).lhs;
        for g in grammars {
            if !g.filter_span(span.start, span.end) {
                continue;
            }
            let trie = g.trie();
            let Some(bin) = trie.child(trie.root(), lhs).and_then(|node| trie.rule_bin(node)) else {
                continue;
            };
            for rule in bin.rules() {
                let cand = scorer.candidate(hg, rule, &[id], span)?;
                if let Some(existing) = cell.lookup(cand.lhs, &cand.states) {
                    if reaches(hg, id, existing, span) {
                        stats.unary_cycles += 1;
                        continue;
                    }
                }
                unary = true;
                match cell.add(hg, cand, scorer.pruning, stats) {
                    Added::New(new_id) => agenda.push(pending(hg, new_id)),
                    // cheaper now; expand at the new cost if not yet expanded
                    Added::Merged(merged) if !processed.contains(&merged) => {
                        agenda.push(pending(hg, merged))
                    }
                    Added::Merged(_) | Added::Pruned => {}
                }
            }
        }
    }
    if unary {
        relax_unary_costs(hg, cell, span, scorer.pruning, stats);
    }
    Ok(())
}

/// Carry cost drops of already expanded items through the same-span
/// deductions that use them, so every item costs what its best deduction
/// costs. Same-span deductions form no cycles, so this terminates.
fn relax_unary_costs(
    hg: &mut HyperGraph,
    cell: &mut Cell,
    span: Span,
    pruning: &PruningSettings,
    stats: &mut ChartStats,
) {
    let ids = cell.live_items();
    let mut lowered = Vec::new();
    loop {
        let mut changed = false;
        for &id in &ids {
            let deductions = hg.item(id).deductions.clone();
            for d in deductions {
                let ded = hg.deduction(d);
                if !ded.antecedents.iter().any(|&a| hg.item(a).span == span) {
                    continue;
                }
                let cost = ded.own_cost()
                    + ded
                        .antecedents
                        .iter()
                        .map(|&a| hg.item(a).best_cost)
                        .sum::<f64>();
                if cost < ded.best_cost - 1e-9 {
                    hg.lower_deduction_cost(id, d, cost);
                    lowered.push(id);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    if !lowered.is_empty() {
        cell.refresh(hg, &lowered, pruning, stats);
    }
}

/// Whether `target` is `from` or derives it through antecedents over the
/// same span.
fn reaches(hg: &HyperGraph, from: ItemId, target: ItemId, span: Span) -> bool {
    let mut stack = vec![from];
    let mut visited = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        for &d in &hg.item(id).deductions {
            for &a in hg.deduction(d).antecedents.iter() {
                if hg.item(a).span == span {
                    stack.push(a);
                }
            }
        }
    }
    false
}
