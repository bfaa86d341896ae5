use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use crate::grammar::Rule;
use crate::hypergraph::{HyperGraph, ItemId, Span};
use crate::model::ModelError;

use super::cell::{Candidate, Cell};
use super::{ChartStats, Scorer};

/// One grid point: rule rank followed by one rank per antecedent list.
struct CubePoint {
    cost: f64,
    ranks: Box<[usize]>,
    cand: Candidate,
}

impl PartialEq for CubePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CubePoint {}

impl Ord for CubePoint {
    // Reversed: BinaryHeap pops the cheapest point, ties by ranks.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.ranks.cmp(&self.ranks))
    }
}

impl PartialOrd for CubePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Cube<'a> {
    scorer: &'a Scorer<'a>,
    rules: &'a [Arc<Rule>],
    ants: &'a [&'a [ItemId]],
    span: Span,
}

impl Cube<'_> {
    fn point(&self, hg: &HyperGraph, ranks: Box<[usize]>) -> Result<CubePoint, ModelError> {
        let rule = &self.rules[ranks[0]];
        let ant_ids: Vec<ItemId> = self
            .ants
            .iter()
            .zip(&ranks[1..])
            .map(|(list, &r)| list[r])
            .collect();
        let cand = self.scorer.candidate(hg, rule, &ant_ids, self.span)?;
        Ok(CubePoint {
            cost: cand.est_total_cost(),
            ranks,
            cand,
        })
    }

    fn lens(&self) -> Vec<usize> {
        std::iter::once(self.rules.len())
            .chain(self.ants.iter().map(|a| a.len()))
            .collect()
    }
}

/// Best-first enumeration of rule x antecedent combinations for one rule
/// bin. Lists are sorted best first, so the corner is the best guess.
pub(crate) fn cube_prune(
    hg: &mut HyperGraph,
    cell: &mut Cell,
    scorer: &Scorer<'_>,
    rules: &[Arc<Rule>],
    ants: &[&[ItemId]],
    span: Span,
    stats: &mut ChartStats,
) -> Result<(), ModelError> {
    let pruning = scorer.pruning;
    let cube = Cube {
        scorer,
        rules,
        ants,
        span,
    };
    let lens = cube.lens();
    let mut heap = BinaryHeap::new();
    let mut seen: HashSet<Box<[usize]>> = HashSet::new();

    let corner: Box<[usize]> = vec![0; lens.len()].into();
    seen.insert(corner.clone());
    heap.push(cube.point(hg, corner)?);

    let mut popped = 0;
    while let Some(top) = heap.pop() {
        popped += 1;
        let cost = top.cost;
        let ranks = top.ranks;
        cell.add(hg, top.cand, pruning, stats);
        if cost > cell.cut_off() + pruning.fuzz1 {
            stats.fuzz1_pruned += heap.len();
            break;
        }
        if popped >= pruning.max_n_items {
            break;
        }
        for d in 0..lens.len() {
            if ranks[d] + 1 >= lens[d] {
                continue;
            }
            let mut next = ranks.clone();
            next[d] += 1;
            if !seen.insert(next.clone()) {
                continue;
            }
            let point = cube.point(hg, next)?;
            if point.cost < cell.cut_off() + pruning.fuzz2 {
                heap.push(point);
            } else {
                stats.fuzz2_pruned += 1;
            }
        }
    }
    Ok(())
}

/// Every combination, for when cube pruning is disabled.
pub(crate) fn exhaustive(
    hg: &mut HyperGraph,
    cell: &mut Cell,
    scorer: &Scorer<'_>,
    rules: &[Arc<Rule>],
    ants: &[&[ItemId]],
    span: Span,
    stats: &mut ChartStats,
) -> Result<(), ModelError> {
    let cube = Cube {
        scorer,
        rules,
        ants,
        span,
    };
    let lens = cube.lens();
    if lens.contains(&0) {
        return Ok(());
    }
    let mut ranks = vec![0; lens.len()];
    loop {
        let point = cube.point(hg, ranks.clone().into())?;
        cell.add(hg, point.cand, scorer.pruning, stats);
        // odometer increment, last dimension fastest
        let mut d = lens.len();
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            ranks[d] += 1;
            if ranks[d] < lens[d] {
                break;
            }
            ranks[d] = 0;
        }
    }
}
