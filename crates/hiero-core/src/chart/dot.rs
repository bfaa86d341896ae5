use crate::grammar::{Grammar, NodeId};
use crate::symbol::SymbolId;

use super::cell::Cell;

/// A completed super-item consumed by a dot item: lhs over `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SuperRef {
    pub start: usize,
    pub end: usize,
    pub lhs: SymbolId,
}

/// A partial match of some rule source: a trie node plus the super-items
/// matched by its nonterminals so far.
#[derive(Debug, Clone)]
pub(crate) struct DotItem {
    pub node: NodeId,
    pub ants: Vec<SuperRef>,
}

/// Partial matches of one grammar, per span.
pub(crate) struct DotChart {
    n: usize,
    cells: Vec<Vec<DotItem>>,
}

impl DotChart {
    /// Seed a root dot item at every position the grammar may start from.
    pub fn new(grammar: &Grammar, n: usize) -> Self {
        let mut chart = Self {
            n,
            cells: vec![Vec::new(); (n + 1) * (n + 1)],
        };
        for i in 0..n {
            if grammar.filter_span(i, i) {
                chart.cells[i * (n + 1) + i].push(DotItem {
                    node: grammar.trie().root(),
                    ants: Vec::new(),
                });
            }
        }
        chart
    }

    pub fn at(&self, i: usize, j: usize) -> &[DotItem] {
        &self.cells[i * (self.n + 1) + j]
    }

    fn extend(&mut self, i: usize, j: usize, items: Vec<DotItem>) -> usize {
        let added = items.len();
        self.cells[i * (self.n + 1) + j].extend(items);
        added
    }

    /// Extend partial matches ending before `j` to end at `j`: by the word
    /// at `j - 1`, or by a finalized super-item over `[k, j)`.
    pub fn expand_cell(
        &mut self,
        grammar: &Grammar,
        sentence: &[SymbolId],
        cells: &[Option<Cell>],
        i: usize,
        j: usize,
    ) -> usize {
        if !grammar.filter_span(i, j) {
            return 0;
        }
        let trie = grammar.trie();
        let mut new_items = Vec::new();

        let word = sentence[j - 1];
        for dot in self.at(i, j - 1) {
            if let Some(node) = trie.child(dot.node, word) {
                new_items.push(DotItem {
                    node,
                    ants: dot.ants.clone(),
                });
            }
        }

        for k in i + 1..j {
            let Some(cell) = cells[k * (self.n + 1) + j].as_ref() else {
                continue;
            };
            for dot in self.at(i, k) {
                for lhs in cell.super_lhs() {
                    if let Some(node) = trie.child(dot.node, lhs) {
                        let mut ants = dot.ants.clone();
                        ants.push(SuperRef { start: k, end: j, lhs });
                        new_items.push(DotItem { node, ants });
                    }
                }
            }
        }
        self.extend(i, j, new_items)
    }

    /// Start new partial matches whose first symbol is a super-item of the
    /// just-finalized cell `[i, j)`. Nodes with nothing to extend are
    /// skipped; their rules are unary and handled by the closure.
    pub fn start_dot_items(&mut self, grammar: &Grammar, cell: &Cell, i: usize, j: usize) -> usize {
        if !grammar.filter_span(i, j) {
            return 0;
        }
        let trie = grammar.trie();
        let mut new_items = Vec::new();
        for dot in self.at(i, i) {
            for lhs in cell.super_lhs() {
                if let Some(node) = trie.child(dot.node, lhs) {
                    if trie.has_children(node) {
                        let mut ants = dot.ants.clone();
                        ants.push(SuperRef { start: i, end: j, lhs });
                        new_items.push(DotItem { node, ants });
                    }
                }
            }
        }
        self.extend(i, j, new_items)
    }
}
