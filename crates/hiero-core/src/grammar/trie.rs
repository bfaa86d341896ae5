use std::collections::HashMap;
use std::sync::Arc;

use crate::symbol::SymbolId;

use super::rule::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Rules sharing one source pattern, best estimate first once finalized.
#[derive(Debug, Default)]
pub struct RuleBin {
    rules: Vec<Arc<Rule>>,
    arity: usize,
}

impl RuleBin {
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn push(&mut self, rule: Arc<Rule>) {
        self.arity = rule.arity;
        self.rules.push(rule);
    }

    /// Sort by estimate (ties by rule id) and keep at most `max_n_rules`
    /// rules strictly within `threshold` of the best. Returns the number
    /// of rules dropped.
    pub(crate) fn sort_and_prune(&mut self, max_n_rules: usize, threshold: f64) -> usize {
        self.rules
            .sort_by(|a, b| a.est_cost.total_cmp(&b.est_cost).then(a.id.cmp(&b.id)));
        let before = self.rules.len();
        if let Some(best) = self.rules.first().map(|r| r.est_cost) {
            let cut_off = best + threshold;
            let keep = self.rules.partition_point(|r| r.est_cost < cut_off).max(1);
            self.rules.truncate(keep.min(max_n_rules));
        }
        before - self.rules.len()
    }
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<SymbolId, NodeId>,
    bin: Option<RuleBin>,
}

/// Arena trie over source-side symbols. Nonterminal edges are keyed by
/// category, so a single-category grammar gets one wildcard edge per node.
#[derive(Debug)]
pub struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn child(&self, node: NodeId, symbol: SymbolId) -> Option<NodeId> {
        self.nodes[node.0 as usize].children.get(&symbol).copied()
    }

    pub fn has_children(&self, node: NodeId) -> bool {
        !self.nodes[node.0 as usize].children.is_empty()
    }

    pub fn rule_bin(&self, node: NodeId) -> Option<&RuleBin> {
        self.nodes[node.0 as usize]
            .bin
            .as_ref()
            .filter(|b| !b.is_empty())
    }

    /// Walk the whole pattern from the root.
    pub fn lookup(&self, pattern: &[SymbolId]) -> Option<NodeId> {
        pattern
            .iter()
            .try_fold(self.root(), |node, &s| self.child(node, s))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn insert(&mut self, rule: Arc<Rule>) {
        let mut node = self.root();
        for &s in rule.source.iter() {
            node = match self.child(node, s) {
                Some(next) => next,
                None => {
                    let next = NodeId(self.nodes.len() as u32);
                    self.nodes.push(Node::default());
                    self.nodes[node.0 as usize].children.insert(s, next);
                    next
                }
            };
        }
        self.nodes[node.0 as usize]
            .bin
            .get_or_insert_with(RuleBin::default)
            .push(rule);
    }

    pub(crate) fn bins_mut(&mut self) -> impl Iterator<Item = &mut RuleBin> {
        self.nodes.iter_mut().filter_map(|n| n.bin.as_mut())
    }

    pub(crate) fn bins(&self) -> impl Iterator<Item = &RuleBin> {
        self.nodes.iter().filter_map(|n| n.bin.as_ref())
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}
