use serde::Serialize;

use crate::chart::{CellSummary, ChartStats};
use crate::decoder::{DecodeError, Decoder, Segment};
use crate::hypergraph::HyperGraphStats;
use crate::kbest::{Derivation, KBestOptions};

/// Full diagnostic result for one sentence.
#[derive(Debug, Serialize)]
pub struct ExplainResult {
    pub id: u64,
    pub input: String,
    pub stats: ChartStats,
    pub hypergraph: HyperGraphStats,
    pub cells: Vec<CellSummary>,
    pub derivations: Vec<ExplainDerivation>,
}

/// One derivation with its cost broken down per model.
#[derive(Debug, Serialize)]
pub struct ExplainDerivation {
    pub rank: usize,
    pub hyp: String,
    pub tree: String,
    pub cost: f64,
    pub models: Vec<ExplainModelCost>,
}

#[derive(Debug, Serialize)]
pub struct ExplainModelCost {
    pub name: String,
    pub weight: f64,
    pub cost: f64,
    /// `weight * cost`.
    pub weighted: f64,
}

fn explain_derivation(decoder: &Decoder, rank: usize, d: Derivation) -> ExplainDerivation {
    let models = decoder
        .models()
        .iter()
        .zip(d.model_costs.unwrap_or_default())
        .map(|(wm, cost)| ExplainModelCost {
            name: wm.model.name().to_string(),
            weight: wm.weight,
            cost,
            weighted: wm.weight * cost,
        })
        .collect();
    ExplainDerivation {
        rank,
        hyp: d.hyp,
        tree: d.tree.unwrap_or_default(),
        cost: d.cost,
        models,
    }
}

/// Decode one segment and capture chart statistics plus the top `n`
/// derivations with trees and per-model costs.
pub fn explain(decoder: &Decoder, segment: &Segment, n: usize) -> Result<ExplainResult, DecodeError> {
    let options = KBestOptions {
        tree: true,
        features: true,
        ..decoder.kbest_options()
    };
    let result = decoder.decode_with_options(segment, None, options, n)?;
    let derivations = result
        .derivations
        .into_iter()
        .enumerate()
        .map(|(i, d)| explain_derivation(decoder, i + 1, d))
        .collect();
    Ok(ExplainResult {
        id: segment.id,
        input: segment.words.join(" "),
        stats: result.stats,
        hypergraph: result.hypergraph.stats(),
        cells: result.cells,
        derivations,
    })
}

/// Format an ExplainResult as human-readable text.
pub fn format_text(result: &ExplainResult) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "=== Chart for \"{}\" ({} items, {} deductions) ===\n",
        result.input, result.hypergraph.items, result.hypergraph.deductions,
    ));
    let s = &result.stats;
    out.push_str(&format!(
        "  added={} merged={} pruned={} prepruned={} fuzz1={} fuzz2={} dots={} unary_cycles={}\n",
        s.added, s.merged, s.pruned, s.prepruned, s.fuzz1_pruned, s.fuzz2_pruned, s.dot_items, s.unary_cycles,
    ));

    // Group cells by width
    let max_width = result.cells.iter().map(|c| c.end - c.start).max().unwrap_or(0);
    for width in 1..=max_width {
        let cells: Vec<&CellSummary> = result
            .cells
            .iter()
            .filter(|c| c.end - c.start == width)
            .collect();
        if cells.is_empty() {
            continue;
        }
        out.push_str(&format!("  Width {}:\n", width));
        for c in cells {
            out.push_str(&format!(
                "    [{},{}) items={:<4} best={:.3}\n",
                c.start, c.end, c.items, c.best_cost,
            ));
        }
    }

    if result.derivations.is_empty() {
        out.push_str("\nNo derivations found.\n");
        return out;
    }

    out.push_str(&format!("\n=== Derivations ({}) ===\n", result.derivations.len()));
    for d in &result.derivations {
        out.push_str(&format!("\n  #{:<2} {}  (cost={:.3})\n", d.rank, d.hyp, d.cost));
        out.push_str(&format!("    tree: {}\n", d.tree));
        for m in &d.models {
            out.push_str(&format!(
                "    {:<22} cost={:<9.3} weight={:<7.3} -> {:.3}\n",
                m.name, m.cost, m.weight, m.weighted,
            ));
        }
    }

    out
}
