use std::sync::atomic::AtomicBool;

use super::*;
use crate::lm::LmState;
use crate::decoder::{Decoder, Segment};
use crate::settings::Settings;
use crate::testutil::{test_decoder, test_settings, unigram_arpa};

const GRAMMAR: &str = "\
[X] ||| a ||| A ||| 1.0
[X] ||| b ||| B ||| 1.0
[X] ||| c ||| C ||| 1.0
[X] ||| a b ||| A B ||| 1.5
[X] ||| [X,1] c ||| [X,1] C ||| 0.5
[X] ||| a [X,1] ||| [X,1] A ||| 0.7
";

fn arpa() -> String {
    unigram_arpa(&[
        ("<s>", -99.0),
        ("</s>", -0.2),
        ("A", -0.3),
        ("B", -0.4),
        ("C", -0.5),
    ])
}

fn run(decoder: &Decoder, input: &str, cancel: Option<&AtomicBool>) -> Result<ChartOutput, DecodeError> {
    let sentence = decoder.symbols().intern_all(input.split_whitespace());
    let goal = decoder.symbols().intern_nonterminal("S").unwrap();
    let pass_through = Some(PassThrough {
        lhs: decoder.symbols().intern_nonterminal("X").unwrap(),
        owner: decoder.symbols().intern("oov"),
    });
    Chart::new(
        &sentence,
        decoder.grammars(),
        decoder.models(),
        &decoder.settings().pruning,
        goal,
        pass_through,
    )
    .expand(cancel)
}

fn decoder_with(settings: &Settings) -> Decoder {
    test_decoder(GRAMMAR, &arpa(), settings)
}

#[test]
fn test_empty_input() {
    let decoder = decoder_with(&test_settings());
    assert!(matches!(run(&decoder, "", None), Err(DecodeError::EmptyInput)));
}

#[test]
fn test_cancelled_before_first_span() {
    let decoder = decoder_with(&test_settings());
    let flag = AtomicBool::new(true);
    assert!(matches!(
        run(&decoder, "a b c", Some(&flag)),
        Err(DecodeError::Cancelled)
    ));
}

#[test]
fn test_goal_covers_sentence() {
    let decoder = decoder_with(&test_settings());
    let out = run(&decoder, "a b c", None).unwrap();
    let hg = &out.hypergraph;
    let goal = hg.goal().unwrap();
    assert_eq!(hg.item(goal).span, Span::new(0, 3));
    for &d in &hg.item(goal).deductions {
        let ded = hg.deduction(d);
        assert!(ded.rule.is_none());
        assert_eq!(ded.antecedents.len(), 1);
        assert_eq!(hg.item(ded.antecedents[0]).span, Span::new(0, 3));
    }
}

#[test]
fn test_span_coverage() {
    let decoder = decoder_with(&test_settings());
    let out = run(&decoder, "a b c a", None).unwrap();
    let hg = &out.hypergraph;
    for id in hg.reachable() {
        let item = hg.item(id);
        assert!(item.span.end <= 4);
        assert!(!item.deductions.is_empty());
        for &d in &item.deductions {
            let ded = hg.deduction(d);
            let mut covered = 0;
            for &a in ded.antecedents.iter() {
                let ant = hg.item(a).span;
                assert!(item.span.contains(ant));
                covered += ant.len();
            }
            if let Some(rule) = &ded.rule {
                let terminals = rule.source.iter().filter(|s| s.is_terminal()).count();
                assert_eq!(covered + terminals, item.span.len());
            }
        }
    }
}

/// Deductions sorted best first, each item costing its best deduction and
/// each deduction costing its rule plus its antecedents.
fn assert_costs_consistent(hg: &HyperGraph) {
    for (id, item) in hg.items() {
        let costs: Vec<f64> = item
            .deductions
            .iter()
            .map(|&d| hg.deduction(d).best_cost)
            .collect();
        assert!(costs.windows(2).all(|w| w[0] <= w[1]), "unsorted deductions on {id:?}");
        if let Some(&first) = costs.first() {
            assert_eq!(item.best_cost, first, "item {id:?}");
        }
        for &d in &item.deductions {
            let ded = hg.deduction(d);
            let ants: f64 = ded.antecedents.iter().map(|&a| hg.item(a).best_cost).sum();
            assert!(
                (ded.own_cost() + ants - ded.best_cost).abs() < 1e-9,
                "deduction {d:?} on {id:?} stored {} recomputed {}",
                ded.best_cost,
                ded.own_cost() + ants
            );
        }
    }
}

#[test]
fn test_deductions_best_first_and_costs_consistent() {
    let decoder = decoder_with(&test_settings());
    let out = run(&decoder, "a b c", None).unwrap();
    assert_costs_consistent(&out.hypergraph);
}

#[test]
fn test_unary_consumers_see_cheaper_antecedent() {
    // X is first built from `a` at cost 3, then more cheaply through W -> Y -> X.
    let grammar = "\
[W] ||| a ||| B ||| 2.0
[X] ||| a ||| A ||| 3.0
[Y] ||| [W,1] ||| [W,1] ||| 0.0
[X] ||| [Y,1] ||| [Y,1] ||| 0.0
";
    let arpa = unigram_arpa(&[("<s>", -99.0), ("</s>", -0.2), ("A", -0.3), ("B", -0.3)]);
    let decoder = test_decoder(grammar, &arpa, &test_settings());
    let result = decoder.decode(&Segment::parse("a", 0)).unwrap();
    let hg = &result.hypergraph;

    assert_costs_consistent(hg);
    let best = &result.derivations[0];
    assert_eq!(best.hyp, "B");
    let goal = hg.item(hg.goal().unwrap()).best_cost;
    assert!((goal - best.cost).abs() < 1e-9, "goal {goal} vs best derivation {}", best.cost);
}

#[test]
fn test_no_derivation_without_pass_through() {
    let decoder = decoder_with(&test_settings());
    let sentence = decoder.symbols().intern_all(["a", "zzz"]);
    let goal = decoder.symbols().intern_nonterminal("S").unwrap();
    let result = Chart::new(
        &sentence,
        decoder.grammars(),
        decoder.models(),
        &decoder.settings().pruning,
        goal,
        None,
    )
    .expand(None);
    assert!(matches!(result, Err(DecodeError::NoDerivation)));
}

#[test]
fn test_pass_through_covers_unknown_word() {
    let decoder = decoder_with(&test_settings());
    let out = run(&decoder, "a zzz", None).unwrap();
    let hg = &out.hypergraph;
    let oov = hg.reachable().into_iter().any(|id| {
        hg.item(id).deductions.iter().any(|&d| {
            hg.deduction(d)
                .rule
                .as_ref()
                .is_some_and(|r| r.is_pass_through())
        })
    });
    assert!(oov);
}

fn candidate(lhs: SymbolId, cost: f64, tag: u32) -> Candidate {
    let state = LmState::Open(vec![SymbolId(10_000 + tag)].into_boxed_slice());
    Candidate {
        lhs,
        span: Span::new(0, 1),
        states: vec![ModelState::Lm(state)].into_boxed_slice(),
        bonus: 0.0,
        deduction: Deduction {
            rule: None,
            antecedents: Box::new([]),
            best_cost: cost,
            transition_cost: 0.0,
        },
    }
}

#[test]
fn test_cell_beam_threshold_and_merge() {
    let mut pruning = test_settings().pruning;
    pruning.max_n_items = 2;
    pruning.relative_threshold = 10.0;
    let x = SymbolId(5);
    let mut hg = HyperGraph::new(1);
    let mut stats = ChartStats::default();
    let mut cell = Cell::new();

    let Added::New(worst) = cell.add(&mut hg, candidate(x, 3.0, 1), &pruning, &mut stats) else {
        panic!("expected a new item");
    };
    let Added::New(best) = cell.add(&mut hg, candidate(x, 1.0, 2), &pruning, &mut stats) else {
        panic!("expected a new item");
    };
    let Added::New(middle) = cell.add(&mut hg, candidate(x, 2.0, 3), &pruning, &mut stats) else {
        panic!("expected a new item");
    };
    assert!(!cell.is_live(worst));
    assert!(cell.is_live(best) && cell.is_live(middle));
    assert_eq!(stats.pruned, 1);

    // beyond best + relative_threshold
    assert!(matches!(
        cell.add(&mut hg, candidate(x, 20.0, 4), &pruning, &mut stats),
        Added::Pruned
    ));
    assert_eq!(stats.prepruned, 1);

    // same signature as `best`
    assert!(matches!(
        cell.add(&mut hg, candidate(x, 0.5, 2), &pruning, &mut stats),
        Added::Merged(id) if id == best
    ));
    assert_eq!(hg.item(best).best_cost, 0.5);
    assert_eq!(hg.item(best).deductions.len(), 2);
    assert_eq!(cell.cut_off(), 10.5);

    cell.finalize(&hg);
    assert_eq!(cell.sorted(), &[best, middle]);
    assert_eq!(cell.super_items(x), &[best, middle]);
    assert_eq!(cell.super_lhs().collect::<Vec<_>>(), vec![x]);
}

#[test]
fn test_exhaustive_finds_same_best() {
    let cube = decoder_with(&test_settings());
    let mut settings = test_settings();
    settings.pruning.use_cube_prune = false;
    let exhaustive = decoder_with(&settings);
    let a = run(&cube, "a b c a", None).unwrap();
    let b = run(&exhaustive, "a b c a", None).unwrap();
    let best = |o: &ChartOutput| o.hypergraph.item(o.hypergraph.goal().unwrap()).best_cost;
    assert!((best(&a) - best(&b)).abs() < 1e-9);
}

#[test]
fn test_unary_cycle_is_cut() {
    let grammar = "\
[X] ||| a ||| A ||| 1.0
[X] ||| [Y,1] ||| [Y,1] ||| 0.0
[Y] ||| [X,1] ||| [X,1] ||| 0.0
";
    let decoder = test_decoder(grammar, &arpa(), &test_settings());
    let out = run(&decoder, "a", None).unwrap();
    assert!(out.stats.unary_cycles > 0);
    assert!(out.hypergraph.goal().is_some());
}

#[test]
fn test_deterministic_across_runs() {
    let decoder = decoder_with(&test_settings());
    let first = run(&decoder, "a b c a b", None).unwrap();
    for _ in 0..5 {
        let again = run(&decoder, "a b c a b", None).unwrap();
        assert_eq!(first.hypergraph.num_items(), again.hypergraph.num_items());
        assert_eq!(first.hypergraph.num_deductions(), again.hypergraph.num_deductions());
        let g1 = first.hypergraph.item(first.hypergraph.goal().unwrap()).best_cost;
        let g2 = again.hypergraph.item(again.hypergraph.goal().unwrap()).best_cost;
        assert_eq!(g1, g2);
    }
}
