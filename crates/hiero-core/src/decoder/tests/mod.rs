use super::*;
use crate::testutil::{test_decoder, test_settings, unigram_arpa, xy_decoder};

const AB_GRAMMAR: &str = "\
[X] ||| a ||| A ||| 1.0
[X] ||| b ||| B ||| 1.0
[X] ||| a b ||| A B ||| 1.0
[X] ||| a b ||| C ||| 3.0
";

fn ab_arpa() -> String {
    unigram_arpa(&[
        ("<s>", -99.0),
        ("</s>", -0.3),
        ("A", -0.4),
        ("B", -0.6),
        ("C", -0.5),
    ])
}

fn seg(line: &str) -> Segment {
    Segment::parse(line, 0)
}

#[test]
fn test_end_to_end_xy() {
    let decoder = xy_decoder(&test_settings());
    let result = decoder.decode(&seg("a b")).unwrap();
    assert_eq!(result.derivations[0].hyp, "X Y");
}

#[test]
fn test_glue_fallback_for_unknown_words() {
    let decoder = xy_decoder(&test_settings());
    let result = decoder.decode(&seg("b q a")).unwrap();
    // nothing translates, every word passes through and glue joins them
    assert_eq!(result.derivations[0].hyp, "b q a");
}

#[test]
fn test_empty_segment_fails() {
    let decoder = xy_decoder(&test_settings());
    assert!(matches!(decoder.decode(&seg("")), Err(DecodeError::EmptyInput)));
}

#[test]
fn test_nbest_monotone() {
    let decoder = test_decoder(AB_GRAMMAR, &ab_arpa(), &test_settings());
    let result = decoder.decode(&seg("a b a b")).unwrap();
    assert!(result.derivations.len() > 3);
    assert!(result
        .derivations
        .windows(2)
        .all(|w| w[0].cost <= w[1].cost + 1e-12));
}

#[test]
fn test_unique_nbest() {
    let mut settings = test_settings();
    let all = test_decoder(AB_GRAMMAR, &ab_arpa(), &settings)
        .decode(&seg("a b"))
        .unwrap();
    assert_eq!(all.derivations.len(), 3);

    settings.nbest.use_unique_nbest = true;
    let unique = test_decoder(AB_GRAMMAR, &ab_arpa(), &settings)
        .decode(&seg("a b"))
        .unwrap();
    let hyps: Vec<&str> = unique.derivations.iter().map(|d| d.hyp.as_str()).collect();
    assert_eq!(hyps, vec!["A B", "C"]);
}

#[test]
fn test_model_costs_match_total() {
    let decoder = test_decoder(AB_GRAMMAR, &ab_arpa(), &test_settings());
    let result = decoder.decode(&seg("a b a")).unwrap();
    let weights = decoder.models().weights();
    for d in &result.derivations {
        let costs = d.model_costs.as_ref().unwrap();
        assert_eq!(costs.len(), weights.len());
        let total: f64 = costs.iter().zip(&weights).map(|(c, w)| c * w).sum();
        assert!((total - d.cost).abs() < 1e-6, "{total} vs {}", d.cost);
    }
}

#[test]
fn test_best_derivation_matches_goal_cost() {
    let decoder = test_decoder(AB_GRAMMAR, &ab_arpa(), &test_settings());
    let result = decoder.decode(&seg("a b a")).unwrap();
    let hg = &result.hypergraph;
    let goal = hg.goal().unwrap();
    assert!((hg.item(goal).best_cost - result.derivations[0].cost).abs() < 1e-9);
}

#[test]
fn test_tree_output() {
    let mut settings = test_settings();
    settings.nbest.use_tree_nbest = true;
    settings.nbest.top_n = 1;
    let decoder = xy_decoder(&settings);
    let result = decoder.decode(&seg("a b")).unwrap();
    assert_eq!(result.derivations[0].tree.as_deref(), Some("(ROOT (S (X X Y)))"));
}

#[test]
fn test_top_n_limits_output() {
    let mut settings = test_settings();
    settings.nbest.top_n = 2;
    let decoder = test_decoder(AB_GRAMMAR, &ab_arpa(), &settings);
    let result = decoder.decode(&seg("a b a b")).unwrap();
    assert_eq!(result.derivations.len(), 2);
}

fn run_batch(threads: usize, segments: &[Segment]) -> (Vec<String>, BatchStats) {
    let decoder = test_decoder(AB_GRAMMAR, &ab_arpa(), &test_settings());
    let options = decoder.kbest_options();
    let mut out = Vec::new();
    let stats = decode_corpus(&decoder, segments, threads, |_, segment, result| {
        let derivations = result.map(|r| r.derivations).unwrap_or_default();
        write_nbest(&mut out, segment.id, &derivations, &options)
    })
    .unwrap();
    let text = String::from_utf8(out).unwrap();
    (text.lines().map(str::to_string).collect(), stats)
}

#[test]
fn test_batch_deterministic_across_thread_counts() {
    let segments: Vec<Segment> = ["a b", "b a", "", "a b a", "q", "a", "b b a", "a a"]
        .iter()
        .enumerate()
        .map(|(i, line)| Segment::parse(line, i as u64))
        .collect();
    let (single, stats) = run_batch(1, &segments);
    assert_eq!(stats.decoded, 7);
    assert_eq!(stats.failed, 1);
    for threads in [2, 3, 8] {
        let (multi, stats) = run_batch(threads, &segments);
        assert_eq!(multi, single);
        assert_eq!(stats.failed, 1);
    }
}

#[test]
fn test_batch_preserves_input_order() {
    let decoder = xy_decoder(&test_settings());
    let segments: Vec<Segment> = (0..20).map(|i| Segment::parse("a b", i)).collect();
    let mut seen = Vec::new();
    decode_corpus(&decoder, &segments, 4, |index, segment, result| {
        assert!(result.is_ok());
        seen.push((index, segment.id));
        Ok(())
    })
    .unwrap();
    let expected: Vec<(usize, u64)> = (0..20).map(|i| (i, i as u64)).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_batch_sink_error_stops() {
    let decoder = xy_decoder(&test_settings());
    let segments: Vec<Segment> = (0..10).map(|i| Segment::parse("a b", i)).collect();
    let mut calls = 0;
    let err = decode_corpus(&decoder, &segments, 3, |_, _, _| {
        calls += 1;
        Err(std::io::Error::other("disk full"))
    })
    .unwrap_err();
    assert_eq!(err.to_string(), "disk full");
    assert_eq!(calls, 1);
}

#[test]
fn test_write_nbest_failed_sentence() {
    let mut out = Vec::new();
    let options = KBestOptions {
        combined_cost: true,
        ..KBestOptions::default()
    };
    write_nbest(&mut out, 4, &[], &options).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "4 |||  |||  ||| 0.000\n");
}

const REORDER_GRAMMAR: &str = "\
[X] ||| x ||| a ||| 1.0
[X] ||| y ||| b ||| 1.0
[X] ||| z ||| c ||| 1.0
[X] ||| x y ||| a b ||| 1.5
[X] ||| [X,1] y ||| b [X,1] ||| 0.5
[X] ||| x [X,1] ||| [X,1] a ||| 0.7
[X] ||| [X,1] z [X,2] ||| [X,2] c [X,1] ||| 0.2
";

#[test]
fn test_trigram_lm_costs_match_flat_scoring() {
    use crate::lm::{ArpaLm, LmScorer};
    use crate::testutil::TEST_ARPA;
    use std::sync::Arc;

    for (left, right) in [(false, false), (true, false), (false, true), (true, true)] {
        let mut settings = test_settings();
        settings.lm.use_left_equivalent_state = left;
        settings.lm.use_right_equivalent_state = right;
        settings.nbest.top_n = 20;
        let decoder = test_decoder(REORDER_GRAMMAR, TEST_ARPA, &settings);
        let symbols = decoder.symbols();
        let flat = LmScorer::new(
            Arc::new(ArpaLm::from_text(TEST_ARPA, symbols, settings.lm.ceiling_cost).unwrap()),
            symbols.bos(),
            symbols.eos(),
            false,
            false,
        );
        let lm_index = decoder
            .models()
            .iter()
            .position(|wm| wm.model.name() == "lm")
            .unwrap();

        let result = decoder.decode(&seg("x y z x y")).unwrap();
        assert!(result.derivations.len() > 1, "left={left} right={right}");
        assert!(result
            .derivations
            .windows(2)
            .all(|w| w[0].cost <= w[1].cost + 1e-9));
        for d in &result.derivations {
            let lm_cost = d.model_costs.as_ref().unwrap()[lm_index];
            let expected = flat.sentence_cost(&d.words).unwrap();
            assert!(
                (lm_cost - expected).abs() < 1e-6,
                "left={left} right={right} '{}': {lm_cost} vs {expected}",
                d.hyp
            );
        }
    }
}
