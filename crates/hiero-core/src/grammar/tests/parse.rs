use crate::grammar::{format_rule, nonterminal_at, RuleId, RuleRecord, SourceToken, TargetToken};
use crate::symbol::{SymbolId, SymbolTable};

#[test]
fn test_parse_lexical_rule() {
    let r = RuleRecord::parse("[X] ||| le chat ||| the cat ||| 0.5 1.25").unwrap();
    assert_eq!(r.lhs, "X");
    assert_eq!(
        r.source,
        vec![
            SourceToken::Word("le".into()),
            SourceToken::Word("chat".into())
        ]
    );
    assert_eq!(
        r.target,
        vec![
            TargetToken::Word("the".into()),
            TargetToken::Word("cat".into())
        ]
    );
    assert_eq!(r.features, vec![0.5, 1.25]);
    assert_eq!(r.arity(), 0);
}

#[test]
fn test_parse_reordering_rule() {
    let r = RuleRecord::parse("[X] ||| [X,1] de [Y,2] ||| [Y,2] of [X,1] ||| 1").unwrap();
    assert_eq!(r.arity(), 2);
    assert_eq!(
        r.target,
        vec![
            TargetToken::Slot(1),
            TargetToken::Word("of".into()),
            TargetToken::Slot(0)
        ]
    );
}

#[test]
fn test_parse_labels_follow_source_order() {
    // source labels out of order: slot indices follow source position
    let r = RuleRecord::parse("[X] ||| [X,2] a [X,1] ||| [X,1] b [X,2] ||| 0").unwrap();
    assert_eq!(
        r.target,
        vec![
            TargetToken::Slot(1),
            TargetToken::Word("b".into()),
            TargetToken::Slot(0)
        ]
    );
}

#[test]
fn test_parse_errors() {
    assert!(RuleRecord::parse("[X] ||| a ||| b").is_err());
    assert!(RuleRecord::parse("X ||| a ||| b ||| 0").is_err());
    assert!(RuleRecord::parse("[X] |||  ||| b ||| 0").is_err());
    assert!(RuleRecord::parse("[X] ||| a ||| b ||| zero").is_err());
    assert!(RuleRecord::parse("[X] ||| [X,1] [X,1] ||| b ||| 0").is_err());
    assert!(RuleRecord::parse("[X] ||| [X,1] a ||| [X,2] ||| 0").is_err());
}

#[test]
fn test_parse_arity_limit() {
    let src: Vec<String> = (1..=9).map(|k| format!("[X,{k}]")).collect();
    let line = format!("[X] ||| {} ||| a ||| 0", src.join(" "));
    let err = RuleRecord::parse(&line).unwrap_err();
    assert!(err.contains("maximum arity"));
}

#[test]
fn test_to_rule_and_format_round_trip() {
    let symbols = SymbolTable::new();
    let line = "[X] ||| [X,1] de [Y,2] ||| [Y,2] of [X,1] ||| 1 2";
    let record = RuleRecord::parse(line).unwrap();
    let id = RuleId {
        grammar: 0,
        index: 3,
    };
    let owner = symbols.intern("pt");
    let rule = record.to_rule(&symbols, id, owner).unwrap();
    assert_eq!(rule.arity, 2);
    assert_eq!(rule.target_word_count(), 1);
    assert_eq!(rule.target[0], SymbolId::placeholder(2));
    assert_eq!(nonterminal_at(&rule, 1), symbols.intern_nonterminal("Y").unwrap());
    assert_eq!(format_rule(&rule, &symbols).unwrap(), line);
    assert_eq!(RuleRecord::from_rule(&rule, &symbols).unwrap(), record);
}

#[test]
fn test_terminal_and_category_namespaces_are_separate() {
    let symbols = SymbolTable::new();
    let record = RuleRecord::parse("[X] ||| X ||| X ||| 0").unwrap();
    let rule = record
        .to_rule(
            &symbols,
            RuleId {
                grammar: 0,
                index: 0,
            },
            symbols.intern("pt"),
        )
        .unwrap();
    assert!(rule.lhs.is_nonterminal());
    assert!(rule.source[0].is_terminal());
    assert_ne!(rule.lhs, rule.source[0]);
}
