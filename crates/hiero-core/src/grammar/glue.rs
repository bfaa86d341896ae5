use std::f64::consts::LOG10_E;

use crate::model::ModelSet;
use crate::settings::Settings;
use crate::symbol::SymbolTable;

use super::{records_from_text, Grammar, GrammarError, LoadOptions};

/// Build the two-rule glue grammar that concatenates partial translations
/// left to right:
///
/// ```text
/// [S] ||| [X,1] ||| [X,1] ||| 0
/// [S] ||| [S,1] [X,2] ||| [S,1] [X,2] ||| log10(e)
/// ```
pub fn glue_grammar(
    symbols: &SymbolTable,
    models: &ModelSet,
    settings: &Settings,
) -> Result<Grammar, GrammarError> {
    let goal = &settings.grammar.goal_symbol;
    let x = &settings.grammar.default_non_terminal;
    let text = format!(
        "[{goal}] ||| [{x},1] ||| [{x},1] ||| 0\n\
         [{goal}] ||| [{goal},1] [{x},2] ||| [{goal},1] [{x},2] ||| {LOG10_E}\n"
    );
    Grammar::from_records(
        records_from_text(&text)?,
        symbols,
        models,
        &LoadOptions::glue(settings),
    )
}
