pub mod config_ops;
pub mod decode_ops;
pub mod explain_ops;
pub mod grammar_ops;
pub mod lm_ops;
pub mod setup;
