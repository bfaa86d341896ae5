#[cfg(not(target_endian = "little"))]
compile_error!("hiero-core requires a little-endian platform");

pub mod chart;
pub mod decoder;
pub mod disk_hg;
pub mod explain;
pub mod grammar;
pub mod hypergraph;
pub mod kbest;
pub mod lm;
pub mod model;
pub mod settings;
pub mod symbol;
#[cfg(test)]
pub(crate) mod testutil;
