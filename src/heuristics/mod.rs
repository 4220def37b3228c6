//! Primal heuristics working on the master LP.

mod diving;

pub use diving::DivingHeuristic;
