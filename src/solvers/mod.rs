//! Master LP backends.

#[cfg(feature = "gurobi")]
pub mod gurobi;
