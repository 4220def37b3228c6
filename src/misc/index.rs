use std::fmt::{Display, Formatter};

// every id is a dense index into an arena owned by the session
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
                hasher.write_u32(self.0)
            }
        }

        impl nohash_hasher::IsEnabled for $name {}

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_index(index: usize) -> Self {
                $name(u32::try_from(index).expect("arena exceeds u32 ids"))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Variable of the original (compact) problem
    OrigVarId, "x");
arena_id!(
    /// Variable of one pricing problem
    PricingVarId, "p");
arena_id!(
    /// Variable of the master problem (column, direct copy or artificial)
    MasterVarId, "λ");
arena_id!(
    /// Node of the branching decision chain
    DecisionId, "d");
arena_id!(
    /// Row of the master LP, handed out by the host LP
    RowId, "r");
arena_id!(
    /// Branch-and-bound node of the host search tree
    NodeHandle, "n");
