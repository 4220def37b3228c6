mod hashmap;
mod index;
pub mod node_queue;

pub use hashmap::*;
pub use index::*;
