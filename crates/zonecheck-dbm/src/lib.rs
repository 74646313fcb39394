//! Difference bound matrices for zone-based analysis of timed automata.

pub mod db;
pub mod dbm;
pub mod refdbm;

pub use db::{Bound, Db, Relation, NO_BOUND};
pub use dbm::Dbm;
pub use refdbm::{RefClocks, RefDbm, UNBOUNDED_SPREAD};
