//! Symbolic semantics: the zone graph of a network of timed processes.

pub mod clockbounds;
pub mod pool;
pub mod refzg;
pub mod share;
pub mod state;
pub mod syncprod;
pub mod ta;
pub mod ts;
pub mod zg;

pub use refzg::{RefClockKind, RefZg, RefZgError};
pub use state::{Vedge, Vloc, NO_EDGE};
pub use ts::{Sst, StateId, Status, TransId, Ts};
pub use zg::{Extrapolation, Semantics, Zg};
pub use zonecheck_dbm::Bound;
