//! Exploration algorithms over symbolic zone graphs.

pub mod couvscc;
pub mod covreach;
pub mod graph;
pub mod waiting;

pub use couvscc::{couvscc, run_liveness, run_liveness_refzg, CouvsccStats};
pub use covreach::{covreach, run_reach, run_reach_refzg, Covering, CovreachStats};
pub use graph::{EdgeKind, Graph, NodeId};
pub use waiting::SearchOrder;

use thiserror::Error;

/// Errors of the exploration entry points; step outcomes are never errors.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error(transparent)]
    System(#[from] zonecheck_system::SystemError),

    #[error(transparent)]
    RefZg(#[from] zonecheck_zg::refzg::RefZgError),
}
