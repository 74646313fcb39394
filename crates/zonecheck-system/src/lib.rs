//! Discrete model of a network of timed processes.

pub mod decl;
pub mod expr;
pub mod intval;
pub mod model;

pub use decl::SystemDecl;
pub use expr::{ClockConstraint, ClockRel, Guard, IntExpr, IntGuard, Statement, Update};
pub use intval::{ClockReset, EvalEnv, IntVal, StepFault};
pub use model::{System, SystemError, SystemResult};
