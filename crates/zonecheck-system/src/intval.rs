//! Integer variable valuations and evaluation of guards and statements.
//!
//! A valuation is an immutable vector of variable values behind an `Arc`;
//! cloning a valuation is a reference-count bump. Executing a statement
//! produces a fresh valuation (or a fault) together with the clock resets
//! the statement performs, evaluated against the store as it stood when the
//! reset was reached.

use crate::expr::{IntExpr, IntGuard, IntOp, RelOp, Statement, Update};
use crate::model::System;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Faults raised while evaluating expressions or executing statements.
/// These are ordinary step outcomes, not errors of the checker itself.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StepFault {
    #[error("variable {var} assigned out-of-bounds value {value}")]
    OutOfBounds { var: usize, value: i32 },

    #[error("division by zero")]
    DivisionByZero,
}

/// A clock reset with its value already evaluated: `clock := from + value`,
/// where `from` of `None` means a reset to the constant `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReset {
    pub clock: usize,
    pub from: Option<usize>,
    pub value: i32,
}

/// Evaluation environment: the current store plus the parameter constants.
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub vars: &'a [i32],
    pub params: &'a [i32],
}

/// Evaluate an integer expression.
pub fn eval_int(e: &IntExpr, env: EvalEnv) -> Result<i32, StepFault> {
    match e {
        IntExpr::Const(n) => Ok(*n),
        IntExpr::Var(v) => Ok(env.vars[*v]),
        IntExpr::Param(p) => Ok(env.params[*p]),
        IntExpr::Neg(inner) => Ok(eval_int(inner, env)?.wrapping_neg()),
        IntExpr::Binary { op, left, right } => {
            let l = eval_int(left, env)?;
            let r = eval_int(right, env)?;
            match op {
                IntOp::Add => Ok(l.wrapping_add(r)),
                IntOp::Sub => Ok(l.wrapping_sub(r)),
                IntOp::Mul => Ok(l.wrapping_mul(r)),
                IntOp::Div => {
                    if r == 0 {
                        Err(StepFault::DivisionByZero)
                    } else {
                        Ok(l.wrapping_div(r))
                    }
                }
                IntOp::Mod => {
                    if r == 0 {
                        Err(StepFault::DivisionByZero)
                    } else {
                        Ok(l.wrapping_rem(r))
                    }
                }
            }
        }
    }
}

/// Evaluate a conjunction of integer guards.
pub fn eval_int_guards(guards: &[IntGuard], env: EvalEnv) -> Result<bool, StepFault> {
    for g in guards {
        let l = eval_int(&g.left, env)?;
        let r = eval_int(&g.right, env)?;
        let holds = match g.op {
            RelOp::Eq => l == r,
            RelOp::Ne => l != r,
            RelOp::Lt => l < r,
            RelOp::Le => l <= r,
            RelOp::Gt => l > r,
            RelOp::Ge => l >= r,
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

/// An immutable integer variable valuation.
#[derive(Clone, PartialEq, Eq)]
pub struct IntVal {
    values: Arc<[i32]>,
}

impl IntVal {
    /// The initial valuation of a system.
    pub fn initial(system: &System) -> IntVal {
        let values: Vec<i32> = system.intvars().iter().map(|v| v.initial).collect();
        IntVal {
            values: Arc::from(values),
        }
    }

    pub fn from_values(values: Vec<i32>) -> IntVal {
        IntVal {
            values: Arc::from(values),
        }
    }

    #[inline]
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    #[inline]
    pub fn get(&self, var: usize) -> i32 {
        self.values[var]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Execute a statement. Integer assignments update the store in
    /// sequence, checking the declared variable bounds on every write; clock
    /// resets are collected with their values evaluated at the point of the
    /// reset.
    pub fn execute(
        &self,
        system: &System,
        stmt: &Statement,
        resets: &mut Vec<ClockReset>,
    ) -> Result<IntVal, StepFault> {
        if stmt.updates.is_empty() {
            return Ok(self.clone());
        }
        let mut values: Vec<i32> = self.values.to_vec();
        let params = system.param_values();
        for update in &stmt.updates {
            let env = EvalEnv {
                vars: &values,
                params,
            };
            match update {
                Update::AssignInt { var, value } => {
                    let v = eval_int(value, env)?;
                    let info = &system.intvars()[*var];
                    if v < info.min || v > info.max {
                        return Err(StepFault::OutOfBounds { var: *var, value: v });
                    }
                    values[*var] = v;
                }
                Update::ResetToValue { clock, value } => {
                    resets.push(ClockReset {
                        clock: *clock,
                        from: None,
                        value: eval_int(value, env)?,
                    });
                }
                Update::ResetToClock { clock, from } => {
                    resets.push(ClockReset {
                        clock: *clock,
                        from: Some(*from),
                        value: 0,
                    });
                }
                Update::ResetToSum { clock, from, value } => {
                    resets.push(ClockReset {
                        clock: *clock,
                        from: Some(*from),
                        value: eval_int(value, env)?,
                    });
                }
            }
        }
        Ok(IntVal {
            values: Arc::from(values),
        })
    }
}

impl Hash for IntVal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl fmt::Debug for IntVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntVal{:?}", &self.values[..])
    }
}

impl fmt::Display for IntVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl;
    use crate::model::System;

    fn counter_system() -> System {
        let decl = decl::parse(
            "system:counter\n\
             clock:x\n\
             int:c:0:3:0\n\
             param:k:2\n\
             process:P\n\
             location:P:l0{initial}\n\
             edge:P:l0:l0:tick{provided: c<3; do: c=c+1, x=0}\n",
        )
        .unwrap();
        System::new(&decl).unwrap()
    }

    #[test]
    fn test_initial_valuation() {
        let sys = counter_system();
        let val = IntVal::initial(&sys);
        assert_eq!(val.values(), &[0]);
    }

    #[test]
    fn test_execute_updates_and_collects_resets() {
        let sys = counter_system();
        let val = IntVal::initial(&sys);
        let stmt = &sys.edge(0).statement;
        let mut resets = Vec::new();
        let next = val.execute(&sys, stmt, &mut resets).unwrap();
        assert_eq!(next.values(), &[1]);
        assert_eq!(
            resets,
            vec![ClockReset {
                clock: 0,
                from: None,
                value: 0
            }]
        );
        // The source valuation is untouched.
        assert_eq!(val.values(), &[0]);
    }

    #[test]
    fn test_execute_bounds_check() {
        let sys = counter_system();
        let val = IntVal::from_values(vec![3]);
        let stmt = &sys.edge(0).statement;
        let mut resets = Vec::new();
        assert_eq!(
            val.execute(&sys, stmt, &mut resets),
            Err(StepFault::OutOfBounds { var: 0, value: 4 })
        );
    }

    #[test]
    fn test_eval_division_by_zero() {
        let env = EvalEnv {
            vars: &[0],
            params: &[],
        };
        let e = IntExpr::Binary {
            op: IntOp::Div,
            left: Box::new(IntExpr::Const(1)),
            right: Box::new(IntExpr::Var(0)),
        };
        assert_eq!(eval_int(&e, env), Err(StepFault::DivisionByZero));
    }

    #[test]
    fn test_eval_int_guards() {
        let env = EvalEnv {
            vars: &[2],
            params: &[2],
        };
        let guards = vec![IntGuard {
            left: IntExpr::Var(0),
            op: RelOp::Eq,
            right: IntExpr::Param(0),
        }];
        assert!(eval_int_guards(&guards, env).unwrap());
    }
}
