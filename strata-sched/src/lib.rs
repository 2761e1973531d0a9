//! Pipeline scheduling: assigns every IR node a clock cycle subject to
//! causality, timing, and user-supplied I/O constraints, minimizing
//! pipeline register pressure via an SDC linear program.

mod bounds;
mod constraints;
mod delay;
mod lp;
mod sdc;

pub use bounds::ScheduleBounds;
pub use constraints::{IoConstraint, IoDirection, SchedulingConstraint};
pub use delay::{compute_node_delays, DelayEstimator, DelayMap, FixedDelay};
pub use lp::{LpSolver, RowId, SimplexSolver, SolveStatus, VarId};
pub use sdc::{schedule, schedule_with_solver, ScheduleCycleMap};
