mod dead_node_removal;
mod proc_state_optimization;

pub use dead_node_removal::DeadNodeRemoval;
pub use proc_state_optimization::ProcStateOptimization;
