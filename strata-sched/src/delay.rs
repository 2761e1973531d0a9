use std::collections::HashMap;

use strata_ir::{FunctionBase, NodeId};
use strata_utils::StrataResult;

/// Per-node combinational delay in picoseconds.
pub type DelayMap = HashMap<NodeId, u64>;

/// Oracle for operation delays. The characterization database behind it is
/// an external collaborator; the scheduler only ever asks for one number
/// per node.
pub trait DelayEstimator {
    fn operation_delay_ps(
        &self,
        fb: &FunctionBase,
        node: NodeId,
    ) -> StrataResult<u64>;
}

/// Assigns a uniform delay to every computational node. Parameters,
/// literals, and port/register plumbing are free. Used in tests and as a
/// placeholder before a real characterization is wired up.
pub struct FixedDelay(pub u64);

impl DelayEstimator for FixedDelay {
    fn operation_delay_ps(
        &self,
        fb: &FunctionBase,
        node: NodeId,
    ) -> StrataResult<u64> {
        use strata_ir::Op;
        let delay = match fb.node(node).op() {
            Op::Param
            | Op::Literal(_)
            | Op::AfterAll
            | Op::InputPort
            | Op::OutputPort
            | Op::RegisterRead { .. }
            | Op::RegisterWrite { .. }
            | Op::InstantiationInput { .. }
            | Op::InstantiationOutput { .. } => 0,
            _ => self.0,
        };
        Ok(delay)
    }
}

/// Query the estimator once per node.
pub fn compute_node_delays(
    fb: &FunctionBase,
    estimator: &dyn DelayEstimator,
) -> StrataResult<DelayMap> {
    let mut result = DelayMap::with_capacity(fb.node_count());
    for node in fb.nodes() {
        result.insert(node.id(), estimator.operation_delay_ps(fb, node.id())?);
    }
    Ok(result)
}
