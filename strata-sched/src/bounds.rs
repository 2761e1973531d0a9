use std::collections::HashMap;

use strata_ir::{FunctionBase, GetName, NodeId};
use strata_utils::{Error, StrataResult};

use crate::delay::DelayMap;

/// Integer lower/upper bounds on each node's cycle, from delay-aware
/// ASAP/ALAP longest-path propagation over the data dependence DAG. The
/// bounds seed the LP variables and catch infeasibility early.
#[derive(Debug)]
pub struct ScheduleBounds {
    lb: HashMap<NodeId, i64>,
    ub: HashMap<NodeId, i64>,
}

impl ScheduleBounds {
    pub fn lb(&self, node: NodeId) -> i64 {
        self.lb[&node]
    }

    pub fn ub(&self, node: NodeId) -> i64 {
        self.ub[&node]
    }

    pub fn compute(
        fb: &FunctionBase,
        pipeline_stages: i64,
        clock_period_ps: u64,
        delay_map: &DelayMap,
    ) -> StrataResult<ScheduleBounds> {
        let order = fb.topo_sort();
        let clock = clock_period_ps as i64;

        // ASAP pass. `path` holds the longest in-cycle delay path ending
        // at the node, including the node's own delay.
        let mut lb: HashMap<NodeId, i64> = HashMap::new();
        let mut path: HashMap<NodeId, i64> = HashMap::new();
        for &id in &order {
            let delay = delay_map[&id] as i64;
            if delay > clock {
                return Err(Error::infeasible(
                    "timing",
                    format!(
                        "node `{}' has delay {}ps which exceeds the clock \
                         period of {}ps",
                        fb.node(id).name(),
                        delay,
                        clock
                    ),
                ));
            }
            let mut cycle = 0;
            for &operand in fb.node(id).operands() {
                let candidate = if path[&operand] + delay > clock {
                    lb[&operand] + 1
                } else {
                    lb[&operand]
                };
                cycle = cycle.max(candidate);
            }
            let chained_in = fb
                .node(id)
                .operands()
                .iter()
                .filter(|&&o| lb[&o] == cycle)
                .map(|o| path[o])
                .max()
                .unwrap_or(0);
            lb.insert(id, cycle);
            path.insert(id, chained_in + delay);
        }

        // ALAP pass, anchored at the final stage.
        let mut ub: HashMap<NodeId, i64> = HashMap::new();
        let mut rpath: HashMap<NodeId, i64> = HashMap::new();
        for &id in order.iter().rev() {
            let delay = delay_map[&id] as i64;
            let mut cycle = pipeline_stages - 1;
            for user in fb.users(id) {
                let candidate = if rpath[&user] + delay > clock {
                    ub[&user] - 1
                } else {
                    ub[&user]
                };
                cycle = cycle.min(candidate);
            }
            let chained_out = fb
                .users(id)
                .filter(|u| ub[u] == cycle)
                .map(|u| rpath[&u])
                .max()
                .unwrap_or(0);
            ub.insert(id, cycle);
            rpath.insert(id, chained_out + delay);
        }

        for &id in &order {
            if lb[&id] > ub[&id] {
                return Err(Error::infeasible(
                    "bounds",
                    format!(
                        "node `{}' cannot be scheduled: earliest cycle {} is \
                         after latest cycle {} (pipeline has {} stage(s))",
                        fb.node(id).name(),
                        lb[&id],
                        ub[&id],
                        pipeline_stages
                    ),
                ));
            }
        }
        Ok(ScheduleBounds { lb, ub })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::{compute_node_delays, FixedDelay};
    use strata_ir::{BinaryOp, Function, FunctionLike, Type};

    fn chain() -> (Function, Vec<NodeId>) {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        let c = f.add_param("c", Type::Bits(8));
        let d = f.add_param("d", Type::Bits(8));
        let m1 = f.binary(BinaryOp::Mul, a, b).unwrap();
        let add = f.binary(BinaryOp::Add, m1, c).unwrap();
        let m2 = f.binary(BinaryOp::Mul, add, d).unwrap();
        f.set_return_value(m2).unwrap();
        (f, vec![m1, add, m2])
    }

    #[test]
    fn asap_alap_chain() {
        let (f, ops) = chain();
        let delays =
            compute_node_delays(f.base(), &FixedDelay(600)).unwrap();
        let bounds =
            ScheduleBounds::compute(f.base(), 3, 1000, &delays).unwrap();
        // Each 600ps op needs its own 1000ps stage.
        assert_eq!(bounds.lb(ops[0]), 0);
        assert_eq!(bounds.lb(ops[1]), 1);
        assert_eq!(bounds.lb(ops[2]), 2);
        assert_eq!(bounds.ub(ops[0]), 0);
        assert_eq!(bounds.ub(ops[1]), 1);
        assert_eq!(bounds.ub(ops[2]), 2);
    }

    #[test]
    fn chaining_within_period() {
        let (f, ops) = chain();
        let delays =
            compute_node_delays(f.base(), &FixedDelay(300)).unwrap();
        let bounds =
            ScheduleBounds::compute(f.base(), 2, 1000, &delays).unwrap();
        // 900ps of logic fits one stage; the whole chain may sit anywhere.
        assert_eq!(bounds.lb(ops[2]), 0);
        assert_eq!(bounds.ub(ops[0]), 1);
    }

    #[test]
    fn too_few_stages_is_infeasible() {
        let (f, _) = chain();
        let delays =
            compute_node_delays(f.base(), &FixedDelay(600)).unwrap();
        let err = ScheduleBounds::compute(f.base(), 2, 1000, &delays)
            .unwrap_err();
        assert!(err.is_infeasible());
    }

    #[test]
    fn over_period_node_is_infeasible() {
        let (f, _) = chain();
        let delays =
            compute_node_delays(f.base(), &FixedDelay(1500)).unwrap();
        let err = ScheduleBounds::compute(f.base(), 8, 1000, &delays)
            .unwrap_err();
        assert!(err.is_infeasible());
    }
}
