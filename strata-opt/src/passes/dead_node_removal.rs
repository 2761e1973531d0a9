use strata_ir::{FunctionLike, GetName, NodeId};
use strata_utils::StrataResult;

use crate::traversal::Named;

/// Removes nodes whose values are never used: no users, no implicit use,
/// and no side effect. Runs to a fixed point so chains of dead nodes
/// disappear in one call.
#[derive(Default)]
pub struct DeadNodeRemoval;

impl Named for DeadNodeRemoval {
    fn name() -> &'static str {
        "dead-node-removal"
    }

    fn description() -> &'static str {
        "removes nodes that compute unused values"
    }
}

impl DeadNodeRemoval {
    pub fn run<F: FunctionLike>(fb: &mut F) -> StrataResult<bool> {
        let mut changed = false;
        loop {
            let dead: Vec<NodeId> = fb
                .base()
                .nodes()
                .filter(|n| {
                    fb.base().user_count(n.id()) == 0
                        && !n.op().is_side_effecting()
                        && !fb.has_implicit_use(n.id())
                })
                .map(|n| n.id())
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                log::trace!(
                    "removing dead node `{}'",
                    fb.base().node(id).name()
                );
                fb.base_mut().remove_node(id)?;
            }
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{BinaryOp, Function, Type, Value};

    #[test]
    fn removes_dead_chains_but_keeps_live_values() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        let live = f.binary(BinaryOp::Add, a, b).unwrap();
        f.set_return_value(live).unwrap();

        // Dead chain: literal feeding a multiply nobody reads.
        let c = f.literal(Value::bits_from_u64(3, 8));
        let dead = f.binary(BinaryOp::Mul, c, c).unwrap();
        let _ = dead;

        assert!(DeadNodeRemoval::run(&mut f).unwrap());
        assert_eq!(f.node_count(), 3);
        assert!(f.is_live(live));
        assert!(!DeadNodeRemoval::run(&mut f).unwrap());
    }

    #[test]
    fn params_survive_even_when_unused() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let r = f.literal(Value::bits_from_u64(0, 8));
        f.set_return_value(r).unwrap();
        assert!(!DeadNodeRemoval::run(&mut f).unwrap());
        assert!(f.is_live(a));
    }
}
