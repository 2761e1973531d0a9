use std::collections::HashMap;

use fixedbitset::FixedBitSet;
use itertools::Itertools;
use petgraph::unionfind::UnionFind;
use strata_ir::{GetName, NodeId, Proc};
use strata_utils::StrataResult;

use crate::traversal::{Named, ProcPass};

/// Removes proc state elements that cannot affect any observable behavior:
/// zero-width elements first, then elements no side-effecting operation
/// (transitively) depends on.
#[derive(Default)]
pub struct ProcStateOptimization;

impl Named for ProcStateOptimization {
    fn name() -> &'static str {
        "proc-state-optimization"
    }

    fn description() -> &'static str {
        "removes zero-width and unobservable proc state elements"
    }
}

impl ProcPass for ProcStateOptimization {
    fn run_on_proc(&mut self, proc: &mut Proc) -> StrataResult<bool> {
        let mut changed = remove_zero_width_state_elements(proc)?;
        changed |= remove_unobservable_state_elements(proc)?;
        Ok(changed)
    }
}

fn remove_zero_width_state_elements(proc: &mut Proc) -> StrataResult<bool> {
    let to_remove: Vec<usize> = (0..proc.state_element_count())
        .rev()
        .filter(|&i| proc.state_element_type(i).flat_bit_count() == 0)
        .collect();
    if to_remove.is_empty() {
        return Ok(false);
    }
    for i in to_remove {
        let param = proc.state_param(i);
        log::debug!(
            "Removing zero-width state element: {}",
            proc.node(param).name()
        );
        let zero_value = proc.state_element_type(i).zero_value();
        let zero = proc.literal(zero_value);
        proc.replace_uses(param, zero)?;
        proc.remove_state_element(i)?;
    }
    Ok(true)
}

/// Computes which state elements each node is dependent upon. Dependence
/// is represented as a bit-vector with one bit per state element in the
/// proc. Dependencies are only computed in a single forward pass, so
/// dependencies through the proc back edge are not considered — those are
/// accounted for by the union-find step in
/// [`remove_unobservable_state_elements`].
fn compute_state_dependencies(proc: &Proc) -> HashMap<NodeId, FixedBitSet> {
    let state_count = proc.state_element_count();
    let mut deps: HashMap<NodeId, FixedBitSet> = HashMap::new();
    for id in proc.topo_sort() {
        let node = proc.node(id);
        let mut bitmap = FixedBitSet::with_capacity(state_count);
        if node.is_param() {
            // A state parameter is only dependent upon itself; the token
            // parameter depends on nothing.
            if let Some(index) = proc.state_param_index(id) {
                bitmap.insert(index);
            }
        } else {
            for &operand in node.operands() {
                bitmap.union_with(&deps[&operand]);
            }
        }
        deps.insert(id, bitmap);
    }
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("State dependencies (** side-effecting operation):");
        for id in proc.topo_sort() {
            let elements = deps[&id]
                .ones()
                .map(|i| proc.node(proc.state_param(i)).name())
                .join(", ");
            log::trace!(
                "  {} : {{{}}}{}",
                proc.node(id).name(),
                elements,
                if proc.node(id).op().is_side_effecting() { "**" } else { "" }
            );
        }
    }
    deps
}

/// Removes unobservable state elements. A state element X is observable
/// if:
///   (1) a side-effecting operation depends on X, OR
///   (2) the next-state value of an observable state element depends on X.
fn remove_unobservable_state_elements(proc: &mut Proc) -> StrataResult<bool> {
    let state_count = proc.state_element_count();
    let deps = compute_state_dependencies(proc);

    // Map from node to the state element indices for which the node is the
    // next-state value.
    let mut next_state_indices: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for i in 0..state_count {
        next_state_indices
            .entry(proc.next_state_element(i)?)
            .or_default()
            .push(i);
    }

    // The equivalence classes of state element indices. State element X is
    // in the same class as Y if the next-state value of X depends on Y or
    // vice versa.
    let mut state_components: UnionFind<usize> = UnionFind::new(state_count);

    // At the end, the union-find structure has one class holding every
    // observable state index. Until the first side-effect-dependent index
    // is seen there is no way to name that class, hence the Option.
    let mut observable_state_index: Option<usize> = None;

    for id in proc.node_ids() {
        let node = proc.node(id);
        if node.op().is_side_effecting() && !node.is_param() {
            // `node` is side-effecting: every state element it depends on
            // is observable.
            for i in deps[&id].ones() {
                log::trace!(
                    "State element `{}' ({}) is observable: side-effecting \
                     node `{}' depends on it",
                    proc.node(proc.state_param(i)).name(),
                    i,
                    node.name()
                );
                match observable_state_index {
                    None => observable_state_index = Some(i),
                    Some(observable) => {
                        state_components.union(i, observable);
                    }
                }
            }
        }
        if let Some(indices) = next_state_indices.get(&id) {
            for &next_state_index in indices {
                // `node` is the next-state value of `next_state_index`;
                // union it with every state index `node` depends on.
                for i in deps[&id].ones() {
                    state_components.union(i, next_state_index);
                }
            }
        }
    }
    // Normalize to the representative of the union-find structure.
    let observable_root =
        observable_state_index.map(|i| state_components.find(i));

    let to_remove: Vec<usize> = (0..state_count)
        .rev()
        .filter(|&i| match observable_root {
            None => true,
            Some(root) => state_components.find(i) != root,
        })
        .collect();
    if log::log_enabled!(log::Level::Trace) {
        for i in (0..state_count).rev() {
            log::trace!(
                "  {} ({}) : {}observable",
                proc.node(proc.state_param(i)).name(),
                i,
                if to_remove.contains(&i) { "NOT " } else { "" }
            );
        }
    }
    if to_remove.is_empty() {
        return Ok(false);
    }

    // Replace uses of to-be-removed state parameters with a zero-valued
    // literal, then delete them in descending index order.
    for &i in &to_remove {
        let param = proc.state_param(i);
        if proc.user_count(param) > 0 {
            let zero_value = proc.state_element_type(i).zero_value();
            let zero = proc.literal(zero_value);
            proc.replace_uses(param, zero)?;
        }
    }
    for &i in &to_remove {
        log::debug!(
            "Removing dead state element {} of type {}",
            proc.node(proc.state_param(i)).name(),
            proc.state_element_type(i)
        );
        proc.remove_state_element(i)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{
        BinaryOp, ChannelOps, Id, Op, Package, Type, Value,
    };

    fn optimize(proc: &mut Proc) -> bool {
        ProcStateOptimization
            .run_on_proc(proc)
            .expect("optimization failed")
    }

    #[test]
    fn zero_width_state_is_removed() {
        let mut package = Package::new("test");
        let ch = package
            .create_channel("out", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap()
            .clone();

        let mut proc = Proc::new("p");
        let tok = proc.token_param();
        let a = proc.add_state_element("a", Type::Bits(0).zero_value());
        let b = proc.add_state_element("b", Value::bits_from_u64(0, 8));
        // next_b folds `a` into `b`: concat(a, b) has width 0 + 8.
        let next_b = proc.concat(&[a, b]).unwrap();
        let send = proc.send(tok, next_b, &ch, None).unwrap();
        proc.set_next_state(0, a).unwrap();
        proc.set_next_state(1, next_b).unwrap();
        let _ = send;

        assert!(optimize(&mut proc));
        assert_eq!(proc.state_element_count(), 1);
        assert_eq!(proc.state_element_type(0), &Type::Bits(8));
        // Every remaining state element is wider than zero bits and the
        // use of `a` now reads a zero literal of its type.
        let concat = proc.node(next_b);
        let first_operand = proc.node(concat.operand(0));
        assert!(first_operand.is_literal());
        assert_eq!(first_operand.ty(), &Type::Bits(0));
    }

    #[test]
    fn self_recurrent_state_is_unobservable() {
        let mut package = Package::new("test");
        let ch = package
            .create_channel("out", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap()
            .clone();

        let mut proc = Proc::new("p");
        let tok = proc.token_param();
        let x = proc.add_state_element("x", Value::bits_from_u64(0, 8));
        let y = proc.add_state_element("y", Value::bits_from_u64(0, 8));
        proc.send(tok, x, &ch, None).unwrap();
        let one = proc.literal(Value::bits_from_u64(1, 8));
        let y_next = proc.binary(BinaryOp::Add, y, one).unwrap();
        proc.set_next_state(0, x).unwrap();
        proc.set_next_state(1, y_next).unwrap();

        assert!(optimize(&mut proc));
        assert_eq!(proc.state_element_count(), 1);
        assert_eq!(proc.node(proc.state_param(0)).name(), Id::new("x"));
    }

    #[test]
    fn state_feeding_observable_next_state_is_kept() {
        let mut package = Package::new("test");
        let ch = package
            .create_channel("out", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap()
            .clone();

        let mut proc = Proc::new("p");
        let tok = proc.token_param();
        let x = proc.add_state_element("x", Value::bits_from_u64(0, 8));
        let y = proc.add_state_element("y", Value::bits_from_u64(3, 8));
        proc.send(tok, x, &ch, None).unwrap();
        // x's next state is y, so y is observable through the recurrence.
        proc.set_next_state(0, y).unwrap();
        proc.set_next_state(1, y).unwrap();

        assert!(!optimize(&mut proc));
        assert_eq!(proc.state_element_count(), 2);
    }

    #[test]
    fn proc_without_side_effects_loses_all_state() {
        let mut proc = Proc::new("p");
        let s = proc.add_state_element("s", Value::bits_from_u64(7, 16));
        proc.set_next_state(0, s).unwrap();

        assert!(optimize(&mut proc));
        assert_eq!(proc.state_element_count(), 0);
    }

    #[test]
    fn predicate_dependence_marks_state_observable() {
        let mut package = Package::new("test");
        let ch = package
            .create_channel("out", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap()
            .clone();

        let mut proc = Proc::new("p");
        let tok = proc.token_param();
        let gate = proc.add_state_element("gate", Value::bits_from_u64(1, 1));
        let data = proc.literal(Value::bits_from_u64(42, 8));
        proc.send(tok, data, &ch, Some(gate)).unwrap();
        proc.set_next_state(0, gate).unwrap();

        assert!(!optimize(&mut proc));
        assert_eq!(proc.state_element_count(), 1);
    }

    #[test]
    fn run_on_package_driver() {
        let mut package = Package::new("test");
        let mut proc = Proc::new("p");
        let s = proc.add_state_element("s", Value::bits_from_u64(0, 4));
        proc.set_next_state(0, s).unwrap();
        package.add_proc(proc).unwrap();

        let changed = crate::traversal::run_on_package::<ProcStateOptimization>(
            &mut package,
        )
        .unwrap();
        assert!(changed);
        assert_eq!(
            package.get_proc(Id::new("p")).unwrap().state_element_count(),
            0
        );
    }

    #[test]
    fn op_side_effect_classification() {
        assert!(Op::Param.is_side_effecting());
        assert!(Op::Send {
            channel: Id::new("c")
        }
        .is_side_effecting());
        assert!(!Op::Concat.is_side_effecting());
    }
}
