use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use smallvec::SmallVec;
use strata_utils::{Error, GetName, Id, StrataResult};

use crate::channel::Channel;
use crate::node::{BinaryOp, Node, NodeId, Op, SourceLocation, UnaryOp};
use crate::types::{Type, Value};
use crate::IndexRef;

/// Shared node storage for functions, procs, and blocks: an append-only
/// arena of [`Node`]s plus the inverse user index. Node ids are never
/// reused; removed nodes leave a tombstone.
#[derive(Clone, Debug)]
pub struct FunctionBase {
    name: Id,
    nodes: Vec<Option<Node>>,
    // Parallel to `nodes`. BTreeSet keeps user iteration deterministic.
    users: Vec<BTreeSet<NodeId>>,
}

impl FunctionBase {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        FunctionBase {
            name: name.into(),
            nodes: Vec::new(),
            users: Vec::new(),
        }
    }

    /// Returns the node with the given id. Panics if the node has been
    /// removed; holding the id of a removed node is a caller bug.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("node {} has been removed", id))
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len() && self.nodes[id.index()].is_some()
    }

    /// Iterate the live nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Ids of the live nodes in insertion order. Materialized so callers
    /// can mutate the function while walking.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(Node::id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Users of `id`, ascending by node id.
    pub fn users(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.users[id.index()].iter().copied()
    }

    pub fn user_count(&self, id: NodeId) -> usize {
        self.users[id.index()].len()
    }

    /// Append a node. Operand validity is the caller's responsibility; the
    /// typed factory methods below perform type checking.
    pub(crate) fn raw_add(
        &mut self,
        op: Op,
        operands: SmallVec<[NodeId; 4]>,
        ty: Type,
        loc: Option<SourceLocation>,
        name: Option<Id>,
    ) -> NodeId {
        debug_assert!(operands.iter().all(|&o| self.is_live(o)));
        let id = NodeId::new(self.nodes.len());
        let name = name
            .unwrap_or_else(|| Id::new(format!("{}_{}", op.mnemonic(), id)));
        for &operand in &operands {
            self.users[operand.index()].insert(id);
        }
        self.nodes.push(Some(Node {
            id,
            name,
            op,
            operands,
            ty,
            loc,
        }));
        self.users.push(BTreeSet::new());
        id
    }

    /// Low-level factory: append a node with an explicit result type.
    /// Prefer the typed helpers below; this exists for passes that clone
    /// nodes between function bases and already know the result type.
    pub fn add_node(
        &mut self,
        op: Op,
        operands: &[NodeId],
        ty: Type,
        name: Option<Id>,
    ) -> StrataResult<NodeId> {
        for &operand in operands {
            if !self.is_live(operand) {
                return Err(Error::precondition(format!(
                    "operand {} of new `{}' node is not a live node",
                    operand,
                    op.mnemonic()
                )));
            }
        }
        Ok(self.raw_add(op, SmallVec::from_slice(operands), ty, None, name))
    }

    /// Rewrite every use of `of` to use `with` instead. The two nodes must
    /// have the same type. Explicit value roots (function return values,
    /// proc next-state bindings) are handled by the wrappers on
    /// [`Function`]/[`Proc`](crate::Proc).
    pub fn replace_uses(
        &mut self,
        of: NodeId,
        with: NodeId,
    ) -> StrataResult<()> {
        if of == with {
            return Ok(());
        }
        if self.node(of).ty() != self.node(with).ty() {
            return Err(Error::precondition(format!(
                "cannot replace uses of `{}' (type {}) with `{}' (type {})",
                self.node(of).name(),
                self.node(of).ty(),
                self.node(with).name(),
                self.node(with).ty()
            )));
        }
        let users = std::mem::take(&mut self.users[of.index()]);
        for user in &users {
            let node = self.nodes[user.index()]
                .as_mut()
                .expect("user index points at removed node");
            for operand in node.operands.iter_mut() {
                if *operand == of {
                    *operand = with;
                }
            }
            self.users[with.index()].insert(*user);
        }
        Ok(())
    }

    /// Remove a node that has no users. Its operands' user sets are
    /// updated; the id becomes a tombstone.
    pub fn remove_node(&mut self, id: NodeId) -> StrataResult<()> {
        if !self.users[id.index()].is_empty() {
            return Err(Error::precondition(format!(
                "cannot remove node `{}': it still has {} user(s)",
                self.node(id).name(),
                self.users[id.index()].len()
            )));
        }
        let node = self.nodes[id.index()].take().ok_or_else(|| {
            Error::precondition(format!("node {} already removed", id))
        })?;
        for operand in node.operands {
            self.users[operand.index()].remove(&id);
        }
        Ok(())
    }

    /// Topological order over the data dependence graph. Ties are broken
    /// by ascending node id, so the order is deterministic.
    pub fn topo_sort(&self) -> Vec<NodeId> {
        let mut indegree = vec![0usize; self.nodes.len()];
        for node in self.nodes() {
            indegree[node.id().index()] = node.operand_count();
        }
        let mut ready: BinaryHeap<Reverse<NodeId>> = self
            .nodes()
            .filter(|n| n.operand_count() == 0)
            .map(|n| Reverse(n.id()))
            .collect();
        let mut order = Vec::with_capacity(self.node_count());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for user in self.users(id) {
                let occurrences = self
                    .node(user)
                    .operands()
                    .iter()
                    .filter(|&&o| o == id)
                    .count();
                indegree[user.index()] -= occurrences;
                if indegree[user.index()] == 0 {
                    ready.push(Reverse(user));
                }
            }
        }
        debug_assert_eq!(order.len(), self.node_count(), "cycle in node graph");
        order
    }

    /* ============== Typed factory methods ============== */

    pub fn literal(&mut self, value: Value) -> NodeId {
        let ty = value.ty();
        self.raw_add(
            Op::Literal(value),
            SmallVec::new(),
            ty,
            None,
            None,
        )
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> StrataResult<NodeId> {
        let lhs_ty = self.node(lhs).ty().clone();
        let rhs_ty = self.node(rhs).ty().clone();
        if !lhs_ty.is_bits() || !rhs_ty.is_bits() {
            return Err(Error::precondition(format!(
                "operands of `{}' must be bits-typed, got {} and {}",
                op.mnemonic(),
                lhs_ty,
                rhs_ty
            )));
        }
        let shift = matches!(op, BinaryOp::Shll | BinaryOp::Shrl | BinaryOp::Shra);
        if !shift && lhs_ty != rhs_ty {
            return Err(Error::precondition(format!(
                "operands of `{}' must have matching types, got {} and {}",
                op.mnemonic(),
                lhs_ty,
                rhs_ty
            )));
        }
        let ty = if op.is_comparison() {
            Type::Bits(1)
        } else {
            lhs_ty
        };
        Ok(self.raw_add(
            Op::Binary(op),
            SmallVec::from_slice(&[lhs, rhs]),
            ty,
            None,
            None,
        ))
    }

    pub fn unary(&mut self, op: UnaryOp, arg: NodeId) -> StrataResult<NodeId> {
        let arg_ty = self.node(arg).ty().clone();
        if !arg_ty.is_bits() {
            return Err(Error::precondition(format!(
                "operand of `{}' must be bits-typed, got {}",
                op.mnemonic(),
                arg_ty
            )));
        }
        let ty = if op.is_reduction() {
            Type::Bits(1)
        } else {
            arg_ty
        };
        Ok(self.raw_add(
            Op::Unary(op),
            SmallVec::from_slice(&[arg]),
            ty,
            None,
            None,
        ))
    }

    pub fn select(
        &mut self,
        selector: NodeId,
        cases: &[NodeId],
        default: Option<NodeId>,
    ) -> StrataResult<NodeId> {
        let Some(selector_width) = self.node(selector).ty().bit_count() else {
            return Err(Error::precondition(format!(
                "select selector must be bits-typed, got {}",
                self.node(selector).ty()
            )));
        };
        let Some(&first) = cases.first() else {
            return Err(Error::precondition("select requires at least one case"));
        };
        let case_ty = self.node(first).ty().clone();
        for &case in cases.iter().chain(default.iter()) {
            if *self.node(case).ty() != case_ty {
                return Err(Error::precondition(format!(
                    "select case `{}' has type {}, expected {}",
                    self.node(case).name(),
                    self.node(case).ty(),
                    case_ty
                )));
            }
        }
        if default.is_none()
            && (selector_width >= 32
                || cases.len() != (1usize << selector_width))
        {
            return Err(Error::precondition(format!(
                "select with {}-bit selector and no default must have {} cases, got {}",
                selector_width,
                1u64 << selector_width.min(32),
                cases.len()
            )));
        }
        let mut operands = SmallVec::from_slice(&[selector]);
        operands.extend_from_slice(cases);
        operands.extend(default);
        Ok(self.raw_add(
            Op::Select {
                has_default: default.is_some(),
            },
            operands,
            case_ty,
            None,
            None,
        ))
    }

    pub fn concat(&mut self, args: &[NodeId]) -> StrataResult<NodeId> {
        let mut width = 0;
        for &arg in args {
            width += self.node(arg).ty().bit_count().ok_or_else(|| {
                Error::precondition(format!(
                    "concat operand `{}' must be bits-typed, got {}",
                    self.node(arg).name(),
                    self.node(arg).ty()
                ))
            })?;
        }
        Ok(self.raw_add(
            Op::Concat,
            SmallVec::from_slice(args),
            Type::Bits(width),
            None,
            None,
        ))
    }

    pub fn bit_slice(
        &mut self,
        arg: NodeId,
        start: u64,
        width: u64,
    ) -> StrataResult<NodeId> {
        let arg_width = self.node(arg).ty().bit_count().ok_or_else(|| {
            Error::precondition(format!(
                "bit_slice operand must be bits-typed, got {}",
                self.node(arg).ty()
            ))
        })?;
        if start + width > arg_width {
            return Err(Error::precondition(format!(
                "bit_slice [{}, {}) out of range for bits[{}]",
                start,
                start + width,
                arg_width
            )));
        }
        Ok(self.raw_add(
            Op::BitSlice { start, width },
            SmallVec::from_slice(&[arg]),
            Type::Bits(width),
            None,
            None,
        ))
    }

    pub fn tuple(&mut self, args: &[NodeId]) -> NodeId {
        let ty = Type::Tuple(
            args.iter().map(|&a| self.node(a).ty().clone()).collect(),
        );
        self.raw_add(Op::Tuple, SmallVec::from_slice(args), ty, None, None)
    }

    pub fn tuple_index(
        &mut self,
        arg: NodeId,
        index: u64,
    ) -> StrataResult<NodeId> {
        let Type::Tuple(elements) = self.node(arg).ty() else {
            return Err(Error::precondition(format!(
                "tuple_index operand must be a tuple, got {}",
                self.node(arg).ty()
            )));
        };
        let ty = elements.get(index as usize).cloned().ok_or_else(|| {
            Error::precondition(format!(
                "tuple_index {} out of range for {}",
                index,
                self.node(arg).ty()
            ))
        })?;
        Ok(self.raw_add(
            Op::TupleIndex(index),
            SmallVec::from_slice(&[arg]),
            ty,
            None,
            None,
        ))
    }

    pub fn array(&mut self, args: &[NodeId]) -> StrataResult<NodeId> {
        let Some(&first) = args.first() else {
            return Err(Error::precondition(
                "array construction requires at least one element",
            ));
        };
        let element = self.node(first).ty().clone();
        for &arg in args {
            if *self.node(arg).ty() != element {
                return Err(Error::precondition(format!(
                    "array element `{}' has type {}, expected {}",
                    self.node(arg).name(),
                    self.node(arg).ty(),
                    element
                )));
            }
        }
        let ty = Type::array_of(element, args.len() as u64);
        Ok(self.raw_add(Op::Array, SmallVec::from_slice(args), ty, None, None))
    }

    pub fn array_index(
        &mut self,
        array: NodeId,
        index: NodeId,
    ) -> StrataResult<NodeId> {
        let Type::Array { element, .. } = self.node(array).ty() else {
            return Err(Error::precondition(format!(
                "array_index operand must be an array, got {}",
                self.node(array).ty()
            )));
        };
        let ty = (**element).clone();
        if !self.node(index).ty().is_bits() {
            return Err(Error::precondition(
                "array_index index must be bits-typed",
            ));
        }
        Ok(self.raw_add(
            Op::ArrayIndex,
            SmallVec::from_slice(&[array, index]),
            ty,
            None,
            None,
        ))
    }

    pub fn array_update(
        &mut self,
        array: NodeId,
        index: NodeId,
        value: NodeId,
    ) -> StrataResult<NodeId> {
        let array_ty = self.node(array).ty().clone();
        let Type::Array { element, .. } = &array_ty else {
            return Err(Error::precondition(format!(
                "array_update operand must be an array, got {}",
                array_ty
            )));
        };
        if self.node(value).ty() != &**element {
            return Err(Error::precondition(format!(
                "array_update value has type {}, expected {}",
                self.node(value).ty(),
                element
            )));
        }
        if !self.node(index).ty().is_bits() {
            return Err(Error::precondition(
                "array_update index must be bits-typed",
            ));
        }
        Ok(self.raw_add(
            Op::ArrayUpdate,
            SmallVec::from_slice(&[array, index, value]),
            array_ty,
            None,
            None,
        ))
    }

    pub fn invoke(
        &mut self,
        callee: Id,
        args: &[NodeId],
        result_ty: Type,
    ) -> NodeId {
        self.raw_add(
            Op::Invoke { callee },
            SmallVec::from_slice(args),
            result_ty,
            None,
            None,
        )
    }

    pub fn send(
        &mut self,
        token: NodeId,
        data: NodeId,
        channel: &Channel,
        predicate: Option<NodeId>,
    ) -> StrataResult<NodeId> {
        self.check_token(token, "send")?;
        if self.node(data).ty() != channel.ty() {
            return Err(Error::precondition(format!(
                "send data has type {}, channel `{}' carries {}",
                self.node(data).ty(),
                channel.name(),
                channel.ty()
            )));
        }
        self.check_predicate(predicate, "send")?;
        let mut operands = SmallVec::from_slice(&[token, data]);
        operands.extend(predicate);
        Ok(self.raw_add(
            Op::Send {
                channel: channel.name(),
            },
            operands,
            Type::Token,
            None,
            None,
        ))
    }

    pub fn receive(
        &mut self,
        token: NodeId,
        channel: &Channel,
        predicate: Option<NodeId>,
    ) -> StrataResult<NodeId> {
        self.check_token(token, "receive")?;
        self.check_predicate(predicate, "receive")?;
        let mut operands = SmallVec::from_slice(&[token]);
        operands.extend(predicate);
        let ty = Type::Tuple(vec![Type::Token, channel.ty().clone()]);
        Ok(self.raw_add(
            Op::Receive {
                channel: channel.name(),
            },
            operands,
            ty,
            None,
            None,
        ))
    }

    pub fn assertion(
        &mut self,
        token: NodeId,
        condition: NodeId,
        message: &str,
    ) -> StrataResult<NodeId> {
        self.check_token(token, "assert")?;
        self.check_condition(condition, "assert")?;
        Ok(self.raw_add(
            Op::Assert {
                message: message.to_string(),
            },
            SmallVec::from_slice(&[token, condition]),
            Type::Token,
            None,
            None,
        ))
    }

    pub fn cover(
        &mut self,
        token: NodeId,
        condition: NodeId,
        label: &str,
    ) -> StrataResult<NodeId> {
        self.check_token(token, "cover")?;
        self.check_condition(condition, "cover")?;
        Ok(self.raw_add(
            Op::Cover {
                label: label.to_string(),
            },
            SmallVec::from_slice(&[token, condition]),
            Type::Token,
            None,
            None,
        ))
    }

    pub fn after_all(&mut self, tokens: &[NodeId]) -> StrataResult<NodeId> {
        for &token in tokens {
            self.check_token(token, "after_all")?;
        }
        Ok(self.raw_add(
            Op::AfterAll,
            SmallVec::from_slice(tokens),
            Type::Token,
            None,
            None,
        ))
    }

    fn check_token(&self, token: NodeId, op: &str) -> StrataResult<()> {
        if !self.node(token).ty().is_token() {
            return Err(Error::precondition(format!(
                "`{}' operand `{}' must be token-typed, got {}",
                op,
                self.node(token).name(),
                self.node(token).ty()
            )));
        }
        Ok(())
    }

    fn check_condition(&self, cond: NodeId, op: &str) -> StrataResult<()> {
        if *self.node(cond).ty() != Type::Bits(1) {
            return Err(Error::precondition(format!(
                "`{}' condition `{}' must be bits[1], got {}",
                op,
                self.node(cond).name(),
                self.node(cond).ty()
            )));
        }
        Ok(())
    }

    fn check_predicate(
        &self,
        predicate: Option<NodeId>,
        op: &str,
    ) -> StrataResult<()> {
        if let Some(p) = predicate {
            self.check_condition(p, op)?;
        }
        Ok(())
    }
}

impl GetName for FunctionBase {
    fn name(&self) -> Id {
        self.name
    }
}

/// Common view over functions, procs, and blocks for code that operates on
/// any of them (the scheduler, dead node removal).
pub trait FunctionLike {
    fn base(&self) -> &FunctionBase;
    fn base_mut(&mut self) -> &mut FunctionBase;
    /// Whether `node`'s value is used outside the node graph (function
    /// return value, proc next-state binding).
    fn has_implicit_use(&self, node: NodeId) -> bool;
}

/// A pure function: typed parameters and a designated return node.
#[derive(Clone, Debug)]
pub struct Function {
    base: FunctionBase,
    params: Vec<NodeId>,
    return_value: Option<NodeId>,
}

impl Function {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        Function {
            base: FunctionBase::new(name),
            params: Vec::new(),
            return_value: None,
        }
    }

    pub fn add_param<S: Into<Id>>(&mut self, name: S, ty: Type) -> NodeId {
        let id = self.base.raw_add(
            Op::Param,
            SmallVec::new(),
            ty,
            None,
            Some(name.into()),
        );
        self.params.push(id);
        id
    }

    pub fn params(&self) -> &[NodeId] {
        &self.params
    }

    pub fn set_return_value(&mut self, id: NodeId) -> StrataResult<()> {
        if !self.base.is_live(id) {
            return Err(Error::precondition(
                "return value must be a live node",
            ));
        }
        self.return_value = Some(id);
        Ok(())
    }

    pub fn return_value(&self) -> Option<NodeId> {
        self.return_value
    }

    /// [`FunctionBase::replace_uses`] that also redirects the return value.
    pub fn replace_uses(
        &mut self,
        of: NodeId,
        with: NodeId,
    ) -> StrataResult<()> {
        self.base.replace_uses(of, with)?;
        if self.return_value == Some(of) {
            self.return_value = Some(with);
        }
        Ok(())
    }
}

impl FunctionLike for Function {
    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FunctionBase {
        &mut self.base
    }

    fn has_implicit_use(&self, node: NodeId) -> bool {
        self.return_value == Some(node)
    }
}

impl std::ops::Deref for Function {
    type Target = FunctionBase;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for Function {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_topo_sort() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        let sum = f.binary(BinaryOp::Add, a, b).unwrap();
        let doubled = f.binary(BinaryOp::Add, sum, sum).unwrap();
        f.set_return_value(doubled).unwrap();

        assert_eq!(f.node(sum).ty(), &Type::Bits(8));
        assert_eq!(f.topo_sort(), vec![a, b, sum, doubled]);
        assert_eq!(f.users(sum).collect::<Vec<_>>(), vec![doubled]);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(4));
        let err = f.binary(BinaryOp::Add, a, b).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn replace_uses_rewrites_operands_and_return() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        let sum = f.binary(BinaryOp::Add, a, b).unwrap();
        f.set_return_value(sum).unwrap();

        let zero = f.literal(Value::bits_from_u64(0, 8));
        f.replace_uses(sum, zero).unwrap();
        assert_eq!(f.return_value(), Some(zero));
        assert_eq!(f.user_count(sum), 0);

        // `sum` is now dead and removable; `a` is still used by it.
        f.remove_node(sum).unwrap();
        assert_eq!(f.users(a).count(), 0);
    }

    #[test]
    fn remove_with_users_fails() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let not = f.unary(UnaryOp::Not, a).unwrap();
        assert!(f.remove_node(a).is_err());
        f.remove_node(not).unwrap();
        f.remove_node(a).unwrap();
        assert_eq!(f.node_count(), 0);
    }

    #[test]
    fn topo_sort_breaks_ties_by_id() {
        let mut f = Function::new("f");
        // Insert in an order where several nodes are simultaneously ready.
        let c = f.add_param("c", Type::Bits(1));
        let a = f.add_param("a", Type::Bits(1));
        let b = f.add_param("b", Type::Bits(1));
        let and = f.binary(BinaryOp::And, b, a).unwrap();
        let or = f.binary(BinaryOp::Or, and, c).unwrap();
        assert_eq!(f.topo_sort(), vec![c, a, b, and, or]);
    }
}
