use smallvec::SmallVec;
use strata_utils::{Error, GetName, Id, StrataResult};

use crate::function::{FunctionBase, FunctionLike};
use crate::node::{NodeId, Op};
use crate::types::{Type, Value};

/// One element of a proc's recurrent state: its parameter node, initial
/// value, and (once the body is built) the next-state node.
#[derive(Clone, Debug)]
pub struct StateElement {
    pub param: NodeId,
    pub init: Value,
    pub next: Option<NodeId>,
}

/// A concurrent process: a token parameter plus N state elements. Each
/// tick consumes the current state and produces the next via the
/// next-state nodes.
#[derive(Clone, Debug)]
pub struct Proc {
    base: FunctionBase,
    token_param: NodeId,
    states: Vec<StateElement>,
}

impl Proc {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        let mut base = FunctionBase::new(name);
        let token_param = base.raw_add(
            Op::Param,
            SmallVec::new(),
            Type::Token,
            None,
            Some(Id::new("tok")),
        );
        Proc {
            base,
            token_param,
            states: Vec::new(),
        }
    }

    pub fn token_param(&self) -> NodeId {
        self.token_param
    }

    /// Append a state element with the given initial value. Returns the
    /// new state parameter node.
    pub fn add_state_element<S: Into<Id>>(
        &mut self,
        name: S,
        init: Value,
    ) -> NodeId {
        let ty = init.ty();
        let param = self.base.raw_add(
            Op::Param,
            SmallVec::new(),
            ty,
            None,
            Some(name.into()),
        );
        self.states.push(StateElement {
            param,
            init,
            next: None,
        });
        param
    }

    /// Bind the next-state node of element `index`. The node's type must
    /// equal the state parameter's type.
    pub fn set_next_state(
        &mut self,
        index: usize,
        next: NodeId,
    ) -> StrataResult<()> {
        let param = self.states[index].param;
        if self.base.node(next).ty() != self.base.node(param).ty() {
            return Err(Error::precondition(format!(
                "next-state value for `{}' has type {}, expected {}",
                self.base.node(param).name(),
                self.base.node(next).ty(),
                self.base.node(param).ty()
            )));
        }
        self.states[index].next = Some(next);
        Ok(())
    }

    pub fn state_element_count(&self) -> usize {
        self.states.len()
    }

    pub fn state_elements(&self) -> &[StateElement] {
        &self.states
    }

    pub fn state_param(&self, index: usize) -> NodeId {
        self.states[index].param
    }

    pub fn state_element_type(&self, index: usize) -> &Type {
        self.base.node(self.states[index].param).ty()
    }

    pub fn initial_value(&self, index: usize) -> &Value {
        &self.states[index].init
    }

    /// The bound next-state node of element `index`.
    pub fn next_state_element(&self, index: usize) -> StrataResult<NodeId> {
        self.states[index].next.ok_or_else(|| {
            Error::precondition(format!(
                "state element `{}' has no next-state binding",
                self.base.node(self.states[index].param).name()
            ))
        })
    }

    /// The state index of `node`, if it is a state parameter.
    pub fn state_param_index(&self, node: NodeId) -> Option<usize> {
        self.states.iter().position(|s| s.param == node)
    }

    /// Remove state element `index`: drops the next-state binding and the
    /// parameter node (which must be unused). Later elements shift down.
    pub fn remove_state_element(&mut self, index: usize) -> StrataResult<()> {
        let state = self.states.remove(index);
        self.base.remove_node(state.param).map_err(|e| {
            // Keep the proc consistent if the caller gets this wrong.
            self.states.insert(index, state.clone());
            e
        })
    }

    /// [`FunctionBase::replace_uses`] that also redirects next-state
    /// bindings.
    pub fn replace_uses(
        &mut self,
        of: NodeId,
        with: NodeId,
    ) -> StrataResult<()> {
        self.base.replace_uses(of, with)?;
        for state in &mut self.states {
            if state.next == Some(of) {
                state.next = Some(with);
            }
        }
        Ok(())
    }
}

impl FunctionLike for Proc {
    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FunctionBase {
        &mut self.base
    }

    fn has_implicit_use(&self, node: NodeId) -> bool {
        self.states.iter().any(|s| s.next == Some(node))
    }
}

impl std::ops::Deref for Proc {
    type Target = FunctionBase;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for Proc {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_utils::GetName;

    #[test]
    fn state_elements_renumber_on_removal() {
        let mut p = Proc::new("p");
        let a = p.add_state_element("a", Value::bits_from_u64(0, 4));
        let b = p.add_state_element("b", Value::bits_from_u64(1, 8));
        p.set_next_state(0, a).unwrap();
        p.set_next_state(1, b).unwrap();

        assert_eq!(p.state_param_index(b), Some(1));
        // Unbind `a` by replacing its only (self) use.
        let zero = p.literal(Value::bits_from_u64(0, 4));
        p.replace_uses(a, zero).unwrap();
        p.remove_state_element(0).unwrap();
        assert_eq!(p.state_element_count(), 1);
        assert_eq!(p.state_param_index(b), Some(0));
        assert_eq!(p.node(p.state_param(0)).name(), Id::new("b"));
    }

    #[test]
    fn next_state_type_checked() {
        let mut p = Proc::new("p");
        p.add_state_element("s", Value::bits_from_u64(0, 4));
        let wrong = p.literal(Value::bits_from_u64(0, 5));
        assert!(p.set_next_state(0, wrong).is_err());
    }
}
