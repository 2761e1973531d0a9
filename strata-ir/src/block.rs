use linked_hash_map::LinkedHashMap;
use smallvec::SmallVec;
use strata_utils::{Error, Id, StrataResult};

use crate::function::{FunctionBase, FunctionLike};
use crate::node::{NodeId, Op};
use crate::types::{Type, Value};

/// A named register in a block. The reset value, when present, is loaded
/// while the reset signal is asserted.
#[derive(Clone, Debug)]
pub struct Register {
    pub name: Id,
    pub ty: Type,
    pub reset_value: Option<Value>,
}

/// An instance of another block, bound by name. Ports are connected with
/// `instantiation_input`/`instantiation_output` nodes.
#[derive(Clone, Debug)]
pub struct BlockInstantiation {
    pub name: Id,
    pub block_name: Id,
}

/// A clocked RTL unit: input/output ports, registers, instantiations of
/// other blocks, and a node graph like a function's.
#[derive(Clone, Debug)]
pub struct Block {
    base: FunctionBase,
    clock_name: Option<Id>,
    // Port nodes (both directions) in declaration order.
    ports: Vec<NodeId>,
    registers: LinkedHashMap<Id, Register>,
    instantiations: LinkedHashMap<Id, BlockInstantiation>,
}

impl Block {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        Block {
            base: FunctionBase::new(name),
            clock_name: None,
            ports: Vec::new(),
            registers: LinkedHashMap::new(),
            instantiations: LinkedHashMap::new(),
        }
    }

    pub fn set_clock<S: Into<Id>>(&mut self, name: S) {
        self.clock_name = Some(name.into());
    }

    pub fn clock_name(&self) -> Option<Id> {
        self.clock_name
    }

    /// Port nodes in declaration order, inputs and outputs interleaved as
    /// declared.
    pub fn ports(&self) -> &[NodeId] {
        &self.ports
    }

    pub fn input_ports(&self) -> Vec<NodeId> {
        self.ports
            .iter()
            .copied()
            .filter(|&p| matches!(self.base.node(p).op(), Op::InputPort))
            .collect()
    }

    pub fn output_ports(&self) -> Vec<NodeId> {
        self.ports
            .iter()
            .copied()
            .filter(|&p| matches!(self.base.node(p).op(), Op::OutputPort))
            .collect()
    }

    pub fn add_input_port<S: Into<Id>>(
        &mut self,
        name: S,
        ty: Type,
    ) -> StrataResult<NodeId> {
        let name = name.into();
        self.check_port_name(name)?;
        let id = self.base.raw_add(
            Op::InputPort,
            SmallVec::new(),
            ty,
            None,
            Some(name),
        );
        self.ports.push(id);
        Ok(id)
    }

    pub fn add_output_port<S: Into<Id>>(
        &mut self,
        name: S,
        src: NodeId,
    ) -> StrataResult<NodeId> {
        let name = name.into();
        self.check_port_name(name)?;
        let ty = self.base.node(src).ty().clone();
        let id = self.base.raw_add(
            Op::OutputPort,
            SmallVec::from_slice(&[src]),
            ty,
            None,
            Some(name),
        );
        self.ports.push(id);
        Ok(id)
    }

    fn check_port_name(&self, name: Id) -> StrataResult<()> {
        if self
            .ports
            .iter()
            .any(|&p| crate::GetName::name(self.base.node(p)) == name)
        {
            return Err(Error::precondition(format!(
                "block `{}' already has a port named `{}'",
                crate::GetName::name(&self.base),
                name
            )));
        }
        Ok(())
    }

    pub fn add_register<S: Into<Id>>(
        &mut self,
        name: S,
        ty: Type,
        reset_value: Option<Value>,
    ) -> StrataResult<Id> {
        let name = name.into();
        if self.registers.contains_key(&name) {
            return Err(Error::precondition(format!(
                "block `{}' already has a register named `{}'",
                crate::GetName::name(&self.base),
                name
            )));
        }
        if let Some(reset) = &reset_value {
            if reset.ty() != ty {
                return Err(Error::precondition(format!(
                    "reset value for register `{}' has type {}, expected {}",
                    name,
                    reset.ty(),
                    ty
                )));
            }
        }
        self.registers.insert(
            name,
            Register {
                name,
                ty,
                reset_value,
            },
        );
        Ok(name)
    }

    pub fn register(&self, name: Id) -> Option<&Register> {
        self.registers.get(&name)
    }

    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    pub fn register_read(&mut self, register: Id) -> StrataResult<NodeId> {
        let ty = self
            .registers
            .get(&register)
            .ok_or_else(|| {
                Error::precondition(format!("unknown register `{}'", register))
            })?
            .ty
            .clone();
        Ok(self.base.raw_add(
            Op::RegisterRead { register },
            SmallVec::new(),
            ty,
            None,
            None,
        ))
    }

    pub fn register_write(
        &mut self,
        register: Id,
        data: NodeId,
        load_enable: Option<NodeId>,
    ) -> StrataResult<NodeId> {
        let reg_ty = &self
            .registers
            .get(&register)
            .ok_or_else(|| {
                Error::precondition(format!("unknown register `{}'", register))
            })?
            .ty;
        if self.base.node(data).ty() != reg_ty {
            return Err(Error::precondition(format!(
                "write to register `{}' has type {}, expected {}",
                register,
                self.base.node(data).ty(),
                reg_ty
            )));
        }
        if let Some(le) = load_enable {
            if *self.base.node(le).ty() != Type::Bits(1) {
                return Err(Error::precondition(format!(
                    "load enable for register `{}' must be bits[1]",
                    register
                )));
            }
        }
        let mut operands = SmallVec::from_slice(&[data]);
        operands.extend(load_enable);
        Ok(self.base.raw_add(
            Op::RegisterWrite { register },
            operands,
            Type::Token,
            None,
            None,
        ))
    }

    pub fn add_instantiation<S: Into<Id>>(
        &mut self,
        name: S,
        block_name: Id,
    ) -> StrataResult<Id> {
        let name = name.into();
        if self.instantiations.contains_key(&name) {
            return Err(Error::precondition(format!(
                "block `{}' already has an instantiation named `{}'",
                crate::GetName::name(&self.base),
                name
            )));
        }
        self.instantiations
            .insert(name, BlockInstantiation { name, block_name });
        Ok(name)
    }

    pub fn instantiation(&self, name: Id) -> Option<&BlockInstantiation> {
        self.instantiations.get(&name)
    }

    pub fn instantiations(&self) -> impl Iterator<Item = &BlockInstantiation> {
        self.instantiations.values()
    }

    pub fn instantiation_input(
        &mut self,
        instantiation: Id,
        port: Id,
        src: NodeId,
    ) -> StrataResult<NodeId> {
        self.check_instantiation(instantiation)?;
        Ok(self.base.raw_add(
            Op::InstantiationInput {
                instantiation,
                port,
            },
            SmallVec::from_slice(&[src]),
            Type::Token,
            None,
            None,
        ))
    }

    pub fn instantiation_output(
        &mut self,
        instantiation: Id,
        port: Id,
        ty: Type,
    ) -> StrataResult<NodeId> {
        self.check_instantiation(instantiation)?;
        Ok(self.base.raw_add(
            Op::InstantiationOutput {
                instantiation,
                port,
            },
            SmallVec::new(),
            ty,
            None,
            None,
        ))
    }

    fn check_instantiation(&self, name: Id) -> StrataResult<()> {
        if !self.instantiations.contains_key(&name) {
            return Err(Error::precondition(format!(
                "unknown instantiation `{}' in block `{}'",
                name,
                crate::GetName::name(&self.base)
            )));
        }
        Ok(())
    }
}

impl FunctionLike for Block {
    fn base(&self) -> &FunctionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FunctionBase {
        &mut self.base
    }

    fn has_implicit_use(&self, _node: NodeId) -> bool {
        false
    }
}

impl std::ops::Deref for Block {
    type Target = FunctionBase;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GetName;

    #[test]
    fn ports_keep_declaration_order() {
        let mut b = Block::new("b");
        let x = b.add_input_port("x", Type::Bits(4)).unwrap();
        let y = b.add_input_port("y", Type::Bits(4)).unwrap();
        let sum = b.binary(crate::BinaryOp::Add, x, y).unwrap();
        b.add_output_port("out", sum).unwrap();

        assert_eq!(b.input_ports(), vec![x, y]);
        assert_eq!(b.output_ports().len(), 1);
        assert!(b.add_input_port("x", Type::Bits(1)).is_err());
    }

    #[test]
    fn register_round_trip() {
        let mut b = Block::new("b");
        let reg = b
            .add_register(
                "acc",
                Type::Bits(8),
                Some(Value::bits_from_u64(0, 8)),
            )
            .unwrap();
        let read = b.register_read(reg).unwrap();
        let one = b.literal(Value::bits_from_u64(1, 8));
        let next = b.binary(crate::BinaryOp::Add, read, one).unwrap();
        b.register_write(reg, next, None).unwrap();
        assert_eq!(b.register(reg).unwrap().name, Id::new("acc"));
        assert_eq!(b.node(read).ty(), &Type::Bits(8));
    }

    #[test]
    fn instantiation_ports() {
        let mut b = Block::new("top");
        let x = b.add_input_port("x", Type::Bits(4)).unwrap();
        let inst =
            b.add_instantiation("callee_inst", Id::new("callee")).unwrap();
        b.instantiation_input(inst, Id::new("a"), x).unwrap();
        let out = b
            .instantiation_output(inst, Id::new("out"), Type::Bits(4))
            .unwrap();
        b.add_output_port("out", out).unwrap();
        assert_eq!(b.instantiations().count(), 1);
        assert_eq!(b.instantiation(inst).unwrap().block_name.as_ref(), "callee");
        assert_eq!(b.name(), Id::new("top"));
    }
}
