//! Lowers a scheduled function or proc into a clocked [`Block`]: ports
//! from the signature, pipeline registers for every value whose live range
//! crosses a stage boundary, registers for proc state, and data ports for
//! channel operations. `invoke` nodes are carried over verbatim and
//! lowered by the instantiation pass afterwards.

use std::collections::HashMap;

use strata_ir::{
    Block, Function, FunctionLike, GetName, NodeId, Op, Proc, Type, Value,
};
use strata_sched::ScheduleCycleMap;
use strata_utils::{Error, Id, NameGenerator, StrataResult};

use crate::vast::sanitize_identifier;

/// Reset signal configuration for generated registers.
#[derive(Clone, Debug)]
pub struct ResetOptions {
    pub name: Id,
    pub asynchronous: bool,
    pub active_low: bool,
}

/// Knobs shared by block conversion and Verilog generation.
#[derive(Clone, Debug)]
pub struct CodegenOptions {
    /// Overrides the generated module/block name.
    pub module_name: Option<Id>,
    pub clock_name: Id,
    pub reset: Option<ResetOptions>,
    pub use_system_verilog: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            module_name: None,
            clock_name: Id::new("clk"),
            reset: None,
            use_system_verilog: false,
        }
    }
}

struct Converter<'a, F: FunctionLike> {
    src: &'a F,
    schedule: &'a ScheduleCycleMap,
    block: Block,
    namegen: NameGenerator,
    // The block node holding the value of an IR node at a given stage.
    value_at: HashMap<(NodeId, i64), NodeId>,
}

impl<'a, F: FunctionLike> Converter<'a, F> {
    fn new(src: &'a F, schedule: &'a ScheduleCycleMap, name: Id) -> Self {
        Converter {
            src,
            schedule,
            block: Block::new(name),
            namegen: NameGenerator::default(),
            value_at: HashMap::new(),
        }
    }

    fn stage_count(&self) -> i64 {
        self.schedule.values().max().map_or(1, |&m| m + 1)
    }

    /// The block node carrying `node`'s value in `stage`, inserting a
    /// pipeline register chain from the defining stage as needed.
    fn value_at(&mut self, node: NodeId, stage: i64) -> StrataResult<NodeId> {
        if let Some(&mapped) = self.value_at.get(&(node, stage)) {
            return Ok(mapped);
        }
        let ty = self.src.base().node(node).ty().clone();
        // Zero-width values (tokens and empty aggregates) carry no wires
        // or registers; a local literal stands in.
        if ty.flat_bit_count() == 0 {
            let literal = self.block.literal(ty.zero_value());
            self.value_at.insert((node, stage), literal);
            return Ok(literal);
        }
        // Constants are rematerialized per stage instead of registered.
        if let Op::Literal(value) = self.src.base().node(node).op() {
            let value = value.clone();
            let literal = self.block.literal(value);
            self.value_at.insert((node, stage), literal);
            return Ok(literal);
        }
        let def_stage = self.schedule[&node];
        if stage <= def_stage {
            return Err(Error::precondition(format!(
                "value of `{}' requested in cycle {} before its defining \
                 cycle {}",
                self.src.base().node(node).name(),
                stage,
                def_stage
            )));
        }
        let previous = self.value_at(node, stage - 1)?;
        let reg = self.namegen.gen_name(format!(
            "p{}_{}",
            stage,
            sanitize_identifier(self.src.base().node(node).name().as_ref())
        ));
        self.block.add_register(reg, ty, None)?;
        self.block.register_write(reg, previous, None)?;
        let read = self.block.register_read(reg)?;
        self.value_at.insert((node, stage), read);
        Ok(read)
    }

    fn map_operands(
        &mut self,
        operands: &[NodeId],
        stage: i64,
    ) -> StrataResult<Vec<NodeId>> {
        operands
            .iter()
            .map(|&operand| self.value_at(operand, stage))
            .collect()
    }

    /// Clone the body nodes into the block stage by stage. Parameters
    /// must already be seeded into `value_at` by the caller.
    fn convert_body(&mut self) -> StrataResult<()> {
        for id in self.src.base().topo_sort() {
            let node = self.src.base().node(id);
            if node.is_param() {
                continue;
            }
            let stage = self.schedule[&id];
            let op = node.op().clone();
            let operands: Vec<NodeId> = node.operands().to_vec();
            let ty = node.ty().clone();
            match op {
                Op::Literal(value) => {
                    let literal = self.block.literal(value);
                    self.value_at.insert((id, stage), literal);
                }
                Op::Send { channel } => {
                    let data = self.value_at(operands[1], stage)?;
                    self.block.add_output_port(channel, data)?;
                    if let Some(&predicate) = operands.get(2) {
                        let valid = self.value_at(predicate, stage)?;
                        self.block.add_output_port(
                            Id::new(format!("{}_vld", channel)),
                            valid,
                        )?;
                    }
                    let token = self.block.literal(Value::Token);
                    self.value_at.insert((id, stage), token);
                }
                Op::Receive { channel } => {
                    let Type::Tuple(elements) = &ty else {
                        unreachable!("receive produces a (token, data) tuple")
                    };
                    if operands.get(1).is_some() {
                        log::debug!(
                            "predicate on receive from `{}' does not affect \
                             the generated data port",
                            channel
                        );
                    }
                    let port = self
                        .block
                        .add_input_port(channel, elements[1].clone())?;
                    let token = self.block.literal(Value::Token);
                    let tuple = self.block.tuple(&[token, port]);
                    self.value_at.insert((id, stage), tuple);
                }
                _ => {
                    let mapped = self.map_operands(&operands, stage)?;
                    let cloned =
                        self.block.add_node(op, &mapped, ty, None)?;
                    self.value_at.insert((id, stage), cloned);
                }
            }
        }
        Ok(())
    }

    fn finish(mut self, clock_name: Id) -> Block {
        if self.block.registers().next().is_some() {
            self.block.set_clock(clock_name);
        }
        self.block
    }
}

/// Lower a scheduled function to a block: one input port per parameter,
/// one `out` output port fed by the return value in the final stage.
pub fn function_to_block(
    function: &Function,
    schedule: &ScheduleCycleMap,
    options: &CodegenOptions,
) -> StrataResult<Block> {
    let name = options.module_name.unwrap_or_else(|| function.name());
    let mut converter = Converter::new(function, schedule, name);
    for &param in function.params() {
        let node = function.node(param);
        if node.ty().flat_bit_count() == 0 {
            continue;
        }
        let port = converter
            .block
            .add_input_port(node.name(), node.ty().clone())?;
        converter.namegen.add_names([node.name()]);
        converter.value_at.insert((param, schedule[&param]), port);
    }
    converter.convert_body()?;
    let return_value = function.return_value().ok_or_else(|| {
        Error::precondition(format!(
            "function `{}' has no return value",
            function.name()
        ))
    })?;
    let last_stage = converter.stage_count() - 1;
    let out = converter.value_at(return_value, last_stage)?;
    converter.block.add_output_port(Id::new("out"), out)?;
    Ok(converter.finish(options.clock_name))
}

/// Lower a scheduled proc to a block: state elements become registers
/// initialized from their initial values, receives become input data
/// ports, and sends become output data ports (plus a `_vld` port when
/// predicated).
pub fn proc_to_block(
    proc: &Proc,
    schedule: &ScheduleCycleMap,
    options: &CodegenOptions,
) -> StrataResult<Block> {
    let name = options.module_name.unwrap_or_else(|| proc.name());
    let mut converter = Converter::new(proc, schedule, name);
    let mut state_regs = Vec::with_capacity(proc.state_element_count());
    for index in 0..proc.state_element_count() {
        let param = proc.state_param(index);
        let node = proc.node(param);
        let reg = converter
            .namegen
            .gen_name(sanitize_identifier(node.name().as_ref()));
        converter.block.add_register(
            reg,
            node.ty().clone(),
            Some(proc.initial_value(index).clone()),
        )?;
        let read = converter.block.register_read(reg)?;
        converter.value_at.insert((param, schedule[&param]), read);
        state_regs.push(reg);
    }
    converter.convert_body()?;
    for (index, reg) in state_regs.iter().enumerate() {
        let next = proc.next_state_element(index)?;
        let data = converter.value_at(next, schedule[&next])?;
        converter.block.register_write(*reg, data, None)?;
    }
    Ok(converter.finish(options.clock_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::BinaryOp;
    use strata_sched::{schedule, FixedDelay};

    #[test]
    fn pipeline_registers_inserted_between_stages() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(32));
        let b = f.add_param("b", Type::Bits(32));
        let c = f.add_param("c", Type::Bits(32));
        let d = f.add_param("d", Type::Bits(32));
        let m1 = f.binary(BinaryOp::Mul, a, b).unwrap();
        let add = f.binary(BinaryOp::Add, m1, c).unwrap();
        let m2 = f.binary(BinaryOp::Mul, add, d).unwrap();
        f.set_return_value(m2).unwrap();

        let cycles = schedule(&f, 3, 1000, &FixedDelay(600), &[]).unwrap();
        let block =
            function_to_block(&f, &cycles, &CodegenOptions::default())
                .unwrap();

        assert_eq!(block.input_ports().len(), 4);
        assert_eq!(block.output_ports().len(), 1);
        assert_eq!(block.clock_name(), Some(Id::new("clk")));
        // `d` crosses from stage 0 to stage 2 and the intermediate values
        // cross one boundary each, so registers exist.
        assert!(block.registers().count() >= 3);
    }

    #[test]
    fn single_stage_function_has_no_registers() {
        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        let add = f.binary(BinaryOp::Add, a, b).unwrap();
        f.set_return_value(add).unwrap();
        let cycles = schedule(&f, 1, 1000, &FixedDelay(100), &[]).unwrap();
        let block =
            function_to_block(&f, &cycles, &CodegenOptions::default())
                .unwrap();
        assert_eq!(block.registers().count(), 0);
        assert_eq!(block.clock_name(), None);
    }

    #[test]
    fn proc_state_becomes_register_and_channels_become_ports() {
        let mut package = strata_ir::Package::new("test");
        let ch_out = package
            .create_channel(
                "resp",
                Type::Bits(8),
                strata_ir::ChannelOps::SendOnly,
            )
            .unwrap()
            .clone();
        let mut proc = Proc::new("counter");
        let tok = proc.token_param();
        let count = proc.add_state_element("count", Value::bits_from_u64(0, 8));
        let one = proc.literal(Value::bits_from_u64(1, 8));
        let next = proc.binary(BinaryOp::Add, count, one).unwrap();
        proc.send(tok, count, &ch_out, None).unwrap();
        proc.set_next_state(0, next).unwrap();

        let cycles =
            schedule(&proc, 1, 1000, &FixedDelay(100), &[]).unwrap();
        let block =
            proc_to_block(&proc, &cycles, &CodegenOptions::default())
                .unwrap();
        assert_eq!(block.registers().count(), 1);
        let reg = block.registers().next().unwrap();
        assert_eq!(reg.reset_value, Some(Value::bits_from_u64(0, 8)));
        assert_eq!(block.output_ports().len(), 1);
        assert_eq!(block.clock_name(), Some(Id::new("clk")));
    }
}
