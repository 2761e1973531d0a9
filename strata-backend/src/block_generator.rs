//! Turns a lowered [`Block`] into a VAST module: a wire per node, a
//! continuous assignment per operation, one always block for the
//! registers, and an instantiation per submodule. Aggregate values are
//! flattened to bit vectors; zero-width values vanish entirely.

use std::collections::HashMap;

use baa::{BitVecOps, BitVecValue};
use linked_hash_map::LinkedHashMap;
use num_bigint::BigUint;
use strata_ir::{
    BinaryOp, Block, GetName, Node, NodeId, Op, Type, UnaryOp, Value,
};
use strata_utils::{Error, Id, NameGenerator, StrataResult};

use crate::block_conversion::CodegenOptions;
use crate::vast::{
    sanitize_identifier, AlwaysFlop, Connection, ContinuousAssignment,
    DataType, Expression, FormatPreference, Instantiation, Module,
    ModuleMember, Reset, VerilogFile,
};

/// Append a module for `block` to `file`.
pub(crate) fn add_block_module(
    file: &mut VerilogFile,
    block: &Block,
    options: &CodegenOptions,
) -> StrataResult<()> {
    let mut module =
        Module::new(sanitize_identifier(block.name().as_ref()));
    let mut env: HashMap<NodeId, Expression> = HashMap::new();
    let mut namegen = NameGenerator::default();

    let clk = block.clock_name().map(|name| {
        namegen.add_names([name]);
        module.add_input(name, DataType::scalar())
    });
    let reset_ref = options.reset.as_ref().map(|reset| {
        namegen.add_names([reset.name]);
        module.add_input(reset.name, DataType::scalar())
    });

    // Data ports, in declaration order. Zero-width ports have no physical
    // representation.
    let mut output_assigns: Vec<(Expression, NodeId)> = Vec::new();
    for &port in block.ports() {
        let node = block.node(port);
        let width = node.ty().flat_bit_count();
        if width == 0 {
            continue;
        }
        let port_name =
            Id::new(sanitize_identifier(node.name().as_ref()));
        namegen.add_names([port_name]);
        match node.op() {
            Op::InputPort => {
                let reference = module
                    .add_input(port_name, DataType::bit_vector(width, false));
                env.insert(port, reference);
            }
            Op::OutputPort => {
                let reference = module
                    .add_output(port_name, DataType::bit_vector(width, false));
                output_assigns.push((reference, node.operand(0)));
            }
            _ => unreachable!("port list contains a non-port node"),
        }
    }

    // Registers.
    let mut reg_refs: HashMap<Id, Expression> = HashMap::new();
    for register in block.registers() {
        let width = register.ty.flat_bit_count();
        if width == 0 {
            continue;
        }
        let reg_name =
            Id::new(sanitize_identifier(register.name.as_ref()));
        let reference = module.add_reg(
            reg_name,
            DataType::bit_vector(width, false),
            None,
        );
        namegen.add_names([reg_name]);
        reg_refs.insert(register.name, reference);
    }

    // Combinational body: one wire and assignment per node, in dependency
    // order. Register writes and instantiation connections are collected
    // for the structured members below.
    let mut register_writes: Vec<&Node> = Vec::new();
    struct InstConnections {
        inputs: Vec<(Id, NodeId)>,
        outputs: Vec<(Id, Expression)>,
    }
    let mut inst_connections: LinkedHashMap<Id, InstConnections> =
        LinkedHashMap::new();
    for inst in block.instantiations() {
        inst_connections.insert(
            inst.name,
            InstConnections {
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
        );
    }

    for id in block.topo_sort() {
        let node = block.node(id);
        match node.op() {
            Op::InputPort | Op::OutputPort => {}
            Op::RegisterRead { register } => {
                if let Some(reference) = reg_refs.get(register) {
                    env.insert(id, reference.clone());
                }
            }
            Op::RegisterWrite { register } => {
                if reg_refs.contains_key(register) {
                    register_writes.push(node);
                }
            }
            Op::InstantiationInput {
                instantiation,
                port,
            } => {
                inst_connections
                    .get_mut(instantiation)
                    .expect("instantiation input names an unknown instance")
                    .inputs
                    .push((*port, node.operand(0)));
            }
            Op::InstantiationOutput {
                instantiation,
                port,
            } => {
                let width = node.ty().flat_bit_count();
                if width == 0 {
                    continue;
                }
                let wire = module.add_wire(
                    namegen.gen_name(format!(
                        "{}_{}",
                        sanitize_identifier(instantiation.as_ref()),
                        sanitize_identifier(port.as_ref())
                    )),
                    DataType::bit_vector(width, false),
                );
                env.insert(id, wire.clone());
                inst_connections
                    .get_mut(instantiation)
                    .expect("instantiation output names an unknown instance")
                    .outputs
                    .push((*port, wire));
            }
            Op::Assert { message } => {
                let condition = operand_expr(&env, node, 1)?;
                module.add_member(ModuleMember::Assert(
                    crate::vast::Assert::new(condition, message),
                ));
            }
            Op::Cover { label } => {
                let clk = clk.clone().ok_or_else(|| {
                    Error::precondition(
                        "cover points require a clocked block",
                    )
                })?;
                let condition = operand_expr(&env, node, 1)?;
                module.add_member(ModuleMember::Cover(
                    crate::vast::Cover::new(clk, condition, label.as_str()),
                ));
            }
            Op::Param => {
                return Err(Error::precondition(
                    "parameters cannot appear inside a block",
                ));
            }
            Op::Send { .. } | Op::Receive { .. } => {
                return Err(Error::precondition(
                    "channel operations must be lowered to ports before \
                     Verilog generation",
                ));
            }
            Op::Invoke { .. } => {
                return Err(Error::unsupported(
                    "invoke must be lowered to an instantiation before \
                     Verilog generation",
                ));
            }
            _ => {
                if node.ty().flat_bit_count() == 0 {
                    continue;
                }
                let expr = node_expression(block, node, &env)?;
                let wire = module.add_wire(
                    namegen
                        .gen_name(sanitize_identifier(node.name().as_ref())),
                    DataType::bit_vector(node.ty().flat_bit_count(), false),
                );
                module.add_member(ModuleMember::ContinuousAssignment(
                    ContinuousAssignment::new(wire.clone(), expr),
                ));
                env.insert(id, wire);
            }
        }
    }

    for (reference, src) in output_assigns {
        module.add_member(ModuleMember::ContinuousAssignment(
            ContinuousAssignment::new(reference, operand_ref(&env, src)?),
        ));
    }

    if !register_writes.is_empty() {
        let clk = clk.clone().ok_or_else(|| {
            Error::precondition("registers require a clocked block")
        })?;
        let mut flop = match (&options.reset, &reset_ref) {
            (Some(reset), Some(signal)) => AlwaysFlop::new_with_reset(
                clk,
                Reset {
                    signal: signal.clone(),
                    asynchronous: reset.asynchronous,
                    active_low: reset.active_low,
                },
            ),
            _ => AlwaysFlop::new(clk),
        };
        for write in &register_writes {
            let Op::RegisterWrite { register } = write.op() else {
                unreachable!()
            };
            let reg_ref = reg_refs[register].clone();
            let data = operand_ref(&env, write.operand(0))?;
            let next = match write.operands().get(1) {
                Some(&load_enable) => Expression::ternary(
                    operand_ref(&env, load_enable)?,
                    data,
                    reg_ref.clone(),
                ),
                None => data,
            };
            let reset_value = match (&options.reset, block.register(*register))
            {
                (Some(_), Some(reg)) => reg
                    .reset_value
                    .as_ref()
                    .and_then(flatten_value)
                    .map(|bits| {
                        Expression::literal(bits, FormatPreference::Hex)
                    }),
                _ => None,
            };
            flop.add_register(reg_ref, next, reset_value);
        }
        module.add_member(ModuleMember::AlwaysFlop(flop));
    }

    for instantiation in block.instantiations() {
        let connections = &inst_connections[&instantiation.name];
        let mut ports: Vec<Connection> = Vec::new();
        for (port, operand) in &connections.inputs {
            ports.push(Connection {
                port_name: *port,
                expression: operand_ref(&env, *operand)?,
            });
        }
        for (port, wire) in &connections.outputs {
            ports.push(Connection {
                port_name: *port,
                expression: wire.clone(),
            });
        }
        module.add_member(ModuleMember::Instantiation(Instantiation::new(
            Id::new(sanitize_identifier(instantiation.block_name.as_ref())),
            Id::new(sanitize_identifier(instantiation.name.as_ref())),
            Vec::new(),
            ports,
        )));
    }

    file.add_module(module);
    Ok(())
}

fn operand_ref(
    env: &HashMap<NodeId, Expression>,
    id: NodeId,
) -> StrataResult<Expression> {
    env.get(&id).cloned().ok_or_else(|| {
        Error::precondition(format!(
            "node {} has no generated expression (zero-width or missing)",
            id
        ))
    })
}

fn operand_expr(
    env: &HashMap<NodeId, Expression>,
    node: &Node,
    index: usize,
) -> StrataResult<Expression> {
    operand_ref(env, node.operand(index))
}

/// Flatten a constant to its bit representation. Tuples pack element 0
/// into the most significant bits; arrays pack element 0 into the least
/// significant bits. Zero-width leaves disappear.
fn flatten_value(value: &Value) -> Option<BitVecValue> {
    fn flatten(value: &Value, acc: &mut BigUint, width: &mut u64) {
        match value {
            Value::Bits(bits) => {
                if bits.width() > 0 {
                    *acc = (&*acc << bits.width() as usize)
                        | bits.to_big_uint();
                    *width += bits.width() as u64;
                }
            }
            Value::Token => {}
            Value::Tuple(elements) => {
                for element in elements {
                    flatten(element, acc, width);
                }
            }
            Value::Array(elements) => {
                for element in elements.iter().rev() {
                    flatten(element, acc, width);
                }
            }
        }
    }
    let mut acc = BigUint::from(0u32);
    let mut width = 0;
    flatten(value, &mut acc, &mut width);
    if width == 0 {
        return None;
    }
    Some(BitVecValue::from_big_uint(&acc, width as baa::WidthInt))
}

/// The Verilog expression computing `node` from its operands' wires.
fn node_expression(
    block: &Block,
    node: &Node,
    env: &HashMap<NodeId, Expression>,
) -> StrataResult<Expression> {
    let operand = |i: usize| operand_expr(env, node, i);
    match node.op() {
        Op::Literal(value) => {
            let bits = flatten_value(value).ok_or_else(|| {
                Error::precondition("zero-width literal reached emission")
            })?;
            Ok(Expression::literal(bits, FormatPreference::Hex))
        }
        Op::Binary(op) => {
            let lhs = operand(0)?;
            let rhs = operand(1)?;
            Ok(match op {
                BinaryOp::Add => Expression::add(lhs, rhs),
                BinaryOp::Sub => Expression::sub(lhs, rhs),
                BinaryOp::Mul => Expression::mul(lhs, rhs),
                BinaryOp::And => Expression::bitand(lhs, rhs),
                BinaryOp::Or => Expression::bitor(lhs, rhs),
                BinaryOp::Xor => Expression::bitxor(lhs, rhs),
                BinaryOp::Shll => Expression::shll(lhs, rhs),
                BinaryOp::Shrl => Expression::shrl(lhs, rhs),
                BinaryOp::Shra => Expression::shra(
                    Expression::system_function_call(
                        "signed",
                        Some(vec![lhs]),
                    ),
                    rhs,
                ),
                BinaryOp::Eq => Expression::eq(lhs, rhs),
                BinaryOp::Ne => Expression::ne(lhs, rhs),
                BinaryOp::ULt => Expression::lt(lhs, rhs),
                BinaryOp::ULe => Expression::le(lhs, rhs),
                BinaryOp::UGt => Expression::gt(lhs, rhs),
                BinaryOp::UGe => Expression::ge(lhs, rhs),
            })
        }
        Op::Unary(op) => {
            let arg = operand(0)?;
            Ok(match op {
                UnaryOp::Not => Expression::bitwise_not(arg),
                UnaryOp::Neg => Expression::negate(arg),
                UnaryOp::AndReduce => Expression::and_reduce(arg),
                UnaryOp::OrReduce => Expression::or_reduce(arg),
                UnaryOp::XorReduce => Expression::xor_reduce(arg),
            })
        }
        Op::Select { has_default: _ } => {
            let selector_width = block
                .node(node.operand(0))
                .ty()
                .bit_count()
                .expect("select selector is bits-typed");
            let selector = operand(0)?;
            let case_count = node.operand_count() - 1;
            // The last operand (the default, or the final case when the
            // cases are exhaustive) is the fallback; every other case
            // gets an equality test.
            let mut result = operand(case_count)?;
            let conditioned = case_count - 1;
            for i in (0..conditioned).rev() {
                let case = operand(i + 1)?;
                let test = Expression::eq(
                    selector.clone(),
                    Expression::literal_u64(
                        i as u64,
                        selector_width,
                        FormatPreference::UnsignedDecimal,
                    ),
                );
                result = Expression::ternary(test, case, result);
            }
            Ok(result)
        }
        Op::Concat | Op::Tuple => {
            // Operand 0 lands in the most significant bits either way.
            let mut args = Vec::new();
            for (i, &op_id) in node.operands().iter().enumerate() {
                if block.node(op_id).ty().flat_bit_count() == 0 {
                    continue;
                }
                args.push(operand(i)?);
            }
            Ok(Expression::concat(args))
        }
        Op::Array => {
            // Element 0 occupies the least significant bits.
            let mut args = Vec::new();
            for (i, &op_id) in
                node.operands().iter().enumerate().rev()
            {
                if block.node(op_id).ty().flat_bit_count() == 0 {
                    continue;
                }
                args.push(operand(i)?);
            }
            Ok(Expression::concat(args))
        }
        Op::BitSlice { start, width } => Ok(Expression::slice(
            operand(0)?,
            Expression::plain_literal(start + width - 1),
            Expression::plain_literal(*start),
        )),
        Op::TupleIndex(index) => {
            let Type::Tuple(elements) = block.node(node.operand(0)).ty()
            else {
                unreachable!("tuple_index operand is a tuple")
            };
            let width = elements[*index as usize].flat_bit_count();
            let low: u64 = elements[*index as usize + 1..]
                .iter()
                .map(Type::flat_bit_count)
                .sum();
            Ok(Expression::slice(
                operand(0)?,
                Expression::plain_literal(low + width - 1),
                Expression::plain_literal(low),
            ))
        }
        Op::ArrayIndex => {
            let Type::Array { element, .. } =
                block.node(node.operand(0)).ty()
            else {
                unreachable!("array_index operand is an array")
            };
            let width = element.flat_bit_count();
            Ok(Expression::part_select(
                operand(0)?,
                Expression::mul(
                    operand(1)?,
                    Expression::plain_literal(width),
                ),
                Expression::plain_literal(width),
            ))
        }
        Op::ArrayUpdate => {
            let Type::Array { element, size } =
                block.node(node.operand(0)).ty()
            else {
                unreachable!("array_update operand is an array")
            };
            let width = element.flat_bit_count();
            let index_width = block
                .node(node.operand(1))
                .ty()
                .bit_count()
                .expect("array_update index is bits-typed");
            let mut parts = Vec::with_capacity(*size as usize);
            for j in (0..*size).rev() {
                let original = Expression::slice(
                    operand(0)?,
                    Expression::plain_literal((j + 1) * width - 1),
                    Expression::plain_literal(j * width),
                );
                let test = Expression::eq(
                    operand(1)?,
                    Expression::literal_u64(
                        j,
                        index_width,
                        FormatPreference::UnsignedDecimal,
                    ),
                );
                parts.push(Expression::ternary(test, operand(2)?, original));
            }
            Ok(Expression::concat(parts))
        }
        Op::AfterAll => Err(Error::precondition(
            "token joins carry no bits and cannot be emitted",
        )),
        op => Err(Error::unsupported(format!(
            "no Verilog expression for `{}' nodes",
            op.mnemonic()
        ))),
    }
}
