//! Replaces each `invoke` node in a block with an instantiation of the
//! callee's block: operands are wired to the callee's input ports by
//! position and users are rewritten to read the callee's single output
//! port. Dead invoke nodes are swept up afterwards.

use strata_ir::{Block, GetName, Op, Package};
use strata_opt::passes::DeadNodeRemoval;
use strata_utils::{Error, StrataResult};

use crate::vast::sanitize_identifier;

/// A block being lowered alongside the package it will rejoin. The block
/// is held outside the package so callee blocks stay readable while it is
/// mutated.
pub struct CodegenPassUnit<'a> {
    pub package: &'a Package,
    pub block: &'a mut Block,
}

pub fn invocation_to_instantiation(
    unit: &mut CodegenPassUnit,
) -> StrataResult<bool> {
    let mut changed = false;
    for id in unit.block.node_ids() {
        let Op::Invoke { callee } = unit.block.node(id).op() else {
            continue;
        };
        let callee = *callee;
        let instantiated_block = unit.package.get_block(callee)?;
        let input_ports = instantiated_block.input_ports();
        let output_ports = instantiated_block.output_ports();
        let operands: Vec<_> = unit.block.node(id).operands().to_vec();
        let result_ty = unit.block.node(id).ty().clone();

        if input_ports.len() != operands.len() {
            return Err(Error::precondition(format!(
                "invoke `{}' passes {} operand(s) but block `{}' has {} \
                 input port(s)",
                unit.block.node(id).name(),
                operands.len(),
                callee,
                input_ports.len()
            )));
        }
        let instantiation_name = sanitize_identifier(
            unit.block.node(id).name().as_ref(),
        );
        let instantiation =
            unit.block.add_instantiation(instantiation_name, callee)?;

        for (&operand, &port) in operands.iter().zip(input_ports.iter()) {
            let port_node = instantiated_block.node(port);
            if port_node.ty() != unit.block.node(operand).ty() {
                return Err(Error::precondition(format!(
                    "operand `{}' of invoke has type {} but port `{}' of \
                     block `{}' has type {}",
                    unit.block.node(operand).name(),
                    unit.block.node(operand).ty(),
                    port_node.name(),
                    callee,
                    port_node.ty()
                )));
            }
            unit.block.instantiation_input(
                instantiation,
                port_node.name(),
                operand,
            )?;
        }

        let [output_port] = output_ports.as_slice() else {
            return Err(Error::precondition(format!(
                "block `{}' has {} output port(s); invoked blocks must \
                 have exactly one",
                callee,
                output_ports.len()
            )));
        };
        let output = unit.block.instantiation_output(
            instantiation,
            instantiated_block.node(*output_port).name(),
            result_ty,
        )?;
        unit.block.replace_uses(id, output)?;

        // The dead invoke itself is collected by the removal sweep below.
        changed = true;
    }
    if changed {
        DeadNodeRemoval::run(unit.block)?;
        log::debug!(
            "lowered invocations to instantiations in block `{}'",
            unit.block.name()
        );
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{BinaryOp, Function, Type, Value};
    use strata_sched::{schedule, FixedDelay};
    use strata_utils::Id;

    use crate::block_conversion::{function_to_block, CodegenOptions};

    fn callee_block(package: &mut Package) {
        let mut g = Function::new("g");
        let x = g.add_param("x", Type::Bits(8));
        let one = g.literal(Value::bits_from_u64(1, 8));
        let add = g.binary(BinaryOp::Add, x, one).unwrap();
        g.set_return_value(add).unwrap();
        let cycles = schedule(&g, 1, 1000, &FixedDelay(100), &[]).unwrap();
        let block =
            function_to_block(&g, &cycles, &CodegenOptions::default())
                .unwrap();
        package.add_block(block).unwrap();
    }

    #[test]
    fn invoke_becomes_instantiation() {
        let mut package = Package::new("test");
        callee_block(&mut package);

        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let inv = f.invoke(Id::new("g"), &[a], Type::Bits(8));
        let doubled = f.binary(BinaryOp::Add, inv, inv).unwrap();
        f.set_return_value(doubled).unwrap();
        let cycles = schedule(&f, 1, 1000, &FixedDelay(100), &[]).unwrap();
        let mut block =
            function_to_block(&f, &cycles, &CodegenOptions::default())
                .unwrap();

        let mut unit = CodegenPassUnit {
            package: &package,
            block: &mut block,
        };
        assert!(invocation_to_instantiation(&mut unit).unwrap());

        assert_eq!(block.instantiations().count(), 1);
        assert!(!block
            .nodes()
            .any(|n| matches!(n.op(), Op::Invoke { .. })));
        assert!(block
            .nodes()
            .any(|n| matches!(n.op(), Op::InstantiationOutput { .. })));
    }

    #[test]
    fn arity_mismatch_is_reported_not_asserted() {
        let mut package = Package::new("test");
        callee_block(&mut package);

        let mut f = Function::new("f");
        let a = f.add_param("a", Type::Bits(8));
        let b = f.add_param("b", Type::Bits(8));
        // Wrong arity: `g` has one input port.
        let inv = f.invoke(Id::new("g"), &[a, b], Type::Bits(8));
        f.set_return_value(inv).unwrap();
        let cycles = schedule(&f, 1, 1000, &FixedDelay(100), &[]).unwrap();
        let mut block =
            function_to_block(&f, &cycles, &CodegenOptions::default())
                .unwrap();

        let mut unit = CodegenPassUnit {
            package: &package,
            block: &mut block,
        };
        let err = invocation_to_instantiation(&mut unit).unwrap_err();
        assert!(err.is_precondition());
    }
}
