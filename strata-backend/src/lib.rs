//! RTL generation for the Strata middle-end: block conversion of
//! scheduled functions and procs, invoke-to-instantiation lowering, the
//! Verilog AST and emitter, and the module signature that travels with
//! the emitted text.

pub mod vast;

mod block_conversion;
mod block_generator;
mod invocation_to_instantiation;
mod signature;

pub use block_conversion::{
    function_to_block, proc_to_block, CodegenOptions, ResetOptions,
};
pub use invocation_to_instantiation::{
    invocation_to_instantiation, CodegenPassUnit,
};
pub use signature::{
    ChannelPorts, ModuleSignature, PortDirection, ResetSignature,
    SignaturePort,
};

use std::collections::HashSet;

use strata_ir::{Block, FunctionBase, FunctionLike, GetName, Op, Package};
use strata_sched::{schedule, DelayEstimator, SchedulingConstraint};
use strata_utils::{Error, Id, StrataResult};

use crate::vast::{LineInfo, VerilogFile};

/// Everything a host needs from codegen: the RTL text, the node-to-line
/// map, and the port signature of the top module.
pub struct ModuleGeneratorResult {
    pub verilog: String,
    pub line_map: LineInfo,
    pub signature: ModuleSignature,
}

/// Emit a single already-lowered block.
pub fn generate_verilog(
    block: &Block,
    options: &CodegenOptions,
) -> StrataResult<ModuleGeneratorResult> {
    let mut file = new_file(options);
    block_generator::add_block_module(&mut file, block, options)?;
    let mut line_map = LineInfo::new();
    let verilog = file.emit(Some(&mut line_map))?;
    Ok(ModuleGeneratorResult {
        verilog,
        line_map,
        signature: ModuleSignature::from_block(block, options),
    })
}

fn new_file(options: &CodegenOptions) -> VerilogFile {
    if options.use_system_verilog {
        VerilogFile::system_verilog()
    } else {
        VerilogFile::new()
    }
}

/// The channel-to-port groupings a proc's sends and receives lower to.
/// Data ports share the channel's name; a predicated send also carries a
/// `_vld` port.
fn channel_ports(proc: &strata_ir::Proc) -> Vec<ChannelPorts> {
    let mut groups = Vec::new();
    for node in proc.base().nodes() {
        match node.op() {
            Op::Send { channel } => groups.push(ChannelPorts {
                channel: *channel,
                direction: PortDirection::Output,
                data_port: *channel,
                valid_port: (node.operand_count() > 2)
                    .then(|| Id::new(format!("{}_vld", channel))),
            }),
            Op::Receive { channel } => groups.push(ChannelPorts {
                channel: *channel,
                direction: PortDirection::Input,
                data_port: *channel,
                valid_port: None,
            }),
            _ => {}
        }
    }
    groups
}

/// The functions invoked by `fb`, in first-use order without duplicates.
fn invoked_functions(fb: &FunctionBase) -> Vec<Id> {
    let mut seen = HashSet::new();
    let mut invoked = Vec::new();
    for node in fb.nodes() {
        if let Op::Invoke { callee } = node.op() {
            if seen.insert(*callee) {
                invoked.push(*callee);
            }
        }
    }
    invoked
}

/// Post-order over the call DAG rooted at `fb`, excluding the root.
fn callees_in_post_order(
    package: &Package,
    fb: &FunctionBase,
    visited: &mut HashSet<Id>,
    post_order: &mut Vec<Id>,
) -> StrataResult<()> {
    for callee in invoked_functions(fb) {
        if visited.insert(callee) {
            let function = package.get_function(callee)?;
            callees_in_post_order(
                package,
                function.base(),
                visited,
                post_order,
            )?;
            post_order.push(callee);
        }
    }
    Ok(())
}

/// Schedule and lower `top` (a function or proc) and every function it
/// transitively invokes, then emit one Verilog file holding all of the
/// generated modules, callees first. The converted blocks are added to
/// the package; the returned signature describes the top module.
pub fn generate_pipeline(
    package: &mut Package,
    top: Id,
    pipeline_stages: i64,
    clock_period_ps: u64,
    estimator: &dyn DelayEstimator,
    constraints: &[SchedulingConstraint],
    options: &CodegenOptions,
) -> StrataResult<ModuleGeneratorResult> {
    let mut options = options.clone();
    options.use_system_verilog =
        options.use_system_verilog || package.use_system_verilog();

    let is_proc = package.get_function(top).is_err();
    let top_base = if is_proc {
        package.get_proc(top)?.base()
    } else {
        package.get_function(top)?.base()
    };
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    callees_in_post_order(package, top_base, &mut visited, &mut post_order)?;

    // Callees become combinational (single-stage) blocks so an invoking
    // stage can instantiate them inline.
    let callee_options = CodegenOptions {
        module_name: None,
        reset: None,
        ..options.clone()
    };
    for &name in &post_order {
        if package.get_block(name).is_ok() {
            continue;
        }
        let function = package.get_function(name)?;
        let cycles = schedule(function, 1, clock_period_ps, estimator, &[])?;
        let mut block =
            function_to_block(function, &cycles, &callee_options)?;
        strata_opt::passes::DeadNodeRemoval::run(&mut block)?;
        invocation_to_instantiation(&mut CodegenPassUnit {
            package,
            block: &mut block,
        })?;
        package.add_block(block)?;
    }

    let mut top_block = if is_proc {
        let proc = package.get_proc(top)?;
        let cycles = schedule(
            proc,
            pipeline_stages,
            clock_period_ps,
            estimator,
            constraints,
        )?;
        proc_to_block(proc, &cycles, &options)?
    } else {
        let function = package.get_function(top)?;
        let cycles = schedule(
            function,
            pipeline_stages,
            clock_period_ps,
            estimator,
            constraints,
        )?;
        function_to_block(function, &cycles, &options)?
    };
    strata_opt::passes::DeadNodeRemoval::run(&mut top_block)?;
    invocation_to_instantiation(&mut CodegenPassUnit {
        package,
        block: &mut top_block,
    })?;
    let top_block_name = top_block.name();
    package.add_block(top_block)?;

    let mut file = new_file(&options);
    for &name in post_order.iter().chain([top_block_name].iter()) {
        block_generator::add_block_module(
            &mut file,
            package.get_block(name)?,
            &options,
        )?;
    }
    let mut line_map = LineInfo::new();
    let verilog = file.emit(Some(&mut line_map))?;
    let mut signature =
        ModuleSignature::from_block(package.get_block(top_block_name)?, &options)
            .with_latency(pipeline_stages);
    if is_proc {
        signature = signature
            .with_channel_ports(channel_ports(package.get_proc(top)?));
    }
    if verilog.is_empty() {
        return Err(Error::misc("generated an empty Verilog file"));
    }
    log::debug!(
        "generated {} module(s) for `{}'",
        post_order.len() + 1,
        top
    );
    Ok(ModuleGeneratorResult {
        verilog,
        line_map,
        signature,
    })
}
