//! The module signature: the port table plus clocking metadata, emitted
//! alongside the Verilog text so downstream tools can bind the module
//! without parsing RTL. Serde-serializable for wire transport.

use serde::{Deserialize, Serialize};
use strata_ir::{Block, GetName, Op};
use strata_utils::Id;

use crate::block_conversion::CodegenOptions;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// One physical port: direction, name, flattened bit width.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignaturePort {
    pub direction: PortDirection,
    pub name: Id,
    pub width: u64,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ResetSignature {
    pub name: Id,
    pub asynchronous: bool,
    pub active_low: bool,
}

/// The ports a proc channel lowered to: its data port and, for predicated
/// sends, the accompanying valid port.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChannelPorts {
    pub channel: Id,
    pub direction: PortDirection,
    pub data_port: Id,
    pub valid_port: Option<Id>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ModuleSignature {
    pub module_name: Id,
    pub ports: Vec<SignaturePort>,
    pub clock_name: Option<Id>,
    pub reset: Option<ResetSignature>,
    pub pipeline_latency: Option<i64>,
    /// Per-channel port grouping for blocks lowered from procs.
    pub channel_ports: Vec<ChannelPorts>,
}

impl ModuleSignature {
    /// Builds the signature from a block's port list. Zero-width ports
    /// are omitted, matching the emitted module.
    pub fn from_block(block: &Block, options: &CodegenOptions) -> Self {
        let mut ports = Vec::new();
        for &port in block.ports() {
            let node = block.node(port);
            let width = node.ty().flat_bit_count();
            if width == 0 {
                continue;
            }
            let direction = match node.op() {
                Op::InputPort => PortDirection::Input,
                _ => PortDirection::Output,
            };
            ports.push(SignaturePort {
                direction,
                name: node.name(),
                width,
            });
        }
        ModuleSignature {
            module_name: block.name(),
            ports,
            clock_name: block.clock_name(),
            reset: options.reset.as_ref().map(|reset| ResetSignature {
                name: reset.name,
                asynchronous: reset.asynchronous,
                active_low: reset.active_low,
            }),
            pipeline_latency: None,
            channel_ports: Vec::new(),
        }
    }

    pub fn with_latency(mut self, latency: i64) -> Self {
        self.pipeline_latency = Some(latency);
        self
    }

    pub fn with_channel_ports(mut self, ports: Vec<ChannelPorts>) -> Self {
        self.channel_ports = ports;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{BinaryOp, Type};

    #[test]
    fn signature_lists_data_ports_and_round_trips() {
        let mut block = Block::new("adder");
        let a = block.add_input_port("a", Type::Bits(8)).unwrap();
        let b = block.add_input_port("b", Type::Bits(8)).unwrap();
        let sum = block.binary(BinaryOp::Add, a, b).unwrap();
        block.add_output_port("out", sum).unwrap();
        block.set_clock("clk");

        let signature = ModuleSignature::from_block(
            &block,
            &CodegenOptions::default(),
        )
        .with_latency(1);
        assert_eq!(signature.ports.len(), 3);
        assert_eq!(signature.ports[0].direction, PortDirection::Input);
        assert_eq!(signature.ports[2].direction, PortDirection::Output);
        assert_eq!(signature.ports[2].width, 8);
        assert_eq!(signature.clock_name, Some(Id::new("clk")));
        assert_eq!(signature.pipeline_latency, Some(1));

        let json = serde_json::to_string(&signature).unwrap();
        let back: ModuleSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signature);
    }
}
