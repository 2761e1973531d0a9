use linked_hash_map::LinkedHashMap;
use strata_utils::{Error, GetName, Id, StrataResult};

use crate::block::Block;
use crate::channel::{Channel, ChannelOps};
use crate::function::Function;
use crate::proc::Proc;
use crate::types::Type;

/// The unit of compilation: owns functions, procs, blocks, and channels.
/// Member tables preserve insertion order.
#[derive(Debug, Default)]
pub struct Package {
    name: Id,
    functions: LinkedHashMap<Id, Function>,
    procs: LinkedHashMap<Id, Proc>,
    blocks: LinkedHashMap<Id, Block>,
    channels: LinkedHashMap<Id, Channel>,
    next_channel_id: u64,
    use_system_verilog: bool,
}

impl Package {
    pub fn new<S: Into<Id>>(name: S) -> Self {
        Package {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether emission may use SystemVerilog-only constructs.
    pub fn use_system_verilog(&self) -> bool {
        self.use_system_verilog
    }

    pub fn set_use_system_verilog(&mut self, flag: bool) {
        self.use_system_verilog = flag;
    }

    pub fn add_function(&mut self, function: Function) -> StrataResult<Id> {
        let name = function.name();
        if self.functions.contains_key(&name) {
            return Err(Error::precondition(format!(
                "package `{}' already has a function named `{}'",
                self.name, name
            )));
        }
        self.functions.insert(name, function);
        Ok(name)
    }

    pub fn add_proc(&mut self, proc: Proc) -> StrataResult<Id> {
        let name = proc.name();
        if self.procs.contains_key(&name) {
            return Err(Error::precondition(format!(
                "package `{}' already has a proc named `{}'",
                self.name, name
            )));
        }
        self.procs.insert(name, proc);
        Ok(name)
    }

    pub fn add_block(&mut self, block: Block) -> StrataResult<Id> {
        let name = block.name();
        if self.blocks.contains_key(&name) {
            return Err(Error::precondition(format!(
                "package `{}' already has a block named `{}'",
                self.name, name
            )));
        }
        self.blocks.insert(name, block);
        Ok(name)
    }

    /// Create a channel with a fresh numeric id.
    pub fn create_channel<S: Into<Id>>(
        &mut self,
        name: S,
        ty: Type,
        ops: ChannelOps,
    ) -> StrataResult<&Channel> {
        let name = name.into();
        if self.channels.contains_key(&name) {
            return Err(Error::precondition(format!(
                "package `{}' already has a channel named `{}'",
                self.name, name
            )));
        }
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.insert(name, Channel::new(name, id, ty, ops));
        Ok(&self.channels[&name])
    }

    pub fn get_function(&self, name: Id) -> StrataResult<&Function> {
        self.functions.get(&name).ok_or_else(|| {
            Error::precondition(format!(
                "no function named `{}' in package `{}'",
                name, self.name
            ))
        })
    }

    pub fn get_proc(&self, name: Id) -> StrataResult<&Proc> {
        self.procs.get(&name).ok_or_else(|| {
            Error::precondition(format!(
                "no proc named `{}' in package `{}'",
                name, self.name
            ))
        })
    }

    pub fn get_proc_mut(&mut self, name: Id) -> StrataResult<&mut Proc> {
        self.procs.get_mut(&name).ok_or_else(|| {
            Error::precondition(format!(
                "no proc named `{}' in package `{}'",
                name, self.name
            ))
        })
    }

    pub fn get_block(&self, name: Id) -> StrataResult<&Block> {
        self.blocks.get(&name).ok_or_else(|| {
            Error::precondition(format!(
                "no block named `{}' in package `{}'",
                name, self.name
            ))
        })
    }

    pub fn get_channel(&self, name: Id) -> StrataResult<&Channel> {
        self.channels.get(&name).ok_or_else(|| {
            Error::precondition(format!(
                "no channel named `{}' in package `{}'",
                name, self.name
            ))
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn procs(&self) -> impl Iterator<Item = &Proc> {
        self.procs.values()
    }

    pub fn procs_mut(&mut self) -> impl Iterator<Item = &mut Proc> {
        self.procs.iter_mut().map(|(_, p)| p)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }
}

impl GetName for Package {
    fn name(&self) -> Id {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_rejected() {
        let mut package = Package::new("test");
        package.add_function(Function::new("f")).unwrap();
        assert!(package.add_function(Function::new("f")).is_err());
        package
            .create_channel("ch", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap();
        assert!(package
            .create_channel("ch", Type::Bits(8), ChannelOps::SendOnly)
            .is_err());
    }

    #[test]
    fn channel_ids_are_sequential() {
        let mut package = Package::new("test");
        let a = package
            .create_channel("a", Type::Bits(8), ChannelOps::ReceiveOnly)
            .unwrap()
            .id();
        let b = package
            .create_channel("b", Type::Bits(8), ChannelOps::SendOnly)
            .unwrap()
            .id();
        assert_eq!((a, b), (0, 1));
    }
}
