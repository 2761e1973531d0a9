use strata_utils::{GetName, Id};

use crate::types::Type;

/// Which operations a proc may perform on a channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChannelOps {
    SendOnly,
    ReceiveOnly,
    SendReceive,
}

impl ChannelOps {
    pub fn can_send(&self) -> bool {
        matches!(self, ChannelOps::SendOnly | ChannelOps::SendReceive)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, ChannelOps::ReceiveOnly | ChannelOps::SendReceive)
    }
}

/// A named, typed, directed point of communication between procs.
#[derive(Clone, Debug)]
pub struct Channel {
    name: Id,
    id: u64,
    ty: Type,
    ops: ChannelOps,
}

impl Channel {
    pub(crate) fn new(name: Id, id: u64, ty: Type, ops: ChannelOps) -> Self {
        Channel { name, id, ty, ops }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn ops(&self) -> ChannelOps {
        self.ops
    }
}

impl GetName for Channel {
    fn name(&self) -> Id {
        self.name
    }
}
