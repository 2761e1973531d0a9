//! In-memory representation for the Strata middle-end.
//!
//! A [`Package`] owns functions, procs, blocks, and channels. Functions,
//! procs, and blocks share a common node store ([`FunctionBase`]): an
//! append-only arena of single-assignment operations addressed by
//! [`NodeId`]. Nodes reference their operands by id; the arena maintains
//! the inverse user index so passes can rewrite uses in place.

mod block;
mod channel;
mod function;
mod index;
mod node;
mod package;
mod proc;
mod types;

pub use block::{Block, BlockInstantiation, Register};
pub use channel::{Channel, ChannelOps};
pub use function::{Function, FunctionBase, FunctionLike};
pub use index::IndexRef;
pub use node::{BinaryOp, Node, NodeId, Op, SourceLocation, UnaryOp};
pub use package::Package;
pub use proc::{Proc, StateElement};
pub use types::{Type, Value};

// Re-export types from the utils crate that appear in this crate's API.
pub use strata_utils::{GetName, Id};
