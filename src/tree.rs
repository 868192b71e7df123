//! Tree snapshots and traversal

pub mod node;
pub mod walker;

pub use node::{read_node_info, NodeInfo, PropertyInfo};
pub use walker::{TreeVisitor, TreeWalker, Visit, WalkStats};
