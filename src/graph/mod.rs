//! Core graph data structures

mod edge;
mod fragment;
mod node;


pub use edge::GuacEdge;
pub use fragment::Graph;
pub use node::{Attributes, GuacNode, NodeRef, PropertyValue};

pub use edge::relationship;
pub use node::label;
