pub mod attachment;
pub mod exam;
pub mod id;
pub mod node;
pub mod query;
pub mod tree;
