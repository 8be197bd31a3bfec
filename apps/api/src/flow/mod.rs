//! The flow graph: document model, validation, condition rules and the traversal engine.

pub mod condition;
pub mod engine;
pub mod handlers;
pub mod model;
pub mod store;
pub mod template;
pub mod templates;
pub mod validation;
pub mod value;
