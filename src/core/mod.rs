pub mod config;
pub mod errors;
pub mod generation;
pub mod lifecycle;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod terminal;
