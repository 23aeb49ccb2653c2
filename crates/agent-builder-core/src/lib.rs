pub mod alias;
pub mod compile;
pub mod connection;
pub mod execution;
pub mod timeline;
pub mod variables;
mod config;
mod validation;
mod workflow;

pub use config::*;
pub use validation::*;
pub use workflow::*;
