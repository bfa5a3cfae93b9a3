pub mod alignment;
pub mod config;
pub mod engine;
pub mod error;
pub mod optimizer;
pub mod tree;

pub use error::{TfResult, TreeForgeError};
// cmd and reports are modules of the binary crate (main).
