//! Configuration module.

mod loader;
mod types;
mod validate;

pub use loader::*;
pub use types::*;
pub use validate::*;
