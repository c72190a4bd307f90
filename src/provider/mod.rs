//! Provider module: process pool, request lifecycle, and event translation.

mod classify;
mod claude_code;
mod events;
mod lifecycle;
mod pool;
mod prompt;
mod request;
mod translate;

pub use classify::*;
pub use claude_code::*;
pub use events::*;
pub use lifecycle::*;
pub use pool::*;
pub use prompt::*;
pub use request::*;
pub use translate::*;
