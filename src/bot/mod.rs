//! Notification dispatch: which notifications get work, how requests are
//! parsed, and the loop that ties the social network to the sandbox.

pub mod context;
pub mod filter;
pub mod publisher;
pub mod rate_limit;
pub mod runtime;
pub mod shebang;

pub use runtime::{BotContext, Dispatcher, LoopSettings};
