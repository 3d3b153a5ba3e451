//! Chat module - message state and generation routing

pub mod history;
pub mod session;

pub use history::MessageLog;
pub use session::{ChatSession, IgnoreReason, SendOutcome};
