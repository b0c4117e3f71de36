//! Token accounting
//! 
//! Token counting used to keep assembled context inside its budget.

pub mod counter;

// Re-export commonly used types
pub use counter::{TokenCounter, TokenEstimate, HEURISTIC_TOKENS_PER_CHAR};
