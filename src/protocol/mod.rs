//! Tool-call protocol types shared with the agent runtime.

pub mod types;

pub use types::*;
