//! Boundary to the managed database.
//!
//! The gatekeeper does not implement a database client. It defines the
//! [`QueryExecutor`] contract that the tool layer calls for allowed queries,
//! and the result types that flow back.

pub mod executor;
pub mod result;

pub use executor::{QueryExecutor, QueryOptions};
pub use result::*;
