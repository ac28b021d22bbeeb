//! Lambda integration for the hello function.
//!
//! The handler module is runtime-agnostic; `bin/hello_runtime.rs` wires it to
//! the Lambda runtime and logging.

pub mod handlers;
