//! Release declarations for the cross-account hello pipeline.
//!
//! This crate owns the deterministic part of the system: account-scoped
//! naming, the typed pipeline declaration and its invariants, and synthesis
//! of the CloudFormation templates the managed services execute. It
//! intentionally excludes AWS SDK and Lambda runtime concerns.

pub mod application;
pub mod assembly;
pub mod buildspec;
pub mod config;
pub mod deployment;
pub mod error;
pub mod execution;
pub mod iam;
pub mod naming;
pub mod pipeline;
pub mod pipeline_stack;
pub mod repository;
pub mod template;
