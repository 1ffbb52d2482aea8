//! # sandpit-core
//!
//! Ephemeral code execution for untrusted snippets.
//!
//! This crate provides:
//! - A read-only registry of language recipes (source file name, optional build step, run command)
//! - Validation of size ceilings and language support before anything is allocated
//! - Disposable per-request workspaces that are always removed
//! - A process runner with piped stdio, incremental capture and a hard deadline
//! - Normalization of captured output into a stable response shape

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod language;
pub mod protocol;
pub mod result;
pub mod runner;
pub mod sandbox;
pub mod validate;
pub mod workspace;

pub use config::SandboxConfig;
pub use error::SandboxError;
pub use language::{CommandSpec, LanguageRecipe, LanguageRegistry};
pub use result::{ExecutionOutcome, RunReport};
pub use sandbox::{Sandbox, SandboxStatus};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, SandboxError>;
