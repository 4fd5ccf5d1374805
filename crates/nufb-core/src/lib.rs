//! Core domain types for the Nuvola flatpak builder.
//!
//! This crate contains:
//! - The error taxonomy shared by every other crate
//! - Typed accessors over the raw manifest document tree
//! - The manifest model (manifest, modules, sources)
//! - The stage/keep rewriting pass
//! - The executor trait used to run external tools

pub mod document;
pub mod error;
pub mod executor;
pub mod id;
pub mod manifest;
pub mod stage_keep;

pub use error::{Error, Result};
pub use id::TaskId;
pub use manifest::{Manifest, Module, Source};
