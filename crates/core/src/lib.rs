//! Core domain types and shared logic for the Cairn build cache.
//!
//! This crate defines the pieces every other crate agrees on:
//! - Artifact addressing (scope + hash to storage key)
//! - Bearer token authorization against the configured allow-list
//! - Configuration types and layered loading

pub mod address;
pub mod config;
pub mod error;
pub mod token;

pub use address::{ArtifactAddress, StorageKey, resolve, validate_identifier};
pub use error::{Error, Result};
pub use token::{AuthRejection, Authorized, TokenSet, authorize};
