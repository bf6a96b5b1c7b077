//! # deedbox core
//!
//! Pure logic shared by the deedbox application: data model, error
//! taxonomy, the overlapping text chunker, cosine ranking, the chunk-store
//! abstraction, the sync reconciliation planner, and the capability traits
//! for remote storage, embeddings and answer generation.
//!
//! This crate performs no filesystem or network I/O and carries no async
//! runtime. Everything that touches disk, SQLite or HTTP lives in the
//! `deedbox` application crate and plugs in through the traits defined here.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod search;
pub mod store;

pub use error::{Error, Result};
