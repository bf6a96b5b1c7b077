//! # deedbox
//!
//! Mirrors a cloud folder of real-estate documents to local disk and answers
//! questions over it with semantic search.
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌────────────┐
//! │  Remote  │──▶│ SyncReconciler│──▶│ local tree │
//! │ Dropbox  │   │  + manifest   │   └─────┬──────┘
//! └──────────┘   └───────────────┘         │ extract + chunk
//!                                          ▼
//!                ┌───────────────┐   ┌────────────┐
//!                │RetrievalServ. │◀──│ Embedding  │
//!                │ search+answer │   │ index (SQL)│
//!                └───────┬───────┘   └────────────┘
//!                        ▼
//!                  CLI / HTTP API
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`manifest`] | Manifest file and atomic writes |
//! | [`sync`] | Remote-to-local reconciliation |
//! | [`job`] | Sync run plus post-sync indexing |
//! | [`index`] | Embedding index with per-path locks |
//! | [`retrieval`] | Document indexing and question answering |
//! | [`server`] | JSON HTTP API |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod job;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod migrate;
pub mod paths;
pub mod remote_dropbox;
pub mod remote_fs;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;
pub mod sync;
