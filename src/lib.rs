//! # Folio
//!
//! A template-bound document store, usable both as a standalone binary and as a library.
//!
//! Documents are bound to a version of a template schema. Opening a document decides
//! whether that binding is current and, when the template has moved on, migrates the
//! document automatically if its content still validates. Sections of a document are
//! edited through per-collaborator drafts that detect when the approved content they
//! were based on has advanced.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! folio = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use folio::config::ServerConfig;
//! use folio::server::{AppState, create_router};
//! use folio::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store), &config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `folio` binary. Disable with `default-features = false`.

pub mod binding;
pub mod catalog;
pub mod config;
pub mod drafts;
pub mod error;
pub mod server;
pub mod store;
pub mod types;
pub mod validator;
