//! Template binding: deciding whether an opened document should move to the
//! template's active version, and moving it when its content allows.

mod decision;
mod executor;
mod service;

pub use decision::{BlockedReason, NoopReason, TemplateDecision, UpgradeReason, decide};
pub use executor::MigrationExecutor;
pub use service::{DocumentOpen, DocumentService, NewDocument, NewSection};
