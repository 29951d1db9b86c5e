//! Per-collaborator section drafts with optimistic concurrency.
//!
//! Every save and every section entry compares the draft's base version against the
//! section's latest approved version. A draft that fell behind is logged and moved to
//! `rebase_required`; a draft that keeps falling behind without resolution is
//! `blocked` until an operator releases it.

mod service;

pub use service::{DraftSave, DraftService, SectionEntry, next_state};
