pub const SCHEMA: &str = r#"
-- Templates are never deleted, only deprecated
CREATE TABLE IF NOT EXISTS document_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    document_type TEXT NOT NULL,
    active_version_id TEXT REFERENCES template_versions(id),
    status TEXT NOT NULL DEFAULT 'draft',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Immutable schema snapshots; a schema change always inserts a new row
CREATE TABLE IF NOT EXISTS template_versions (
    id TEXT PRIMARY KEY,
    template_id TEXT NOT NULL REFERENCES document_templates(id),
    version TEXT NOT NULL,
    schema_hash TEXT NOT NULL,     -- hex sha256 of the canonical schema JSON
    schema_json TEXT NOT NULL,
    section_outline TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'draft',
    created_at TEXT DEFAULT (datetime('now')),
    created_by TEXT,

    UNIQUE(template_id, version)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,

    -- Template binding (rewritten only by the migration executor)
    template_id TEXT NOT NULL REFERENCES document_templates(id),
    template_version TEXT NOT NULL,
    template_schema_hash TEXT NOT NULL,

    created_at TEXT DEFAULT (datetime('now')),
    created_by TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now')),
    updated_by TEXT NOT NULL,
    deleted_at TEXT,               -- NULL = live
    deleted_by TEXT
);

-- One row per upgrade attempt, never updated
CREATE TABLE IF NOT EXISTS template_migrations (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    from_version TEXT NOT NULL,
    to_version TEXT NOT NULL,
    status TEXT NOT NULL,
    validation_errors TEXT,        -- JSON issue list for failed attempts
    initiated_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS document_sections (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    section_key TEXT NOT NULL,
    title TEXT NOT NULL,
    approved_version INTEGER NOT NULL DEFAULT 0,
    approved_content_markdown TEXT,
    approved_at TEXT,
    approved_by TEXT,
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(document_id, section_key)
);

CREATE TABLE IF NOT EXISTS section_drafts (
    id TEXT PRIMARY KEY,
    section_id TEXT NOT NULL REFERENCES document_sections(id),
    document_id TEXT NOT NULL REFERENCES documents(id),
    user_id TEXT NOT NULL,
    draft_version INTEGER NOT NULL,
    draft_base_version INTEGER NOT NULL,
    content_markdown TEXT NOT NULL,
    summary_note TEXT,
    conflict_state TEXT NOT NULL DEFAULT 'clean',
    conflict_reason TEXT,
    rebased_at TEXT,
    saved_at TEXT NOT NULL,
    saved_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    deleted_at TEXT,
    deleted_by TEXT
);

-- Replaced wholesale on save: the previous set is tombstoned, never patched
CREATE TABLE IF NOT EXISTS formatting_annotations (
    id TEXT PRIMARY KEY,
    section_id TEXT NOT NULL REFERENCES document_sections(id),
    draft_id TEXT NOT NULL REFERENCES section_drafts(id),
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    mark_type TEXT NOT NULL,
    message TEXT NOT NULL,
    severity TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    deleted_at TEXT,
    deleted_by TEXT,

    CHECK (start_offset >= 0 AND start_offset < end_offset)
);

-- Append-only; a resolution updates the same row
CREATE TABLE IF NOT EXISTS draft_conflict_logs (
    id TEXT PRIMARY KEY,
    section_id TEXT NOT NULL REFERENCES document_sections(id),
    draft_id TEXT NOT NULL REFERENCES section_drafts(id),
    detected_at TEXT NOT NULL,
    detected_during TEXT NOT NULL,
    previous_approved_version INTEGER NOT NULL,
    latest_approved_version INTEGER NOT NULL,
    resolved_by TEXT,
    resolution_note TEXT,
    resolved_at TEXT,
    deleted_at TEXT,

    CHECK (latest_approved_version >= previous_approved_version)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_template_versions_template ON template_versions(template_id);
CREATE INDEX IF NOT EXISTS idx_documents_template ON documents(template_id, template_version);
CREATE INDEX IF NOT EXISTS idx_template_migrations_document ON template_migrations(document_id);
CREATE INDEX IF NOT EXISTS idx_sections_document ON document_sections(document_id);
CREATE INDEX IF NOT EXISTS idx_drafts_section ON section_drafts(section_id, saved_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_drafts_live_owner
    ON section_drafts(section_id, user_id) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_annotations_draft ON formatting_annotations(draft_id);
CREATE INDEX IF NOT EXISTS idx_conflict_logs_draft ON draft_conflict_logs(draft_id, detected_at);
CREATE INDEX IF NOT EXISTS idx_conflict_logs_section ON draft_conflict_logs(section_id, detected_at);
"#;
