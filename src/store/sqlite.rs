use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const TEMPLATE_COLUMNS: &str =
    "id, name, description, document_type, active_version_id, status, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, template_id, version, schema_hash, schema_json, section_outline, status, created_at, created_by";

const DOCUMENT_COLUMNS: &str = "id, project_id, title, content, template_id, template_version, template_schema_hash, created_at, created_by, updated_at, updated_by, deleted_at, deleted_by";

const MIGRATION_COLUMNS: &str = "id, document_id, from_version, to_version, status, validation_errors, initiated_by, created_at, completed_at";

const SECTION_COLUMNS: &str = "id, document_id, section_key, title, approved_version, approved_content_markdown, approved_at, approved_by, created_at";

const DRAFT_COLUMNS: &str = "id, section_id, document_id, user_id, draft_version, draft_base_version, content_markdown, summary_note, conflict_state, conflict_reason, rebased_at, saved_at, saved_by, created_at, created_by, updated_at, updated_by, deleted_at, deleted_by";

const ANNOTATION_COLUMNS: &str = "id, section_id, draft_id, start_offset, end_offset, mark_type, message, severity, created_at, created_by";

const CONFLICT_COLUMNS: &str = "id, section_id, draft_id, detected_at, detected_during, previous_approved_version, latest_approved_version, resolved_by, resolution_note, resolved_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> DateTime<Utc> {
    // Round-trip through storage precision so returned values equal re-read values.
    parse_datetime(&format_datetime(&Utc::now()))
}

fn opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<String>>(idx)?.map(|s| parse_datetime(&s)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn map_insert_error(err: rusqlite::Error) -> Error {
    if is_unique_violation(&err) {
        Error::AlreadyExists
    } else {
        Error::from(err)
    }
}

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentTemplate> {
    Ok(DocumentTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        document_type: row.get(3)?,
        active_version_id: row.get(4)?,
        status: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateVersion> {
    Ok(TemplateVersion {
        id: row.get(0)?,
        template_id: row.get(1)?,
        version: row.get(2)?,
        schema_hash: row.get(3)?,
        schema: json_column(row, 4)?,
        section_outline: json_column(row, 5)?,
        status: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        created_by: row.get(8)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        content: json_column(row, 3)?,
        template_id: row.get(4)?,
        template_version: row.get(5)?,
        template_schema_hash: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        created_by: row.get(8)?,
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_by: row.get(10)?,
        deleted_at: opt_datetime(row, 11)?,
        deleted_by: row.get(12)?,
    })
}

fn migration_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateMigration> {
    let validation_errors = match row.get::<_, Option<String>>(5)? {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(TemplateMigration {
        id: row.get(0)?,
        document_id: row.get(1)?,
        from_version: row.get(2)?,
        to_version: row.get(3)?,
        status: row.get(4)?,
        validation_errors,
        initiated_by: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        completed_at: opt_datetime(row, 8)?,
    })
}

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentSection> {
    Ok(DocumentSection {
        id: row.get(0)?,
        document_id: row.get(1)?,
        section_key: row.get(2)?,
        title: row.get(3)?,
        approved_version: row.get(4)?,
        approved_content_markdown: row.get(5)?,
        approved_at: opt_datetime(row, 6)?,
        approved_by: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

/// Maps a draft row without annotations; callers hydrate them separately.
fn draft_from_row(row: &Row<'_>) -> rusqlite::Result<SectionDraft> {
    Ok(SectionDraft {
        id: row.get(0)?,
        section_id: row.get(1)?,
        document_id: row.get(2)?,
        user_id: row.get(3)?,
        draft_version: row.get(4)?,
        draft_base_version: row.get(5)?,
        content_markdown: row.get(6)?,
        summary_note: row.get(7)?,
        conflict_state: row.get(8)?,
        conflict_reason: row.get(9)?,
        rebased_at: opt_datetime(row, 10)?,
        saved_at: parse_datetime(&row.get::<_, String>(11)?),
        saved_by: row.get(12)?,
        created_at: parse_datetime(&row.get::<_, String>(13)?),
        created_by: row.get(14)?,
        updated_at: parse_datetime(&row.get::<_, String>(15)?),
        updated_by: row.get(16)?,
        deleted_at: opt_datetime(row, 17)?,
        deleted_by: row.get(18)?,
        formatting_annotations: Vec::new(),
    })
}

fn annotation_from_row(row: &Row<'_>) -> rusqlite::Result<FormattingAnnotation> {
    Ok(FormattingAnnotation {
        id: row.get(0)?,
        section_id: row.get(1)?,
        draft_id: row.get(2)?,
        start_offset: row.get(3)?,
        end_offset: row.get(4)?,
        mark_type: row.get(5)?,
        message: row.get(6)?,
        severity: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        created_by: row.get(9)?,
    })
}

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<DraftConflictLog> {
    Ok(DraftConflictLog {
        id: row.get(0)?,
        section_id: row.get(1)?,
        draft_id: row.get(2)?,
        detected_at: parse_datetime(&row.get::<_, String>(3)?),
        detected_during: row.get(4)?,
        previous_approved_version: row.get(5)?,
        latest_approved_version: row.get(6)?,
        resolved_by: row.get(7)?,
        resolution_note: row.get(8)?,
        resolved_at: opt_datetime(row, 9)?,
    })
}

// Connection-level helpers shared by single-statement calls and transactions.

fn query_template(conn: &Connection, id: &str) -> Result<Option<DocumentTemplate>> {
    conn.query_row(
        &format!("SELECT {TEMPLATE_COLUMNS} FROM document_templates WHERE id = ?1"),
        params![id],
        template_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_version_by_id(conn: &Connection, id: &str) -> Result<Option<TemplateVersion>> {
    conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM template_versions WHERE id = ?1"),
        params![id],
        version_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_document(conn: &Connection, id: &str) -> Result<Option<Document>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        document_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_section(conn: &Connection, id: &str) -> Result<Option<DocumentSection>> {
    conn.query_row(
        &format!("SELECT {SECTION_COLUMNS} FROM document_sections WHERE id = ?1"),
        params![id],
        section_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn query_annotations(conn: &Connection, draft_id: &str) -> Result<Vec<FormattingAnnotation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ANNOTATION_COLUMNS} FROM formatting_annotations
         WHERE draft_id = ?1 AND deleted_at IS NULL
         ORDER BY start_offset, end_offset, rowid"
    ))?;

    let rows = stmt.query_map(params![draft_id], annotation_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn hydrate(conn: &Connection, mut draft: SectionDraft) -> Result<SectionDraft> {
    // Tombstoned drafts keep their tombstoned annotations out of view as well.
    if draft.deleted_at.is_none() {
        draft.formatting_annotations = query_annotations(conn, &draft.id)?;
    }
    Ok(draft)
}

fn query_draft(conn: &Connection, id: &str, include_deleted: bool) -> Result<Option<SectionDraft>> {
    let filter = if include_deleted {
        ""
    } else {
        " AND deleted_at IS NULL"
    };
    let draft = conn
        .query_row(
            &format!("SELECT {DRAFT_COLUMNS} FROM section_drafts WHERE id = ?1{filter}"),
            params![id],
            draft_from_row,
        )
        .optional()?;

    draft.map(|d| hydrate(conn, d)).transpose()
}

fn query_conflict(conn: &Connection, id: &str) -> Result<Option<DraftConflictLog>> {
    conn.query_row(
        &format!("SELECT {CONFLICT_COLUMNS} FROM draft_conflict_logs WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        conflict_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn validate_annotations(annotations: &[NewFormattingAnnotation]) -> Result<()> {
    for a in annotations {
        if a.start_offset < 0 || a.start_offset >= a.end_offset {
            return Err(Error::BadRequest(format!(
                "annotation range {}..{} is invalid: start must be non-negative and before end",
                a.start_offset, a.end_offset
            )));
        }
    }
    Ok(())
}

fn tombstone_annotations(
    conn: &Connection,
    draft_id: &str,
    actor_id: &str,
    at: &DateTime<Utc>,
) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE formatting_annotations SET deleted_at = ?1, deleted_by = ?2
         WHERE draft_id = ?3 AND deleted_at IS NULL",
        params![format_datetime(at), actor_id, draft_id],
    )?;
    Ok(rows)
}

fn insert_annotations(
    conn: &Connection,
    section_id: &str,
    draft_id: &str,
    annotations: &[NewFormattingAnnotation],
    actor_id: &str,
    at: &DateTime<Utc>,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO formatting_annotations
            (id, section_id, draft_id, start_offset, end_offset, mark_type, message, severity, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for a in annotations {
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            section_id,
            draft_id,
            a.start_offset,
            a.end_offset,
            a.mark_type,
            a.message,
            a.severity,
            format_datetime(at),
            actor_id,
        ])?;
    }
    Ok(())
}

/// Tombstones the live annotation set of `draft` and inserts `annotations` in its place.
fn swap_annotations(
    conn: &Connection,
    draft: &SectionDraft,
    annotations: &[NewFormattingAnnotation],
    actor_id: &str,
    at: &DateTime<Utc>,
) -> Result<()> {
    tombstone_annotations(conn, &draft.id, actor_id, at)?;
    insert_annotations(conn, &draft.section_id, &draft.id, annotations, actor_id, at)
}

fn insert_conflict(conn: &Connection, log: &NewConflictLog) -> Result<DraftConflictLog> {
    if log.latest_approved_version < log.previous_approved_version {
        return Err(Error::BadRequest(format!(
            "latest approved version {} precedes previous approved version {}",
            log.latest_approved_version, log.previous_approved_version
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO draft_conflict_logs
            (id, section_id, draft_id, detected_at, detected_during, previous_approved_version, latest_approved_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            log.section_id,
            log.draft_id,
            format_datetime(&log.detected_at),
            log.detected_during,
            log.previous_approved_version,
            log.latest_approved_version,
        ],
    )?;

    query_conflict(conn, &id)?.ok_or(Error::NotFound)
}

fn resolve_open_conflicts(
    conn: &Connection,
    draft_id: &str,
    resolution: &ConflictResolution,
    at: &DateTime<Utc>,
) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE draft_conflict_logs SET resolved_by = ?1, resolution_note = ?2, resolved_at = ?3
         WHERE draft_id = ?4 AND resolved_at IS NULL AND deleted_at IS NULL",
        params![
            resolution.resolved_by,
            resolution.resolution_note,
            format_datetime(at),
            draft_id
        ],
    )?;
    Ok(rows)
}

fn apply_draft_update(
    conn: &Connection,
    id: &str,
    update: &DraftUpdate,
    ctx: &SaveContext,
    at: &DateTime<Utc>,
) -> Result<()> {
    let current = query_draft(conn, id, false)?.ok_or(Error::NotFound)?;

    let next_version = match update.draft_version {
        Some(v) if v <= current.draft_version => {
            return Err(Error::Conflict(format!(
                "draft version {v} does not advance past {}",
                current.draft_version
            )));
        }
        Some(v) => v,
        None => current.draft_version,
    };

    if let Some(annotations) = &ctx.formatting_annotations {
        validate_annotations(annotations)?;
    }

    let saved_at = ctx.saved_at.unwrap_or(*at);
    let saved_by = ctx.saved_by.as_deref().unwrap_or(&ctx.actor_id);

    let rows = conn.execute(
        "UPDATE section_drafts SET
            draft_version = ?1, draft_base_version = ?2, content_markdown = ?3, summary_note = ?4,
            conflict_state = ?5, conflict_reason = ?6, rebased_at = ?7,
            saved_at = ?8, saved_by = ?9, updated_at = ?10, updated_by = ?11
         WHERE id = ?12 AND draft_version = ?13 AND deleted_at IS NULL",
        params![
            next_version,
            update.draft_base_version.unwrap_or(current.draft_base_version),
            update
                .content_markdown
                .as_deref()
                .unwrap_or(&current.content_markdown),
            update
                .summary_note
                .clone()
                .unwrap_or(current.summary_note.clone()),
            update.conflict_state.unwrap_or(current.conflict_state),
            update
                .conflict_reason
                .clone()
                .unwrap_or(current.conflict_reason.clone()),
            update
                .rebased_at
                .unwrap_or(current.rebased_at)
                .as_ref()
                .map(format_datetime),
            format_datetime(&saved_at),
            saved_by,
            format_datetime(at),
            ctx.actor_id,
            id,
            current.draft_version,
        ],
    )?;

    if rows == 0 {
        return Err(Error::Conflict("draft changed during update".to_string()));
    }

    if let Some(annotations) = &ctx.formatting_annotations {
        swap_annotations(conn, &current, annotations, &ctx.actor_id, at)?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Template catalog

    fn create_template(&self, template: &DocumentTemplate) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO document_templates (id, name, description, document_type, active_version_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    template.id,
                    template.name,
                    template.description,
                    template.document_type,
                    template.active_version_id,
                    template.status,
                    format_datetime(&template.created_at),
                    format_datetime(&template.updated_at),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<DocumentTemplate>> {
        query_template(&self.conn(), id)
    }

    fn list_templates(&self) -> Result<Vec<DocumentTemplate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM document_templates ORDER BY name, id"
        ))?;

        let rows = stmt.query_map([], template_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn deprecate_template(&self, id: &str) -> Result<DocumentTemplate> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE document_templates SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![TemplateStatus::Deprecated, format_datetime(&now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        query_template(&conn, id)?.ok_or(Error::NotFound)
    }

    fn create_template_version(&self, version: &TemplateVersion) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO template_versions (id, template_id, version, schema_hash, schema_json, section_outline, status, created_at, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    version.id,
                    version.template_id,
                    version.version,
                    version.schema_hash,
                    serde_json::to_string(&version.schema)?,
                    serde_json::to_string(&version.section_outline)?,
                    version.status,
                    format_datetime(&version.created_at),
                    version.created_by,
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_template_version(
        &self,
        template_id: &str,
        version: &str,
    ) -> Result<Option<TemplateVersion>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM template_versions WHERE template_id = ?1 AND version = ?2"
            ),
            params![template_id, version],
            version_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_template_version_by_id(&self, id: &str) -> Result<Option<TemplateVersion>> {
        query_version_by_id(&self.conn(), id)
    }

    fn list_template_versions(&self, template_id: &str) -> Result<Vec<TemplateVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM template_versions WHERE template_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![template_id], version_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn activate_template_version(
        &self,
        template_id: &str,
        version_id: &str,
    ) -> Result<DocumentTemplate> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let template = query_template(&tx, template_id)?.ok_or(Error::NotFound)?;
        let version = query_version_by_id(&tx, version_id)?.ok_or(Error::NotFound)?;
        if version.template_id != template.id {
            return Err(Error::BadRequest(format!(
                "version {} belongs to template {}",
                version.id, version.template_id
            )));
        }

        if let Some(previous) = template
            .active_version_id
            .as_deref()
            .filter(|prev| *prev != version_id)
        {
            tx.execute(
                "UPDATE template_versions SET status = ?1 WHERE id = ?2",
                params![TemplateStatus::Deprecated, previous],
            )?;
        }

        tx.execute(
            "UPDATE template_versions SET status = ?1 WHERE id = ?2",
            params![TemplateStatus::Active, version_id],
        )?;
        tx.execute(
            "UPDATE document_templates SET active_version_id = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                version_id,
                TemplateStatus::Active,
                format_datetime(&now()),
                template_id
            ],
        )?;

        let updated = query_template(&tx, template_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    // Documents

    fn create_document(&self, doc: &Document) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO documents (id, project_id, title, content, template_id, template_version, template_schema_hash, created_at, created_by, updated_at, updated_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    doc.id,
                    doc.project_id,
                    doc.title,
                    serde_json::to_string(&doc.content)?,
                    doc.template_id,
                    doc.template_version,
                    doc.template_schema_hash,
                    format_datetime(&doc.created_at),
                    doc.created_by,
                    format_datetime(&doc.updated_at),
                    doc.updated_by,
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        query_document(&self.conn(), id)
    }

    fn update_document_content(
        &self,
        id: &str,
        content: &serde_json::Value,
        actor_id: &str,
    ) -> Result<Document> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE documents SET content = ?1, updated_at = ?2, updated_by = ?3
             WHERE id = ?4 AND deleted_at IS NULL",
            params![
                serde_json::to_string(content)?,
                format_datetime(&now()),
                actor_id,
                id
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        query_document(&conn, id)?.ok_or(Error::NotFound)
    }

    fn delete_document(&self, id: &str, actor_id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE documents SET deleted_at = ?1, deleted_by = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![format_datetime(&now()), actor_id, id],
        )?;
        Ok(rows > 0)
    }

    // Template migrations

    fn apply_template_migration(
        &self,
        expected: &TemplateBinding,
        target: &TemplateVersion,
        migration: &TemplateMigration,
    ) -> Result<Document> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE documents SET template_version = ?1, template_schema_hash = ?2
             WHERE id = ?3 AND template_id = ?4 AND template_version = ?5
               AND template_schema_hash = ?6 AND deleted_at IS NULL",
            params![
                target.version,
                target.schema_hash,
                migration.document_id,
                expected.template_id,
                expected.version,
                expected.schema_hash,
            ],
        )?;

        if rows == 0 {
            // Dropping the transaction rolls it back.
            return Err(Error::Conflict(
                "document template binding changed before migration could apply".to_string(),
            ));
        }

        insert_migration(&tx, migration)?;

        let doc = query_document(&tx, &migration.document_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(doc)
    }

    fn record_template_migration(&self, migration: &TemplateMigration) -> Result<()> {
        insert_migration(&self.conn(), migration)
    }

    fn list_template_migrations(&self, document_id: &str) -> Result<Vec<TemplateMigration>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MIGRATION_COLUMNS} FROM template_migrations WHERE document_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![document_id], migration_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Sections

    fn create_section(&self, section: &DocumentSection) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO document_sections (id, document_id, section_key, title, approved_version, approved_content_markdown, approved_at, approved_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    section.id,
                    section.document_id,
                    section.section_key,
                    section.title,
                    section.approved_version,
                    section.approved_content_markdown,
                    section.approved_at.as_ref().map(format_datetime),
                    section.approved_by,
                    format_datetime(&section.created_at),
                ],
            )
            .map_err(map_insert_error)?;
        Ok(())
    }

    fn get_section(&self, id: &str) -> Result<Option<DocumentSection>> {
        query_section(&self.conn(), id)
    }

    fn list_sections(&self, document_id: &str) -> Result<Vec<DocumentSection>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SECTION_COLUMNS} FROM document_sections WHERE document_id = ?1
             ORDER BY created_at, rowid"
        ))?;

        let rows = stmt.query_map(params![document_id], section_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn approve_section(
        &self,
        id: &str,
        content_markdown: &str,
        approved_by: &str,
    ) -> Result<DocumentSection> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE document_sections SET
                approved_version = approved_version + 1,
                approved_content_markdown = ?1, approved_at = ?2, approved_by = ?3
             WHERE id = ?4",
            params![content_markdown, format_datetime(&now()), approved_by, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }

        let section = query_section(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(section)
    }

    // Section drafts

    fn create_draft(&self, input: &NewSectionDraft, ctx: &SaveContext) -> Result<SectionDraft> {
        let (draft, _) = self.create_draft_revision(input, &DraftRevision::default(), ctx)?;
        Ok(draft)
    }

    fn create_draft_revision(
        &self,
        input: &NewSectionDraft,
        revision: &DraftRevision,
        ctx: &SaveContext,
    ) -> Result<(SectionDraft, Option<DraftConflictLog>)> {
        if input.draft_version < 1 || input.draft_base_version < 0 {
            return Err(Error::BadRequest(
                "draftVersion must be positive and draftBaseVersion non-negative".to_string(),
            ));
        }
        if let Some(annotations) = &ctx.formatting_annotations {
            validate_annotations(annotations)?;
        }

        let at = now();
        let id = Uuid::new_v4().to_string();
        let saved_at = ctx.saved_at.unwrap_or(at);
        let saved_by = ctx.saved_by.as_deref().unwrap_or(&ctx.actor_id);
        let update = &revision.update;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO section_drafts
                (id, section_id, document_id, user_id, draft_version, draft_base_version, content_markdown, summary_note,
                 conflict_state, conflict_reason, rebased_at, saved_at, saved_by, created_at, created_by, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?14, ?15)",
            params![
                id,
                input.section_id,
                input.document_id,
                input.user_id,
                input.draft_version,
                input.draft_base_version,
                input.content_markdown,
                input.summary_note,
                update.conflict_state.unwrap_or(ConflictState::Clean),
                update.conflict_reason.clone().flatten(),
                update.rebased_at.flatten().as_ref().map(format_datetime),
                format_datetime(&saved_at),
                saved_by,
                format_datetime(&at),
                ctx.actor_id,
            ],
        )
        .map_err(map_insert_error)?;

        // The draft id only exists now, so the log is attached to it here.
        let log = revision
            .conflict
            .as_ref()
            .map(|conflict| {
                insert_conflict(
                    &tx,
                    &NewConflictLog {
                        draft_id: id.clone(),
                        ..conflict.clone()
                    },
                )
            })
            .transpose()?;

        if let Some(annotations) = &ctx.formatting_annotations {
            insert_annotations(&tx, &input.section_id, &id, annotations, &ctx.actor_id, &at)?;
        }

        let draft = query_draft(&tx, &id, false)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok((draft, log))
    }

    fn update_draft(
        &self,
        id: &str,
        updates: &DraftUpdate,
        ctx: &SaveContext,
    ) -> Result<SectionDraft> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        apply_draft_update(&tx, id, updates, ctx, &now())?;

        let draft = query_draft(&tx, id, false)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(draft)
    }

    fn save_draft_revision(
        &self,
        id: &str,
        revision: &DraftRevision,
        ctx: &SaveContext,
    ) -> Result<(SectionDraft, Option<DraftConflictLog>)> {
        let at = now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let log = revision
            .conflict
            .as_ref()
            .map(|conflict| insert_conflict(&tx, conflict))
            .transpose()?;

        if let Some(resolution) = &revision.resolve_open_conflicts {
            resolve_open_conflicts(&tx, id, resolution, &at)?;
        }

        apply_draft_update(&tx, id, &revision.update, ctx, &at)?;

        let draft = query_draft(&tx, id, false)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok((draft, log))
    }

    fn find_draft_by_id(&self, id: &str) -> Result<Option<SectionDraft>> {
        query_draft(&self.conn(), id, false)
    }

    fn find_draft_by_id_including_deleted(&self, id: &str) -> Result<Option<SectionDraft>> {
        query_draft(&self.conn(), id, true)
    }

    fn find_draft_for_user(&self, section_id: &str, user_id: &str) -> Result<Option<SectionDraft>> {
        let conn = self.conn();
        let draft = conn
            .query_row(
                &format!(
                    "SELECT {DRAFT_COLUMNS} FROM section_drafts
                     WHERE section_id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
                ),
                params![section_id, user_id],
                draft_from_row,
            )
            .optional()?;

        draft.map(|d| hydrate(&conn, d)).transpose()
    }

    fn list_drafts_by_section(&self, section_id: &str) -> Result<Vec<SectionDraft>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DRAFT_COLUMNS} FROM section_drafts
             WHERE section_id = ?1 AND deleted_at IS NULL
             ORDER BY saved_at DESC, rowid DESC"
        ))?;

        let drafts = stmt
            .query_map(params![section_id], draft_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        drafts.into_iter().map(|d| hydrate(&conn, d)).collect()
    }

    fn delete_draft(&self, id: &str, actor_id: &str) -> Result<bool> {
        let at = format_datetime(&now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE section_drafts SET deleted_at = ?1, deleted_by = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![at, actor_id, id],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE formatting_annotations SET deleted_at = ?1, deleted_by = ?2
             WHERE draft_id = ?3 AND deleted_at IS NULL",
            params![at, actor_id, id],
        )?;

        tx.commit()?;
        Ok(true)
    }

    // Formatting annotations

    fn replace_formatting_annotations(
        &self,
        draft_id: &str,
        annotations: &[NewFormattingAnnotation],
        actor_id: &str,
    ) -> Result<Vec<FormattingAnnotation>> {
        validate_annotations(annotations)?;

        let at = now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let draft = query_draft(&tx, draft_id, false)?.ok_or(Error::NotFound)?;
        swap_annotations(&tx, &draft, annotations, actor_id, &at)?;

        let replaced = query_annotations(&tx, draft_id)?;
        tx.commit()?;
        Ok(replaced)
    }

    fn list_formatting_annotations(&self, draft_id: &str) -> Result<Vec<FormattingAnnotation>> {
        query_annotations(&self.conn(), draft_id)
    }

    // Conflict log

    fn create_conflict_log(&self, log: &NewConflictLog) -> Result<DraftConflictLog> {
        insert_conflict(&self.conn(), log)
    }

    fn resolve_conflict_log(
        &self,
        id: &str,
        resolution: &ConflictResolution,
    ) -> Result<DraftConflictLog> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let log = query_conflict(&tx, id)?.ok_or(Error::NotFound)?;
        if log.is_resolved() {
            return Err(Error::Conflict("conflict log is already resolved".to_string()));
        }

        tx.execute(
            "UPDATE draft_conflict_logs SET resolved_by = ?1, resolution_note = ?2, resolved_at = ?3
             WHERE id = ?4",
            params![
                resolution.resolved_by,
                resolution.resolution_note,
                format_datetime(&now()),
                id
            ],
        )?;

        let resolved = query_conflict(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(resolved)
    }

    fn list_conflict_logs_by_draft(&self, draft_id: &str) -> Result<Vec<DraftConflictLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM draft_conflict_logs
             WHERE draft_id = ?1 AND deleted_at IS NULL
             ORDER BY detected_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![draft_id], conflict_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_conflict_logs_by_section(&self, section_id: &str) -> Result<Vec<DraftConflictLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM draft_conflict_logs
             WHERE section_id = ?1 AND deleted_at IS NULL
             ORDER BY detected_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![section_id], conflict_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

fn insert_migration(conn: &Connection, migration: &TemplateMigration) -> Result<()> {
    let validation_errors = migration
        .validation_errors
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO template_migrations (id, document_id, from_version, to_version, status, validation_errors, initiated_by, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            migration.id,
            migration.document_id,
            migration.from_version,
            migration.to_version,
            migration.status,
            validation_errors,
            migration.initiated_by,
            format_datetime(&migration.created_at),
            migration.completed_at.as_ref().map(format_datetime),
        ],
    )
    .map_err(map_insert_error)?;
    Ok(())
}
