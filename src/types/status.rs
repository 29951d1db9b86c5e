use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Declares a closed, text-backed status enum stored as its snake_case name.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                Self::parse(text).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {} '{}'", stringify!($name), text).into())
                })
            }
        }
    };
}

text_enum! {
    /// Lifecycle of a template and of its individual versions.
    TemplateStatus {
        Draft => "draft",
        Active => "active",
        Deprecated => "deprecated",
    }
}

text_enum! {
    MigrationStatus {
        Pending => "pending",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

text_enum! {
    /// Optimistic-concurrency state of a section draft.
    ///
    /// Allowed transitions: clean -> rebase_required -> rebased -> clean, and any -> blocked.
    ConflictState {
        Clean => "clean",
        RebaseRequired => "rebase_required",
        Rebased => "rebased",
        Blocked => "blocked",
    }
}

text_enum! {
    Severity {
        Warning => "warning",
        Error => "error",
    }
}

text_enum! {
    /// Where a conflict was observed: opening the section editor, or saving a draft.
    DetectedDuring {
        Entry => "entry",
        Save => "save",
    }
}

impl ConflictState {
    /// Returns true if the state machine permits moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: ConflictState) -> bool {
        use ConflictState::*;
        matches!(
            (self, next),
            (_, Blocked)
                | (Clean, Clean)
                | (Clean, RebaseRequired)
                | (RebaseRequired, RebaseRequired)
                | (RebaseRequired, Rebased)
                | (Rebased, Clean)
        )
    }
}
