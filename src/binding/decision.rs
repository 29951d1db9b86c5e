use serde::Serialize;

use crate::types::{TemplateBinding, TemplateVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoopReason {
    UpToDate,
    NoActiveVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeReason {
    OutOfDate,
    SchemaMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    RemovedVersion,
}

/// What to do with a document's template binding when it is opened.
///
/// Serialized as `{"action": "...", "reason": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TemplateDecision {
    Noop {
        reason: NoopReason,
    },
    #[serde(rename_all = "camelCase")]
    Upgrade {
        reason: UpgradeReason,
        current_version: String,
        target_version: String,
    },
    #[serde(rename_all = "camelCase")]
    Blocked {
        reason: BlockedReason,
        template_id: String,
        requested_version: String,
    },
}

impl TemplateDecision {
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            TemplateDecision::Noop { .. } => "noop",
            TemplateDecision::Upgrade { .. } => "upgrade",
            TemplateDecision::Blocked { .. } => "blocked",
        }
    }
}

/// Decides how a binding relates to the catalog.
///
/// `bound` is the catalog row matching the binding's (template, version), and `active`
/// is the template's active version. Neither is cached: callers read both fresh.
#[must_use]
pub fn decide(
    binding: &TemplateBinding,
    bound: Option<&TemplateVersion>,
    active: Option<&TemplateVersion>,
) -> TemplateDecision {
    let Some(bound) = bound else {
        return TemplateDecision::Blocked {
            reason: BlockedReason::RemovedVersion,
            template_id: binding.template_id.clone(),
            requested_version: binding.version.clone(),
        };
    };

    let Some(active) = active else {
        return TemplateDecision::Noop {
            reason: NoopReason::NoActiveVersion,
        };
    };

    let upgrade = |reason| TemplateDecision::Upgrade {
        reason,
        current_version: binding.version.clone(),
        target_version: active.version.clone(),
    };

    if bound.schema_hash != binding.schema_hash {
        upgrade(UpgradeReason::SchemaMismatch)
    } else if bound.id == active.id {
        TemplateDecision::Noop {
            reason: NoopReason::UpToDate,
        }
    } else {
        upgrade(UpgradeReason::OutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::types::TemplateStatus;

    fn version(id: &str, version: &str, hash: &str) -> TemplateVersion {
        TemplateVersion {
            id: id.to_string(),
            template_id: "tpl-1".to_string(),
            version: version.to_string(),
            schema_hash: hash.to_string(),
            schema: json!({ "type": "object" }),
            section_outline: json!([]),
            status: TemplateStatus::Active,
            created_at: Utc::now(),
            created_by: None,
        }
    }

    fn binding(version: &str, hash: &str) -> TemplateBinding {
        TemplateBinding {
            template_id: "tpl-1".to_string(),
            version: version.to_string(),
            schema_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_exact_match_is_up_to_date() {
        let v1 = version("tv-1", "1.0.0", "h1");
        let decision = decide(&binding("1.0.0", "h1"), Some(&v1), Some(&v1));
        assert_eq!(
            decision,
            TemplateDecision::Noop {
                reason: NoopReason::UpToDate
            }
        );
    }

    #[test]
    fn test_older_version_is_out_of_date() {
        let v1 = version("tv-1", "1.0.0", "h1");
        let v2 = version("tv-2", "2.0.0", "h2");
        let decision = decide(&binding("1.0.0", "h1"), Some(&v1), Some(&v2));
        assert_eq!(
            decision,
            TemplateDecision::Upgrade {
                reason: UpgradeReason::OutOfDate,
                current_version: "1.0.0".to_string(),
                target_version: "2.0.0".to_string(),
            }
        );
    }

    #[test]
    fn test_hash_drift_is_schema_mismatch_not_removed() {
        let v1 = version("tv-1", "1.0.0", "h1-edited");
        let decision = decide(&binding("1.0.0", "h1"), Some(&v1), Some(&v1));
        assert_eq!(
            decision,
            TemplateDecision::Upgrade {
                reason: UpgradeReason::SchemaMismatch,
                current_version: "1.0.0".to_string(),
                target_version: "1.0.0".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_row_is_blocked() {
        let v2 = version("tv-2", "2.0.0", "h2");
        let decision = decide(&binding("1.0.0", "h1"), None, Some(&v2));
        assert_eq!(
            decision,
            TemplateDecision::Blocked {
                reason: BlockedReason::RemovedVersion,
                template_id: "tpl-1".to_string(),
                requested_version: "1.0.0".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_row_wins_over_missing_active() {
        let decision = decide(&binding("1.0.0", "h1"), None, None);
        assert_eq!(decision.action(), "blocked");
    }

    #[test]
    fn test_no_active_version_is_noop() {
        let v1 = version("tv-1", "1.0.0", "h1");
        let decision = decide(&binding("1.0.0", "stale"), Some(&v1), None);
        assert_eq!(
            decision,
            TemplateDecision::Noop {
                reason: NoopReason::NoActiveVersion
            }
        );
    }

    #[test]
    fn test_serializes_as_tagged_variant() {
        let decision = TemplateDecision::Upgrade {
            reason: UpgradeReason::OutOfDate,
            current_version: "1.0.0".to_string(),
            target_version: "2.0.0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({
                "action": "upgrade",
                "reason": "out_of_date",
                "currentVersion": "1.0.0",
                "targetVersion": "2.0.0"
            })
        );

        let blocked = TemplateDecision::Blocked {
            reason: BlockedReason::RemovedVersion,
            template_id: "tpl-1".to_string(),
            requested_version: "0.9.0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&blocked).unwrap(),
            json!({
                "action": "blocked",
                "reason": "removed_version",
                "templateId": "tpl-1",
                "requestedVersion": "0.9.0"
            })
        );
    }
}
