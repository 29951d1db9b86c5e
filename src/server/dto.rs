use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct UpdateDocumentRequest {
    pub content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveSectionRequest {
    pub content_markdown: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnblockDraftRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    #[serde(default)]
    pub resolution_note: Option<String>,
}
