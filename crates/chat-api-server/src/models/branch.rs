use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub parent_message_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameBranchRequest {
    pub name: String,
}

/// The source branch comes from the request path.
#[derive(Debug, Deserialize)]
pub struct MergeBranchRequest {
    pub target_branch_id: Uuid,
}

#[derive(Debug, Deserialize, Default)]
pub struct BranchMessagesParams {
    #[serde(default)]
    pub limit: Option<usize>,
}
