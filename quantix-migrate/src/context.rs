//! Per-request caller context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and correlation data passed through every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlates logs across the source and destination hosts
    pub request_id: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub is_admin: bool,
}

impl RequestContext {
    /// Administrative context with a fresh request ID.
    pub fn admin() -> Self {
        Self {
            request_id: new_request_id(),
            user_id: None,
            project_id: None,
            is_admin: true,
        }
    }
}

fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4())
}
