//! Shared API request/response types
//!
//! The domain entities serialize directly; this module only adds the
//! envelope shapes the HTTP surface promises to clients.

use serde::{Deserialize, Serialize};

/// Paginated listing envelope: `{items, count}`
///
/// `count` is the total match count, independent of pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: u64,
}

/// Simple acknowledgement body: `{message}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}
