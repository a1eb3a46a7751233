//! Job submission request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to submit a new media job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SubmitJobRequest {
    /// Submitting user
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,

    /// Source media URL
    #[validate(url(message = "source_url must be a valid URL"))]
    pub source_url: String,

    /// Requested profile names, in order
    #[validate(length(min = 1, message = "at least one profile is required"))]
    pub profiles: Vec<String>,
}
