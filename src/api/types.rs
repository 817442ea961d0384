//! API query and error types.

use serde::{Deserialize, Serialize};

/// Query of `GET /schedules/lookup`.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    /// Full reference, or `@<ld>/<ln>`.
    pub reference: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
