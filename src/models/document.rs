use serde::{Deserialize, Serialize};

use super::ObjectId;

/// Extracted metadata and text of one archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub oid: ObjectId,
    /// JSON metadata blob as returned by the content extractor.
    pub meta: String,
    pub text: String,
}
