use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub display_name: String,
    /// Only ever grows, and only while this subject is active and running.
    pub total_accumulated_seconds: u64,
}

impl Subject {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            total_accumulated_seconds: 0,
        }
    }
}
