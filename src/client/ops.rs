use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Field reference names shared by the jobs.
pub const START_DATE_FIELD: &str = "Microsoft.VSTS.Scheduling.StartDate";
pub const TARGET_DATE_FIELD: &str = "Microsoft.VSTS.Scheduling.TargetDate";
pub const PARENT_FIELD: &str = "System.Parent";
pub const TAGS_FIELD: &str = "System.Tags";
pub const TITLE_FIELD: &str = "System.Title";

/// Link type that attaches an item to its parent.
pub const PARENT_RELATION: &str = "System.LinkTypes.Hierarchy-Reverse";

/// One operation of a JSON-patch document (`application/json-patch+json`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    /// An `add` targeting a field by reference name.
    pub fn add_field(field: &str, value: impl Into<Value>) -> Self {
        Self {
            op: "add".to_string(),
            path: format!("/fields/{field}"),
            value: value.into(),
        }
    }

    /// An `add` appending a parent relation to the item's relation list.
    pub fn add_parent_relation(parent_url: &str) -> Self {
        Self {
            op: "add".to_string(),
            path: "/relations/-".to_string(),
            value: json!({ "rel": PARENT_RELATION, "url": parent_url }),
        }
    }
}

/// Render a date the way the remote serves it: RFC 3339, UTC, `Z` suffix.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}
