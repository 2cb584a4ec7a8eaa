use serde::Deserialize;
use serde_json::{Map, Value};

/// Response to a flat WIQL query: the selected columns and the matching
/// item references.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(rename = "workItems", default)]
    pub work_items: Vec<WorkItemRef>,
}

/// One column of a WIQL result set.
#[derive(Debug, Clone, Deserialize)]
pub struct Column {
    #[serde(rename = "referenceName")]
    pub reference_name: String,
    pub name: String,
}

/// Identifier and address of one matched work item.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemRef {
    pub id: u64,
    pub url: String,
}

/// Field payload of one work item. Deserialization fails when the payload
/// has no `fields` container, which callers treat as a skip for that item.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemDetail {
    pub id: u64,
    pub fields: Map<String, Value>,
}

/// Response to a work item creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedWorkItem {
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_response() {
        let json = r#"{
            "queryType": "flat",
            "columns": [
                {"referenceName": "System.Id", "name": "ID", "url": "https://dev.azure.com/_apis/wit/fields/System.Id"}
            ],
            "workItems": [
                {"id": 42, "url": "https://dev.azure.com/c/_apis/wit/workItems/42"},
                {"id": 43, "url": "https://dev.azure.com/c/_apis/wit/workItems/43"}
            ]
        }"#;
        let response: QueryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.columns.len(), 1);
        assert_eq!(response.columns[0].reference_name, "System.Id");
        assert_eq!(response.work_items.len(), 2);
        assert_eq!(response.work_items[0].id, 42);
        assert!(response.work_items[1].url.ends_with("/43"));
    }

    #[test]
    fn test_parse_query_response_without_matches() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"queryType": "flat", "workItems": []}"#).unwrap();
        assert!(response.work_items.is_empty());
    }

    #[test]
    fn test_parse_work_item_detail() {
        let json = r#"{
            "id": 7,
            "rev": 3,
            "fields": {
                "System.Title": "Checkout flow",
                "System.Parent": 42,
                "Microsoft.VSTS.Scheduling.StartDate": "2024-01-05T00:00:00Z"
            }
        }"#;
        let detail: WorkItemDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.id, 7);
        assert_eq!(detail.fields["System.Parent"], 42);
    }

    #[test]
    fn test_parse_work_item_detail_requires_fields_container() {
        let result = serde_json::from_str::<WorkItemDetail>(r#"{"id": 7, "rev": 3}"#);
        assert!(result.is_err());
    }
}
