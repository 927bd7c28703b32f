//! Work-item store client (Azure-DevOps-shaped HTTP/JSON provider).
//!
//! Reads work items, runs WIQL queries, and applies json-patch updates.
//! Field paths follow the provider's scheduling namespace; missing
//! scheduling values default to 0.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use tb_domain::error::{Error, Result};
use tb_domain::work_item::{SchedulingFields, WorkItem};

use crate::transport::{HttpTransport, RequestOptions};

pub const API_VERSION: &str = "7.1";

pub const TITLE_FIELD: &str = "System.Title";
pub const STATE_FIELD: &str = "System.State";
pub const ASSIGNED_TO_FIELD: &str = "System.AssignedTo";
pub const TYPE_FIELD: &str = "System.WorkItemType";
pub const HISTORY_PATH: &str = "/fields/System.History";
pub const ESTIMATE_FIELD: &str = "Microsoft.VSTS.Scheduling.OriginalEstimate";
pub const COMPLETED_FIELD: &str = "Microsoft.VSTS.Scheduling.CompletedWork";
pub const REMAINING_FIELD: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
pub const COMPLETED_PATH: &str = "/fields/Microsoft.VSTS.Scheduling.CompletedWork";

const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Default result cap for WIQL queries.
pub const DEFAULT_QUERY_TOP: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patch operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One json-patch operation. The store applies an ordered list atomically.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: Value,
}

impl PatchOp {
    pub fn add(path: &str, value: Value) -> Self {
        Self {
            op: "add".into(),
            path: path.into(),
            value,
        }
    }
}

/// Patch list for a completed-work update, with the history comment last.
pub fn build_completed_work_ops(hours: f64, comment: Option<&str>) -> Vec<PatchOp> {
    let mut ops = vec![PatchOp::add(COMPLETED_PATH, Value::from(hours))];
    let default_comment;
    let text = match comment {
        Some(c) => c,
        None => {
            default_comment = format!("Completed work updated to {hours} hours by TimeBridge");
            &default_comment
        }
    };
    ops.push(PatchOp::add(HISTORY_PATH, Value::from(text)));
    ops
}

/// WIQL for the candidate set of one sync run: open items only.
pub fn open_items_wiql() -> String {
    "SELECT [System.Id], [System.Title], [System.State], \
     [System.AssignedTo], [System.WorkItemType] \
     FROM WorkItems \
     WHERE [System.State] NOT IN ('Removed', 'Closed')"
        .to_string()
}

/// WIQL for the items of one iteration, optionally filtered by type.
pub fn iteration_wiql(iteration_path: &str, types: Option<&[&str]>) -> String {
    let mut wiql = format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.IterationPath] = '{iteration_path}'"
    );
    if let Some(types) = types {
        if !types.is_empty() {
            let list = types
                .iter()
                .map(|t| format!("'{t}'"))
                .collect::<Vec<_>>()
                .join(", ");
            wiql.push_str(&format!(" AND [System.WorkItemType] IN ({list})"));
        }
    }
    wiql
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a provider work-item record into the domain form.
pub fn parse_work_item(value: &Value) -> Result<WorkItem> {
    let id = value
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MissingField("work item response missing 'id'".into()))?;
    let fields = value
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::MissingField(format!("work item #{id} missing 'fields'")))?;

    let str_field = |name: &str| -> String {
        fields
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let num_field = |name: &str| -> f64 {
        fields.get(name).and_then(Value::as_f64).unwrap_or(0.0)
    };

    // The assignee arrives either as an identity object or a plain string.
    let assigned_to = fields.get(ASSIGNED_TO_FIELD).and_then(|v| match v {
        Value::Object(o) => o
            .get("uniqueName")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    });

    Ok(WorkItem {
        id,
        title: str_field(TITLE_FIELD),
        state: str_field(STATE_FIELD),
        assigned_to,
        work_item_type: str_field(TYPE_FIELD),
        scheduling: SchedulingFields {
            original_estimate: num_field(ESTIMATE_FIELD),
            completed_work: num_field(COMPLETED_FIELD),
            remaining_work: num_field(REMAINING_FIELD),
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability set of the work-item store consumed by the engine.
#[async_trait::async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn get_work_item(&self, id: i64, fields: Option<&[&str]>) -> Result<WorkItem>;

    /// Per-id fetch preserving input order; not-found items are skipped.
    async fn get_work_items_batch(&self, ids: &[i64]) -> Result<Vec<WorkItem>>;

    async fn update_completed_work(
        &self,
        id: i64,
        hours: f64,
        comment: Option<&str>,
    ) -> Result<WorkItem>;

    async fn query_work_items(
        &self,
        wiql: &str,
        project: Option<&str>,
        top: usize,
    ) -> Result<Vec<i64>>;

    /// Canonical per-item permission check: re-read the item; 401/403 mean
    /// no permission, success means permission, anything else propagates.
    async fn validate_permissions(&self, id: i64) -> Result<bool>;
}

/// HTTP work-item client over the shared transport.
pub struct WorkItemClient {
    transport: Arc<HttpTransport>,
    org_base_url: String,
    project: Option<String>,
}

impl WorkItemClient {
    pub fn new(transport: Arc<HttpTransport>, org_base_url: &str, project: Option<&str>) -> Self {
        Self {
            transport,
            org_base_url: org_base_url.trim_end_matches('/').to_string(),
            project: project.map(|p| p.to_string()),
        }
    }

    fn api_version_query() -> Vec<(String, String)> {
        vec![("api-version".into(), API_VERSION.into())]
    }

    /// Apply an ordered patch list; a comment appends a history op.
    pub async fn update_work_item(
        &self,
        id: i64,
        mut ops: Vec<PatchOp>,
        comment: Option<&str>,
    ) -> Result<WorkItem> {
        if let Some(comment) = comment {
            ops.push(PatchOp::add(HISTORY_PATH, Value::from(comment)));
        }

        let url = format!("{}/_apis/wit/workitems/{id}", self.org_base_url);
        let query = Self::api_version_query();
        let body = serde_json::to_value(&ops)?;

        tracing::info!(work_item_id = id, ops = ops.len(), "patching work item");

        let value = self
            .transport
            .patch(
                &url,
                RequestOptions {
                    query: Some(&query),
                    body: Some(&body),
                    headers: &[("Content-Type", JSON_PATCH_CONTENT_TYPE)],
                },
            )
            .await?;
        parse_work_item(&value)
    }

    /// All projects of the organization; doubles as the org-level access probe.
    pub async fn get_projects(&self) -> Result<Vec<String>> {
        let url = format!("{}/_apis/projects", self.org_base_url);
        let query = Self::api_version_query();
        let value = self
            .transport
            .get(
                &url,
                RequestOptions {
                    query: Some(&query),
                    ..Default::default()
                },
            )
            .await?;

        let names = value
            .get("value")
            .and_then(Value::as_array)
            .map(|projects| {
                projects
                    .iter()
                    .filter_map(|p| p.get("name").and_then(Value::as_str))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// Items of one iteration via the WIQL builder.
    pub async fn get_work_items_by_iteration(
        &self,
        iteration_path: &str,
        project: Option<&str>,
        types: Option<&[&str]>,
    ) -> Result<Vec<i64>> {
        let wiql = iteration_wiql(iteration_path, types);
        self.query_work_items(&wiql, project, DEFAULT_QUERY_TOP)
            .await
    }
}

#[async_trait::async_trait]
impl WorkItemStore for WorkItemClient {
    async fn get_work_item(&self, id: i64, fields: Option<&[&str]>) -> Result<WorkItem> {
        let url = format!("{}/_apis/wit/workitems/{id}", self.org_base_url);
        let mut query = Self::api_version_query();
        if let Some(fields) = fields {
            query.push(("fields".into(), fields.join(",")));
        }

        let value = self
            .transport
            .get(
                &url,
                RequestOptions {
                    query: Some(&query),
                    ..Default::default()
                },
            )
            .await?;
        parse_work_item(&value)
    }

    async fn get_work_items_batch(&self, ids: &[i64]) -> Result<Vec<WorkItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.get_work_item(id, None).await {
                Ok(item) => items.push(item),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(work_item_id = id, "work item vanished during batch fetch");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    async fn update_completed_work(
        &self,
        id: i64,
        hours: f64,
        comment: Option<&str>,
    ) -> Result<WorkItem> {
        let ops = build_completed_work_ops(hours, comment);
        // The comment is already part of the ops list.
        self.update_work_item(id, ops, None).await
    }

    async fn query_work_items(
        &self,
        wiql: &str,
        project: Option<&str>,
        top: usize,
    ) -> Result<Vec<i64>> {
        let project = project
            .or(self.project.as_deref())
            .ok_or_else(|| Error::Config("no project specified and no default configured".into()))?;

        let url = format!("{}/{project}/_apis/wit/wiql", self.org_base_url);
        let query = Self::api_version_query();
        let body = serde_json::json!({ "query": wiql });

        tracing::info!(project, "executing WIQL query");
        tracing::debug!(wiql);

        let value = self
            .transport
            .post(
                &url,
                RequestOptions {
                    query: Some(&query),
                    body: Some(&body),
                    ..Default::default()
                },
            )
            .await?;

        let ids = value
            .get("workItems")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_i64))
                    .take(top)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        tracing::info!(count = ids.len(), "WIQL query returned work items");
        Ok(ids)
    }

    async fn validate_permissions(&self, id: i64) -> Result<bool> {
        match self.get_work_item(id, Some(&["System.Id"])).await {
            Ok(_) => Ok(true),
            Err(Error::Forbidden(_)) | Err(Error::Unauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_work_item() {
        let raw = serde_json::json!({
            "id": 42,
            "fields": {
                "System.Title": "Implement retry",
                "System.State": "Active",
                "System.AssignedTo": {"uniqueName": "ana@contoso.com", "displayName": "Ana"},
                "System.WorkItemType": "Task",
                "Microsoft.VSTS.Scheduling.OriginalEstimate": 8.0,
                "Microsoft.VSTS.Scheduling.CompletedWork": 2.5,
                "Microsoft.VSTS.Scheduling.RemainingWork": 5.5
            }
        });
        let item = parse_work_item(&raw).unwrap();
        assert_eq!(item.id, 42);
        assert_eq!(item.title, "Implement retry");
        assert_eq!(item.assigned_to.as_deref(), Some("ana@contoso.com"));
        assert_eq!(item.scheduling.original_estimate, 8.0);
        assert_eq!(item.scheduling.completed_work, 2.5);
    }

    #[test]
    fn missing_scheduling_defaults_to_zero() {
        let raw = serde_json::json!({
            "id": 7,
            "fields": {"System.Title": "t", "System.State": "New"}
        });
        let item = parse_work_item(&raw).unwrap();
        assert_eq!(item.scheduling, SchedulingFields::default());
        assert!(item.assigned_to.is_none());
    }

    #[test]
    fn assignee_as_plain_string() {
        let raw = serde_json::json!({
            "id": 7,
            "fields": {"System.AssignedTo": "luis@contoso.com"}
        });
        let item = parse_work_item(&raw).unwrap();
        assert_eq!(item.assigned_to.as_deref(), Some("luis@contoso.com"));
    }

    #[test]
    fn rejects_record_without_id() {
        let raw = serde_json::json!({"fields": {}});
        assert!(parse_work_item(&raw).is_err());
    }

    #[test]
    fn completed_work_ops_shape() {
        let ops = build_completed_work_ops(3.5, Some("ajuste manual"));
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, COMPLETED_PATH);
        assert_eq!(ops[0].value, serde_json::json!(3.5));
        assert_eq!(ops[1].path, HISTORY_PATH);
        assert_eq!(ops[1].value, serde_json::json!("ajuste manual"));
    }

    #[test]
    fn completed_work_ops_default_comment() {
        let ops = build_completed_work_ops(2.0, None);
        let comment = ops[1].value.as_str().unwrap();
        assert!(comment.contains("2 hours"));
        assert!(comment.contains("TimeBridge"));
    }

    #[test]
    fn open_items_wiql_excludes_terminal_states() {
        let wiql = open_items_wiql();
        assert!(wiql.contains("NOT IN ('Removed', 'Closed')"));
    }

    #[test]
    fn iteration_wiql_with_types() {
        let wiql = iteration_wiql("Sprint 1", Some(&["Task", "Bug"]));
        assert!(wiql.contains("[System.IterationPath] = 'Sprint 1'"));
        assert!(wiql.contains("IN ('Task', 'Bug')"));

        let bare = iteration_wiql("Sprint 1", None);
        assert!(!bare.contains("WorkItemType"));
    }

    #[test]
    fn patch_op_serializes_to_wire_form() {
        let op = PatchOp::add(COMPLETED_PATH, Value::from(1.5));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "op": "add",
                "path": "/fields/Microsoft.VSTS.Scheduling.CompletedWork",
                "value": 1.5
            })
        );
    }
}
