//! Capability registry endpoints

use crate::api::response;
use crate::api::routes::AppState;
use crate::error::{ApiError, ApiResult};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use weft_registry::{ResolveMiss, RoleQuery};

/// Catalog snapshot, optionally restricted to implemented operations
///
/// GET /api/registry/catalog?implemented=true
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub implemented: Option<bool>,
}

pub async fn catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state.index.snapshot();
    let only_implemented = query.implemented.unwrap_or(false);

    let connectors: Vec<Value> = snapshot
        .connectors()
        .into_iter()
        .filter_map(|connector| {
            let operations: Vec<Value> = connector
                .operations
                .iter()
                .filter_map(|op| {
                    let implemented = snapshot.is_implemented(&connector.id, &op.id);
                    if only_implemented && !implemented {
                        return None;
                    }
                    let mut body = json!({
                        "id": op.id,
                        "role": op.role,
                        "description": op.description,
                        "requiresAuth": op.requires_auth,
                        "implemented": implemented,
                    });
                    if !op.required_scopes.is_empty() {
                        body["requiredScopes"] = json!(op.required_scopes);
                    }
                    Some(body)
                })
                .collect();
            if only_implemented && operations.is_empty() {
                return None;
            }
            Some(json!({
                "id": connector.id,
                "name": connector.name,
                "category": connector.category,
                "icon": connector.icon,
                "color": connector.color,
                "lifecycle": connector.lifecycle,
                "version": connector.semver,
                "operations": operations,
            }))
        })
        .collect();

    let mut fields = Map::new();
    fields.insert("connectors".into(), json!(connectors));
    fields.insert("builtAt".into(), json!(snapshot.built_at()));
    Ok(response::ok_fields(fields))
}

/// Parameter schema and defaults of one operation
///
/// GET /api/registry/op-schema?app=&op=&kind=
#[derive(Debug, Deserialize)]
pub struct OpSchemaQuery {
    pub app: String,
    pub op: String,
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn op_schema(
    State(state): State<AppState>,
    Query(query): Query<OpSchemaQuery>,
) -> ApiResult<impl IntoResponse> {
    let role = match query.kind.as_deref() {
        None | Some("auto") => RoleQuery::Auto,
        Some("action") => RoleQuery::Action,
        Some("trigger") => RoleQuery::Trigger,
        Some(other) => {
            return Err(ApiError::BadRequest(format!("invalid kind '{}'", other)));
        }
    };

    let snapshot = state.index.snapshot();
    let handle = snapshot
        .resolve(&query.app, &query.op, role)
        .map_err(|miss| match miss {
            ResolveMiss::UnknownApp => {
                ApiError::NotFound(format!("connector '{}'", query.app))
            }
            ResolveMiss::UnknownOperation | ResolveMiss::RoleMismatch => ApiError::NotFound(
                format!("operation '{}' on '{}' ({})", query.op, query.app, miss),
            ),
            ResolveMiss::NotImplemented => ApiError::NotFound(format!(
                "operation '{}' on '{}' is not implemented by the fleet",
                query.op, query.app
            )),
        })?;

    let op = handle.operation();
    let mut fields = Map::new();
    fields.insert("schema".into(), op.params_schema.clone());
    fields.insert(
        "defaults".into(),
        op.defaults
            .clone()
            .map(Value::Object)
            .unwrap_or(Value::Null),
    );
    if let Some(output) = &op.output_schema {
        fields.insert("outputSchema".into(), output.clone());
    }
    Ok(response::ok_fields(fields))
}

/// Rebuild the capability snapshot from the registered runtimes
///
/// POST /api/registry/refresh
pub async fn refresh_index(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = weft_registry::CatalogSnapshot::build(
        weft_registry::builtin_connectors(),
        &state.runtimes.implemented_operations(),
    );
    state.index.refresh(snapshot);
    Ok(response::ok_empty())
}
