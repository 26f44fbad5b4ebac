use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{Map, Value};
use shared::{
    domain::{ClassName, ObjectId},
    error::{ApiError, ErrorCode},
    protocol::{CreatedObject, HealthStatus, ObjectPayload, QueryResults, ServerInfo},
};
use storage::StoredObject;
use tracing::debug;

use crate::{
    app_state::{Access, AppState},
    auth::unauthorized,
};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

const RESERVED_FIELDS: [&str; 3] = ["objectId", "createdAt", "updatedAt"];

pub(crate) async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
    })
}

pub(crate) async fn server_info(
    State(state): State<Arc<AppState>>,
    Extension(access): Extension<Access>,
) -> ApiResult<Json<ServerInfo>> {
    if access != Access::Master {
        return Err(unauthorized());
    }
    Ok(Json(ServerInfo {
        app_id: state.config.app_id.clone(),
        server_url: state.config.server_url.clone(),
        database_name: state.storage.database_name().to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

pub(crate) async fn create_object(
    State(state): State<Arc<AppState>>,
    Path(class_name): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<CreatedObject>)> {
    let class_name = parse_class_name(&class_name)?;
    if let Some(field) = RESERVED_FIELDS.iter().find(|f| fields.contains_key(**f)) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                format!("{field} is a reserved field"),
            )),
        ));
    }

    let stored = state
        .storage
        .insert_object(&class_name, &fields)
        .await
        .map_err(internal)?;
    debug!(class = %class_name, object_id = %stored.object_id, "object created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedObject {
            object_id: stored.object_id,
            created_at: stored.created_at,
        }),
    ))
}

pub(crate) async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(class_name): Path<String>,
) -> ApiResult<Json<QueryResults>> {
    let class_name = parse_class_name(&class_name)?;
    let objects = state
        .storage
        .list_objects(&class_name)
        .await
        .map_err(internal)?;
    Ok(Json(QueryResults {
        results: objects.into_iter().map(payload).collect(),
    }))
}

pub(crate) async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((class_name, object_id)): Path<(String, String)>,
) -> ApiResult<Json<ObjectPayload>> {
    let class_name = parse_class_name(&class_name)?;
    let object = state
        .storage
        .load_object(&class_name, &ObjectId(object_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError::new(ErrorCode::NotFound, "object not found")),
            )
        })?;
    Ok(Json(payload(object)))
}

fn parse_class_name(raw: &str) -> ApiResult<ClassName> {
    ClassName::parse(raw).map_err(|e| (StatusCode::BAD_REQUEST, Json(ApiError::from(e))))
}

fn payload(object: StoredObject) -> ObjectPayload {
    ObjectPayload {
        object_id: object.object_id,
        created_at: object.created_at,
        fields: object.fields,
    }
}

fn internal(error: storage::StorageError) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::Internal, error.to_string())),
    )
}
