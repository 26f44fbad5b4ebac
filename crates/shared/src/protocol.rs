use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::ObjectId;

pub const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";
pub const JAVASCRIPT_KEY_HEADER: &str = "x-parse-javascript-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub app_id: String,
    #[serde(rename = "serverURL")]
    pub server_url: String,
    pub database_name: String,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedObject {
    pub object_id: ObjectId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPayload {
    pub object_id: ObjectId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResults {
    pub results: Vec<ObjectPayload>,
}
