use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::domain::{ClassName, ObjectId};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};

use crate::{Result, StorageError, StoredObject};

#[derive(Clone)]
pub(crate) struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub(crate) async fn connect(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub(crate) async fn insert_object(&self, object: &StoredObject) -> Result<()> {
        let body = Value::Object(object.fields.clone()).to_string();
        sqlx::query(
            "INSERT INTO objects (object_id, class_name, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(object.object_id.as_str())
        .bind(object.class_name.as_str())
        .bind(body)
        .bind(object.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn list_objects(&self, class_name: &ClassName) -> Result<Vec<StoredObject>> {
        let rows = sqlx::query(
            "SELECT object_id, class_name, body, created_at FROM objects
             WHERE class_name = ?
             ORDER BY rowid ASC",
        )
        .bind(class_name.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(object_from_row).collect()
    }

    pub(crate) async fn load_object(
        &self,
        class_name: &ClassName,
        object_id: &ObjectId,
    ) -> Result<Option<StoredObject>> {
        let row = sqlx::query(
            "SELECT object_id, class_name, body, created_at FROM objects
             WHERE class_name = ? AND object_id = ?",
        )
        .bind(class_name.as_str())
        .bind(object_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(object_from_row).transpose()
    }

    pub(crate) async fn count_objects(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    // The schema stays in place so the pool remains usable after a reset.
    pub(crate) async fn drop_database(&self) -> Result<()> {
        sqlx::query("DELETE FROM objects")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

fn object_from_row(row: &SqliteRow) -> Result<StoredObject> {
    let object_id: String = row.try_get("object_id")?;
    let class_name: String = row.try_get("class_name")?;
    let body: String = row.try_get("body")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let fields = match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(fields)) => fields,
        _ => {
            return Err(StorageError::Corrupt(format!(
                "object {object_id} has a non-object body"
            )))
        }
    };
    let class_name = ClassName::parse(&class_name)
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    Ok(StoredObject {
        object_id: ObjectId(object_id),
        class_name,
        fields,
        created_at,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(StorageError::CreateDir)?;
    Ok(())
}

pub(crate) fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
