use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use shared::domain::{ClassName, ObjectId};
use thiserror::Error;
use tracing::debug;

mod mongo;
mod sqlite;

use mongo::MongoStore;
use sqlite::SqliteStore;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported database uri scheme in '{0}'")]
    UnsupportedScheme(String),
    #[error("failed to create parent directory for sqlite database")]
    CreateDir(#[source] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error("failed to encode object as bson")]
    Encode(#[from] mongodb::bson::ser::Error),
    #[error("stored object is malformed: {0}")]
    Corrupt(String),
}

/// Object as persisted by either backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub object_id: ObjectId,
    pub class_name: ClassName,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
enum Backend {
    Sqlite(SqliteStore),
    Mongo(MongoStore),
}

/// Live connection to the fixture database.
///
/// Cloning is cheap and every clone talks to the same connection; `close`
/// releases it for all of them.
#[derive(Clone)]
pub struct Storage {
    backend: Backend,
    database_name: String,
}

impl Storage {
    /// Connects to `database_uri` and waits until the server answers.
    ///
    /// `mongodb://` and `mongodb+srv://` uris use the database named in the
    /// path, falling back to `database_name`. `sqlite:` uris open a pool and
    /// run the bundled migrations.
    pub async fn connect(database_uri: &str, database_name: &str) -> Result<Self> {
        let backend = match scheme(database_uri) {
            Some("mongodb") | Some("mongodb+srv") => {
                Backend::Mongo(MongoStore::connect(database_uri, database_name).await?)
            }
            Some("sqlite") => Backend::Sqlite(SqliteStore::connect(database_uri).await?),
            _ => return Err(StorageError::UnsupportedScheme(redact_uri(database_uri))),
        };
        let database_name = match &backend {
            Backend::Mongo(store) => store.database_name().to_string(),
            Backend::Sqlite(_) => database_name.to_string(),
        };
        debug!(uri = %redact_uri(database_uri), %database_name, "database connected");
        Ok(Self {
            backend,
            database_name,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub async fn health_check(&self) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(store) => store.health_check().await,
            Backend::Mongo(store) => store.health_check().await,
        }
    }

    pub async fn insert_object(
        &self,
        class_name: &ClassName,
        fields: &Map<String, Value>,
    ) -> Result<StoredObject> {
        let object = StoredObject {
            object_id: ObjectId::generate(),
            class_name: class_name.clone(),
            fields: fields.clone(),
            created_at: Utc::now(),
        };
        match &self.backend {
            Backend::Sqlite(store) => store.insert_object(&object).await?,
            Backend::Mongo(store) => store.insert_object(&object).await?,
        }
        Ok(object)
    }

    pub async fn list_objects(&self, class_name: &ClassName) -> Result<Vec<StoredObject>> {
        match &self.backend {
            Backend::Sqlite(store) => store.list_objects(class_name).await,
            Backend::Mongo(store) => store.list_objects(class_name).await,
        }
    }

    pub async fn load_object(
        &self,
        class_name: &ClassName,
        object_id: &ObjectId,
    ) -> Result<Option<StoredObject>> {
        match &self.backend {
            Backend::Sqlite(store) => store.load_object(class_name, object_id).await,
            Backend::Mongo(store) => store.load_object(class_name, object_id).await,
        }
    }

    /// Number of stored objects across every class.
    pub async fn count_objects(&self) -> Result<u64> {
        match &self.backend {
            Backend::Sqlite(store) => store.count_objects().await,
            Backend::Mongo(store) => store.count_objects().await,
        }
    }

    /// Removes all data held by the connected database.
    pub async fn drop_database(&self) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(store) => store.drop_database().await?,
            Backend::Mongo(store) => store.drop_database().await?,
        }
        debug!(database_name = %self.database_name, "database dropped");
        Ok(())
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Sqlite(store) => store.close().await,
            Backend::Mongo(store) => store.close().await,
        }
    }
}

fn scheme(database_uri: &str) -> Option<&str> {
    database_uri
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

/// Strips credentials so the uri can be logged or embedded in errors.
pub fn redact_uri(database_uri: &str) -> String {
    match url::Url::parse(database_uri) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => database_uri.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
