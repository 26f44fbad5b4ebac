use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    Client, Database,
};
use serde_json::{Map, Value};
use shared::domain::{ClassName, ObjectId};

use crate::{Result, StorageError, StoredObject};

const ID_FIELD: &str = "_id";
const CREATED_AT_FIELD: &str = "_created_at";

#[derive(Clone)]
pub(crate) struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    pub(crate) async fn connect(database_uri: &str, fallback_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(database_uri).await?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(fallback_name));
        // The driver connects lazily; a ping forces server selection now.
        database.run_command(doc! { "ping": 1 }).await?;
        Ok(Self { client, database })
    }

    pub(crate) fn database_name(&self) -> &str {
        self.database.name()
    }

    pub(crate) async fn health_check(&self) -> Result<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    pub(crate) async fn insert_object(&self, object: &StoredObject) -> Result<()> {
        let mut document = mongodb::bson::to_document(&object.fields)?;
        document.insert(ID_FIELD, object.object_id.as_str());
        document.insert(CREATED_AT_FIELD, object.created_at.to_rfc3339());
        self.database
            .collection::<Document>(object.class_name.as_str())
            .insert_one(document)
            .await?;
        Ok(())
    }

    pub(crate) async fn list_objects(&self, class_name: &ClassName) -> Result<Vec<StoredObject>> {
        let documents: Vec<Document> = self
            .database
            .collection::<Document>(class_name.as_str())
            .find(doc! {})
            .sort(doc! { CREATED_AT_FIELD: 1 })
            .await?
            .try_collect()
            .await?;
        documents
            .into_iter()
            .map(|document| object_from_document(class_name, document))
            .collect()
    }

    pub(crate) async fn load_object(
        &self,
        class_name: &ClassName,
        object_id: &ObjectId,
    ) -> Result<Option<StoredObject>> {
        let document = self
            .database
            .collection::<Document>(class_name.as_str())
            .find_one(doc! { ID_FIELD: object_id.as_str() })
            .await?;
        document
            .map(|document| object_from_document(class_name, document))
            .transpose()
    }

    pub(crate) async fn count_objects(&self) -> Result<u64> {
        let mut total = 0;
        for name in self.database.list_collection_names().await? {
            total += self
                .database
                .collection::<Document>(&name)
                .count_documents(doc! {})
                .await?;
        }
        Ok(total)
    }

    pub(crate) async fn drop_database(&self) -> Result<()> {
        self.database.drop().await?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

fn object_from_document(class_name: &ClassName, mut document: Document) -> Result<StoredObject> {
    let object_id = match document.remove(ID_FIELD) {
        Some(Bson::String(id)) => ObjectId(id),
        Some(other) => ObjectId(other.to_string()),
        None => return Err(StorageError::Corrupt("document without _id".into())),
    };
    let created_at = match document.remove(CREATED_AT_FIELD) {
        Some(Bson::String(raw)) => DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt(format!("object {object_id}: {e}")))?,
        _ => {
            return Err(StorageError::Corrupt(format!(
                "object {object_id} has no creation time"
            )))
        }
    };
    let fields = match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };

    Ok(StoredObject {
        object_id,
        class_name: class_name.clone(),
        fields,
        created_at,
    })
}
