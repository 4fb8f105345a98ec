//! Stored ledger documents.
//!
//! The record body is kept as an opaque JSON object; the server never
//! interprets it.

use api_types::{Kind, document::Document};
use chrono::Utc;
use sea_orm::{ActiveValue, QueryOrder, entity::prelude::*};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ServerError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner: String,
    pub kind: String,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Document {
    type Error = ServerError;

    fn try_from(value: Model) -> Result<Self, Self::Error> {
        let data = serde_json::from_str::<Map<String, Value>>(&value.data).map_err(|err| {
            ServerError::Database(DbErr::Custom(format!(
                "document {} holds invalid json: {err}",
                value.id
            )))
        })?;
        Ok(Document { id: value.id, data })
    }
}

/// One `(owner, kind)` collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionKey {
    pub owner: String,
    pub kind: Kind,
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "users/{}/{}", self.owner, self.kind.as_str())
    }
}

/// Lists a collection in insertion order.
pub async fn list(db: &DatabaseConnection, key: &CollectionKey) -> Result<Vec<Document>, ServerError> {
    Entity::find()
        .filter(Column::Owner.eq(key.owner.as_str()))
        .filter(Column::Kind.eq(key.kind.as_str()))
        .order_by_asc(Column::CreatedAt)
        .order_by_asc(Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
}

pub async fn insert(
    db: &DatabaseConnection,
    key: &CollectionKey,
    data: &Map<String, Value>,
) -> Result<String, ServerError> {
    let data = serde_json::to_string(data).map_err(|err| ServerError::Generic(err.to_string()))?;
    let model = ActiveModel {
        id: ActiveValue::Set(Uuid::new_v4().to_string()),
        owner: ActiveValue::Set(key.owner.clone()),
        kind: ActiveValue::Set(key.kind.as_str().to_string()),
        data: ActiveValue::Set(data),
        created_at: ActiveValue::Set(Utc::now()),
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

/// Deletes `id` from the collection. Fails with `NotFound` if the
/// collection has no such document.
pub async fn delete(db: &DatabaseConnection, key: &CollectionKey, id: &str) -> Result<(), ServerError> {
    let res = Entity::delete_many()
        .filter(Column::Id.eq(id))
        .filter(Column::Owner.eq(key.owner.as_str()))
        .filter(Column::Kind.eq(key.kind.as_str()))
        .exec(db)
        .await?;
    if res.rows_affected == 0 {
        return Err(ServerError::NotFound(format!("document {id}")));
    }
    Ok(())
}
