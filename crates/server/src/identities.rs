//! Owner identities and the sign-in endpoints.

use api_types::auth::{Session, TokenSignIn};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use sea_orm::{ActiveValue, entity::prelude::*};
use uuid::Uuid;

use crate::{ServerError, server::ServerState};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "identities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,
    #[sea_orm(unique)]
    pub token: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Session {
    fn from(value: Model) -> Self {
        Session {
            uid: value.uid,
            token: value.token,
        }
    }
}

/// Looks up the identity a bearer token was issued to.
pub async fn by_token(db: &DatabaseConnection, token: &str) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::Token.eq(token))
        .one(db)
        .await
}

/// Issues a fresh identity.
pub async fn sign_in_anonymous(
    State(state): State<ServerState>,
) -> Result<(StatusCode, Json<Session>), ServerError> {
    let identity = ActiveModel {
        uid: ActiveValue::Set(Uuid::new_v4().to_string()),
        token: ActiveValue::Set(Uuid::new_v4().simple().to_string()),
        created_at: ActiveValue::Set(Utc::now()),
    }
    .insert(&state.db)
    .await?;

    tracing::info!(uid = %identity.uid, "anonymous identity issued");
    Ok((StatusCode::CREATED, Json(identity.into())))
}

/// Resolves a previously issued token back to its identity.
pub async fn sign_in_with_token(
    State(state): State<ServerState>,
    Json(payload): Json<TokenSignIn>,
) -> Result<Json<Session>, ServerError> {
    if payload.token.trim().is_empty() {
        return Err(ServerError::Unauthorized);
    }

    let identity = by_token(&state.db, payload.token.trim())
        .await?
        .ok_or(ServerError::Unauthorized)?;
    Ok(Json(identity.into()))
}
