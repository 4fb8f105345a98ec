//! Collection API endpoints

use std::convert::Infallible;

use api_types::{
    Kind,
    document::{Document, DocumentCreated, DocumentNew, SnapshotEvent},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, stream};
use sea_orm::DatabaseConnection;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    ServerError,
    documents::{self, CollectionKey},
    identities,
    server::ServerState,
};

/// Resolves the addressed collection, refusing other owners' paths.
fn authorize(
    identity: &identities::Model,
    uid: String,
    kind: Kind,
) -> Result<CollectionKey, ServerError> {
    if identity.uid != uid {
        return Err(ServerError::Forbidden);
    }
    Ok(CollectionKey { owner: uid, kind })
}

/// Handle requests for reading a whole collection
pub async fn list(
    Extension(identity): Extension<identities::Model>,
    State(state): State<ServerState>,
    Path((uid, kind)): Path<(String, Kind)>,
) -> Result<Json<Vec<Document>>, ServerError> {
    let key = authorize(&identity, uid, kind)?;
    Ok(Json(documents::list(&state.db, &key).await?))
}

/// Handle requests for creating a document
pub async fn create(
    Extension(identity): Extension<identities::Model>,
    State(state): State<ServerState>,
    Path((uid, kind)): Path<(String, Kind)>,
    Json(payload): Json<DocumentNew>,
) -> Result<(StatusCode, Json<DocumentCreated>), ServerError> {
    let key = authorize(&identity, uid, kind)?;
    let id = documents::insert(&state.db, &key, &payload.data).await?;
    tracing::debug!(%key, %id, "document created");
    // No receivers just means nobody is subscribed.
    let _ = state.changes.send(key);
    Ok((StatusCode::CREATED, Json(DocumentCreated { id })))
}

/// Handle requests for deleting a document
pub async fn remove(
    Extension(identity): Extension<identities::Model>,
    State(state): State<ServerState>,
    Path((uid, kind, id)): Path<(String, Kind, String)>,
) -> Result<StatusCode, ServerError> {
    let key = authorize(&identity, uid, kind)?;
    documents::delete(&state.db, &key, &id).await?;
    tracing::debug!(%key, %id, "document deleted");
    let _ = state.changes.send(key);
    Ok(StatusCode::NO_CONTENT)
}

struct Subscriber {
    db: DatabaseConnection,
    key: CollectionKey,
    changes: broadcast::Receiver<CollectionKey>,
    first: bool,
}

impl Subscriber {
    /// Waits for the next change of this collection. A lagged receiver
    /// counts as a change since every event carries the full collection.
    async fn next_change(&mut self) -> bool {
        loop {
            match self.changes.recv().await {
                Ok(changed) if changed == self.key => return true,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %self.key, skipped, "subscriber lagged");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    async fn snapshot_event(&self) -> Event {
        let documents = match documents::list(&self.db, &self.key).await {
            Ok(documents) => documents,
            Err(err) => {
                let message = match err {
                    ServerError::Database(db_err) => db_err.to_string(),
                    ServerError::Generic(message) => message,
                    _ => "snapshot unavailable".to_string(),
                };
                tracing::error!(key = %self.key, "snapshot failed: {message}");
                return Event::default().event("error").data(message);
            }
        };

        Event::default()
            .event("snapshot")
            .json_data(SnapshotEvent { documents })
            .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
    }
}

/// Handle live subscriptions: one `snapshot` event on connect, then one
/// after every change of the collection.
pub async fn stream(
    Extension(identity): Extension<identities::Model>,
    State(state): State<ServerState>,
    Path((uid, kind)): Path<(String, Kind)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let key = authorize(&identity, uid, kind)?;
    tracing::info!(%key, "subscriber connected");

    let subscriber = Subscriber {
        db: state.db.clone(),
        key,
        changes: state.changes.subscribe(),
        first: true,
    };

    let events = stream::unfold(subscriber, |mut subscriber| async move {
        if !subscriber.first && !subscriber.next_change().await {
            return None;
        }
        subscriber.first = false;
        let event = subscriber.snapshot_event().await;
        Some((Ok::<_, Infallible>(event), subscriber))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
