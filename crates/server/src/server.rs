use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use sea_orm::DatabaseConnection;
use tokio::sync::broadcast;

use crate::{ServerError, collections, documents::CollectionKey, identities};

/// Pending change notifications per subscriber before it is considered lagged.
const CHANGE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ServerState {
    pub db: DatabaseConnection,
    /// Fires with the collection key after every create/delete.
    pub changes: broadcast::Sender<CollectionKey>,
}

impl ServerState {
    pub fn new(db: DatabaseConnection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { db, changes }
    }
}

async fn auth(
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        return Err(ServerError::Unauthorized);
    };
    if auth_header.token().is_empty() {
        return Err(ServerError::Unauthorized);
    }

    let identity = identities::by_token(&state.db, auth_header.token())
        .await?
        .ok_or(ServerError::Unauthorized)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router {
    let collections = Router::new()
        .route(
            "/users/{uid}/{kind}",
            get(collections::list).post(collections::create),
        )
        .route("/users/{uid}/{kind}/stream", get(collections::stream))
        .route("/users/{uid}/{kind}/{id}", delete(collections::remove))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/auth/anonymous", post(identities::sign_in_anonymous))
        .route("/auth/token", post(identities::sign_in_with_token))
        .merge(collections)
        .with_state(state)
}

pub async fn run_with_listener(
    db: DatabaseConnection,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(ServerState::new(db))).await
}

pub fn spawn_with_listener(
    db: DatabaseConnection,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(db, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
