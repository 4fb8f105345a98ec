//! [`RemoteStore`] and [`IdentityProvider`] over the ledger server's HTTP API.

use std::sync::{PoisonError, RwLock};

use api_types::{
    ErrorResponse,
    auth::{Session, TokenSignIn},
    document::{DocumentCreated, DocumentNew, SnapshotEvent},
};
use engine::{
    CollectionPath, Document, IdentityProvider, OwnerId, RemoteError, RemoteStore, Subscription,
    SubscriptionEvent, SubscriptionHandle,
};
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, Url};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use crate::error::{AppError, Result};

mod sse;

use sse::SseParser;

#[derive(Debug)]
pub struct HttpRemote {
    base_url: Url,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
    identity: watch::Sender<Option<OwnerId>>,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|err| AppError::BaseUrl(err.to_string()))?;
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
            token: RwLock::new(None),
            identity: watch::Sender::new(None),
        })
    }

    /// Token of the current identity, if signed in.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|err| RemoteError::Transport(format!("invalid url: {err}")))
    }

    fn authorized(&self, request: RequestBuilder) -> std::result::Result<RequestBuilder, RemoteError> {
        let token = self.token().ok_or(RemoteError::Unauthorized)?;
        Ok(request.bearer_auth(token))
    }

    async fn establish(&self, request: RequestBuilder) -> std::result::Result<OwnerId, RemoteError> {
        let res = request.send().await.map_err(transport)?;
        if !res.status().is_success() {
            return Err(failure(res).await);
        }

        let session = res
            .json::<Session>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(session.token);

        let owner = OwnerId::new(session.uid);
        self.identity.send_replace(Some(owner.clone()));
        Ok(owner)
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

async fn failure(res: Response) -> RemoteError {
    let status = res.status();
    let body = match res.text().await {
        Ok(text) => error_message(&text),
        Err(err) => err.to_string(),
    };

    match status.as_u16() {
        401 => RemoteError::Unauthorized,
        403 => RemoteError::Forbidden,
        404 => RemoteError::NotFound(body),
        _ => RemoteError::Rejected(body),
    }
}

/// Message of an error body: the `error` field of an [`ErrorResponse`], or
/// the body itself when the server answered with plain text.
fn error_message(body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        return err.error;
    }
    match body.trim() {
        "" => "unknown error".to_string(),
        text => text.to_string(),
    }
}

fn decode_snapshot(data: &str) -> SubscriptionEvent {
    let snapshot = serde_json::from_str::<SnapshotEvent>(data)
        .map_err(|err| RemoteError::Decode(err.to_string()))?;
    Ok(snapshot
        .documents
        .into_iter()
        .map(|document| Document {
            id: document.id,
            data: document.data,
        })
        .collect())
}

/// Forwards every `snapshot` event of the stream until the receiver goes
/// away. Returns an error when the stream fails or the server closes it.
async fn follow(
    request: RequestBuilder,
    events: &mpsc::UnboundedSender<SubscriptionEvent>,
) -> std::result::Result<(), RemoteError> {
    let res = request.send().await.map_err(transport)?;
    if !res.status().is_success() {
        return Err(failure(res).await);
    }

    let mut parser = SseParser::default();
    let mut body = res.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(transport)?;
        for event in parser.feed(&chunk) {
            let delivery = match event.name.as_str() {
                "snapshot" => decode_snapshot(&event.data),
                "error" => Err(RemoteError::Rejected(event.data)),
                other => {
                    tracing::debug!(event = other, "ignoring server event");
                    continue;
                }
            };
            if events.send(delivery).is_err() {
                return Ok(());
            }
        }
    }

    Err(RemoteError::Transport("stream closed by server".to_string()))
}

impl RemoteStore for HttpRemote {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let (tx, events) = mpsc::unbounded_channel();
        let request = self
            .endpoint(&format!("{path}/stream"))
            .and_then(|url| self.authorized(self.http.get(url)));
        let path = path.clone();

        let task = tokio::spawn(async move {
            let result = match request {
                Ok(request) => follow(request, &tx).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                tracing::warn!(%path, "subscription failed: {err}");
                let _ = tx.send(Err(err));
            }
        });

        Subscription {
            events,
            handle: SubscriptionHandle::from_abort(task.abort_handle()),
        }
    }

    async fn create(
        &self,
        path: &CollectionPath,
        data: Map<String, Value>,
    ) -> std::result::Result<String, RemoteError> {
        let url = self.endpoint(&path.to_string())?;
        let res = self
            .authorized(self.http.post(url))?
            .json(&DocumentNew { data })
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            return Err(failure(res).await);
        }

        let created = res
            .json::<DocumentCreated>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        Ok(created.id)
    }

    async fn delete_by_id(
        &self,
        path: &CollectionPath,
        id: &str,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(&format!("{path}/{id}"))?;
        let res = self
            .authorized(self.http.delete(url))?
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            return Err(match failure(res).await {
                RemoteError::NotFound(_) => RemoteError::NotFound(id.to_string()),
                err => err,
            });
        }
        Ok(())
    }
}

impl IdentityProvider for HttpRemote {
    async fn sign_in_anonymous(&self) -> std::result::Result<OwnerId, RemoteError> {
        let url = self.endpoint("auth/anonymous")?;
        self.establish(self.http.post(url)).await
    }

    async fn sign_in_with_token(&self, token: &str) -> std::result::Result<OwnerId, RemoteError> {
        let url = self.endpoint("auth/token")?;
        let payload = TokenSignIn {
            token: token.to_string(),
        };
        self.establish(self.http.post(url).json(&payload)).await
    }

    fn identity_changes(&self) -> watch::Receiver<Option<OwnerId>> {
        self.identity.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use engine::{CollectionKind, Ledger, LedgerConfig, SaleDraft};
    use migration::MigratorTrait;
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;

    async fn serve() -> String {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server::spawn_with_listener(db, listener).unwrap();
        format!("http://{addr}")
    }

    async fn next(subscription: &mut Subscription) -> SubscriptionEvent {
        timeout(Duration::from_secs(5), subscription.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn subscription_follows_writes() {
        let remote = HttpRemote::new(&serve().await).unwrap();
        let owner = remote.sign_in_anonymous().await.unwrap();
        assert_eq!(*remote.identity_changes().borrow(), Some(owner.clone()));

        let path = CollectionPath::new(owner, CollectionKind::Expenses);
        let mut subscription = remote.subscribe(&path);
        assert!(next(&mut subscription).await.unwrap().is_empty());

        let mut data = Map::new();
        data.insert("category".to_string(), json!("Rent"));
        let id = remote.create(&path, data).await.unwrap();

        let documents = next(&mut subscription).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, id);
        assert_eq!(documents[0].data["category"], "Rent");

        remote.delete_by_id(&path, &id).await.unwrap();
        assert!(next(&mut subscription).await.unwrap().is_empty());

        assert_eq!(
            remote.delete_by_id(&path, &id).await,
            Err(RemoteError::NotFound(id))
        );
        subscription.handle.cancel();
    }

    #[tokio::test]
    async fn token_sign_in_restores_the_identity() {
        let base_url = serve().await;
        let first = HttpRemote::new(&base_url).unwrap();
        let owner = first.sign_in_anonymous().await.unwrap();
        let token = first.token().unwrap();

        let second = HttpRemote::new(&base_url).unwrap();
        assert_eq!(second.sign_in_with_token(&token).await.unwrap(), owner);
        assert_eq!(
            second.sign_in_with_token("stale").await,
            Err(RemoteError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn writes_need_a_signed_in_identity() {
        let remote = HttpRemote::new(&serve().await).unwrap();
        let path = CollectionPath::new(OwnerId::new("nobody"), CollectionKind::Sales);
        assert_eq!(
            remote.create(&path, Map::new()).await,
            Err(RemoteError::Unauthorized)
        );

        let mut subscription = remote.subscribe(&path);
        assert_eq!(next(&mut subscription).await, Err(RemoteError::Unauthorized));
    }

    #[test]
    fn error_messages_fall_back_to_the_body_text() {
        assert_eq!(error_message(r#"{"error":"forbidden"}"#), "forbidden");
        assert_eq!(
            error_message("Failed to parse the request body as JSON\n"),
            "Failed to parse the request body as JSON"
        );
        assert_eq!(error_message("  "), "unknown error");
    }

    #[tokio::test]
    async fn plain_text_rejections_keep_their_message() {
        let base_url = serve().await;
        let res = reqwest::Client::new()
            .post(format!("{base_url}/auth/token"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{")
            .send()
            .await
            .unwrap();
        assert!(res.status().is_client_error());

        let RemoteError::Rejected(message) = failure(res).await else {
            panic!("expected a rejection");
        };
        assert_ne!(message, "unknown error");
        assert!(!message.is_empty());
    }

    #[tokio::test]
    async fn ledger_syncs_through_the_server() {
        let remote = Arc::new(HttpRemote::new(&serve().await).unwrap());
        let ledger = Ledger::new(remote.clone(), remote.clone(), LedgerConfig::default());
        ledger.start(None).await.unwrap();
        timeout(Duration::from_secs(5), ledger.wait_synced())
            .await
            .unwrap();

        ledger
            .add_sale(SaleDraft {
                date: "2024-01-01".to_string(),
                product: "Widget".to_string(),
                quantity: Some(2.0),
                amount: Some(10.0),
                ..SaleDraft::default()
            })
            .await
            .unwrap();

        let mut totals = ledger.watch_totals();
        timeout(
            Duration::from_secs(5),
            totals.wait_for(|totals| totals.sales_usd == 20.0),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(ledger.sales_snapshot()[0].product, "Widget");
        ledger.shutdown();
    }
}
