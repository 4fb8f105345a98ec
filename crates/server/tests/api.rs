use api_types::{
    auth::Session,
    document::{Document, DocumentCreated},
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use migration::MigratorTrait;
use sea_orm::Database;
use serde_json::json;
use server::{ServerState, router};
use tower::ServiceExt;

async fn app() -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    router(ServerState::new(db))
}

async fn body_json<T: serde::de::DeserializeOwned>(res: axum::response::Response) -> T {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sign_in(app: &Router) -> Session {
    let res = app
        .clone()
        .oneshot(
            Request::post("/auth/anonymous")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await
}

fn authed(method: &str, uri: &str, session: &Session, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", session.token));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn sale_body() -> serde_json::Value {
    json!({
        "data": {
            "date": "2024-01-01",
            "product": "Widget",
            "quantity": 2.0,
            "amount": 10.0,
            "currency": "USD",
            "created_at": "2024-01-01T10:00:00Z"
        }
    })
}

#[tokio::test]
async fn token_sign_in_returns_the_same_identity() {
    let app = app().await;
    let session = sign_in(&app).await;

    let res = app
        .clone()
        .oneshot(
            Request::post("/auth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "token": session.token }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let again: Session = body_json(res).await;
    assert_eq!(again, session);

    let res = app
        .oneshot(
            Request::post("/auth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "token": "unknown" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_list_delete_round() {
    let app = app().await;
    let session = sign_in(&app).await;
    let collection = format!("/users/{}/sales", session.uid);

    let res = app
        .clone()
        .oneshot(authed("POST", &collection, &session, Some(sale_body())))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: DocumentCreated = body_json(res).await;

    let res = app
        .clone()
        .oneshot(authed("GET", &collection, &session, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let documents: Vec<Document> = body_json(res).await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, created.id);
    assert_eq!(documents[0].data["product"], "Widget");

    let expenses: Vec<Document> = body_json(
        app.clone()
            .oneshot(authed(
                "GET",
                &format!("/users/{}/expenses", session.uid),
                &session,
                None,
            ))
            .await
            .unwrap(),
    )
    .await;
    assert!(expenses.is_empty());

    let uri = format!("{collection}/{}", created.id);
    let res = app
        .clone()
        .oneshot(authed("DELETE", &uri, &session, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app
        .oneshot(authed("DELETE", &uri, &session, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_or_unknown_token_is_unauthorized() {
    let app = app().await;
    let session = sign_in(&app).await;
    let collection = format!("/users/{}/sales", session.uid);

    let res = app
        .clone()
        .oneshot(Request::get(&collection).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let stranger = Session {
        uid: session.uid.clone(),
        token: "forged".to_string(),
    };
    let res = app
        .oneshot(authed("GET", &collection, &stranger, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn other_owners_collections_are_forbidden() {
    let app = app().await;
    let alice = sign_in(&app).await;
    let bob = sign_in(&app).await;

    let res = app
        .oneshot(authed(
            "POST",
            &format!("/users/{}/sales", alice.uid),
            &bob,
            Some(sale_body()),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn stream_opens_with_a_full_snapshot() {
    let app = app().await;
    let session = sign_in(&app).await;
    let collection = format!("/users/{}/expenses", session.uid);

    let res = app
        .clone()
        .oneshot(authed(
            "POST",
            &collection,
            &session,
            Some(json!({
                "data": {
                    "date": "2024-01-01",
                    "category": "Rent",
                    "amount": 100.0,
                    "currency": "VES",
                    "created_at": "2024-01-01T10:00:00Z"
                }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app
        .oneshot(authed("GET", &format!("{collection}/stream"), &session, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut body = res.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: snapshot\n"), "{text}");
    assert!(text.contains("\"category\":\"Rent\""), "{text}");
}
