//! End-to-end requests through the axum routers against the in-memory store.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value as Json};
use serval::authentication::{BasicAuthentication, Principal};
use serval::filters::{FieldMatchFilter, SearchFilter};
use serval::parsers::SnakeCaseParser;
use serval::permissions::DenyAll;
use serval::renderers::{CamelCaseRenderer, ListMetaRenderer};
use serval::{
    api_router, load_file, resolve, Action, Column, ColumnDefault, ColumnType, MemoryStore, Model, ModelSerializer,
    ModelViewSet, Record, Store, ViewSet,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn notes_model() -> Arc<Model> {
    Model::builder("notes")
        .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
        .column(Column::new("title", ColumnType::String { max_length: Some(40) }).not_null())
        .column(Column::new("topic", ColumnType::String { max_length: Some(20) }))
        .column(Column::new("priority", ColumnType::Integer))
        .timestamps()
        .build()
        .unwrap()
}

fn seed(store: &MemoryStore, model: &Model, title: &str, topic: &str) -> Uuid {
    let id = Uuid::new_v4();
    let mut record = Record::for_model(model);
    record.set("uuid", id);
    record.set("title", title);
    record.set("topic", topic);
    store.seed(model, record).unwrap();
    id
}

fn app(vs: ModelViewSet) -> Router {
    let vs: Arc<dyn ViewSet> = Arc::new(vs);
    api_router([("/notes", vs)])
}

fn notes_viewset(store: &MemoryStore) -> serval::viewsets::ModelViewSetBuilder {
    let model = notes_model();
    let serializer = ModelSerializer::builder("notes")
        .model(model.clone())
        .required(["title"])
        .build()
        .unwrap();
    ModelViewSet::builder(model, Arc::new(store.clone()))
        .serializer(Arc::new(serializer))
        .renderer(ListMetaRenderer)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, axum::http::HeaderMap, Json) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(b) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(b.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

#[tokio::test]
async fn create_retrieve_update_destroy() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());

    let (status, _, created) = send(&app, "POST", "/notes", Some(json!({"title": "  groceries ", "priority": 2}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "groceries");
    assert_eq!(created["priority"], 2);
    let id = created["uuid"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());
    assert_eq!(store.rows("notes").len(), 1);

    let (status, _, fetched) = send(&app, "GET", &format!("/notes/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "groceries");

    let (status, _, body) = send(&app, "PATCH", &format!("/notes/{}", id), Some(json!({"topic": "home"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Json::Null);
    let (_, _, fetched) = send(&app, "GET", &format!("/notes/{}", id), None).await;
    assert_eq!(fetched["topic"], "home");
    assert_eq!(fetched["title"], "groceries");

    let (status, _, _) = send(&app, "DELETE", &format!("/notes/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(store.rows("notes").is_empty());
    let (status, _, _) = send(&app, "GET", &format!("/notes/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_create_reports_every_field() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());

    let (status, _, body) = send(&app, "POST", "/notes", Some(json!({"priority": "high"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["title"], "Validation Error");
    assert_eq!(body["description"]["title"], json!(["Field is required."]));
    assert!(body["description"]["priority"].is_array());
    assert!(store.rows("notes").is_empty());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());
    let request = Request::builder()
        .method("POST")
        .uri("/notes")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unpaginated_list_reports_total() {
    let store = MemoryStore::new();
    let model = notes_model();
    seed(&store, &model, "one", "a");
    seed(&store, &model, "two", "b");
    let app = app(notes_viewset(&store).build().unwrap());

    let (status, _, body) = send(&app, "GET", "/notes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"], json!({"total": 2}));
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn pagination_pages_and_limits() {
    let store = MemoryStore::new();
    let model = notes_model();
    for title in ["a", "b", "c"] {
        seed(&store, &model, title, "t");
    }
    let app = app(notes_viewset(&store).paginate(2, 2).build().unwrap());

    let (status, _, body) = send(&app, "GET", "/notes?per_page=50", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"], json!({"page": 1, "per_page": 2, "page_limit": 2, "total": 3}));
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    let (status, _, body) = send(&app, "GET", "/notes?page=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(&app, "GET", "/notes?page=3", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, "GET", "/notes?page=-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, body) = send(&app, "GET", "/notes?page=two", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["title"], "Invalid parameter");
}

#[tokio::test]
async fn unsupported_method_lists_allowed_ones() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).read_only().build().unwrap());

    let (status, headers, _) = send(&app, "POST", "/notes", Some(json!({"title": "x"}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers.get(header::ALLOW).unwrap(), "GET");
    assert!(store.rows("notes").is_empty());
}

#[tokio::test]
async fn update_without_key_is_bad_request() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());

    let (status, _, body) = send(&app, "PATCH", "/notes", Some(json!({"title": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["title"], "Lookup ID not found");
    assert_eq!(body["description"], "uuid not passed for lookup");
}

#[tokio::test]
async fn unknown_or_malformed_key_is_not_found() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());

    let (status, _, _) = send(&app, "GET", &format!("/notes/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, "GET", "/notes/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn authentication_and_permissions() {
    let store = MemoryStore::new();
    let verify = |user: &str, password: &str| (password == "pw").then(|| Principal::new(user));
    let app = app(
        notes_viewset(&store)
            .authenticator(BasicAuthentication::new(verify))
            .build()
            .unwrap(),
    );

    let (status, headers, body) = send(&app, "GET", "/notes", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get(header::WWW_AUTHENTICATE).unwrap(), "Basic");
    assert_eq!(body["description"], "Not Authorized");

    let authorized = |credentials: &str| {
        Request::builder()
            .uri("/notes")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode(credentials)))
            .body(Body::empty())
            .unwrap()
    };
    let response = app.clone().oneshot(authorized("ann:pw")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.clone().oneshot(authorized("ann:wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let denied = self::app(notes_viewset(&store).permission(DenyAll).build().unwrap());
    let (status, _, body) = send(&denied, "GET", "/notes", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["description"], "You do not have permission to access this resource.");
}

#[tokio::test]
async fn filters_narrow_lists_only() {
    let store = MemoryStore::new();
    let model = notes_model();
    seed(&store, &model, "Buy milk", "home");
    seed(&store, &model, "Write report", "work");
    let ship = seed(&store, &model, "Ship release", "work");
    let app = app(
        notes_viewset(&store)
            .filter(FieldMatchFilter::new("topic"))
            .filter(SearchFilter::new("title"))
            .build()
            .unwrap(),
    );

    let (_, _, body) = send(&app, "GET", "/notes?topic=work", None).await;
    assert_eq!(body["meta"]["total"], 2);
    let (_, _, body) = send(&app, "GET", "/notes?topics%5B%5D=home,work", None).await;
    assert_eq!(body["meta"]["total"], 3);
    let (_, _, body) = send(&app, "GET", "/notes?topic=work&search=SHIP", None).await;
    assert_eq!(body["results"][0]["title"], "Ship release");
    assert_eq!(body["meta"]["total"], 1);

    let (status, _, _) = send(&app, "GET", &format!("/notes/{}?topic=home", ship), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn camel_case_on_the_wire() {
    let store = MemoryStore::new();
    let model = Model::builder("events")
        .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
        .column(Column::new("start_date", ColumnType::Date))
        .build()
        .unwrap();
    let vs: Arc<dyn ViewSet> = Arc::new(
        ModelViewSet::builder(model, Arc::new(store.clone()))
            .actions(&[Action::List, Action::Create])
            .renderer(ListMetaRenderer)
            .renderer(CamelCaseRenderer)
            .parser(SnakeCaseParser)
            .build()
            .unwrap(),
    );
    let app = api_router([("/events", vs)]);

    let (status, _, body) = send(&app, "POST", "/events", Some(json!({"startDate": "2024-02-29"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["startDate"], "2024-02-29");
    assert!(body.get("start_date").is_none());

    let (_, _, body) = send(&app, "GET", "/events", None).await;
    assert_eq!(body["results"][0]["startDate"], "2024-02-29");
}

#[tokio::test]
async fn model_document_drives_the_api() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/models.json");
    let resolved = resolve(&load_file(&path).unwrap()).unwrap();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let app = api_router(resolved.viewsets(store).unwrap());

    let (status, _, author) = send(
        &app,
        "POST",
        "/authors",
        Some(json!({"name": "Ann", "email": "ANN@Example.COM"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(author["email"], "ann@example.com");
    assert!(author.get("createdAt").is_some());

    let author_uuid = author["uuid"].as_str().unwrap();
    let (status, _, body) = send(
        &app,
        "PATCH",
        &format!("/authors/{}", author_uuid),
        Some(json!({"email": "other@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["description"]["email"], json!(["Field is read-only when editing."]));

    let (status, _, body) = send(
        &app,
        "POST",
        "/books",
        Some(json!({"id": 1, "title": "Dune", "pages": 0, "author_uuid": author_uuid})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["description"]["pages"].is_array());

    let (status, _, _) = send(
        &app,
        "POST",
        "/books",
        Some(json!({"id": 1, "title": "Dune", "pages": 412, "author_uuid": author_uuid})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, headers, _) = send(&app, "DELETE", "/books/1", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers.get(header::ALLOW).unwrap(), "GET, POST, PATCH, PUT");

    let (_, _, body) = send(&app, "GET", &format!("/books?author_uuid={}", author_uuid), None).await;
    assert_eq!(body["meta"]["total"], 1);
    let (_, _, body) = send(&app, "GET", "/books?filter=deleted", None).await;
    assert_eq!(body["meta"]["total"], 1);
}

#[tokio::test]
#[serial_test::serial]
async fn debug_errors_carry_a_traceback() {
    let store = MemoryStore::new();
    let app = app(notes_viewset(&store).build().unwrap());

    let (_, _, body) = send(&app, "GET", &format!("/notes/{}", Uuid::new_v4()), None).await;
    assert!(body.get("traceback").is_none());

    let _guard = serval::conf::override_settings(|s| s.debug = true);
    let (status, _, body) = send(&app, "GET", &format!("/notes/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["traceback"].is_string());
}
