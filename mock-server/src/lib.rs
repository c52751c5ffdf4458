//! In-memory stand-in for the Stofware REST API.
//!
//! Records are JSON objects grouped by collection name, with integer ids
//! assigned on insert. Views are served from the collection of the same name.

mod query;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

pub use query::ListQuery;

pub type Record = Map<String, Value>;

#[derive(Debug, Default)]
pub struct Store {
    collections: HashMap<String, BTreeMap<i64, Record>>,
    next_id: i64,
}

impl Store {
    fn insert(&mut self, collection: &str, mut record: Record) -> Record {
        self.next_id += 1;
        let id = self.next_id;
        record.insert("id".to_string(), json!(id));
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record.clone());
        record
    }

    fn records(&self, collection: &str) -> Vec<Record> {
        self.collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get(&self, collection: &str, id: i64) -> Option<&Record> {
        self.collections.get(collection)?.get(&id)
    }

    fn get_mut(&mut self, collection: &str, id: i64) -> Option<&mut Record> {
        self.collections.get_mut(collection)?.get_mut(&id)
    }

    fn remove(&mut self, collection: &str, id: i64) -> Option<Record> {
        self.collections.get_mut(collection)?.remove(&id)
    }
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
struct AppState {
    db: Db,
    token: Option<Arc<str>>,
}

/// Error response with a `{"detail": ...}` body.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    detail: String,
}

impl Failure {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn not_found(collection: &str, id: i64) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{collection}/{id} not found"))
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Router without authentication.
pub fn app() -> Router {
    build(None)
}

/// Router that requires `Authorization: Bearer {token}` on every route.
pub fn app_with_token(token: &str) -> Router {
    build(Some(token))
}

fn build(token: Option<&str>) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(Store::default())),
        token: token.map(Arc::from),
    };
    Router::new()
        .route(
            "/models/{model}",
            get(list_records)
                .post(create_record)
                .put(bulk_update)
                .delete(bulk_delete),
        )
        .route(
            "/models/{model}/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/aggregate/{model}", get(aggregate))
        .route("/views/{view}", get(list_records))
        .route("/views/{view}/aggregate", get(aggregate))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

pub async fn run(listener: TcpListener, token: Option<String>) -> Result<(), std::io::Error> {
    let router = match token.as_deref() {
        Some(token) => app_with_token(token),
        None => app(),
    };
    info!(addr = ?listener.local_addr().ok(), auth = token.is_some(), "mock server ready");
    axum::serve(listener, router).await
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.token {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(&**expected) {
            return Failure::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
        }
    }
    next.run(request).await
}

async fn list_records(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Record>>, Failure> {
    let query = ListQuery::parse(&raw)?;
    let records = state.db.read().await.records(&collection);
    Ok(Json(query.apply(records)?))
}

async fn get_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Record>, Failure> {
    let query = ListQuery::parse(&raw)?;
    let db = state.db.read().await;
    let record = db
        .get(&collection, id)
        .cloned()
        .ok_or_else(|| Failure::not_found(&collection, id))?;
    Ok(Json(query.project(record)))
}

async fn create_record(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<Record>), Failure> {
    let Value::Object(record) = input else {
        return Err(Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "body must be a JSON object"));
    };
    let stored = state.db.write().await.insert(&collection, record);
    debug!(%collection, id = %stored["id"], "created record");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
    Json(input): Json<Value>,
) -> Result<Json<Record>, Failure> {
    let Value::Object(changes) = input else {
        return Err(Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "body must be a JSON object"));
    };
    let mut db = state.db.write().await;
    let record = db
        .get_mut(&collection, id)
        .ok_or_else(|| Failure::not_found(&collection, id))?;
    merge(record, changes);
    Ok(Json(record.clone()))
}

/// Accepts either a JSON array of records or `{"items": [...]}`; each record
/// must carry the `id` of an existing record. Nothing is changed unless every
/// item is valid.
async fn bulk_update(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<Vec<Record>>, Failure> {
    let items = match input {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "expected an `items` array")),
        },
        _ => return Err(Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "expected an array of records")),
    };

    let mut changes = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(record) = item else {
            return Err(Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "records must be JSON objects"));
        };
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "every record needs an integer `id`"))?;
        changes.push((id, record));
    }

    // All ids must exist before anything is merged.
    let mut db = state.db.write().await;
    if let Some((id, _)) = changes.iter().find(|(id, _)| db.get(&collection, *id).is_none()) {
        return Err(Failure::not_found(&collection, *id));
    }
    let mut updated = Vec::with_capacity(changes.len());
    for (id, record) in changes {
        let stored = db
            .get_mut(&collection, id)
            .ok_or_else(|| Failure::not_found(&collection, id))?;
        merge(stored, record);
        updated.push(stored.clone());
    }
    Ok(Json(updated))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, i64)>,
) -> Result<Json<Record>, Failure> {
    let removed = state
        .db
        .write()
        .await
        .remove(&collection, id)
        .ok_or_else(|| Failure::not_found(&collection, id))?;
    debug!(%collection, id, "deleted record");
    Ok(Json(removed))
}

/// Body: `{"ids": [1, 2, ...]}`. Unknown ids are skipped.
async fn bulk_delete(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(input): Json<Value>,
) -> Result<Json<Value>, Failure> {
    let ids = input
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| Failure::new(StatusCode::UNPROCESSABLE_ENTITY, "expected an `ids` array"))?;
    let mut db = state.db.write().await;
    let deleted = ids
        .iter()
        .filter_map(Value::as_i64)
        .filter(|id| db.remove(&collection, *id).is_some())
        .count();
    Ok(Json(json!({ "deleted": deleted })))
}

async fn aggregate(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Record>, Failure> {
    let query = ListQuery::parse(&raw)?;
    let records = state.db.read().await.records(&collection);
    Ok(Json(query.aggregate(records)?))
}

fn merge(record: &mut Record, changes: Record) {
    for (key, value) in changes {
        if key != "id" {
            record.insert(key, value);
        }
    }
}
