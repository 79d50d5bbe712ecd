//! In-memory imitation of the GLPI legacy REST API.
//!
//! Covers the endpoints the gateway forwards to: session lifecycle, session
//! information, item CRUD, sub-items and a small subset of the search
//! engine (`1` = name, `2` = id). Errors use GLPI's `["CODE", "message"]`
//! body. Opened and killed sessions are counted so tests can check that
//! every session gets released.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const APP_TOKEN: &str = "mock-app-token";
pub const USER_TOKEN: &str = "mock-user-token";

pub const ITEMTYPES: &[&str] = &[
    "Computer",
    "User",
    "Ticket",
    "Printer",
    "Monitor",
    "Software",
    "NetworkEquipment",
    "Phone",
    "Peripheral",
    "Glpi\\Socket",
];

pub const SUB_ITEMTYPES: &[&str] = &[
    "Log",
    "Document_Item",
    "Item_Ticket",
    "NetworkPort",
    "Infocom",
    "Item_Disk",
];

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: usize,
    pub killed: usize,
    pub active: usize,
}

#[derive(Debug)]
pub struct MockGlpi {
    app_token: String,
    user_token: String,
    sessions: HashSet<String>,
    opened: usize,
    killed: usize,
    next_id: u64,
    items: BTreeMap<String, BTreeMap<u64, Document>>,
    logs: BTreeMap<(String, u64), Vec<Value>>,
}

impl MockGlpi {
    pub fn new(app_token: &str, user_token: &str) -> Self {
        Self {
            app_token: app_token.to_string(),
            user_token: user_token.to_string(),
            sessions: HashSet::new(),
            opened: 0,
            killed: 0,
            next_id: 1,
            items: BTreeMap::new(),
            logs: BTreeMap::new(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            opened: self.opened,
            killed: self.killed,
            active: self.sessions.len(),
        }
    }

    /// Seed an item directly, bypassing the API. Returns its id.
    pub fn insert(&mut self, itemtype: &str, mut fields: Document) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        fields.insert("id".to_string(), json!(id));
        fields.entry("is_deleted").or_insert(json!(0));
        self.items
            .entry(itemtype.to_string())
            .or_default()
            .insert(id, fields);
        id
    }

    fn log_change(&mut self, itemtype: &str, id: u64, field: &str, old: &Value, new: &Value) {
        let entries = self.logs.entry((itemtype.to_string(), id)).or_default();
        let log_id = entries.len() + 1;
        entries.push(json!({
            "id": log_id,
            "itemtype": itemtype,
            "items_id": id,
            "field": field,
            "old_value": old,
            "new_value": new,
            "user_name": "glpi",
        }));
    }
}

pub type Db = Arc<Mutex<MockGlpi>>;

pub fn new_db() -> Db {
    Arc::new(Mutex::new(MockGlpi::new(APP_TOKEN, USER_TOKEN)))
}

pub fn lock(db: &Db) -> MutexGuard<'_, MockGlpi> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn app() -> Router {
    app_with_db(new_db())
}

pub fn app_with_db(db: Db) -> Router {
    Router::new()
        .route("/initSession", get(init_session))
        .route("/killSession", get(kill_session))
        .route("/getMyProfiles", get(get_my_profiles))
        .route("/getActiveProfile", get(get_active_profile))
        .route("/getMyEntities", get(get_my_entities))
        .route("/getActiveEntities", get(get_active_entities))
        .route("/getFullSession", get(get_full_session))
        .route("/getGlpiConfig", get(get_glpi_config))
        .route("/search/{itemtype}", get(search))
        .route("/{itemtype}", get(list_items).post(create_item))
        .route(
            "/{itemtype}/{id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route("/{itemtype}/{id}/{sub_itemtype}", get(list_sub_items))
        .with_state(db)
}

pub async fn run(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_db(db)).await
}

type Params = Query<Vec<(String, String)>>;

fn glpi_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!([code, message]))).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn flag(params: &[(String, String)], key: &str) -> bool {
    matches!(param(params, key), Some("true") | Some("1"))
}

fn check_app_token(glpi: &MockGlpi, headers: &HeaderMap) -> Result<(), Response> {
    if header(headers, "App-Token") == Some(glpi.app_token.as_str()) {
        Ok(())
    } else {
        Err(glpi_error(
            StatusCode::BAD_REQUEST,
            "ERROR_WRONG_APP_TOKEN_PARAMETER",
            "parameter app_token seems wrong",
        ))
    }
}

/// Authenticated endpoints need both the app token and a live session.
fn authorize(glpi: &MockGlpi, headers: &HeaderMap) -> Result<(), Response> {
    check_app_token(glpi, headers)?;
    match header(headers, "Session-Token") {
        Some(token) if glpi.sessions.contains(token) => Ok(()),
        _ => Err(glpi_error(
            StatusCode::UNAUTHORIZED,
            "ERROR_SESSION_TOKEN_INVALID",
            "session_token seems invalid",
        )),
    }
}

fn check_itemtype(itemtype: &str) -> Result<(), Response> {
    if ITEMTYPES.contains(&itemtype) {
        Ok(())
    } else {
        Err(glpi_error(
            StatusCode::BAD_REQUEST,
            "ERROR_RESOURCE_NOT_FOUND_NOR_COMMONDBTM",
            &format!("resource {itemtype} not found or not an instance of CommonDBTM"),
        ))
    }
}

fn item_not_found() -> Response {
    glpi_error(StatusCode::NOT_FOUND, "ERROR_ITEM_NOT_FOUND", "Item not found")
}

/// Parse GLPI's inclusive `range=a-b` parameter, defaulting to `0-49`.
fn window(params: &[(String, String)]) -> Result<(usize, usize), Response> {
    let Some(raw) = param(params, "range") else {
        return Ok((0, 49));
    };
    let parsed = raw
        .split_once('-')
        .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));
    match parsed {
        Some((start, end)) if start <= end => Ok((start, end)),
        _ => Err(glpi_error(
            StatusCode::BAD_REQUEST,
            "ERROR_RANGE_EXCEED_TOTAL",
            "Provided range exceed total count of data",
        )),
    }
}

fn page(all: Vec<Value>, (start, end): (usize, usize)) -> Response {
    let total = all.len();
    let rows: Vec<Value> = all.into_iter().skip(start).take((end - start).saturating_add(1)).collect();
    let last = if rows.is_empty() { start } else { start + rows.len() - 1 };
    let status = if rows.len() < total {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    (
        status,
        [("Content-Range", format!("{start}-{last}/{total}"))],
        Json(Value::Array(rows)),
    )
        .into_response()
}

async fn init_session(State(db): State<Db>, headers: HeaderMap) -> Response {
    let mut glpi = lock(&db);
    if let Err(resp) = check_app_token(&glpi, &headers) {
        return resp;
    }
    let expected = format!("user_token {}", glpi.user_token);
    if header(&headers, "Authorization") != Some(expected.as_str()) {
        return glpi_error(
            StatusCode::UNAUTHORIZED,
            "ERROR_GLPI_LOGIN_USER_TOKEN",
            "parameter user_token seems invalid",
        );
    }
    let token = Uuid::new_v4().simple().to_string();
    glpi.sessions.insert(token.clone());
    glpi.opened += 1;
    Json(json!({ "session_token": token })).into_response()
}

async fn kill_session(State(db): State<Db>, headers: HeaderMap) -> Response {
    let mut glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers) {
        return resp;
    }
    if let Some(token) = header(&headers, "Session-Token") {
        glpi.sessions.remove(token);
    }
    glpi.killed += 1;
    Json(json!([])).into_response()
}

async fn get_my_profiles(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    Json(json!({
        "myprofiles": [
            { "id": 4, "name": "Super-Admin", "entities": [{ "id": 0, "name": "Root entity", "is_recursive": 1 }] },
            { "id": 1, "name": "Self-Service", "entities": [{ "id": 0, "name": "Root entity", "is_recursive": 1 }] }
        ]
    }))
    .into_response()
}

async fn get_active_profile(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    Json(json!({ "active_profile": { "id": 4, "name": "Super-Admin", "interface": "central" } }))
        .into_response()
}

async fn get_my_entities(State(db): State<Db>, headers: HeaderMap, Query(params): Params) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    let mut entities = vec![json!({ "id": 0, "name": "Root entity" })];
    if flag(&params, "is_recursive") {
        entities.push(json!({ "id": 1, "name": "Root entity > Branch" }));
    }
    Json(json!({ "myentities": entities })).into_response()
}

async fn get_active_entities(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    Json(json!({
        "active_entity": { "id": 0, "active_entity_recursive": true, "active_entities": [{ "id": 0 }, { "id": 1 }] }
    }))
    .into_response()
}

async fn get_full_session(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    Json(json!({ "session": { "glpiID": 2, "glpiname": "glpi", "glpiactiveprofile": { "id": 4 } } }))
        .into_response()
}

async fn get_glpi_config(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&lock(&db), &headers) {
        return resp;
    }
    Json(json!({ "cfg_glpi": { "version": "10.0.16", "url_base": "http://glpi.local" } })).into_response()
}

async fn list_items(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(itemtype): Path<String>,
    Query(params): Params,
) -> Response {
    let glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let range = match window(&params) {
        Ok(range) => range,
        Err(resp) => return resp,
    };
    let only_id = flag(&params, "only_id");
    let mut rows: Vec<Value> = glpi
        .items
        .get(&itemtype)
        .map(|items| {
            items
                .iter()
                .map(|(id, fields)| {
                    if only_id {
                        json!({ "id": id })
                    } else {
                        Value::Object(fields.clone())
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    if param(&params, "order") == Some("DESC") {
        rows.reverse();
    }
    page(rows, range)
}

async fn get_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((itemtype, id)): Path<(String, u64)>,
    Query(params): Params,
) -> Response {
    let glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let Some(fields) = glpi.items.get(&itemtype).and_then(|items| items.get(&id)) else {
        return item_not_found();
    };
    let mut fields = fields.clone();
    if flag(&params, "with_logs") {
        let logs = glpi
            .logs
            .get(&(itemtype.clone(), id))
            .cloned()
            .unwrap_or_default();
        fields.insert("_logs".to_string(), Value::Array(logs));
    }
    Json(Value::Object(fields)).into_response()
}

async fn list_sub_items(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((itemtype, id, sub_itemtype)): Path<(String, u64, String)>,
    Query(params): Params,
) -> Response {
    let glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    if !SUB_ITEMTYPES.contains(&sub_itemtype.as_str()) && !ITEMTYPES.contains(&sub_itemtype.as_str()) {
        return glpi_error(
            StatusCode::BAD_REQUEST,
            "ERROR_RESOURCE_NOT_FOUND_NOR_COMMONDBTM",
            &format!("resource {sub_itemtype} not found or not an instance of CommonDBTM"),
        );
    }
    if !glpi.items.get(&itemtype).is_some_and(|items| items.contains_key(&id)) {
        return item_not_found();
    }
    let range = match window(&params) {
        Ok(range) => range,
        Err(resp) => return resp,
    };
    let rows = if sub_itemtype == "Log" {
        glpi.logs.get(&(itemtype, id)).cloned().unwrap_or_default()
    } else {
        Vec::new()
    };
    page(rows, range)
}

fn input_documents(body: &Value) -> Option<Vec<Document>> {
    match body.get("input")? {
        Value::Object(fields) => Some(vec![fields.clone()]),
        Value::Array(list) => list
            .iter()
            .map(|v| v.as_object().cloned())
            .collect::<Option<Vec<_>>>(),
        _ => None,
    }
}

fn bad_array() -> Response {
    glpi_error(
        StatusCode::BAD_REQUEST,
        "ERROR_BAD_ARRAY",
        "input parameter must be an array of objects",
    )
}

/// Non-empty serials are unique per itemtype; a duplicate refuses that item.
fn serial_taken(glpi: &MockGlpi, itemtype: &str, fields: &Document) -> bool {
    let Some(serial) = fields.get("serial").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return false;
    };
    glpi.items
        .get(itemtype)
        .is_some_and(|items| items.values().any(|item| item.get("serial").and_then(Value::as_str) == Some(serial)))
}

async fn create_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(itemtype): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let Some(docs) = input_documents(&body).filter(|docs| !docs.is_empty()) else {
        return bad_array();
    };
    let total = docs.len();
    let mut refused = 0;
    let created: Vec<Value> = docs
        .into_iter()
        .map(|fields| {
            if serial_taken(&glpi, &itemtype, &fields) {
                refused += 1;
                json!({ "id": false, "message": "duplicate serial" })
            } else {
                json!({ "id": glpi.insert(&itemtype, fields), "message": "" })
            }
        })
        .collect();
    if refused == total {
        return (StatusCode::BAD_REQUEST, Json(json!(["ERROR_GLPI_ADD", created]))).into_response();
    }
    if refused > 0 {
        return (StatusCode::MULTI_STATUS, Json(json!(["ERROR_GLPI_PARTIAL_ADD", created]))).into_response();
    }
    let body = if body["input"].is_object() {
        created.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(created)
    };
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn update_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((itemtype, id)): Path<(String, u64)>,
    Json(body): Json<Value>,
) -> Response {
    let mut glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let Some(Value::Object(changes)) = body.get("input").cloned() else {
        return bad_array();
    };
    let Some(current) = glpi.items.get(&itemtype).and_then(|items| items.get(&id)).cloned() else {
        return item_not_found();
    };
    let mut updated = current.clone();
    for (field, new) in changes {
        if field == "id" {
            continue;
        }
        let old = current.get(&field).cloned().unwrap_or(Value::Null);
        if old != new {
            glpi.log_change(&itemtype, id, &field, &old, &new);
        }
        updated.insert(field, new);
    }
    if let Some(items) = glpi.items.get_mut(&itemtype) {
        items.insert(id, updated);
    }
    Json(json!([{ (id.to_string()): true, "message": "" }])).into_response()
}

async fn delete_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((itemtype, id)): Path<(String, u64)>,
    Query(params): Params,
) -> Response {
    let mut glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let purge = flag(&params, "force_purge");
    let Some(items) = glpi.items.get_mut(&itemtype) else {
        return item_not_found();
    };
    let found = if purge {
        items.remove(&id).is_some()
    } else {
        match items.get_mut(&id) {
            Some(fields) => {
                fields.insert("is_deleted".to_string(), json!(1));
                true
            }
            None => false,
        }
    };
    if !found {
        return item_not_found();
    }
    Json(json!([{ (id.to_string()): true, "message": "" }])).into_response()
}

/// Criteria are grouped by their index; only `field` 1 (name, contains)
/// and 2 (id, equals) are understood.
fn matches_criteria(id: u64, fields: &Document, criteria: &BTreeMap<usize, BTreeMap<String, String>>) -> bool {
    criteria.values().all(|criterion| {
        let value = criterion.get("value").map(String::as_str).unwrap_or("");
        match criterion.get("field").map(String::as_str) {
            Some("1") => fields
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name.to_lowercase().contains(&value.to_lowercase())),
            Some("2") => value.parse::<u64>().ok() == Some(id),
            _ => true,
        }
    })
}

fn indexed_key(key: &str, prefix: &str) -> Option<(usize, Option<String>)> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('[')?;
    let (index, rest) = rest.split_once(']')?;
    let index = index.parse().ok()?;
    let sub = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .map(str::to_string);
    Some((index, sub))
}

async fn search(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(itemtype): Path<String>,
    Query(params): Params,
) -> Response {
    let glpi = lock(&db);
    if let Err(resp) = authorize(&glpi, &headers).and_then(|_| check_itemtype(&itemtype)) {
        return resp;
    }
    let (start, end) = match window(&params) {
        Ok(range) => range,
        Err(resp) => return resp,
    };
    let mut criteria: BTreeMap<usize, BTreeMap<String, String>> = BTreeMap::new();
    let mut columns: BTreeMap<usize, String> = BTreeMap::new();
    for (key, value) in &params {
        if let Some((i, Some(sub))) = indexed_key(key, "criteria") {
            criteria.entry(i).or_default().insert(sub, value.clone());
        } else if let Some((i, None)) = indexed_key(key, "forcedisplay") {
            columns.insert(i, value.clone());
        }
    }
    let rows: Vec<Value> = glpi
        .items
        .get(&itemtype)
        .map(|items| {
            items
                .iter()
                .filter(|(id, fields)| matches_criteria(**id, fields, &criteria))
                .map(|(id, fields)| {
                    let mut row = Map::new();
                    row.insert("1".to_string(), fields.get("name").cloned().unwrap_or(Value::Null));
                    row.insert("2".to_string(), json!(id));
                    for column in columns.values() {
                        row.entry(column.clone()).or_insert(Value::Null);
                    }
                    Value::Object(row)
                })
                .collect()
        })
        .unwrap_or_default();
    let total = rows.len();
    let data: Vec<Value> = rows.into_iter().skip(start).take((end - start).saturating_add(1)).collect();
    Json(json!({
        "totalcount": total,
        "count": data.len(),
        "sort": param(&params, "sort").unwrap_or("1"),
        "order": param(&params, "order").unwrap_or("ASC"),
        "data": data,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut glpi = MockGlpi::new("a", "u");
        let first = glpi.insert("Computer", Document::new());
        let second = glpi.insert("Printer", Document::new());
        assert_eq!((first, second), (1, 2));
        assert_eq!(glpi.items["Computer"][&1]["is_deleted"], 0);
    }

    #[test]
    fn indexed_keys_are_split() {
        assert_eq!(
            indexed_key("criteria[3][field]", "criteria"),
            Some((3, Some("field".to_string())))
        );
        assert_eq!(indexed_key("forcedisplay[0]", "forcedisplay"), Some((0, None)));
        assert_eq!(indexed_key("criteria", "criteria"), None);
    }

    #[test]
    fn criteria_filter_by_name_and_id() {
        let mut fields = Document::new();
        fields.insert("name".to_string(), json!("Web-Server-01"));
        let mut criteria = BTreeMap::new();
        criteria.insert(
            0,
            BTreeMap::from([("field".to_string(), "1".to_string()), ("value".to_string(), "server".to_string())]),
        );
        assert!(matches_criteria(7, &fields, &criteria));
        criteria.insert(
            1,
            BTreeMap::from([("field".to_string(), "2".to_string()), ("value".to_string(), "8".to_string())]),
        );
        assert!(!matches_criteria(7, &fields, &criteria));
    }

    #[test]
    fn duplicate_serials_are_detected() {
        let mut glpi = MockGlpi::new("a", "u");
        let fields = json!({ "serial": "S1" }).as_object().cloned().unwrap();
        assert!(!serial_taken(&glpi, "Computer", &fields));
        glpi.insert("Computer", fields.clone());
        assert!(serial_taken(&glpi, "Computer", &fields));
        assert!(!serial_taken(&glpi, "Printer", &fields));
        assert!(!serial_taken(&glpi, "Computer", &Document::new()));
    }

    #[test]
    fn updates_are_logged() {
        let mut glpi = MockGlpi::new("a", "u");
        let id = glpi.insert("Computer", Document::new());
        glpi.log_change("Computer", id, "name", &Value::Null, &json!("pc"));
        assert_eq!(glpi.logs[&("Computer".to_string(), id)].len(), 1);
    }
}
