//! Router behaviour against a fake `RemoteClient`.
//!
//! The fake counts `open_session` / `close_session` calls so every test can
//! check the session bracket, and records the arguments each operation saw.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use axum::Router;
use glpi_core::{
    ApiError, Created, CreatedItem, Document, ItemInput, ItemOptions, ItemOutcome, Outcomes,
    Pagination, SearchQuery, SessionToken, Sort,
};
use glpi_gateway::{app, ClientFactory, GatewayError, RemoteClient};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Counters {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct FakeGlpi {
    counters: Arc<Counters>,
    fail_open: bool,
    open: bool,
}

impl FakeGlpi {
    fn record(&self, call: String) {
        assert!(self.open, "{call} called without a session");
        self.counters.calls.lock().unwrap().push(call);
    }
}

fn unknown_resource(name: &str) -> GatewayError {
    let body = json!([
        "ERROR_RESOURCE_NOT_FOUND_NOR_COMMONDBTM",
        format!("resource {name} not found or not an instance of CommonDBTM")
    ]);
    ApiError::from_response(400, &body.to_string()).into()
}

impl RemoteClient for FakeGlpi {
    fn open_session(&mut self) -> Result<SessionToken> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(ApiError::from_response(401, r#"["ERROR_GLPI_LOGIN_USER_TOKEN","parameter user_token seems invalid"]"#).into());
        }
        self.open = true;
        Ok(SessionToken::new("fake"))
    }

    fn close_session(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }

    fn get_my_profiles(&self) -> Result<Value> {
        self.record("getMyProfiles".into());
        Ok(json!({ "myprofiles": [{ "id": 4, "name": "Super-Admin" }] }))
    }

    fn get_active_profile(&self) -> Result<Value> {
        self.record("getActiveProfile".into());
        Ok(json!({ "active_profile": { "id": 4, "name": "Super-Admin" } }))
    }

    fn get_my_entities(&self, is_recursive: bool) -> Result<Value> {
        self.record(format!("getMyEntities recursive={is_recursive}"));
        Ok(json!({ "myentities": [] }))
    }

    fn get_active_entities(&self) -> Result<Value> {
        self.record("getActiveEntities".into());
        Ok(json!({ "active_entity": { "id": 0 } }))
    }

    fn get_full_session(&self) -> Result<Value> {
        self.record("getFullSession".into());
        Ok(json!({ "session": { "glpiID": 2 } }))
    }

    fn get_glpi_config(&self) -> Result<Value> {
        self.record("getGlpiConfig".into());
        Err(GatewayError::Transport("connection refused".into()))
    }

    fn get_item(&self, itemtype: &str, id: u64, options: &ItemOptions) -> Result<Value> {
        self.record(format!(
            "get {itemtype}/{id} expand={} logs={}",
            options.expand_dropdowns, options.with_logs
        ));
        if itemtype == "Panic" {
            panic!("fake GLPI blew up");
        }
        if id == 404 {
            return Err(ApiError::from_response(404, r#"["ERROR_ITEM_NOT_FOUND","Item not found"]"#).into());
        }
        Ok(json!({ "id": id, "name": "pc-1" }))
    }

    fn list_items(
        &self,
        itemtype: &str,
        pagination: &Pagination,
        sort: &Sort,
        options: &ItemOptions,
    ) -> Result<Value> {
        self.record(format!(
            "list {itemtype} range={} sort={} order={} only_id={}",
            pagination.range()?,
            sort.field,
            sort.order.as_str(),
            options.only_id
        ));
        Ok(json!([]))
    }

    fn list_sub_items(
        &self,
        itemtype: &str,
        id: u64,
        sub_itemtype: &str,
        pagination: &Pagination,
    ) -> Result<Value> {
        self.record(format!("sub {itemtype}/{id}/{sub_itemtype} range={}", pagination.range()?));
        if sub_itemtype == "Log" {
            Ok(json!([{ "id": 1 }]))
        } else {
            Err(unknown_resource(sub_itemtype))
        }
    }

    fn search(&self, itemtype: &str, query: &SearchQuery) -> Result<Value> {
        let criteria: Vec<String> = query
            .criteria
            .iter()
            .map(|c| {
                c.pairs()
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&")
            })
            .collect();
        self.record(format!(
            "search {itemtype} range={} criteria={criteria:?} columns={:?}",
            query.pagination.range()?,
            query.forcedisplay
        ));
        Ok(json!({ "totalcount": 0, "data": [] }))
    }

    fn create(&self, itemtype: &str, input: &ItemInput) -> Result<Created> {
        self.record(format!("create {itemtype}"));
        input.validate()?;
        Ok(match input {
            ItemInput::One(_) => Created::One(CreatedItem { id: Some(7), message: String::new() }),
            ItemInput::Many(items) if itemtype == "Printer" => Created::Partial(
                "ERROR_GLPI_PARTIAL_ADD".to_string(),
                (0..items.len() as u64)
                    .map(|i| match i {
                        0 => CreatedItem { id: Some(7), message: String::new() },
                        _ => CreatedItem { id: None, message: "duplicate serial".to_string() },
                    })
                    .collect(),
            ),
            ItemInput::Many(items) => Created::Many(
                (0..items.len() as u64)
                    .map(|i| CreatedItem { id: Some(7 + i), message: String::new() })
                    .collect(),
            ),
        })
    }

    fn update(&self, itemtype: &str, id: u64, fields: &Document) -> Result<Outcomes> {
        self.record(format!("update {itemtype}/{id} fields={}", fields.len()));
        Ok(Outcomes::All(vec![ItemOutcome { id, ok: true, message: String::new() }]))
    }

    fn delete(&self, itemtype: &str, id: u64, force_purge: bool) -> Result<Outcomes> {
        self.record(format!("delete {itemtype}/{id} purge={force_purge}"));
        Ok(Outcomes::All(vec![ItemOutcome { id, ok: true, message: String::new() }]))
    }
}

struct FakeFactory {
    counters: Arc<Counters>,
    fail_open: bool,
}

impl ClientFactory for FakeFactory {
    fn client(&self) -> Box<dyn RemoteClient> {
        Box::new(FakeGlpi {
            counters: self.counters.clone(),
            fail_open: self.fail_open,
            open: false,
        })
    }
}

fn gateway(fail_open: bool) -> (Router, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = FakeFactory {
        counters: counters.clone(),
        fail_open,
    };
    (app(Arc::new(factory)), counters)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn assert_one_bracket(counters: &Counters) {
    assert_eq!(counters.opened(), 1, "open_session calls");
    assert_eq!(counters.closed(), 1, "close_session calls");
}

// --- health ---

#[tokio::test]
async fn health_never_opens_a_session() {
    let (app, counters) = gateway(true);
    let (status, body) = send(app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    assert_eq!(counters.opened(), 0);
    assert_eq!(counters.closed(), 0);
}

// --- session information ---

#[tokio::test]
async fn test_route_returns_active_profile() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/test")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["profile"]["active_profile"]["name"], "Super-Admin");
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn test_route_fails_with_500_when_login_is_refused() {
    let (app, counters) = gateway(true);
    let (status, body) = send(app, get("/glpi/test")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("user_token seems invalid"));
    assert_one_bracket(&counters);
    assert!(counters.calls().is_empty());
}

#[tokio::test]
async fn session_info_routes_pass_through() {
    for (uri, call) in [
        ("/glpi/session", "getFullSession"),
        ("/glpi/profiles", "getMyProfiles"),
        ("/glpi/profiles/active", "getActiveProfile"),
        ("/glpi/entities", "getMyEntities recursive=false"),
        ("/glpi/entities?is_recursive=true", "getMyEntities recursive=true"),
        ("/glpi/entities/active", "getActiveEntities"),
    ] {
        let (app, counters) = gateway(false);
        let (status, _) = send(app, get(uri)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(counters.calls(), vec![call.to_string()], "{uri}");
        assert_one_bracket(&counters);
    }
}

#[tokio::test]
async fn transport_failure_is_500_and_still_closes() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/config")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "transport error: connection refused");
    assert_one_bracket(&counters);
}

// --- items ---

#[tokio::test]
async fn list_items_forwards_window_and_sort() {
    let (app, counters) = gateway(false);
    let (status, _) = send(
        app,
        get("/glpi/items/Computer?offset=10&limit=5&sort=19&order=DESC&only_id=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counters.calls(),
        vec!["list Computer range=10-14 sort=19 order=DESC only_id=true".to_string()]
    );
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn list_items_defaults_to_first_fifty() {
    let (app, counters) = gateway(false);
    send(app, get("/glpi/items/Computer")).await;
    assert_eq!(
        counters.calls(),
        vec!["list Computer range=0-49 sort=1 order=ASC only_id=false".to_string()]
    );
}

#[tokio::test]
async fn zero_limit_is_400() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("limit"));
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn bad_query_value_is_400_inside_the_bracket() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer?offset=minus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
    assert_one_bracket(&counters);
    assert!(counters.calls().is_empty());
}

#[tokio::test]
async fn get_item_forwards_flags() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer/3?with_logs=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 3);
    assert_eq!(
        counters.calls(),
        vec!["get Computer/3 expand=false logs=true".to_string()]
    );
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn missing_item_is_404() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Item not found");
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn non_numeric_id_is_400() {
    let (app, counters) = gateway(false);
    let (status, _) = send(app, get("/glpi/items/Computer/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn panicking_operation_still_closes_the_session() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Panic/1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("worker failed"));
    assert_one_bracket(&counters);
}

// --- sub-items ---

#[tokio::test]
async fn sub_items_forward_window() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer/3/Log?offset=10&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "id": 1 }]));
    assert_eq!(counters.calls(), vec!["sub Computer/3/Log range=10-14".to_string()]);
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn unknown_sub_itemtype_is_404_with_upstream_message() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, get("/glpi/items/Computer/3/Nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["detail"],
        "resource Nope not found or not an instance of CommonDBTM"
    );
    assert_one_bracket(&counters);
}

// --- search ---

#[tokio::test]
async fn search_forwards_criteria_and_columns() {
    let (app, counters) = gateway(false);
    let uri = "/glpi/search/Computer?limit=5&offset=10\
        &criteria%5B0%5D%5Bfield%5D=1&criteria%5B0%5D%5Bsearchtype%5D=contains&criteria%5B0%5D%5Bvalue%5D=srv\
        &forcedisplay%5B0%5D=2";
    let (status, _) = send(app, get(uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counters.calls(),
        vec![r#"search Computer range=10-14 criteria=["field=1&searchtype=contains&value=srv"] columns=["2"]"#.to_string()]
    );
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn search_appends_unindexed_columns() {
    let (app, counters) = gateway(false);
    let uri = "/glpi/search/Computer?forcedisplay%5B%5D=80&forcedisplay%5B0%5D=2";
    let (status, _) = send(app, get(uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counters.calls(),
        vec![r#"search Computer range=0-49 criteria=[] columns=["2", "80"]"#.to_string()]
    );
}

#[tokio::test]
async fn search_with_unindexed_criteria_is_400() {
    let (app, counters) = gateway(false);
    let uri = "/glpi/search/Computer?criteria%5B%5D%5Bfield%5D=1&criteria%5B%5D%5Bvalue%5D=srv";
    let (status, body) = send(app, get(uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("criteria[][field]"));
    assert_one_bracket(&counters);
    assert!(counters.calls().is_empty());
}

#[tokio::test]
async fn search_with_bad_order_is_400() {
    let (app, counters) = gateway(false);
    let (status, _) = send(app, get("/glpi/search/Computer?order=up")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_one_bracket(&counters);
}

// --- create ---

#[tokio::test]
async fn create_returns_201_with_id() {
    let (app, counters) = gateway(false);
    let (status, body) = send(
        app,
        json_request("POST", "/glpi/items/Computer", r#"{"input":{"name":"pc-1"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "id": 7, "message": "" }));
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn create_many_returns_list() {
    let (app, _) = gateway(false);
    let (status, body) = send(
        app,
        json_request("POST", "/glpi/items/Computer", r#"{"input":[{"name":"a"},{"name":"b"}]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn partially_refused_batch_is_relayed() {
    let (app, _) = gateway(false);
    let (status, body) = send(
        app,
        json_request("POST", "/glpi/items/Printer", r#"{"input":[{"name":"a"},{"name":"b"}]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body,
        json!([
            "ERROR_GLPI_PARTIAL_ADD",
            [{ "id": 7, "message": "" }, { "id": false, "message": "duplicate serial" }]
        ])
    );
}

#[tokio::test]
async fn malformed_create_payloads_are_400() {
    for payload in ["", "{", "{}", r#"{"input":{}}"#, r#"{"input":[]}"#, r#"{"input":"pc"}"#, "[1,2]"] {
        let (app, counters) = gateway(false);
        let (status, body) = send(app, json_request("POST", "/glpi/items/Computer", payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload:?}");
        assert!(body["detail"].is_string(), "payload {payload:?}");
        assert_one_bracket(&counters);
    }
}

#[tokio::test]
async fn create_without_json_content_type_is_400() {
    let (app, counters) = gateway(false);
    let req = Request::builder()
        .method("POST")
        .uri("/glpi/items/Computer")
        .body(Body::from(r#"{"input":{"name":"pc"}}"#))
        .unwrap();
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_one_bracket(&counters);
}

// --- update / delete ---

#[tokio::test]
async fn update_relays_outcomes() {
    let (app, counters) = gateway(false);
    let (status, body) = send(
        app,
        json_request("PUT", "/glpi/items/Computer/3", r#"{"input":{"name":"pc-2","serial":"X"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "3": true, "message": "" }]));
    assert_eq!(counters.calls(), vec!["update Computer/3 fields=2".to_string()]);
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn update_without_input_is_400() {
    let (app, counters) = gateway(false);
    let (status, _) = send(app, json_request("PUT", "/glpi/items/Computer/3", r#"{"name":"x"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn update_with_empty_input_is_400() {
    let (app, counters) = gateway(false);
    let (status, body) = send(app, json_request("PUT", "/glpi/items/Computer/3", r#"{"input":{}}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "invalid input: input must not be an empty object");
    assert_one_bracket(&counters);
    assert!(counters.calls().is_empty());
}

#[tokio::test]
async fn delete_forwards_purge_flag() {
    let (app, counters) = gateway(false);
    let req = Request::builder()
        .method("DELETE")
        .uri("/glpi/items/Ticket/8?force_purge=true")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "8": true, "message": "" }]));
    assert_eq!(counters.calls(), vec!["delete Ticket/8 purge=true".to_string()]);
    assert_one_bracket(&counters);
}

#[tokio::test]
async fn concurrent_requests_each_get_their_own_session() {
    let (app, counters) = gateway(false);
    let mut handles = Vec::new();
    for id in 1..=8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send(app, get(&format!("/glpi/items/Computer/{id}"))).await.0
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(counters.opened(), 8);
    assert_eq!(counters.closed(), 8);
}

// --- malformed requests while GLPI refuses the login ---

async fn assert_400_despite_refused_login(req: Request<Body>) {
    let label = format!("{} {}", req.method(), req.uri());
    let (app, counters) = gateway(true);
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{label}: {body}");
    assert!(
        !body["detail"].as_str().unwrap().contains("user_token"),
        "{label}: {body}"
    );
    assert_one_bracket(&counters);
    assert!(counters.calls().is_empty(), "{label}");
}

#[tokio::test]
async fn malformed_create_is_400_when_login_fails() {
    for payload in ["", "{", "{}", r#"{"input":{}}"#, r#"{"input":[]}"#, r#"{"input":[{}]}"#, r#"{"input":"pc"}"#] {
        assert_400_despite_refused_login(json_request("POST", "/glpi/items/Computer", payload)).await;
    }
}

#[tokio::test]
async fn malformed_update_is_400_when_login_fails() {
    for payload in [r#"{"name":"x"}"#, r#"{"input":{}}"#, r#"{"input":[1]}"#] {
        assert_400_despite_refused_login(json_request("PUT", "/glpi/items/Computer/3", payload)).await;
    }
}

#[tokio::test]
async fn malformed_queries_are_400_when_login_fails() {
    for uri in [
        "/glpi/items/Computer?offset=minus",
        "/glpi/items/Computer?limit=0",
        "/glpi/items/Computer/abc",
        "/glpi/items/Comp%2Futer/3",
        "/glpi/items/Computer/3/Log?limit=0",
        "/glpi/search/Computer?order=up",
        "/glpi/search/Computer?limit=0",
        "/glpi/search/Computer?criteria%5B%5D%5Bvalue%5D=srv",
        "/glpi/entities?is_recursive=maybe",
    ] {
        assert_400_despite_refused_login(get(uri)).await;
    }
}

#[tokio::test]
async fn well_formed_request_still_reports_the_refused_login() {
    let (app, counters) = gateway(true);
    let (status, body) = send(
        app,
        json_request("POST", "/glpi/items/Computer", r#"{"input":{"name":"pc-1"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("user_token seems invalid"));
    assert_one_bracket(&counters);
}
