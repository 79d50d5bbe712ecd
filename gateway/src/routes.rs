//! Inbound HTTP surface.
//!
//! Every `/glpi` handler follows the same shape: validate extractor results
//! into plain values, then run exactly one `RemoteClient` call inside
//! `with_session_for` on the blocking pool. A rejected request still opens
//! and closes its session like any other, and its 400 is reported even when
//! GLPI refuses the login.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use glpi_core::{check_itemtype, ApiError, Created, Document, ItemInput, Outcomes, Pagination};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::query::{self, DeleteParams, EntitiesParams, ItemParams, ListParams, PageParams};
use crate::remote::{ClientFactory, RemoteClient};
use crate::session::with_session_for;

type Result<T> = std::result::Result<T, GatewayError>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn ClientFactory>,
}

/// Build the gateway router.
pub fn app(factory: Arc<dyn ClientFactory>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/glpi", glpi_routes())
        .with_state(AppState { factory })
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %Uuid::new_v4(),
            )
        }))
}

fn glpi_routes() -> Router<AppState> {
    Router::new()
        .route("/test", get(test_connection))
        .route("/session", get(full_session))
        .route("/config", get(glpi_config))
        .route("/profiles", get(my_profiles))
        .route("/profiles/active", get(active_profile))
        .route("/entities", get(my_entities))
        .route("/entities/active", get(active_entities))
        .route("/items/{itemtype}", get(list_items).post(create_item))
        .route(
            "/items/{itemtype}/{id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route("/items/{itemtype}/{id}/{sub_itemtype}", get(list_sub_items))
        .route("/search/{itemtype}", get(search))
}

/// Run `op` on `input` in a fresh session on the blocking pool.
async fn bracket<I, R, F>(state: &AppState, input: Result<I>, op: F) -> Result<R>
where
    I: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&dyn RemoteClient, I) -> Result<R> + Send + 'static,
{
    let mut client = state.factory.client();
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(|| with_session_for(client.as_mut(), input, op)))
        .await
        .map_err(|e| GatewayError::Internal(format!("GLPI worker failed: {e}")))?
}

fn accepted<T, E: Into<GatewayError>>(extracted: std::result::Result<T, E>) -> Result<T> {
    extracted.map_err(Into::into)
}

fn itemtype(itemtype: String) -> Result<String> {
    check_itemtype(&itemtype)?;
    Ok(itemtype)
}

fn window(pagination: Pagination) -> Result<Pagination> {
    pagination.range()?;
    Ok(pagination)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn test_connection(State(state): State<AppState>) -> Result<Json<Value>> {
    let profile = bracket(&state, Ok(()), |glpi, ()| glpi.get_active_profile()).await?;
    Ok(Json(json!({ "status": "connected", "profile": profile })))
}

async fn full_session(State(state): State<AppState>) -> Result<Json<Value>> {
    bracket(&state, Ok(()), |glpi, ()| glpi.get_full_session()).await.map(Json)
}

async fn glpi_config(State(state): State<AppState>) -> Result<Json<Value>> {
    bracket(&state, Ok(()), |glpi, ()| glpi.get_glpi_config()).await.map(Json)
}

async fn my_profiles(State(state): State<AppState>) -> Result<Json<Value>> {
    bracket(&state, Ok(()), |glpi, ()| glpi.get_my_profiles()).await.map(Json)
}

async fn active_profile(State(state): State<AppState>) -> Result<Json<Value>> {
    bracket(&state, Ok(()), |glpi, ()| glpi.get_active_profile()).await.map(Json)
}

async fn my_entities(
    State(state): State<AppState>,
    params: std::result::Result<Query<EntitiesParams>, QueryRejection>,
) -> Result<Json<Value>> {
    let params = accepted(params).map(|Query(p)| p);
    bracket(&state, params, |glpi, params| glpi.get_my_entities(params.is_recursive))
        .await
        .map(Json)
}

async fn active_entities(State(state): State<AppState>) -> Result<Json<Value>> {
    bracket(&state, Ok(()), |glpi, ()| glpi.get_active_entities()).await.map(Json)
}

async fn list_items(
    State(state): State<AppState>,
    Path(raw_itemtype): Path<String>,
    params: std::result::Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Value>> {
    let input = accepted(params).and_then(|Query(params)| {
        Ok((itemtype(raw_itemtype)?, window(params.pagination())?, params.sort(), params.options()))
    });
    bracket(&state, input, |glpi, (itemtype, pagination, sort, options)| {
        glpi.list_items(&itemtype, &pagination, &sort, &options)
    })
    .await
    .map(Json)
}

async fn get_item(
    State(state): State<AppState>,
    path: std::result::Result<Path<(String, u64)>, PathRejection>,
    params: std::result::Result<Query<ItemParams>, QueryRejection>,
) -> Result<Json<Value>> {
    let input = accepted(path).and_then(|Path((raw_itemtype, id))| {
        let Query(params) = accepted(params)?;
        Ok((itemtype(raw_itemtype)?, id, params.options()))
    });
    bracket(&state, input, |glpi, (itemtype, id, options)| {
        glpi.get_item(&itemtype, id, &options)
    })
    .await
    .map(Json)
}

async fn list_sub_items(
    State(state): State<AppState>,
    path: std::result::Result<Path<(String, u64, String)>, PathRejection>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Value>> {
    let input = accepted(path).and_then(|Path((raw_itemtype, id, sub_itemtype))| {
        let Query(params) = accepted(params)?;
        Ok((
            itemtype(raw_itemtype)?,
            id,
            itemtype(sub_itemtype)?,
            window(params.pagination())?,
        ))
    });
    bracket(&state, input, |glpi, (itemtype, id, sub_itemtype, pagination)| {
        glpi.list_sub_items(&itemtype, id, &sub_itemtype, &pagination)
    })
    .await
    .map(Json)
}

async fn search(
    State(state): State<AppState>,
    Path(raw_itemtype): Path<String>,
    params: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<Value>> {
    let input = accepted(params).and_then(|Query(pairs)| {
        let query = query::search_query(pairs)?;
        window(query.pagination)?;
        Ok((itemtype(raw_itemtype)?, query))
    });
    bracket(&state, input, |glpi, (itemtype, query)| glpi.search(&itemtype, &query))
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    input: ItemInput,
}

async fn create_item(
    State(state): State<AppState>,
    Path(raw_itemtype): Path<String>,
    body: std::result::Result<Json<CreateBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>)> {
    let input = accepted(body).and_then(|Json(body)| {
        body.input.validate()?;
        Ok((itemtype(raw_itemtype)?, body.input))
    });
    let created = bracket(&state, input, |glpi, (itemtype, input)| glpi.create(&itemtype, &input)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    input: Document,
}

async fn update_item(
    State(state): State<AppState>,
    path: std::result::Result<Path<(String, u64)>, PathRejection>,
    body: std::result::Result<Json<UpdateBody>, JsonRejection>,
) -> Result<Json<Outcomes>> {
    let input = accepted(path).and_then(|Path((raw_itemtype, id))| {
        let Json(body) = accepted(body)?;
        if body.input.is_empty() {
            return Err(ApiError::InvalidInput("input must not be an empty object".to_string()).into());
        }
        Ok((itemtype(raw_itemtype)?, id, body.input))
    });
    bracket(&state, input, |glpi, (itemtype, id, fields)| glpi.update(&itemtype, id, &fields))
        .await
        .map(Json)
}

async fn delete_item(
    State(state): State<AppState>,
    path: std::result::Result<Path<(String, u64)>, PathRejection>,
    params: std::result::Result<Query<DeleteParams>, QueryRejection>,
) -> Result<Json<Outcomes>> {
    let input = accepted(path).and_then(|Path((raw_itemtype, id))| {
        let Query(params) = accepted(params)?;
        Ok((itemtype(raw_itemtype)?, id, params.force_purge))
    });
    bracket(&state, input, |glpi, (itemtype, id, force_purge)| {
        glpi.delete(&itemtype, id, force_purge)
    })
    .await
    .map(Json)
}
