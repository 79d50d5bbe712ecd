//! Stateless HTTP request builder and response parser for the GLPI REST API.
//!
//! # Design
//! `GlpiClient` holds only the base URL and the application token; it
//! carries no session. Every authenticated `build_*` method takes the
//! `SessionToken` explicitly, so nothing can leak between two callers that
//! share a client. Each remote operation is split into a `build_*` method
//! that produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. The caller executes the HTTP round-trip in between.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    Created, Document, InitSession, ItemInput, ItemOptions, Outcomes, Pagination, SearchQuery,
    SessionToken, Sort,
};

/// Synchronous, stateless client for the GLPI REST API.
#[derive(Debug, Clone)]
pub struct GlpiClient {
    base_url: String,
    app_token: Option<String>,
}

impl GlpiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_token: None,
        }
    }

    /// Send `App-Token` on every request.
    pub fn with_app_token(mut self, app_token: &str) -> Self {
        self.app_token = Some(app_token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: HttpMethod, path: &str, session: Option<&SessionToken>) -> HttpRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(app_token) = &self.app_token {
            headers.push(("App-Token".to_string(), app_token.clone()));
        }
        if let Some(session) = session {
            headers.push(("Session-Token".to_string(), session.as_str().to_string()));
        }
        HttpRequest {
            method,
            url: format!("{}/{path}", self.base_url),
            query: Vec::new(),
            headers,
            body: None,
        }
    }

    fn get(&self, path: &str, session: &SessionToken) -> HttpRequest {
        self.request(HttpMethod::Get, path, Some(session))
    }

    // -- session -------------------------------------------------------------

    pub fn build_init_session(&self, user_token: &str) -> HttpRequest {
        let mut req = self.request(HttpMethod::Get, "initSession", None);
        req.headers
            .push(("Authorization".to_string(), format!("user_token {user_token}")));
        req
    }

    pub fn parse_init_session(&self, response: HttpResponse) -> Result<SessionToken, ApiError> {
        let init: InitSession = parse_body(response)?;
        Ok(init.session_token)
    }

    pub fn build_kill_session(&self, session: &SessionToken) -> HttpRequest {
        self.get("killSession", session)
    }

    pub fn parse_kill_session(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)
    }

    // -- session information -------------------------------------------------

    pub fn build_get_my_profiles(&self, session: &SessionToken) -> HttpRequest {
        self.get("getMyProfiles", session)
    }

    pub fn build_get_active_profile(&self, session: &SessionToken) -> HttpRequest {
        self.get("getActiveProfile", session)
    }

    pub fn build_get_my_entities(&self, session: &SessionToken, is_recursive: bool) -> HttpRequest {
        let mut req = self.get("getMyEntities", session);
        req.query
            .push(("is_recursive".to_string(), is_recursive.to_string()));
        req
    }

    pub fn build_get_active_entities(&self, session: &SessionToken) -> HttpRequest {
        self.get("getActiveEntities", session)
    }

    pub fn build_get_full_session(&self, session: &SessionToken) -> HttpRequest {
        self.get("getFullSession", session)
    }

    pub fn build_get_glpi_config(&self, session: &SessionToken) -> HttpRequest {
        self.get("getGlpiConfig", session)
    }

    /// Parse any pass-through answer (item, collection, session info).
    pub fn parse_json(&self, response: HttpResponse) -> Result<serde_json::Value, ApiError> {
        parse_body(response)
    }

    // -- items ---------------------------------------------------------------

    pub fn build_get_item(
        &self,
        session: &SessionToken,
        itemtype: &str,
        id: u64,
        options: &ItemOptions,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        let mut req = self.get(&format!("{itemtype}/{id}"), session);
        push_flag(&mut req, "expand_dropdowns", options.expand_dropdowns);
        push_flag(&mut req, "with_logs", options.with_logs);
        Ok(req)
    }

    pub fn build_list_items(
        &self,
        session: &SessionToken,
        itemtype: &str,
        pagination: &Pagination,
        sort: &Sort,
        options: &ItemOptions,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        let mut req = self.get(&itemtype, session);
        req.query.push(("range".to_string(), pagination.range()?));
        push_sort(&mut req, sort);
        push_flag(&mut req, "expand_dropdowns", options.expand_dropdowns);
        push_flag(&mut req, "only_id", options.only_id);
        Ok(req)
    }

    pub fn build_list_sub_items(
        &self,
        session: &SessionToken,
        itemtype: &str,
        id: u64,
        sub_itemtype: &str,
        pagination: &Pagination,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        let sub_itemtype = itemtype_segment(sub_itemtype)?;
        let mut req = self.get(&format!("{itemtype}/{id}/{sub_itemtype}"), session);
        req.query.push(("range".to_string(), pagination.range()?));
        Ok(req)
    }

    /// Criteria and forced columns are flattened into GLPI's indexed keys:
    /// `criteria[i][key]=value` and `forcedisplay[i]=column`.
    pub fn build_search(
        &self,
        session: &SessionToken,
        itemtype: &str,
        query: &SearchQuery,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        let mut req = self.get(&format!("search/{itemtype}"), session);
        req.query
            .push(("range".to_string(), query.pagination.range()?));
        push_sort(&mut req, &query.sort);
        for (i, criterion) in query.criteria.iter().enumerate() {
            for (key, value) in criterion.pairs() {
                req.query
                    .push((format!("criteria[{i}][{key}]"), value.clone()));
            }
        }
        for (i, column) in query.forcedisplay.iter().enumerate() {
            req.query.push((format!("forcedisplay[{i}]"), column.clone()));
        }
        Ok(req)
    }

    pub fn build_create(
        &self,
        session: &SessionToken,
        itemtype: &str,
        input: &ItemInput,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        input.validate()?;
        let mut req = self.request(HttpMethod::Post, &itemtype, Some(session));
        req.body = Some(input_body(input)?);
        Ok(req)
    }

    pub fn parse_create(&self, response: HttpResponse) -> Result<Created, ApiError> {
        parse_body(response)
    }

    pub fn build_update(
        &self,
        session: &SessionToken,
        itemtype: &str,
        id: u64,
        fields: &Document,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        if fields.is_empty() {
            return Err(ApiError::InvalidInput("input must not be an empty object".to_string()));
        }
        let mut req = self.request(HttpMethod::Put, &format!("{itemtype}/{id}"), Some(session));
        req.body = Some(input_body(fields)?);
        Ok(req)
    }

    pub fn parse_update(&self, response: HttpResponse) -> Result<Outcomes, ApiError> {
        parse_outcomes(response)
    }

    pub fn build_delete(
        &self,
        session: &SessionToken,
        itemtype: &str,
        id: u64,
        force_purge: bool,
    ) -> Result<HttpRequest, ApiError> {
        let itemtype = itemtype_segment(itemtype)?;
        let mut req = self.request(HttpMethod::Delete, &format!("{itemtype}/{id}"), Some(session));
        push_flag(&mut req, "force_purge", force_purge);
        Ok(req)
    }

    pub fn parse_delete(&self, response: HttpResponse) -> Result<Outcomes, ApiError> {
        parse_outcomes(response)
    }
}

/// Check that `itemtype` can be used as a GLPI path segment.
pub fn check_itemtype(itemtype: &str) -> Result<(), ApiError> {
    itemtype_segment(itemtype).map(drop)
}

/// Itemtypes become path segments, so anything beyond a class name is
/// refused. Namespaced classes (`Glpi\Socket`) are allowed; the backslash
/// is percent-encoded.
fn itemtype_segment(itemtype: &str) -> Result<String, ApiError> {
    let valid = !itemtype.is_empty()
        && !itemtype.starts_with('\\')
        && !itemtype.ends_with('\\')
        && !itemtype.contains("\\\\")
        && itemtype
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\\');
    if valid {
        Ok(itemtype.replace('\\', "%5C"))
    } else {
        Err(ApiError::InvalidInput(format!("invalid itemtype `{itemtype}`")))
    }
}

fn push_flag(req: &mut HttpRequest, key: &str, enabled: bool) {
    if enabled {
        req.query.push((key.to_string(), "true".to_string()));
    }
}

fn push_sort(req: &mut HttpRequest, sort: &Sort) {
    req.query.push(("sort".to_string(), sort.field.clone()));
    req.query
        .push(("order".to_string(), sort.order.as_str().to_string()));
}

#[derive(Serialize)]
struct InputEnvelope<'a, T: ?Sized> {
    input: &'a T,
}

fn input_body<T: Serialize + ?Sized>(input: &T) -> Result<String, ApiError> {
    serde_json::to_string(&InputEnvelope { input })
        .map_err(|e| ApiError::SerializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(ApiError::from_response(response.status, &response.body))
}

fn parse_body<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    check_status(&response)?;
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// GLPI answers update/delete with a list (or a `[code, list]` pair on
/// partial success); a lone object is accepted too.
fn parse_outcomes(response: HttpResponse) -> Result<Outcomes, ApiError> {
    let value: serde_json::Value = parse_body(response)?;
    let result = match value {
        serde_json::Value::Object(_) => serde_json::from_value(value).map(|one| Outcomes::All(vec![one])),
        other => serde_json::from_value(other),
    };
    result.map_err(|e| ApiError::DeserializationError(e.to_string()))
}
