//! Session-scoped GLPI client.
//!
//! # Design
//! `RemoteClient` is the seam between the router and GLPI: the router only
//! ever sees this trait, which lets tests swap in a counting fake. The real
//! implementation, `SessionClient`, pairs the stateless `GlpiClient` with a
//! transport and the one session token it acquires. A `SessionClient` is
//! created per inbound request by a `ClientFactory` and dropped with it, so
//! tokens never outlive or cross requests.

use glpi_core::{
    ApiError, Created, Document, GlpiClient, HttpRequest, HttpResponse, ItemInput, ItemOptions,
    Outcomes, Pagination, SearchQuery, SessionToken, Sort,
};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::transport::{Transport, UreqTransport};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// One GLPI conversation: open a session, make calls, close it.
pub trait RemoteClient: Send {
    /// Acquire a session token; must precede every other call.
    fn open_session(&mut self) -> Result<SessionToken>;

    /// Release the session. No-op without one; failures are swallowed.
    fn close_session(&mut self);

    fn get_my_profiles(&self) -> Result<Value>;
    fn get_active_profile(&self) -> Result<Value>;
    fn get_my_entities(&self, is_recursive: bool) -> Result<Value>;
    fn get_active_entities(&self) -> Result<Value>;
    fn get_full_session(&self) -> Result<Value>;
    fn get_glpi_config(&self) -> Result<Value>;

    fn get_item(&self, itemtype: &str, id: u64, options: &ItemOptions) -> Result<Value>;
    fn list_items(
        &self,
        itemtype: &str,
        pagination: &Pagination,
        sort: &Sort,
        options: &ItemOptions,
    ) -> Result<Value>;
    fn list_sub_items(
        &self,
        itemtype: &str,
        id: u64,
        sub_itemtype: &str,
        pagination: &Pagination,
    ) -> Result<Value>;
    fn search(&self, itemtype: &str, query: &SearchQuery) -> Result<Value>;
    fn create(&self, itemtype: &str, input: &ItemInput) -> Result<Created>;
    fn update(&self, itemtype: &str, id: u64, fields: &Document) -> Result<Outcomes>;
    fn delete(&self, itemtype: &str, id: u64, force_purge: bool) -> Result<Outcomes>;
}

/// Hands out a fresh `RemoteClient` for each inbound request.
pub trait ClientFactory: Send + Sync {
    fn client(&self) -> Box<dyn RemoteClient>;
}

pub struct SessionClient<T> {
    api: GlpiClient,
    user_token: String,
    transport: T,
    session: Option<SessionToken>,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(api: GlpiClient, user_token: &str, transport: T) -> Self {
        Self {
            api,
            user_token: user_token.to_string(),
            transport,
            session: None,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Result<&SessionToken> {
        self.session.as_ref().ok_or(GatewayError::Remote(ApiError::NoSession))
    }

    fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!(method = req.method.as_str(), url = %req.url, "calling GLPI");
        let response = self.transport.execute(&req)?;
        if !response.is_success() {
            tracing::debug!(
                method = req.method.as_str(),
                url = %req.url,
                http.status = response.status,
                "GLPI returned an error"
            );
        }
        Ok(response)
    }

    fn fetch(&self, req: HttpRequest) -> Result<Value> {
        let response = self.send(req)?;
        Ok(self.api.parse_json(response)?)
    }
}

impl<T: Transport> RemoteClient for SessionClient<T> {
    fn open_session(&mut self) -> Result<SessionToken> {
        let req = self.api.build_init_session(&self.user_token);
        let response = self.send(req)?;
        let token = self.api.parse_init_session(response)?;
        self.session = Some(token.clone());
        tracing::debug!("GLPI session opened");
        Ok(token)
    }

    fn close_session(&mut self) {
        let Some(token) = self.session.take() else {
            return;
        };
        let req = self.api.build_kill_session(&token);
        let outcome = self
            .send(req)
            .and_then(|response| Ok(self.api.parse_kill_session(response)?));
        match outcome {
            Ok(()) => tracing::debug!("GLPI session closed"),
            Err(err) => tracing::warn!(error = %err, "failed to close GLPI session"),
        }
    }

    fn get_my_profiles(&self) -> Result<Value> {
        self.fetch(self.api.build_get_my_profiles(self.session()?))
    }

    fn get_active_profile(&self) -> Result<Value> {
        self.fetch(self.api.build_get_active_profile(self.session()?))
    }

    fn get_my_entities(&self, is_recursive: bool) -> Result<Value> {
        self.fetch(self.api.build_get_my_entities(self.session()?, is_recursive))
    }

    fn get_active_entities(&self) -> Result<Value> {
        self.fetch(self.api.build_get_active_entities(self.session()?))
    }

    fn get_full_session(&self) -> Result<Value> {
        self.fetch(self.api.build_get_full_session(self.session()?))
    }

    fn get_glpi_config(&self) -> Result<Value> {
        self.fetch(self.api.build_get_glpi_config(self.session()?))
    }

    fn get_item(&self, itemtype: &str, id: u64, options: &ItemOptions) -> Result<Value> {
        let req = self
            .api
            .build_get_item(self.session()?, itemtype, id, options)?;
        self.fetch(req)
    }

    fn list_items(
        &self,
        itemtype: &str,
        pagination: &Pagination,
        sort: &Sort,
        options: &ItemOptions,
    ) -> Result<Value> {
        let req = self
            .api
            .build_list_items(self.session()?, itemtype, pagination, sort, options)?;
        self.fetch(req)
    }

    fn list_sub_items(
        &self,
        itemtype: &str,
        id: u64,
        sub_itemtype: &str,
        pagination: &Pagination,
    ) -> Result<Value> {
        let req = self
            .api
            .build_list_sub_items(self.session()?, itemtype, id, sub_itemtype, pagination)?;
        self.fetch(req)
    }

    fn search(&self, itemtype: &str, query: &SearchQuery) -> Result<Value> {
        let req = self.api.build_search(self.session()?, itemtype, query)?;
        self.fetch(req)
    }

    fn create(&self, itemtype: &str, input: &ItemInput) -> Result<Created> {
        let req = self.api.build_create(self.session()?, itemtype, input)?;
        let created = self.api.parse_create(self.send(req)?)?;
        tracing::info!(
            itemtype,
            ids = ?created.ids(),
            refused = created.items().len() - created.ids().len(),
            "created GLPI items"
        );
        Ok(created)
    }

    fn update(&self, itemtype: &str, id: u64, fields: &Document) -> Result<Outcomes> {
        let req = self.api.build_update(self.session()?, itemtype, id, fields)?;
        let outcomes = self.api.parse_update(self.send(req)?)?;
        tracing::info!(
            itemtype,
            id,
            fields = fields.len(),
            refused = outcomes.items().iter().filter(|o| !o.ok).count(),
            "updated GLPI item"
        );
        Ok(outcomes)
    }

    fn delete(&self, itemtype: &str, id: u64, force_purge: bool) -> Result<Outcomes> {
        let req = self.api.build_delete(self.session()?, itemtype, id, force_purge)?;
        let outcomes = self.api.parse_delete(self.send(req)?)?;
        tracing::info!(itemtype, id, force_purge, "deleted GLPI item");
        Ok(outcomes)
    }
}

/// Builds `SessionClient`s over a shared ureq agent.
#[derive(Clone)]
pub struct GlpiClientFactory {
    api: GlpiClient,
    user_token: String,
    transport: UreqTransport,
}

impl GlpiClientFactory {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            api: GlpiClient::new(&config.api_url).with_app_token(&config.app_token),
            user_token: config.user_token.clone(),
            transport: UreqTransport::new(config.timeout),
        }
    }
}

impl ClientFactory for GlpiClientFactory {
    fn client(&self) -> Box<dyn RemoteClient> {
        Box::new(SessionClient::new(
            self.api.clone(),
            &self.user_token,
            self.transport.clone(),
        ))
    }
}
