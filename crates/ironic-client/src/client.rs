//! Ironic API client
//!
//! Implements the subset of the Ironic bare metal REST API used to manage
//! node lifecycles: /v1/nodes, /v1/nodes/{node}/states/*, maintenance and
//! inventory.

use crate::error::IronicError;
use crate::ironic_trait::IronicClientTrait;
use crate::models::*;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Microversion requested on every call
pub const API_VERSION: &str = "1.81";

/// Ironic API client
pub struct IronicClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl IronicClient {
    /// Create a new Ironic client without authentication
    ///
    /// # Arguments
    /// * `base_url` - Ironic endpoint (e.g., "http://ironic.metal3:6385")
    pub fn new(base_url: String) -> Result<Self, IronicError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Use HTTP basic authentication for every request
    #[must_use]
    pub fn with_basic_auth(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json")
            .header("X-OpenStack-Ironic-API-Version", API_VERSION);
        match &self.credentials {
            Some((username, password)) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }

    /// Map an error status to an `IronicError`, passing successes through
    async fn check(response: Response, what: &str) -> Result<Response, IronicError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => IronicError::NotFound(what.to_string()),
            StatusCode::CONFLICT => IronicError::Conflict(format!("{}: {}", what, body)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                IronicError::Authentication(format!("{}: {} - {}", what, status, body))
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_ACCEPTABLE => {
                IronicError::InvalidRequest(format!("{}: {}", what, body))
            }
            _ => IronicError::Api(format!("Failed to {}: {} - {}", what, status, body)),
        })
    }

    /// Check that the API root answers
    pub async fn check_available(&self) -> Result<(), IronicError> {
        debug!("Checking Ironic API availability");
        let response = self.request(Method::GET, "/v1").send().await?;
        Self::check(response, "query API root").await?;
        Ok(())
    }

    /// Get a node by UUID or name
    pub async fn get_node(&self, ident: &str) -> Result<Node, IronicError> {
        debug!("Fetching node {} from Ironic", ident);
        let response = self
            .request(Method::GET, &format!("/v1/nodes/{}", ident))
            .send()
            .await?;
        let response = Self::check(response, &format!("get node {}", ident)).await?;
        Ok(response.json().await?)
    }

    /// List all nodes with details
    ///
    /// Follows the `next` links until every page has been read.
    pub async fn list_nodes(&self) -> Result<Vec<Node>, IronicError> {
        debug!("Listing Ironic nodes");
        let mut nodes = Vec::new();
        let mut path = "/v1/nodes/detail".to_string();
        loop {
            let response = self.request(Method::GET, &path).send().await?;
            let response = Self::check(response, "list nodes").await?;
            let list: NodeList = response.json().await?;
            nodes.extend(list.nodes);

            match list.next.as_deref().and_then(|next| self.next_page_path(next)) {
                Some(next) if next != path => {
                    debug!("Fetching next page of Ironic nodes: {}", next);
                    path = next;
                }
                _ => break,
            }
        }
        Ok(nodes)
    }

    /// Request path for a pagination link, relative to `base_url`
    ///
    /// Ironic builds `next` from its public endpoint, which may differ from
    /// the address this client talks to.
    fn next_page_path(&self, next: &str) -> Option<String> {
        if let Some(path) = next.strip_prefix(&self.base_url) {
            return Some(path.to_string());
        }
        let url = reqwest::Url::parse(next).ok()?;
        Some(match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        })
    }

    /// Enroll a new node
    pub async fn create_node(&self, request: &NodeCreate) -> Result<Node, IronicError> {
        debug!("Creating node {} in Ironic", request.name);
        let response = self
            .request(Method::POST, "/v1/nodes")
            .json(request)
            .send()
            .await?;
        let response = Self::check(response, &format!("create node {}", request.name)).await?;
        Ok(response.json().await?)
    }

    /// Apply a JSON patch to a node
    pub async fn update_node(&self, ident: &str, patch: &[PatchOperation]) -> Result<Node, IronicError> {
        debug!("Updating node {} ({} operations)", ident, patch.len());
        let response = self
            .request(Method::PATCH, &format!("/v1/nodes/{}", ident))
            .json(patch)
            .send()
            .await?;
        let response = Self::check(response, &format!("update node {}", ident)).await?;
        Ok(response.json().await?)
    }

    /// Delete a node
    pub async fn delete_node(&self, ident: &str) -> Result<(), IronicError> {
        debug!("Deleting node {}", ident);
        let response = self
            .request(Method::DELETE, &format!("/v1/nodes/{}", ident))
            .send()
            .await?;
        Self::check(response, &format!("delete node {}", ident)).await?;
        Ok(())
    }

    /// Request a provision state change
    pub async fn change_provision_state(
        &self,
        ident: &str,
        opts: &ProvisionStateOpts,
    ) -> Result<(), IronicError> {
        debug!("Changing provision state of node {} to {:?}", ident, opts.target);
        let response = self
            .request(Method::PUT, &format!("/v1/nodes/{}/states/provision", ident))
            .json(opts)
            .send()
            .await?;
        Self::check(response, &format!("change provision state of node {}", ident)).await?;
        Ok(())
    }

    /// Request a power state change
    pub async fn change_power_state(&self, ident: &str, target: PowerTarget) -> Result<(), IronicError> {
        debug!("Changing power state of node {} to {:?}", ident, target);
        let response = self
            .request(Method::PUT, &format!("/v1/nodes/{}/states/power", ident))
            .json(&json!({ "target": target }))
            .send()
            .await?;
        Self::check(response, &format!("change power state of node {}", ident)).await?;
        Ok(())
    }

    /// Put a node into maintenance mode
    pub async fn set_maintenance(&self, ident: &str, reason: &str) -> Result<(), IronicError> {
        debug!("Setting maintenance on node {}", ident);
        let response = self
            .request(Method::PUT, &format!("/v1/nodes/{}/maintenance", ident))
            .json(&json!({ "reason": reason }))
            .send()
            .await?;
        Self::check(response, &format!("set maintenance on node {}", ident)).await?;
        Ok(())
    }

    /// Take a node out of maintenance mode
    pub async fn clear_maintenance(&self, ident: &str) -> Result<(), IronicError> {
        debug!("Clearing maintenance on node {}", ident);
        let response = self
            .request(Method::DELETE, &format!("/v1/nodes/{}/maintenance", ident))
            .send()
            .await?;
        Self::check(response, &format!("clear maintenance on node {}", ident)).await?;
        Ok(())
    }

    /// Fetch the hardware inventory recorded during inspection
    pub async fn get_inventory(&self, ident: &str) -> Result<Inventory, IronicError> {
        debug!("Fetching inventory for node {}", ident);
        let response = self
            .request(Method::GET, &format!("/v1/nodes/{}/inventory", ident))
            .send()
            .await?;
        let response = Self::check(response, &format!("get inventory of node {}", ident)).await?;
        let body: InventoryResponse = response.json().await?;
        Ok(body.inventory)
    }
}

#[async_trait::async_trait]
impl IronicClientTrait for IronicClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_available(&self) -> Result<(), IronicError> {
        self.check_available().await
    }

    async fn get_node(&self, ident: &str) -> Result<Node, IronicError> {
        self.get_node(ident).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, IronicError> {
        self.list_nodes().await
    }

    async fn create_node(&self, request: &NodeCreate) -> Result<Node, IronicError> {
        self.create_node(request).await
    }

    async fn update_node(&self, ident: &str, patch: &[PatchOperation]) -> Result<Node, IronicError> {
        self.update_node(ident, patch).await
    }

    async fn delete_node(&self, ident: &str) -> Result<(), IronicError> {
        self.delete_node(ident).await
    }

    async fn change_provision_state(&self, ident: &str, opts: &ProvisionStateOpts) -> Result<(), IronicError> {
        self.change_provision_state(ident, opts).await
    }

    async fn change_power_state(&self, ident: &str, target: PowerTarget) -> Result<(), IronicError> {
        self.change_power_state(ident, target).await
    }

    async fn set_maintenance(&self, ident: &str, reason: &str) -> Result<(), IronicError> {
        self.set_maintenance(ident, reason).await
    }

    async fn clear_maintenance(&self, ident: &str) -> Result<(), IronicError> {
        self.clear_maintenance(ident).await
    }

    async fn get_inventory(&self, ident: &str) -> Result<Inventory, IronicError> {
        self.get_inventory(ident).await
    }
}
