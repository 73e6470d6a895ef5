//! HTTP client for the remote panel

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::core::{
    ClientInfo, DetectResult, DetectRule, NodeInfo, NodeStatus, OnlineUser, PanelApi, UserInfo,
    UserTraffic,
};
use crate::logger::log;

/// Panel response envelope for list endpoints
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

/// Panel response envelope for single-object endpoints
#[derive(Debug, Deserialize)]
struct ObjectResponse<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct ReportBody<'a, T: Serialize> {
    data: &'a T,
}

/// Panel client speaking JSON over HTTP under `{api_host}/api/v1/node/{node_id}/`
pub struct PanelClient {
    client: Client,
    config: ApiConfig,
    base_url: String,
}

impl PanelClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        let base_url = format!(
            "{}/api/v1/node/{}",
            config.api_host.trim_end_matches('/'),
            config.node_id
        );

        log::info!(
            base_url = %base_url,
            timeout_secs = config.timeout.as_secs(),
            "Panel client ready"
        );

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.url(endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} rejected", url))?;

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url))
    }

    async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<()> {
        let url = self.url(endpoint);
        self.client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&ReportBody { data: &body })
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", url))?;
        Ok(())
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    fn describe(&self) -> ClientInfo {
        ClientInfo {
            api_host: self.config.api_host.clone(),
            node_id: self.config.node_id,
            key: self.config.api_key.clone(),
            node_type: self.config.node_type.clone(),
        }
    }

    async fn get_node_info(&self) -> Result<NodeInfo> {
        let response: ObjectResponse<NodeInfo> = self.get("info").await?;
        log::debug!(node_id = self.config.node_id, port = response.data.port, "Fetched node info");
        Ok(response.data)
    }

    async fn get_user_list(&self) -> Result<Vec<UserInfo>> {
        let response: ListResponse<UserInfo> = self.get("users").await?;
        log::debug!(count = response.data.len(), "Fetched user list");
        Ok(response.data)
    }

    async fn get_node_rule(&self) -> Result<Vec<DetectRule>> {
        let response: ListResponse<DetectRule> = self.get("rules").await?;
        Ok(response.data)
    }

    async fn report_node_status(&self, status: &NodeStatus) -> Result<()> {
        self.post("status", status).await
    }

    async fn report_user_traffic(&self, traffic: &[UserTraffic]) -> Result<()> {
        self.post("traffic", traffic).await
    }

    async fn report_node_online_users(&self, online: &[OnlineUser]) -> Result<()> {
        self.post("online", online).await
    }

    async fn report_illegal(&self, results: &[DetectResult]) -> Result<()> {
        self.post("illegal", results).await
    }
}
