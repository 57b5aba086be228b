//! Issue tracker lookups for referenced items.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ExternalToolError;

use super::ItemPattern;

/// Item as returned by the tracker's REST API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerItem {
    /// Numeric item id.
    pub id: u64,
    /// Item title.
    pub name: String,
    /// Workflow status, if the tracker has one.
    #[serde(default)]
    pub status: Option<ItemStatus>,
    /// Item body.
    #[serde(default)]
    pub description: Option<String>,
}

/// Workflow status of a tracker item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemStatus {
    /// Display name of the status.
    pub name: String,
}

impl TrackerItem {
    /// Renders the item as a Markdown summary.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("**#{}** {}", self.id, self.name);
        if let Some(status) = &self.status {
            out.push_str(&format!("\n\n_Status:_ {}", status.name));
        }
        if let Some(description) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push_str("\n\n");
            out.push_str(description.trim());
        }
        out
    }
}

/// Fetches tracker items referenced from documents.
#[derive(Debug, Clone)]
pub struct TrackerLookup {
    client: Client,
    base_url: String,
    pattern: ItemPattern,
}

impl TrackerLookup {
    /// Creates a lookup against the tracker at `base_url`.
    pub fn new(base_url: impl Into<String>, pattern: ItemPattern) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pattern,
        }
    }

    /// Distinct item ids referenced in `text`, in order of first appearance.
    pub fn item_ids(&self, text: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (_, id) in self.pattern.find(text) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    /// Fetches one item.
    ///
    /// # Errors
    /// [`ExternalToolError::Status`] on a non-success status, `Http` when the
    /// request fails or the body is not an item.
    pub async fn fetch_item(&self, id: &str) -> Result<TrackerItem, ExternalToolError> {
        let url = format!("{}/api/v3/items/{}", self.base_url, id);
        debug!("Fetching tracker item: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExternalToolError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        Ok(response.json().await?)
    }

    /// Markdown summaries of every item referenced in `text`.
    ///
    /// Items that cannot be fetched are logged and skipped.
    pub async fn summaries(&self, text: &str) -> Vec<String> {
        let mut summaries = Vec::new();
        for id in self.item_ids(text) {
            match self.fetch_item(&id).await {
                Ok(item) => summaries.push(item.to_markdown()),
                Err(e) => warn!(item = %id, error = %e, "tracker lookup failed"),
            }
        }
        summaries
    }
}
