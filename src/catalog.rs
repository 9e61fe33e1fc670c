//! Catalog access: the `CatalogOps` seam and the authenticated HTTP provider
use crate::download_plan::stream_to_file;
use crate::error::HarvestError;
use serde::Deserialize;
use stac::{Collection, Item, Link};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "https://api.radiant.earth/mlhub/v1";
pub const API_KEY_ENV_VAR: &str = "MLHUB_API_KEY";

const NEXT_REL: &str = "next";
const API_KEY_PARAM: &str = "key";
const PAGE_LIMIT: usize = 100;

/// One page of a collection's item listing, plus the opaque continuation
/// token for the page after it (`None` once the catalog is exhausted).
#[derive(Debug)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub next_token: Option<String>,
}

pub trait CatalogOps {
    async fn get_collection(&self, collection_id: &str) -> Result<Collection, HarvestError>;

    async fn list_items_page(
        &self,
        collection_id: &str,
        page_token: Option<&str>,
    ) -> Result<ItemPage, HarvestError>;

    async fn get_item(&self, collection_id: &str, item_id: &str) -> Result<Item, HarvestError>;

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, HarvestError>;
}

pub struct Provider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl Provider {
    pub fn new(api_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(DEFAULT_API_URL, std::env::var(API_KEY_ENV_VAR).ok())
    }

    /// The key rides along only on requests to the catalog host; asset hrefs
    /// pointing elsewhere are fetched without credentials.
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if url.starts_with(&self.api_url) {
            if let Some(key) = self.api_key.as_deref() {
                request = request.query(&[(API_KEY_PARAM, key)]);
            }
        }
        request
    }

    /// Bulk transfer of a collection's prepared archive, bypassing the
    /// item-selection pipeline entirely.
    pub async fn download_archive(
        &self,
        collection_id: &str,
        output_dir: &Path,
    ) -> Result<PathBuf, HarvestError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let url = format!("{}/archive/{collection_id}", self.api_url);
        let response = self.request(&url).send().await?.error_for_status()?;
        let dest = output_dir.join(format!("{collection_id}.tar.gz"));
        let byte_count = stream_to_file(response, &dest).await?;
        tracing::info!(
            collection = collection_id,
            bytes = byte_count,
            path = %dest.display(),
            "archive downloaded"
        );
        Ok(dest)
    }
}

/// Wire shape of a paginated item listing (a GeoJSON feature collection with
/// pagination links).
#[derive(Deserialize)]
struct ItemCollectionPage {
    #[serde(default, rename = "features")]
    items: Vec<Item>,
    #[serde(default)]
    links: Vec<Link>,
}

impl CatalogOps for Provider {
    async fn get_collection(&self, collection_id: &str) -> Result<Collection, HarvestError> {
        let url = format!("{}/collections/{collection_id}", self.api_url);
        let collection = self
            .request(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Collection>()
            .await?;
        Ok(collection)
    }

    async fn list_items_page(
        &self,
        collection_id: &str,
        page_token: Option<&str>,
    ) -> Result<ItemPage, HarvestError> {
        // The continuation token is the catalog's own "next" href, replayed
        // verbatim; only the first page is built from the collection id.
        let request = match page_token {
            Some(next_url) => self.request(next_url),
            None => {
                let url = format!("{}/collections/{collection_id}/items", self.api_url);
                self.request(&url).query(&[("limit", PAGE_LIMIT)])
            }
        };
        let page = request
            .send()
            .await?
            .error_for_status()?
            .json::<ItemCollectionPage>()
            .await?;
        let next_token = page
            .links
            .iter()
            .find(|link| link.rel == NEXT_REL)
            .map(|link| link.href.clone());
        Ok(ItemPage {
            items: page.items,
            next_token,
        })
    }

    async fn get_item(&self, collection_id: &str, item_id: &str) -> Result<Item, HarvestError> {
        let url = format!(
            "{}/collections/{collection_id}/items/{item_id}",
            self.api_url
        );
        let item = self
            .request(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Item>()
            .await?;
        Ok(item)
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, HarvestError> {
        let response = self.request(url).send().await?.error_for_status()?;
        Ok(response)
    }
}
