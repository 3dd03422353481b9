//! Client for the remote media catalog's REST API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::model::{MediaFileRecord, MediaKind, MediaPathRecord, NewMediaFile};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const INFER_SCRAPERS_ENDPOINT: &str = "inferscrapers/";

/// Everything reconciliation needs from the catalog.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Every path record of `kind`, across all pages.
    async fn list_paths(&self, kind: MediaKind) -> Result<Vec<MediaPathRecord>>;

    /// Every file record under the path with id `path_id`, across all pages.
    async fn list_files(&self, kind: MediaKind, path_id: i64) -> Result<Vec<MediaFileRecord>>;

    /// Creates (or fetches) the path record for `local_path`.
    async fn create_path(&self, kind: MediaKind, local_path: &Path) -> Result<MediaPathRecord>;

    async fn create_file(&self, kind: MediaKind, file: &NewMediaFile) -> Result<()>;

    /// Asks which library directory `title` belongs in. `None` when the catalog has no idea.
    async fn lookup_localpath(&self, title: &str) -> Result<Option<PathBuf>>;

    /// Asks the catalog to re-run its metadata scrapers.
    async fn infer_scrapers(&self) -> Result<()>;
}

/// One page of a paginated listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewMediaPath<'a> {
    localpath: &'a str,
    remotepath: &'a str,
    skip: bool,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    localpath: String,
}

pub struct HttpCatalog {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    server_name: String,
    cooldown: Duration,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("catalog.base_url: {e}")))?;
        // Endpoints are joined relative to the base, which only works below a directory.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        if !config.verify_tls {
            warn!("TLS certificate verification is disabled for the catalog");
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            server_name: config.server_name.clone(),
            cooldown: config.request_cooldown,
        })
    }

    fn endpoint(&self, relative: &str) -> Result<Url> {
        self.base_url
            .join(relative)
            .map_err(|e| Error::Catalog(format!("bad endpoint '{relative}': {e}")))
    }

    /// Sends with credentials, then waits out the cooldown whatever the result.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await;
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
        Ok(response?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self.send(self.client.get(url)).await?;
        Ok(response.error_for_status()?.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<Response> {
        debug!(%url, "POST");
        let response = self.send(self.client.post(url).json(body)).await?;
        Ok(response.error_for_status()?)
    }

    /// Follows `next` links until the listing runs out.
    async fn get_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let page: Page<T> = self.get_json(url).await?;
            results.extend(page.results);
            next = match page.next {
                Some(link) => Some(
                    Url::parse(&link)
                        .map_err(|e| Error::Catalog(format!("bad next link '{link}': {e}")))?,
                ),
                None => None,
            };
        }
        Ok(results)
    }
}

#[async_trait]
impl MediaCatalog for HttpCatalog {
    async fn list_paths(&self, kind: MediaKind) -> Result<Vec<MediaPathRecord>> {
        let url = self.endpoint(kind.path_endpoint())?;
        self.get_all(url).await
    }

    async fn list_files(&self, kind: MediaKind, path_id: i64) -> Result<Vec<MediaFileRecord>> {
        let mut url = self.endpoint(kind.file_endpoint())?;
        url.query_pairs_mut()
            .append_pair("pathid", &path_id.to_string());
        self.get_all(url).await
    }

    async fn create_path(&self, kind: MediaKind, local_path: &Path) -> Result<MediaPathRecord> {
        let local = local_path.to_string_lossy();
        let body = NewMediaPath {
            localpath: &local,
            remotepath: &local,
            skip: false,
            server: &self.server_name,
        };
        let url = self.endpoint(kind.path_endpoint())?;
        debug!(%url, "POST");
        let response = self.send(self.client.post(url.clone()).json(&body)).await?;
        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        // Usually means the path is already registered; look it up instead.
        debug!(status = %response.status(), "path create refused, looking it up");
        let mut lookup = url;
        lookup
            .query_pairs_mut()
            .append_pair("localpath", &local)
            .append_pair("remotepath", &local);
        let page: Page<MediaPathRecord> = self.get_json(lookup).await?;
        page.results.into_iter().next().ok_or_else(|| {
            Error::Catalog(format!(
                "could not create or find a {kind} path for '{}'",
                local_path.display()
            ))
        })
    }

    async fn create_file(&self, kind: MediaKind, file: &NewMediaFile) -> Result<()> {
        let url = self.endpoint(kind.file_endpoint())?;
        self.post_json(url, file).await?;
        Ok(())
    }

    async fn lookup_localpath(&self, title: &str) -> Result<Option<PathBuf>> {
        let mut url = self.endpoint(INFER_SCRAPERS_ENDPOINT)?;
        url.query_pairs_mut().append_pair("title", title);
        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            warn!(title, status = %response.status(), "catalog has no location for title");
            return Ok(None);
        }
        let found: LookupResponse = response.json().await?;
        Ok(Some(PathBuf::from(found.localpath)))
    }

    async fn infer_scrapers(&self) -> Result<()> {
        let url = self.endpoint(INFER_SCRAPERS_ENDPOINT)?;
        self.post_json(url, &serde_json::json!({})).await?;
        Ok(())
    }
}
