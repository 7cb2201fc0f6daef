use std::future::Future;
use std::time::Duration;

use page_select_core::{FetchedPage, Page, PageIndex, Record, RecordId, RecordSource};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Columns requested from the collection; everything else the API offers is ignored.
pub const ARTWORK_FIELDS: &str =
    "id,title,place_of_origin,artist_display,inscriptions,date_start,date_end";

/// HTTP source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API root, without the trailing `/artworks`
    pub base_url: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.artic.edu/api/v1".to_string(),
            timeout_secs: 30,
            user_agent: concat!("page-select/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArtworksBody {
    pagination: PaginationBody,
    #[serde(default)]
    data: Vec<ArtworkBody>,
}

#[derive(Debug, Deserialize)]
struct PaginationBody {
    total: u64,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct ArtworkBody {
    id: u64,
    title: Option<String>,
    place_of_origin: Option<String>,
    artist_display: Option<String>,
    inscriptions: Option<String>,
    date_start: Option<i64>,
    date_end: Option<i64>,
}

impl From<ArtworkBody> for Record {
    fn from(body: ArtworkBody) -> Self {
        Self {
            id: RecordId(body.id),
            title: body.title,
            place_of_origin: body.place_of_origin,
            artist_display: body.artist_display,
            inscriptions: body.inscriptions,
            date_start: body.date_start,
            date_end: body.date_end,
        }
    }
}

/// Decode one `/artworks` response body.
///
/// The page size is taken from `pagination.limit` rather than assumed, so
/// the page-count bound follows whatever the server actually served.
///
/// # Errors
/// Returns [`SourceError::Decode`] when the body is not the expected shape.
pub fn parse_artworks_body(page: PageIndex, body: &str) -> Result<FetchedPage, SourceError> {
    let parsed: ArtworksBody = serde_json::from_str(body)?;
    Ok(FetchedPage {
        page: Page::new(page, parsed.data.into_iter().map(Record::from).collect()),
        total_count: parsed.pagination.total,
        page_size: parsed.pagination.limit,
    })
}

/// Artworks API client.
#[derive(Debug, Clone)]
pub struct ArtworkSource {
    client: Client,
    config: SourceConfig,
}

impl ArtworkSource {
    /// # Errors
    /// Returns [`SourceError::Request`] when the HTTP client cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { client, config: SourceConfig { base_url, ..config } })
    }

    fn page_url(&self) -> String {
        format!("{}/artworks", self.config.base_url)
    }
}

impl RecordSource for ArtworkSource {
    type Error = SourceError;

    fn fetch_page(
        &self,
        page: PageIndex,
    ) -> impl Future<Output = Result<FetchedPage, Self::Error>> + Send {
        let request = self
            .client
            .get(self.page_url())
            .header(header::ACCEPT, "application/json")
            .query(&[("page", page.get().to_string()), ("fields", ARTWORK_FIELDS.to_string())]);

        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                tracing::debug!(page = page.get(), status = status.as_u16(), "artworks request rejected");
                return Err(SourceError::Status { page, status: status.as_u16() });
            }
            let body = response.text().await?;
            let fetched = parse_artworks_body(page, &body)?;
            tracing::debug!(
                page = page.get(),
                records = fetched.page.len(),
                total = fetched.total_count,
                "fetched artworks page"
            );
            Ok(fetched)
        }
    }
}
