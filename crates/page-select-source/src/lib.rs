use std::future::Future;

use page_select_core::{FetchedPage, PageIndex, RecordSource};

mod artic;
mod fixture;

pub use artic::{parse_artworks_body, ArtworkSource, SourceConfig, ARTWORK_FIELDS};
pub use fixture::{FixtureFile, FixtureSource};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} while fetching page {page}")]
    Status { page: PageIndex, status: u16 },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("page {page} is past the last page ({page_count})")]
    PageOutOfRange { page: PageIndex, page_count: u64 },
    #[error("fixture is configured to fail page {0}")]
    InjectedFailure(PageIndex),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub enum ConfiguredSource {
    Artic(ArtworkSource),
    Fixture(FixtureSource),
}

impl RecordSource for ConfiguredSource {
    type Error = SourceError;

    fn fetch_page(
        &self,
        page: PageIndex,
    ) -> impl Future<Output = Result<FetchedPage, Self::Error>> + Send {
        async move {
            match self {
                Self::Artic(source) => source.fetch_page(page).await,
                Self::Fixture(source) => source.fetch_page(page).await,
            }
        }
    }
}
