use std::collections::BTreeSet;
use std::fs;
use std::future::{ready, Future};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use page_select_core::{FetchedPage, Page, PageIndex, PaginationCursor, Record, RecordSource};
use serde::{Deserialize, Serialize};

use crate::SourceError;

const DEFAULT_PAGE_SIZE: u32 = 10;

/// On-disk fixture layout. A bare array of records uses the default page size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FixtureFile {
    Paged {
        page_size: u32,
        records: Vec<Record>,
        #[serde(default)]
        fail_pages: BTreeSet<u32>,
    },
    Records(Vec<Record>),
}

/// Serves a fixed collection page by page, the same way the HTTP source does.
#[derive(Debug)]
pub struct FixtureSource {
    records: Vec<Record>,
    page_size: u32,
    fail_pages: BTreeSet<u32>,
    fetches: AtomicUsize,
}

impl FixtureSource {
    #[must_use]
    pub fn new(records: Vec<Record>, page_size: u32) -> Self {
        Self { records, page_size, fail_pages: BTreeSet::new(), fetches: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn failing_on(mut self, page: u32) -> Self {
        self.fail_pages.insert(page);
        self
    }

    /// # Errors
    /// Returns [`SourceError::Io`] or [`SourceError::Decode`] when the file
    /// cannot be read or is not a fixture document.
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let body = fs::read_to_string(path)?;
        let file: FixtureFile = serde_json::from_str(&body)?;
        Ok(Self::from(file))
    }

    /// Number of pages served so far, including failed ones.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn total_count(&self) -> u64 {
        u64::try_from(self.records.len()).unwrap_or(u64::MAX)
    }

    fn serve(&self, page: PageIndex) -> Result<FetchedPage, SourceError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if self.fail_pages.contains(&page.get()) {
            return Err(SourceError::InjectedFailure(page));
        }

        let page_count = PaginationCursor {
            current: page,
            page_size: self.page_size,
            total_count: self.total_count(),
        }
        .page_count();
        if u64::from(page.get()) > page_count.max(1) {
            return Err(SourceError::PageOutOfRange { page, page_count });
        }

        let size = usize::try_from(self.page_size).unwrap_or(usize::MAX);
        let start = usize::try_from(page.get() - 1).unwrap_or(usize::MAX).saturating_mul(size);
        let records = self.records.iter().skip(start).take(size).cloned().collect();
        Ok(FetchedPage {
            page: Page::new(page, records),
            total_count: self.total_count(),
            page_size: self.page_size,
        })
    }
}

impl From<FixtureFile> for FixtureSource {
    fn from(file: FixtureFile) -> Self {
        match file {
            FixtureFile::Paged { page_size, records, fail_pages } => {
                Self { records, page_size, fail_pages, fetches: AtomicUsize::new(0) }
            }
            FixtureFile::Records(records) => Self::new(records, DEFAULT_PAGE_SIZE),
        }
    }
}

impl RecordSource for FixtureSource {
    type Error = SourceError;

    fn fetch_page(
        &self,
        page: PageIndex,
    ) -> impl Future<Output = Result<FetchedPage, Self::Error>> + Send {
        ready(self.serve(page))
    }
}

#[cfg(test)]
mod tests {
    use page_select_core::{accumulate_to_target, AccumulationOutcome, SelectionSet, Silent};

    use super::*;

    fn page_index(value: u32) -> PageIndex {
        PageIndex::new(value).unwrap_or_else(|err| panic!("invalid page index: {err}"))
    }

    fn collection(total: u64) -> Vec<Record> {
        (1..=total).map(Record::bare).collect()
    }

    #[tokio::test]
    async fn last_page_is_short() {
        let source = FixtureSource::new(collection(23), 10);
        let fetched = source
            .fetch_page(page_index(3))
            .await
            .unwrap_or_else(|err| panic!("page 3 should load: {err}"));
        assert_eq!(fetched.page.len(), 3);
        assert_eq!(fetched.total_count, 23);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn page_past_the_end_is_rejected() {
        let source = FixtureSource::new(collection(23), 10);
        let result = source.fetch_page(page_index(4)).await;
        assert!(matches!(result, Err(SourceError::PageOutOfRange { page_count: 3, .. })));
    }

    #[tokio::test]
    async fn empty_collection_still_has_a_first_page() {
        let source = FixtureSource::new(Vec::new(), 10);
        let fetched = source
            .fetch_page(PageIndex::FIRST)
            .await
            .unwrap_or_else(|err| panic!("first page should load: {err}"));
        assert!(fetched.page.is_empty());
    }

    #[tokio::test]
    async fn injected_failure_surfaces_through_accumulation() {
        let source = FixtureSource::new(collection(40), 10).failing_on(2);
        let loaded = source
            .fetch_page(PageIndex::FIRST)
            .await
            .unwrap_or_else(|err| panic!("first page should load: {err}"));
        let mut selection = SelectionSet::new();
        let result = accumulate_to_target(
            &source,
            PaginationCursor::from_fetched(&loaded),
            &loaded.page,
            &mut selection,
            15,
            &mut Silent,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(selection.len(), 10);
    }

    #[tokio::test]
    async fn fixture_accumulation_exhausts_collection() {
        let source = FixtureSource::new(collection(23), 10);
        let loaded = source
            .fetch_page(PageIndex::FIRST)
            .await
            .unwrap_or_else(|err| panic!("first page should load: {err}"));
        let mut selection = SelectionSet::new();
        let report = accumulate_to_target(
            &source,
            PaginationCursor::from_fetched(&loaded),
            &loaded.page,
            &mut selection,
            25,
            &mut Silent,
        )
        .await
        .unwrap_or_else(|err| panic!("accumulation should finish: {err}"));
        assert_eq!(report.outcome, AccumulationOutcome::Exhausted);
        assert_eq!(selection.len(), 23);
        assert_eq!(source.fetches(), 3);
    }

    #[test]
    fn fixture_file_accepts_bare_array_and_paged_form() {
        let bare: FixtureFile = serde_json::from_str(r#"[{"id": 1}, {"id": 2, "title": "Two"}]"#)
            .unwrap_or_else(|err| panic!("bare array should parse: {err}"));
        let source = FixtureSource::from(bare);
        assert_eq!(source.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(source.records.len(), 2);

        let paged: FixtureFile =
            serde_json::from_str(r#"{"page_size": 5, "records": [{"id": 9}], "fail_pages": [2]}"#)
                .unwrap_or_else(|err| panic!("paged form should parse: {err}"));
        let source = FixtureSource::from(paged);
        assert_eq!(source.page_size, 5);
        assert!(source.fail_pages.contains(&2));
    }
}
