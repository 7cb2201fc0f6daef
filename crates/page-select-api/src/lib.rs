use page_select_core::{
    accumulate_to_target, is_fully_covered, set_checked, set_unchecked, AccumulationReport,
    FetchedPage, Page, PageIndex, PaginationCursor, Progress, Record, RecordId, RecordSource,
    SelectError, SelectionObserver, SelectionSet,
};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenPageRequest {
    pub page: PageIndex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TogglePageRequest {
    pub checked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleRecordRequest {
    pub id: RecordId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectTargetRequest {
    pub target: i64,
}

/// What the presentation layer renders after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionView {
    pub page: PageIndex,
    pub page_size: u32,
    pub page_count: u64,
    pub total_count: u64,
    pub records: Vec<Record>,
    pub selected_ids: Vec<RecordId>,
    pub selected_count: usize,
    pub page_fully_selected: bool,
}

/// Selection Set snapshot taken after one page was consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEntry {
    pub page: PageIndex,
    pub selected_ids: Vec<RecordId>,
    pub selected_count: usize,
    pub remaining: usize,
}

impl From<&Progress<'_>> for ProgressEntry {
    fn from(progress: &Progress<'_>) -> Self {
        Self {
            page: progress.page,
            selected_ids: progress.selection.ids(),
            selected_count: progress.selection.len(),
            remaining: progress.remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TogglePageResult {
    pub checked: bool,
    pub changed: usize,
    pub view: SelectionView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleRecordResult {
    pub id: RecordId,
    pub selected: bool,
    pub view: SelectionView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectTargetResult {
    pub report: AccumulationReport,
    pub progress: Vec<ProgressEntry>,
    pub view: SelectionView,
}

/// One browsing session: the displayed page plus a selection that outlives it.
///
/// Mutating calls take `&mut self`, so an accumulation run and a toggle can
/// never interleave on the same session.
#[derive(Debug)]
pub struct SelectionSession<S> {
    source: S,
    cursor: PaginationCursor,
    page: Page,
    selection: SelectionSet,
}

async fn load_page<S: RecordSource>(source: &S, page: PageIndex) -> Result<FetchedPage, SelectError> {
    source
        .fetch_page(page)
        .await
        .map_err(|err| SelectError::PageLoad { page, source: Box::new(err) })
}

impl<S: RecordSource> SelectionSession<S> {
    /// Load `page` from `source` and start with an empty selection.
    ///
    /// # Errors
    /// Returns [`SelectError::PageLoad`] when the page cannot be fetched.
    pub async fn open(source: S, page: PageIndex) -> Result<Self, SelectError> {
        let fetched = load_page(&source, page).await?;
        tracing::debug!(page = page.get(), records = fetched.page.len(), "session opened");
        Ok(Self {
            source,
            cursor: PaginationCursor::from_fetched(&fetched),
            page: fetched.page,
            selection: SelectionSet::new(),
        })
    }

    /// Carry over identities selected in an earlier session.
    ///
    /// Unlike every other mutation this accepts ids from pages this session
    /// never loaded. It exists for the one-shot CLI, which keeps no state
    /// between invocations and replays `--selected` ids here.
    #[must_use]
    pub fn restore_selection(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        for id in ids {
            self.selection.add(id);
        }
        self
    }

    /// Replace the displayed page. The selection is untouched.
    ///
    /// # Errors
    /// Returns [`SelectError::PageLoad`]; the previous page stays displayed.
    pub async fn go_to_page(&mut self, page: PageIndex) -> Result<SelectionView, SelectError> {
        let fetched = load_page(&self.source, page).await?;
        self.cursor = PaginationCursor::from_fetched(&fetched);
        self.page = fetched.page;
        Ok(self.view())
    }

    /// Row checkbox.
    ///
    /// # Errors
    /// Returns [`SelectError::RecordNotOnPage`] for ids the displayed page does not list.
    pub fn toggle_record(&mut self, id: RecordId) -> Result<ToggleRecordResult, SelectError> {
        if !self.page.contains(id) {
            return Err(SelectError::RecordNotOnPage(id));
        }
        let selected = self.selection.toggle(id);
        Ok(ToggleRecordResult { id, selected, view: self.view() })
    }

    /// Header checkbox.
    pub fn set_page_checked(&mut self, checked: bool) -> TogglePageResult {
        let changed = if checked {
            set_checked(&self.page, &mut self.selection)
        } else {
            set_unchecked(&self.page, &mut self.selection)
        };
        TogglePageResult { checked, changed, view: self.view() }
    }

    /// "Select N rows" starting from the displayed page.
    ///
    /// Every snapshot is forwarded to `observer` as well as recorded in the
    /// result.
    ///
    /// # Errors
    /// Returns [`SelectError::Fetch`] when a later page fails to load. Records
    /// selected before the failure remain in the session.
    pub async fn select_target<O>(
        &mut self,
        target: i64,
        observer: &mut O,
    ) -> Result<SelectTargetResult, SelectError>
    where
        O: SelectionObserver + ?Sized,
    {
        let mut progress = Vec::new();
        let mut forward = |snapshot: &Progress<'_>| {
            progress.push(ProgressEntry::from(snapshot));
            observer.publish(snapshot);
        };
        let report = accumulate_to_target(
            &self.source,
            self.cursor,
            &self.page,
            &mut self.selection,
            target,
            &mut forward,
        )
        .await?;
        Ok(SelectTargetResult { report, progress, view: self.view() })
    }

    #[must_use]
    pub fn view(&self) -> SelectionView {
        SelectionView {
            page: self.page.index,
            page_size: self.cursor.page_size,
            page_count: self.cursor.page_count(),
            total_count: self.cursor.total_count,
            records: self.page.records.clone(),
            selected_ids: self.selection.ids(),
            selected_count: self.selection.len(),
            page_fully_selected: is_fully_covered(&self.page, &self.selection),
        }
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }
}
