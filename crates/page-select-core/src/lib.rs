use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

type BoxedSourceError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("page index MUST be >= 1")]
    InvalidPageIndex,
    #[error("record {0} is not on the current page")]
    RecordNotOnPage(RecordId),
    #[error("failed to load page {page}: {source}")]
    PageLoad {
        page: PageIndex,
        #[source]
        source: BoxedSourceError,
    },
    #[error("failed to fetch page {page} after selecting {added_before_failure} records: {source}")]
    Fetch {
        page: PageIndex,
        added_before_failure: usize,
        #[source]
        source: BoxedSourceError,
    },
}

impl SelectError {
    #[must_use]
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::PageLoad { .. } | Self::Fetch { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based position of a page in the source collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageIndex(u32);

impl PageIndex {
    pub const FIRST: Self = Self(1);

    /// # Errors
    /// Returns [`SelectError::InvalidPageIndex`] for `0`.
    pub fn new(value: u32) -> Result<Self, SelectError> {
        if value == 0 {
            return Err(SelectError::InvalidPageIndex);
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// `None` past the last representable index.
    #[must_use]
    pub fn next_page(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl TryFrom<u32> for PageIndex {
    type Error = SelectError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PageIndex> for u32 {
    fn from(value: PageIndex) -> Self {
        value.0
    }
}

impl Display for PageIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One selectable row. Only `id` participates in selection; the remaining
/// fields are display attributes carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub place_of_origin: Option<String>,
    #[serde(default)]
    pub artist_display: Option<String>,
    #[serde(default)]
    pub inscriptions: Option<String>,
    #[serde(default)]
    pub date_start: Option<i64>,
    #[serde(default)]
    pub date_end: Option<i64>,
}

impl Record {
    #[must_use]
    pub fn bare(id: u64) -> Self {
        Self {
            id: RecordId(id),
            title: None,
            place_of_origin: None,
            artist_display: None,
            inscriptions: None,
            date_start: None,
            date_end: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub index: PageIndex,
    pub records: Vec<Record>,
}

impl Page {
    #[must_use]
    pub fn new(index: PageIndex, records: Vec<Record>) -> Self {
        Self { index, records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records.iter().map(|record| record.id)
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.iter().any(|record| record.id == id)
    }
}

/// One page as answered by a [`RecordSource`], together with the collection
/// totals the source reported alongside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchedPage {
    pub page: Page,
    pub total_count: u64,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationCursor {
    pub current: PageIndex,
    pub page_size: u32,
    pub total_count: u64,
}

impl PaginationCursor {
    #[must_use]
    pub fn from_fetched(fetched: &FetchedPage) -> Self {
        Self {
            current: fetched.page.index,
            page_size: fetched.page_size,
            total_count: fetched.total_count,
        }
    }

    #[must_use]
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    #[must_use]
    pub fn has_page(&self, index: PageIndex) -> bool {
        u64::from(index.get()) <= self.page_count()
    }
}

/// Selected record identities, independent of which page is displayed.
///
/// Members iterate in the order they were first added.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SelectionSet {
    ids: IndexSet<RecordId>,
}

impl SelectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains(&id)
    }

    /// Returns `true` when `id` was not already a member.
    pub fn add(&mut self, id: RecordId) -> bool {
        self.ids.insert(id)
    }

    /// Returns `true` when `id` was a member.
    pub fn remove(&mut self, id: RecordId) -> bool {
        self.ids.shift_remove(&id)
    }

    /// Flips membership of `id` and returns the new state.
    pub fn toggle(&mut self, id: RecordId) -> bool {
        if self.remove(id) {
            false
        } else {
            self.add(id)
        }
    }

    /// Adds every record not yet selected, in slice order. Returns how many were added.
    pub fn add_all_missing(&mut self, records: &[Record]) -> usize {
        self.add_missing_up_to(records, usize::MAX)
    }

    /// Like [`Self::add_all_missing`] but stops once `limit` new members were added.
    pub fn add_missing_up_to(&mut self, records: &[Record], limit: usize) -> usize {
        let mut added = 0;
        for record in records {
            if added >= limit {
                break;
            }
            if self.add(record.id) {
                added += 1;
            }
        }
        added
    }

    /// Drops every member whose id appears in `records`. Returns how many were removed.
    pub fn remove_all_present(&mut self, records: &[Record]) -> usize {
        let doomed: HashSet<RecordId> = records.iter().map(|record| record.id).collect();
        let before = self.ids.len();
        self.ids.retain(|id| !doomed.contains(id));
        before - self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.ids.iter().copied()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.iter().collect()
    }
}

impl FromIterator<RecordId> for SelectionSet {
    fn from_iter<T: IntoIterator<Item = RecordId>>(iter: T) -> Self {
        Self { ids: iter.into_iter().collect() }
    }
}

/// `true` iff `page` is non-empty and every record on it is selected.
#[must_use]
pub fn is_fully_covered(page: &Page, selection: &SelectionSet) -> bool {
    !page.is_empty() && page.ids().all(|id| selection.contains(id))
}

/// Header checkbox checked: select every record on the displayed page.
pub fn set_checked(page: &Page, selection: &mut SelectionSet) -> usize {
    selection.add_all_missing(&page.records)
}

/// Header checkbox cleared: deselect the displayed page, leaving other pages' picks alone.
pub fn set_unchecked(page: &Page, selection: &mut SelectionSet) -> usize {
    selection.remove_all_present(&page.records)
}

/// Paginated collection the accumulator pulls additional pages from.
pub trait RecordSource {
    type Error: StdError + Send + Sync + 'static;

    fn fetch_page(
        &self,
        page: PageIndex,
    ) -> impl Future<Output = Result<FetchedPage, Self::Error>> + Send;
}

impl<T: RecordSource> RecordSource for Arc<T> {
    type Error = T::Error;

    fn fetch_page(
        &self,
        page: PageIndex,
    ) -> impl Future<Output = Result<FetchedPage, Self::Error>> + Send {
        (**self).fetch_page(page)
    }
}

/// Snapshot handed to observers while an accumulation run progresses.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub page: PageIndex,
    pub selection: &'a SelectionSet,
    pub remaining: usize,
}

pub trait SelectionObserver {
    fn publish(&mut self, progress: &Progress<'_>);
}

impl<F> SelectionObserver for F
where
    F: FnMut(&Progress<'_>),
{
    fn publish(&mut self, progress: &Progress<'_>) {
        self(progress);
    }
}

/// Observer for callers that only care about the final result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl SelectionObserver for Silent {
    fn publish(&mut self, _progress: &Progress<'_>) {}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationOutcome {
    AlreadySatisfied,
    TargetReached,
    Exhausted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct AccumulationReport {
    pub target: i64,
    pub requested: usize,
    pub added: usize,
    pub pages_fetched: usize,
    pub outcome: AccumulationOutcome,
}

fn remaining_for_target(selection: &SelectionSet, target: i64) -> Option<usize> {
    let selected = i64::try_from(selection.len()).unwrap_or(i64::MAX);
    let needed = target.saturating_sub(selected);
    if needed <= 0 {
        return None;
    }
    Some(usize::try_from(needed).unwrap_or(usize::MAX))
}

/// Grow `selection` until it holds at least `target` members.
///
/// Unselected records on `loaded` are taken first, in order. Further pages are
/// then fetched one at a time starting after `loaded`, each consumed only as
/// far as the remaining count requires. Observers see the selection after the
/// loaded page and after every fetched page. The run stops when the target is
/// met or the page after the last one reported by the source would be needed.
///
/// A non-positive target, or one already met, is a no-op.
///
/// # Errors
/// Returns [`SelectError::Fetch`] when the source fails; records selected
/// before the failure stay in `selection`.
pub async fn accumulate_to_target<S, O>(
    source: &S,
    cursor: PaginationCursor,
    loaded: &Page,
    selection: &mut SelectionSet,
    target: i64,
    observer: &mut O,
) -> Result<AccumulationReport, SelectError>
where
    S: RecordSource,
    O: SelectionObserver + ?Sized,
{
    let Some(requested) = remaining_for_target(selection, target) else {
        tracing::debug!(
            requested_target = target,
            selected = selection.len(),
            "target already satisfied"
        );
        return Ok(AccumulationReport {
            target,
            requested: 0,
            added: 0,
            pages_fetched: 0,
            outcome: AccumulationOutcome::AlreadySatisfied,
        });
    };

    let mut needed = requested;
    needed -= selection.add_missing_up_to(&loaded.records, needed);
    observer.publish(&Progress { page: loaded.index, selection, remaining: needed });

    let mut cursor = cursor;
    let mut next = loaded.index.next_page();
    let mut pages_fetched = 0;
    while needed > 0 {
        let Some(page) = next.filter(|page| cursor.has_page(*page)) else {
            break;
        };
        let fetched = match source.fetch_page(page).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(
                    page = page.get(),
                    error = %err,
                    "page fetch failed; keeping partial selection"
                );
                return Err(SelectError::Fetch {
                    page,
                    added_before_failure: requested - needed,
                    source: Box::new(err),
                });
            }
        };
        pages_fetched += 1;
        cursor = PaginationCursor::from_fetched(&fetched);

        let added = selection.add_missing_up_to(&fetched.page.records, needed);
        needed -= added;
        tracing::debug!(page = page.get(), added, remaining = needed, "consumed fetched page");
        observer.publish(&Progress { page, selection, remaining: needed });

        if fetched.page.is_empty() {
            break;
        }
        next = page.next_page();
    }

    let outcome = if needed == 0 {
        AccumulationOutcome::TargetReached
    } else {
        AccumulationOutcome::Exhausted
    };
    tracing::info!(
        requested_target = target,
        added = requested - needed,
        pages_fetched,
        ?outcome,
        "accumulation finished"
    );
    Ok(AccumulationReport { target, requested, added: requested - needed, pages_fetched, outcome })
}
