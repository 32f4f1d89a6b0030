use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppResult;
use crate::store::{Cursor, Field, Filter, Query, Store};

pub const PAGE_SIZE: i64 = 20;

/// One page of decoded records. `has_more` is what a list screen needs to
/// decide whether to keep scrolling.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    fn empty(has_more: bool) -> Self {
        Page {
            records: Vec::new(),
            has_more,
        }
    }
}

/// Cursor-based page fetcher over one collection.
///
/// Equality filters are a closed `(Field, Value)` set; `search` adds a
/// half-open prefix range on the designated text field. The cursor is the
/// `(sort key, id)` pair of the last raw record of the previous page, so a
/// record that fails to decode still advances the cursor and can never wedge
/// pagination.
///
/// One pager instance serves one screen. The fetch methods take `&mut self`,
/// so the exclusive borrow is what serializes fetches on an instance;
/// `in_flight` restates that rule in the cursor state so an overlapping
/// `fetch_more` stays a droppable no-op if the pager is ever driven through
/// a handle that replays scroll events.
pub struct Pager<T> {
    store: Store,
    collection: String,
    order_by: Field,
    search_field: Field,
    filters: Vec<(Field, Value)>,
    prefix: Option<String>,
    cursor: Option<Cursor>,
    exhausted: bool,
    in_flight: bool,
    page_size: i64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Pager<T> {
    pub fn new(
        store: Store,
        collection: impl Into<String>,
        order_by: Field,
        search_field: Field,
    ) -> Self {
        Pager {
            store,
            collection: collection.into(),
            order_by,
            search_field,
            filters: Vec::new(),
            prefix: None,
            cursor: None,
            exhausted: false,
            in_flight: false,
            page_size: PAGE_SIZE,
            _marker: PhantomData,
        }
    }

    /// Override the page size. Screens use the default; tests shrink it.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// First page for a filter set. Always resets cursor state.
    pub async fn fetch_initial(&mut self, filters: Vec<(Field, Value)>) -> AppResult<Page<T>> {
        self.filters = filters;
        self.prefix = None;
        self.reset_cursor();
        self.fetch_page().await
    }

    /// Next page. No-op when exhausted or when a fetch is already in
    /// flight. Passing a different filter set than the active one without an
    /// intervening `fetch_initial` is a programming error; the cursor is
    /// reset defensively and the call behaves like a fresh initial fetch.
    pub async fn fetch_more(&mut self, filters: Vec<(Field, Value)>) -> AppResult<Page<T>> {
        if filters != self.filters {
            tracing::warn!(
                target = "rathdown",
                event = "pager_filters_changed",
                collection = %self.collection,
                "fetch_more called with changed filters; resetting cursor"
            );
            self.filters = filters;
            self.prefix = None;
            self.reset_cursor();
        } else if self.exhausted {
            return Ok(Page::empty(false));
        } else if self.in_flight {
            return Ok(Page::empty(true));
        }
        self.fetch_page().await
    }

    /// Prefix search on the designated text field: matches every record
    /// whose field value lies in `[prefix, prefix + sentinel)`. Resets the
    /// cursor; `fetch_more` with the same filters pages through the results.
    pub async fn search(
        &mut self,
        filters: Vec<(Field, Value)>,
        prefix: &str,
    ) -> AppResult<Page<T>> {
        self.filters = filters;
        self.prefix = Some(prefix.to_string());
        self.reset_cursor();
        self.fetch_page().await
    }

    fn reset_cursor(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    async fn fetch_page(&mut self) -> AppResult<Page<T>> {
        let mut query = Query::new(self.collection.clone(), self.order_by);
        query.filters = self
            .filters
            .iter()
            .map(|(field, value)| Filter::Equals(*field, value.clone()))
            .collect();
        if let Some(prefix) = &self.prefix {
            query
                .filters
                .push(Filter::Prefix(self.search_field, prefix.clone()));
        }
        query.start_after = self.cursor.clone();
        query.limit = Some(self.page_size);

        self.in_flight = true;
        let result = self.store.query(&query).await;
        self.in_flight = false;
        let docs = result?;

        self.exhausted = (docs.len() as i64) < self.page_size;
        if let Some(last) = docs.last() {
            self.cursor = Some(Cursor {
                key: last.field(self.order_by),
                id: last.id.clone(),
            });
        }

        let mut records = Vec::with_capacity(docs.len());
        for doc in &docs {
            match doc.decode::<T>() {
                Ok(record) => records.push(record),
                Err(err) => {
                    // Best effort: a malformed document never fails the page.
                    tracing::warn!(
                        target = "rathdown",
                        event = "pager_record_dropped",
                        collection = %self.collection,
                        id = %doc.id,
                        error = %err
                    );
                }
            }
        }

        Ok(Page {
            records,
            has_more: !self.exhausted,
        })
    }
}
