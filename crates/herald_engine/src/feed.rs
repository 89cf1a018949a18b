//! Creation-ordered pages of ungrouped embeddings with one page of read-ahead.
//!
//! Pages are requested with a resume cursor rather than an offset: writes
//! against the current page shrink the ungrouped view, and only rows after
//! the cursor are read ahead, so the prefetched page is never affected.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use herald_core::{
    ClusterError, ClusterResult, Embedding, EmbeddingCursor, EmbeddingSource, Page, Timestamp,
    UngroupedQuery,
};

use crate::retry::{Attempted, RetryPolicy, with_shrinking_retry};

pub struct UngroupedFeed {
    source: Arc<dyn EmbeddingSource>,
    cutoff: Timestamp,
    limit: u32,
    call_timeout: Duration,
    retry: RetryPolicy,
    after: Option<EmbeddingCursor>,
    exhausted: bool,
    pending: Option<JoinHandle<Attempted<Page<Embedding>>>>,
    retries: u32,
}

impl UngroupedFeed {
    pub fn new(
        source: Arc<dyn EmbeddingSource>,
        cutoff: Timestamp,
        limit: u32,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            cutoff,
            limit,
            call_timeout,
            retry,
            after: None,
            exhausted: false,
            pending: None,
            retries: 0,
        }
    }

    /// True once the source reported no further pages.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current request size; shrinks after timeouts and stays shrunk for the run.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Timeout retries spent so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Next page, `Ok(None)` once the window is drained.
    pub async fn next_page(&mut self) -> ClusterResult<Option<Vec<Embedding>>> {
        if self.exhausted {
            return Ok(None);
        }
        let attempted = match self.pending.take() {
            Some(handle) => handle
                .await
                .map_err(|err| ClusterError::storage(format!("prefetch task failed: {err}")))?,
            None => self.fetch().await,
        };
        self.limit = attempted.limit;
        self.retries += attempted.retries;
        let page = attempted.result?;
        if let Some(last) = page.items.last() {
            self.after = Some(last.cursor());
        }
        self.exhausted = !page.has_more || page.items.is_empty();
        if page.items.is_empty() {
            return Ok(None);
        }
        Ok(Some(page.items))
    }

    /// Start fetching the page after the current cursor on a background task.
    pub fn prefetch(&mut self) {
        if self.exhausted || self.pending.is_some() {
            return;
        }
        let source = self.source.clone();
        let query = UngroupedQuery::resume(self.cutoff, self.limit, self.after);
        let call_timeout = self.call_timeout;
        let retry = self.retry;
        self.pending = Some(tokio::spawn(async move {
            fetch_page(source, query, call_timeout, retry).await
        }));
    }

    async fn fetch(&self) -> Attempted<Page<Embedding>> {
        let query = UngroupedQuery::resume(self.cutoff, self.limit, self.after);
        fetch_page(self.source.clone(), query, self.call_timeout, self.retry).await
    }
}

impl Drop for UngroupedFeed {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

async fn fetch_page(
    source: Arc<dyn EmbeddingSource>,
    query: UngroupedQuery,
    call_timeout: Duration,
    retry: RetryPolicy,
) -> Attempted<Page<Embedding>> {
    with_shrinking_retry(
        retry,
        call_timeout,
        "fetch_ungrouped_batch",
        query.limit,
        |limit| {
            let source = source.clone();
            async move { source.fetch_ungrouped_batch(query.with_limit(limit)).await }
        },
    )
    .await
}
