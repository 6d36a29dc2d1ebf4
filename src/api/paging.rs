//! Shared pagination loop for page-number and cursor based registers.
//!
//! A [`PageSource`] knows how to fetch one page given the continuation it
//! handed out last time. [`Pages`] drives it: it applies the politeness
//! delay, retries transient failures and caps the number of pages. The
//! sequence is lazy, finite and cannot be restarted.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RetrievalError;

/// One page of records and the continuation for the next one, if any.
#[derive(Debug)]
pub struct Page<R, C> {
    pub records: Vec<R>,
    pub next: Option<C>,
}

pub trait PageSource {
    type Record;
    type Cursor;

    /// Fetch the page identified by `cursor`, or the first page when `None`.
    fn fetch_page(
        &mut self,
        cursor: Option<&Self::Cursor>,
    ) -> Result<Page<Self::Record, Self::Cursor>, RetrievalError>;
}

#[derive(Debug, Clone)]
pub struct PagingPolicy {
    /// Pause before every request after the first one
    pub delay: Duration,
    /// Retries per page for transient failures
    pub max_retries: u32,
    /// Multiplied by the attempt number
    pub backoff: Duration,
    pub max_pages: usize,
}

impl PagingPolicy {
    /// No delay and no retries: the first failure ends the sequence.
    pub fn fail_fast(max_pages: usize) -> Self {
        Self {
            delay: Duration::ZERO,
            max_retries: 0,
            backoff: Duration::ZERO,
            max_pages,
        }
    }
}

/// Lazy iterator over the pages of a [`PageSource`].
///
/// Yields `Ok(records)` per page. After the last page, or after the first
/// error it yields, it returns `None` forever.
pub struct Pages<'a, S: PageSource> {
    source: &'a mut S,
    policy: PagingPolicy,
    cursor: Option<S::Cursor>,
    fetched: usize,
    exhausted: bool,
}

impl<'a, S: PageSource> Pages<'a, S> {
    pub fn new(source: &'a mut S, policy: PagingPolicy) -> Self {
        Self {
            source,
            policy,
            cursor: None,
            fetched: 0,
            exhausted: false,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }

    fn fetch_with_retry(&mut self) -> Result<Page<S::Record, S::Cursor>, RetrievalError> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_page(self.cursor.as_ref()) {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let wait = self.policy.backoff * attempt;
                    warn!(
                        "Page {} failed ({}), retrying in {:?} (attempt {}/{})",
                        self.fetched + 1,
                        err,
                        wait,
                        attempt + 1,
                        self.policy.max_retries + 1
                    );
                    thread::sleep(wait);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: PageSource> Iterator for Pages<'_, S> {
    type Item = Result<Vec<S::Record>, RetrievalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if self.fetched >= self.policy.max_pages {
            self.exhausted = true;
            return Some(Err(RetrievalError::PageLimit(self.fetched)));
        }
        if self.fetched > 0 && !self.policy.delay.is_zero() {
            thread::sleep(self.policy.delay);
        }

        match self.fetch_with_retry() {
            Ok(page) => {
                self.fetched += 1;
                self.exhausted = page.next.is_none();
                self.cursor = page.next;
                debug!(page = self.fetched, records = page.records.len(), "Fetched page");
                Some(Ok(page.records))
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

/// Everything a page loop accumulated, plus the error that cut it short.
#[derive(Debug)]
pub struct Harvest<R> {
    pub records: Vec<R>,
    pub pages: usize,
    pub interrupted: Option<RetrievalError>,
}

impl<R> Harvest<R> {
    /// Drain `pages`, concatenating records in page-arrival order.
    pub fn collect<S>(mut pages: Pages<'_, S>) -> Self
    where
        S: PageSource<Record = R>,
    {
        let mut records = Vec::new();
        let mut interrupted = None;
        for page in pages.by_ref() {
            match page {
                Ok(batch) => records.extend(batch),
                Err(err) => interrupted = Some(err),
            }
        }
        Self {
            records,
            pages: pages.pages_fetched(),
            interrupted,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Replays canned page results and remembers the cursors it was asked for.
    struct Scripted {
        replies: VecDeque<Result<Page<u32, u32>, RetrievalError>>,
        seen: Vec<Option<u32>>,
        called_at: Vec<Instant>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Page<u32, u32>, RetrievalError>>) -> Self {
            Self {
                replies: replies.into(),
                seen: Vec::new(),
                called_at: Vec::new(),
            }
        }
    }

    impl PageSource for Scripted {
        type Record = u32;
        type Cursor = u32;

        fn fetch_page(&mut self, cursor: Option<&u32>) -> Result<Page<u32, u32>, RetrievalError> {
            self.seen.push(cursor.copied());
            self.called_at.push(Instant::now());
            self.replies
                .pop_front()
                .unwrap_or(Err(RetrievalError::Malformed("script exhausted".into())))
        }
    }

    fn page(records: Vec<u32>, next: Option<u32>) -> Result<Page<u32, u32>, RetrievalError> {
        Ok(Page { records, next })
    }

    fn server_error() -> RetrievalError {
        RetrievalError::Status {
            status: 503,
            url: "https://example.invalid".into(),
        }
    }

    #[test]
    fn test_follows_continuations_in_order() {
        let mut source = Scripted::new(vec![
            page(vec![1, 2], Some(10)),
            page(vec![3], Some(20)),
            page(vec![4, 5], None),
        ]);
        let harvest = Harvest::collect(Pages::new(&mut source, PagingPolicy::fail_fast(100)));

        assert_eq!(harvest.records, vec![1, 2, 3, 4, 5]);
        assert_eq!(harvest.pages, 3);
        assert!(harvest.is_complete());
        assert_eq!(source.seen, vec![None, Some(10), Some(20)]);
    }

    #[test]
    fn test_error_keeps_partial_records() {
        let mut source = Scripted::new(vec![page(vec![1], Some(2)), Err(server_error())]);
        let harvest = Harvest::collect(Pages::new(&mut source, PagingPolicy::fail_fast(100)));

        assert_eq!(harvest.records, vec![1]);
        assert_eq!(harvest.pages, 1);
        assert_eq!(harvest.interrupted, Some(server_error()));
    }

    #[test]
    fn test_transient_error_is_retried() {
        let mut source = Scripted::new(vec![
            page(vec![1], Some(2)),
            Err(server_error()),
            page(vec![2], None),
        ]);
        let policy = PagingPolicy {
            max_retries: 2,
            ..PagingPolicy::fail_fast(100)
        };
        let harvest = Harvest::collect(Pages::new(&mut source, policy));

        assert_eq!(harvest.records, vec![1, 2]);
        assert!(harvest.is_complete());
        assert_eq!(source.seen, vec![None, Some(2), Some(2)]);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut source = Scripted::new(vec![
            Err(RetrievalError::Malformed("bad json".into())),
            page(vec![1], None),
        ]);
        let policy = PagingPolicy {
            max_retries: 3,
            ..PagingPolicy::fail_fast(100)
        };
        let harvest = Harvest::collect(Pages::new(&mut source, policy));

        assert!(harvest.is_empty());
        assert_eq!(source.seen.len(), 1);
    }

    #[test]
    fn test_page_limit_stops_endless_source() {
        let replies = (0..10).map(|i| page(vec![i], Some(i + 1))).collect();
        let mut source = Scripted::new(replies);
        let harvest = Harvest::collect(Pages::new(&mut source, PagingPolicy::fail_fast(3)));

        assert_eq!(harvest.records, vec![0, 1, 2]);
        assert_eq!(harvest.interrupted, Some(RetrievalError::PageLimit(3)));
        assert_eq!(source.seen.len(), 3);
    }

    #[test]
    fn test_iterator_is_fused_after_last_page() {
        let mut source = Scripted::new(vec![page(vec![7], None)]);
        let mut pages = Pages::new(&mut source, PagingPolicy::fail_fast(100));

        assert!(pages.has_more());
        assert_eq!(pages.next(), Some(Ok(vec![7])));
        assert!(!pages.has_more());
        assert_eq!(pages.next(), None);
        assert_eq!(pages.next(), None);
    }

    #[test]
    fn test_delay_only_between_pages() {
        let delay = Duration::from_millis(30);
        let mut source = Scripted::new(vec![
            page(vec![1], Some(2)),
            page(vec![2], Some(3)),
            page(vec![3], None),
        ]);
        let policy = PagingPolicy {
            delay,
            ..PagingPolicy::fail_fast(100)
        };
        let start = Instant::now();
        let harvest = Harvest::collect(Pages::new(&mut source, policy));

        assert_eq!(harvest.records, vec![1, 2, 3]);
        assert_eq!(source.called_at.len(), 3);
        assert!(source.called_at[0] - start < delay, "first page was delayed");
        for pair in source.called_at.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
        assert!(start.elapsed() >= delay * 2);
    }
}
