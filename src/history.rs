//! Backward pagination through message history.
//!
//! The service returns pages newest-first. Each page's last (oldest) message
//! id becomes the exclusive `before_id` cursor of the next request, so the
//! walk is contiguous and never sees a message twice.

use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, Transport};
use crate::models::Message;

/// Largest page the service hands out.
pub const PAGE_SIZE: usize = 100;
/// Upper bound on messages a single read may request.
pub const MAX_MESSAGE_LIMIT: usize = 500;
/// Pages of direct messages scanned by a text search.
pub const MAX_SEARCH_PAGES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySource {
    Group(String),
    Direct(String),
    /// Direct messages across every chat.
    AllDirect,
}

/// Lazy, finite, non-restartable walk over older and older pages.
pub struct MessagePager<'a, T> {
    client: &'a ApiClient<T>,
    source: HistorySource,
    remaining: Option<usize>,
    before_id: Option<String>,
    exhausted: bool,
}

impl<'a, T: Transport> MessagePager<'a, T> {
    pub fn new(client: &'a ApiClient<T>, source: HistorySource, limit: usize) -> Self {
        let limit = if limit > MAX_MESSAGE_LIMIT {
            warn!(requested = limit, max = MAX_MESSAGE_LIMIT, "message limit clamped");
            MAX_MESSAGE_LIMIT
        } else {
            limit
        };
        Self::build(client, source, Some(limit))
    }

    /// Walks the entire history, one full page at a time.
    pub fn unbounded(client: &'a ApiClient<T>, source: HistorySource) -> Self {
        Self::build(client, source, None)
    }

    fn build(client: &'a ApiClient<T>, source: HistorySource, remaining: Option<usize>) -> Self {
        Self {
            client,
            source,
            remaining,
            before_id: None,
            exhausted: false,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.before_id.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next older page, newest first. `Ok(None)` once the limit
    /// is met or the service has nothing older.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Message>>, ApiError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let batch = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(None);
            }
            Some(remaining) => remaining.min(PAGE_SIZE),
            None => PAGE_SIZE,
        };

        debug!(source = ?self.source, batch, before_id = ?self.before_id, "fetching history page");
        let mut page = match self
            .client
            .message_page(&self.source, batch, self.cursor())
            .await
        {
            Ok(page) => page,
            Err(err) => {
                self.exhausted = true;
                return Err(err);
            }
        };

        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        page.truncate(batch);

        // A short page is the end of history, even if deletions raced the walk.
        if page.len() < batch {
            self.exhausted = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= page.len();
            if *remaining == 0 {
                self.exhausted = true;
            }
        }
        self.before_id = page.last().map(|message| message.id.clone());
        debug!(received = page.len(), next_before_id = ?self.cursor(), "history page received");
        Ok(Some(page))
    }

    /// Drains the pager and returns the messages oldest first.
    pub async fn collect_chronological(mut self) -> Result<Vec<Message>, ApiError> {
        let mut collected = Vec::new();
        while let Some(page) = self.next_page().await? {
            collected.extend(page);
        }
        collected.reverse();
        Ok(collected)
    }
}

impl<T: Transport> ApiClient<T> {
    /// Latest `limit` messages of a group, oldest first.
    pub async fn fetch_messages(&self, group_id: &str, limit: usize) -> Result<Vec<Message>, ApiError> {
        MessagePager::new(self, HistorySource::Group(group_id.to_string()), limit)
            .collect_chronological()
            .await
    }

    /// Latest `limit` direct messages exchanged with `user_id`, oldest first.
    pub async fn fetch_direct_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, ApiError> {
        MessagePager::new(self, HistorySource::Direct(user_id.to_string()), limit)
            .collect_chronological()
            .await
    }

    /// Direct messages whose text contains `query`, ignoring case, oldest
    /// first. The service has no direct-message search, so this scans at most
    /// `MAX_SEARCH_PAGES` recent pages.
    pub async fn search_direct_messages(&self, query: &str, user_id: Option<&str>) -> Result<Vec<Message>, ApiError> {
        let source = match user_id {
            Some(user_id) => HistorySource::Direct(user_id.to_string()),
            None => HistorySource::AllDirect,
        };
        let needle = query.to_lowercase();
        let mut pager = MessagePager::unbounded(self, source);
        let mut found = Vec::new();
        for _ in 0..MAX_SEARCH_PAGES {
            let Some(page) = pager.next_page().await? else {
                break;
            };
            found.extend(page.into_iter().filter(|message| {
                message
                    .text
                    .as_deref()
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            }));
        }
        if !pager.is_exhausted() {
            debug!(pages = MAX_SEARCH_PAGES, "direct message search stopped at page cap");
        }
        found.reverse();
        Ok(found)
    }

    /// Every message in a group, oldest first.
    pub async fn export_messages(&self, group_id: &str) -> Result<Vec<Message>, ApiError> {
        MessagePager::unbounded(self, HistorySource::Group(group_id.to_string()))
            .collect_chronological()
            .await
    }
}
