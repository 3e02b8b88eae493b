//! Lifecycle action history
//!
//! The platform appends one [`HistoryEntry`] per completed action (PRECHECK,
//! UPGRADE, ...). History is read page by page through
//! [`CloudApiClient::list_history`], oldest entry first.

use crate::action::LifecycleAction;
use crate::client::CloudApiClient;
use crate::closed_enum;
use crate::error::{ReconcileError, Result};
use crate::retry::{BackoffPolicy, retry_transient};
use chrono::{DateTime, Utc};
use futures_util::Stream;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

closed_enum! {
    /// Outcome recorded in a history entry
    pub enum HistoryState {
        Succeeded => "SUCCEEDED",
        Failed => "FAILED",
        InProgress => "IN_PROGRESS",
    }
}

/// Immutable record of one completed lifecycle action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,

    pub action: LifecycleAction,

    pub state: HistoryState,

    /// Upgrade source (DB_VERSION, DB_SOFTWARE_IMAGE, DB_HOME)
    pub source: Option<String>,

    /// Target version, when the action names one
    pub target_version: Option<String>,

    /// Free-form options passed to the action
    pub options: Option<String>,

    /// Additional information about the current state
    pub lifecycle_details: Option<String>,

    pub time_started: DateTime<Utc>,

    pub time_ended: Option<DateTime<Utc>>,
}

/// One page of history entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryEntry>,
    /// Token for the following page; `None` on the last page
    pub next_page: Option<String>,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily walk the full history of a resource, oldest first.
///
/// Pages are fetched only when the consumer reaches them, each fetch under
/// `policy`. The stream ends after the last page; calling this again starts
/// a fresh traversal.
pub fn history_stream<'a, C>(
    client: &'a C,
    policy: BackoffPolicy,
    kind: &'a str,
    resource_id: &'a str,
) -> impl Stream<Item = Result<HistoryEntry>> + Send + 'a
where
    C: CloudApiClient + ?Sized,
{
    stream::try_unfold(
        (VecDeque::new(), Cursor::Start),
        move |(mut buffered, mut cursor)| async move {
            loop {
                if let Some(entry) = buffered.pop_front() {
                    return Ok::<_, ReconcileError>(Some((entry, (buffered, cursor))));
                }

                let page = match &cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => None,
                    Cursor::Next(token) => Some(token.clone()),
                };

                let fetched = retry_transient(&policy, "list_history", || {
                    client.list_history(kind, resource_id, page.as_deref())
                })
                .await?;

                tracing::debug!(
                    kind = %kind,
                    resource_id = %resource_id,
                    entries = fetched.items.len(),
                    has_more = fetched.next_page.is_some(),
                    "Fetched history page"
                );

                cursor = match fetched.next_page {
                    Some(next) if page.as_deref() == Some(next.as_str()) => {
                        tracing::warn!(
                            kind = %kind,
                            resource_id = %resource_id,
                            "History page token did not advance, stopping"
                        );
                        Cursor::Done
                    }
                    Some(next) => Cursor::Next(next),
                    None => Cursor::Done,
                };
                buffered.extend(fetched.items);
            }
        },
    )
}
