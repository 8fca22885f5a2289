//! Page-number pagination that stops on the first short page.
//!
//! GitHub's `Link` header is not consulted. A page holding fewer than
//! `PER_PAGE` items is the only end-of-listing signal.

use crate::error::UpstreamError;
use crate::github::PER_PAGE;
use std::future::Future;

/// Requests pages 1, 2, ... and concatenates them.
pub async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, UpstreamError>>,
{
    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let batch = fetch_page(page).await?;
        let full = batch.len() >= PER_PAGE;
        items.extend(batch);
        if !full {
            return Ok(items);
        }
        page += 1;
    }
}

/// Like `collect_pages`, but only keeps the running item count.
pub async fn count_pages<T, F, Fut>(mut fetch_page: F) -> Result<u64, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, UpstreamError>>,
{
    let mut total = 0u64;
    let mut page = 1;

    loop {
        let len = fetch_page(page).await?.len();
        total += len as u64;
        if len < PER_PAGE {
            return Ok(total);
        }
        page += 1;
    }
}
