//! Boundary between the annotation engine and a live browser.
//!
//! The engine only talks to the page through [`BrowserDriver`]. The production
//! implementation lives in [`crate::chrome`]; tests plug in an in-memory fake.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DriverError;
use crate::types::DropdownOption;

/// A selector that has been (or is about to be) checked against the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    XPath(String),
    Css(String),
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::XPath(x) => write!(f, "xpath={x}"),
            Locator::Css(c) => write!(f, "css={c}"),
        }
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Evaluate an expression in the page and return its JSON value
    /// (`Value::Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> Result<Value, DriverError>;

    /// Number of live nodes the locator currently matches.
    async fn count(&self, locator: &Locator) -> Result<usize, DriverError>;

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), DriverError>;

    /// Replace the element's value with `text`.
    async fn fill(&self, locator: &Locator, text: &str, timeout: Duration)
    -> Result<(), DriverError>;

    async fn select_index(
        &self,
        locator: &Locator,
        index: usize,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// `<option>` children of a `<select>`, in document order.
    async fn options(&self, locator: &Locator) -> Result<Vec<DropdownOption>, DriverError>;

    /// Save a PNG of the page to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), DriverError>;

    async fn outer_html(&self) -> Result<String, DriverError>;

    async fn start_trace(&self) -> Result<(), DriverError>;

    /// Stop the execution trace and write it as a zip archive to `path`.
    async fn stop_trace(&self, path: &Path) -> Result<(), DriverError>;

    /// Release the page and browser. Implementations attempt every release
    /// step even when an earlier one fails.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Acquires a ready page on `url`.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Driver: BrowserDriver;

    async fn launch(&self, url: &str) -> Result<Self::Driver, DriverError>;
}

/// Prefix `https://` when the operator typed a bare host.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Bound a driver future by `duration`.
pub async fn with_timeout<T>(
    operation: &'static str,
    duration: Duration,
    fut: impl std::future::Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| DriverError::Timeout {
            operation,
            duration,
        })?
}

/// [`with_timeout`] for work that keeps running on the blocking pool once the
/// caller stops waiting. `abandoned` is set when the deadline passes, and the
/// work must check it before touching the page.
pub async fn with_deadline<T>(
    operation: &'static str,
    duration: Duration,
    abandoned: &AtomicBool,
    fut: impl std::future::Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    let result = with_timeout(operation, duration, fut).await;
    if matches!(result, Err(DriverError::Timeout { .. })) {
        abandoned.store(true, Ordering::SeqCst);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url(" http://x.org "), "http://x.org");
        assert_eq!(normalize_url("https://x.org/a"), "https://x.org/a");
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let res = with_timeout("click", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, DriverError>(())
        })
        .await;
        assert!(matches!(
            res,
            Err(DriverError::Timeout {
                operation: "click",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn late_blocking_work_skips_its_action() {
        use std::sync::Arc;

        let abandoned = Arc::new(AtomicBool::new(false));
        let acted = Arc::new(AtomicBool::new(false));
        let (flag, done) = (abandoned.clone(), acted.clone());
        let work = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(300));
            if !flag.load(Ordering::SeqCst) {
                done.store(true, Ordering::SeqCst);
            }
        });

        let res = with_deadline("click", Duration::from_millis(10), &abandoned, async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, DriverError>(())
        })
        .await;
        assert!(matches!(res, Err(DriverError::Timeout { .. })));
        assert!(abandoned.load(Ordering::SeqCst));

        work.await.unwrap();
        assert!(!acted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timely_work_is_not_abandoned() {
        let abandoned = AtomicBool::new(false);
        let res = with_deadline("click", Duration::from_secs(1), &abandoned, async {
            Ok::<_, DriverError>(7)
        })
        .await;
        assert_eq!(res.unwrap(), 7);
        assert!(!abandoned.load(Ordering::SeqCst));
    }
}
