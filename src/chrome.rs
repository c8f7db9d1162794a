//! `headless_chrome` implementation of the driver boundary.
//!
//! `headless_chrome` is blocking, so every call hops onto the blocking pool
//! with a clone of the tab handle. Interactions are bounded with
//! [`with_timeout`] and, while a trace is running, logged into a
//! [`TraceRecorder`] together with a frame of the page.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::ChromeConfig;
use crate::driver::{BrowserDriver, BrowserLauncher, Locator, with_deadline, with_timeout};
use crate::error::DriverError;
use crate::trace::TraceRecorder;
use crate::types::DropdownOption;

const FILL_JS: &str = r#"function (text) {
  this.focus();
  this.value = text;
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const SELECT_INDEX_JS: &str = r#"function (index) {
  if (index < 0 || index >= this.options.length) throw new Error('option index out of range');
  this.selectedIndex = index;
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const OPTIONS_JS: &str = r#"function () {
  return JSON.stringify([...this.querySelectorAll('option')].map((o) => ({
    value: o.getAttribute('value') || '',
    text: (o.textContent || '').trim(),
  })));
}"#;

const OPTIONS_TIMEOUT: Duration = Duration::from_secs(5);

const PAGE_SIZE_JS: &str =
    "({ width: document.documentElement.scrollWidth, height: document.documentElement.scrollHeight })";

pub struct ChromeDriver {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    trace: Mutex<Option<TraceRecorder>>,
}

impl ChromeDriver {
    fn new(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            browser: Mutex::new(Some(browser)),
            tab,
            trace: Mutex::new(None),
        }
    }

    /// Run a blocking tab call and log it into the trace, if one is running.
    async fn blocking<T, F>(
        &self,
        call: &'static str,
        target: Option<String>,
        f: F,
    ) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        let result = tokio::task::spawn_blocking(move || f(&*tab))
            .await
            .map_err(|e| DriverError::Browser(format!("{call} aborted: {e}")))
            .and_then(|r| r.map_err(DriverError::from));

        debug!(call, ?target, ok = result.is_ok(), "driver call");
        if let Some(trace) = self.trace.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            let error = result.as_ref().err().map(ToString::to_string);
            trace.record(call, target, error);
        }
        result
    }

    /// Attach a frame of the page to the latest trace event.
    async fn trace_frame(&self) {
        if self.trace.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            return;
        }
        let tab = self.tab.clone();
        let png = tokio::task::spawn_blocking(move || {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await;
        match png {
            Ok(Ok(png)) => {
                if let Some(trace) = self.trace.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
                    trace.attach_frame(png);
                }
            }
            Ok(Err(e)) => debug!(error = %e, "trace frame skipped"),
            Err(e) => debug!(error = %e, "trace frame skipped"),
        }
    }

    async fn interact(
        &self,
        call: &'static str,
        locator: &Locator,
        timeout: Duration,
        f: impl FnOnce(&Element<'_>) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), DriverError> {
        let target = locator.clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let flag = abandoned.clone();
        let result = with_deadline(
            call,
            timeout,
            &abandoned,
            self.blocking(call, Some(locator.to_string()), move |tab| {
                let element = find(tab, &target, timeout)?;
                // tracking may already be back on; a late action would read as a selection
                if flag.load(Ordering::SeqCst) {
                    bail!("{call} on {target} abandoned after {timeout:?}");
                }
                f(&element)
            }),
        )
        .await;
        self.trace_frame().await;
        result
    }
}

/// Wait up to `timeout` for `locator`. The tab-wide default timeout is left alone.
fn find<'a>(tab: &'a Tab, locator: &Locator, timeout: Duration) -> anyhow::Result<Element<'a>> {
    match locator {
        Locator::XPath(xpath) => tab.wait_for_xpath_with_custom_timeout(xpath, timeout),
        Locator::Css(selector) => tab.wait_for_element_with_custom_timeout(selector, timeout),
    }
}

/// Evaluate `script` and hand back its JSON value.
fn evaluate_json(tab: &Tab, script: &str) -> anyhow::Result<Value> {
    let wrapped = format!(
        "(() => {{ const __v = ({script}); return __v === undefined ? 'null' : JSON.stringify(__v); }})()"
    );
    let result = tab.evaluate(&wrapped, false)?;
    let text = result
        .value
        .as_ref()
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("script did not produce a value: {:?}", result.description))?;
    Ok(serde_json::from_str(text)?)
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.blocking("navigate", Some(url.clone()), move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let script = script.to_string();
        // evaluation is chatty; keep it out of the trace
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || evaluate_json(&tab, &script))
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?
            .map_err(|e| DriverError::Script(format!("{e:#}")))
    }

    async fn count(&self, locator: &Locator) -> Result<usize, DriverError> {
        let script = match locator {
            Locator::XPath(xpath) => format!(
                "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
                json!(xpath)
            ),
            Locator::Css(selector) => {
                format!("document.querySelectorAll({}).length", json!(selector))
            }
        };
        let value = self.evaluate(&script).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| DriverError::Script(format!("unexpected count {value}")))
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<(), DriverError> {
        self.interact("click", locator, timeout, |element| {
            element.click()?;
            Ok(())
        })
        .await
    }

    async fn fill(
        &self,
        locator: &Locator,
        text: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let text = text.to_string();
        self.interact("fill", locator, timeout, move |element| {
            element.call_js_fn(FILL_JS, vec![json!(text)], false)?;
            Ok(())
        })
        .await
    }

    async fn select_index(
        &self,
        locator: &Locator,
        index: usize,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.interact("select", locator, timeout, move |element| {
            element.call_js_fn(SELECT_INDEX_JS, vec![json!(index)], false)?;
            Ok(())
        })
        .await
    }

    async fn options(&self, locator: &Locator) -> Result<Vec<DropdownOption>, DriverError> {
        let target = locator.clone();
        let lookup = self.blocking("options", Some(locator.to_string()), move |tab| {
            let element = find(tab, &target, OPTIONS_TIMEOUT)?;
            let result = element.call_js_fn(OPTIONS_JS, vec![], false)?;
            let text = result
                .value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("options script returned nothing"))?;
            Ok(serde_json::from_str(text)?)
        });
        with_timeout("options", OPTIONS_TIMEOUT, lookup).await
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        let size = self.evaluate(PAGE_SIZE_JS).await.ok();
        let clip = size.and_then(|s| {
            Some(Viewport {
                x: 0.0,
                y: 0.0,
                width: s["width"].as_f64()?,
                height: s["height"].as_f64()?,
                scale: 1.0,
            })
        });
        let png = self
            .blocking("screenshot", None, move |tab| {
                tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
            })
            .await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, png).await?;
        Ok(())
    }

    async fn outer_html(&self) -> Result<String, DriverError> {
        self.blocking("snapshot", None, |tab| tab.get_content()).await
    }

    async fn start_trace(&self) -> Result<(), DriverError> {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if trace.is_some() {
            return Err(DriverError::Browser("a trace is already running".into()));
        }
        *trace = Some(TraceRecorder::default());
        Ok(())
    }

    async fn stop_trace(&self, path: &Path) -> Result<(), DriverError> {
        let trace = self
            .trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DriverError::Browser("no trace is running".into()))?;
        let path = path.to_path_buf();
        let events = trace.len();
        tokio::task::spawn_blocking(move || trace.write_zip(&path))
            .await
            .map_err(|e| DriverError::Browser(e.to_string()))?
            .map_err(|e| DriverError::Browser(e.to_string()))?;
        debug!(events, "trace written");
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut failures = Vec::new();

        // an unfinished trace dies with the session
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).take();

        let tab = self.tab.clone();
        match tokio::task::spawn_blocking(move || tab.close(true)).await {
            Ok(Ok(_)) => debug!("page closed"),
            Ok(Err(e)) => {
                warn!(error = %e, "error closing page");
                failures.push(format!("page: {e}"));
            }
            Err(e) => {
                warn!(error = %e, "error closing page");
                failures.push(format!("page: {e}"));
            }
        }

        // dropping the browser terminates the process it launched
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match browser {
            Some(browser) => {
                if let Err(e) = tokio::task::spawn_blocking(move || drop(browser)).await {
                    warn!(error = %e, "error stopping browser");
                    failures.push(format!("browser: {e}"));
                }
            }
            None => return Err(DriverError::Closed),
        }

        info!("browser stopped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DriverError::Browser(failures.join("; ")))
        }
    }
}

/// Starts a dedicated Chrome and opens the operator's page.
pub struct ChromeLauncher {
    config: ChromeConfig,
}

impl ChromeLauncher {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    type Driver = ChromeDriver;

    async fn launch(&self, url: &str) -> Result<ChromeDriver, DriverError> {
        let config = self.config.clone();
        let url = url.to_string();
        let (browser, tab) = tokio::task::spawn_blocking(move || launch_blocking(&config, &url))
            .await
            .map_err(|e| DriverError::Browser(format!("browser launch aborted: {e}")))??;
        Ok(ChromeDriver::new(browser, tab))
    }
}

fn launch_blocking(config: &ChromeConfig, url: &str) -> Result<(Browser, Arc<Tab>), DriverError> {
    std::fs::create_dir_all(&config.user_data_dir)?;

    let options = LaunchOptions {
        headless: config.headless,
        path: config.path.clone().or_else(find_chrome),
        user_data_dir: Some(config.user_data_dir.clone()),
        window_size: Some(config.window_size),
        args: vec![
            std::ffi::OsStr::new("--no-first-run"),
            std::ffi::OsStr::new("--no-default-browser-check"),
            std::ffi::OsStr::new("--disable-infobars"),
            std::ffi::OsStr::new("--password-store=basic"),
        ],
        // the operator may leave the page untouched for a long time
        idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
        ..Default::default()
    };

    info!(profile = %config.user_data_dir.display(), headless = config.headless, "starting Chrome");
    let browser = Browser::new(options)?;

    // on error the browser is dropped here, which shuts the process down
    let tab = browser.new_tab()?;
    tab.navigate_to(url)?.wait_until_navigated()?;
    info!(url, "page ready");
    Ok((browser, tab))
}

/// Well-known install locations; `None` lets `headless_chrome` search `PATH`.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}
