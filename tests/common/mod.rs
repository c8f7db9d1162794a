#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use task_annotator::trace::TraceRecorder;
use task_annotator::{
    AnnotatorConfig, BrowserDriver, BrowserLauncher, DriverError, DropdownOption, ExecutorConfig,
    Locator,
};

/// Scripted page state shared between a test and the driver it hands out.
#[derive(Debug, Default)]
pub struct FakePage {
    pub counts: HashMap<Locator, usize>,
    pub broken_locators: HashSet<Locator>,
    pub selected: Value,
    pub secondary: Value,
    pub options: Vec<DropdownOption>,
    pub fail_launch: bool,
    pub fail_install: bool,
    pub fail_interactions: bool,
    pub fail_trace_start: bool,
    pub annotation_mode: bool,
    pub tracing: bool,
    pub closed: bool,
    /// Ordered log of page-visible calls.
    pub calls: Vec<String>,
    pub filled: Option<String>,
    pub selected_index: Option<usize>,
}

impl FakePage {
    pub fn shared() -> Arc<Mutex<FakePage>> {
        Arc::new(Mutex::new(FakePage::default()))
    }
}

pub struct FakeDriver {
    pub page: Arc<Mutex<FakePage>>,
}

impl FakeDriver {
    fn page(&self) -> std::sync::MutexGuard<'_, FakePage> {
        self.page.lock().unwrap()
    }

    fn interact(&self, call: String) -> Result<(), DriverError> {
        let mut page = self.page();
        page.calls.push(call);
        if page.fail_interactions {
            return Err(DriverError::Timeout {
                operation: "interaction",
                duration: Duration::from_secs(5),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page().calls.push(format!("navigate {url}"));
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, DriverError> {
        let mut page = self.page();
        if script.contains("__annotatorInstalled") {
            page.calls.push("install".into());
            if page.fail_install {
                return Err(DriverError::Script("CSP blocked the script".into()));
            }
            return Ok(json!(true));
        }
        if let Some(rest) = script.strip_prefix("window.setAnnotationMode(") {
            let on = rest.starts_with("true");
            page.annotation_mode = on;
            page.calls.push(format!("annotation {on}"));
            return Ok(Value::Null);
        }
        match script {
            "window.unlockElement()" => {
                page.calls.push("unlock".into());
                page.selected = Value::Null;
                page.secondary = json!([]);
                Ok(Value::Null)
            }
            "window._selectedElement" => Ok(page.selected.clone()),
            "window._secondaryElements" => Ok(page.secondary.clone()),
            _ => Ok(Value::Null),
        }
    }

    async fn count(&self, locator: &Locator) -> Result<usize, DriverError> {
        let mut page = self.page();
        page.calls.push(format!("count {locator}"));
        if page.broken_locators.contains(locator) {
            return Err(DriverError::Script("SyntaxError: not a valid XPath".into()));
        }
        Ok(page.counts.get(locator).copied().unwrap_or(0))
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> Result<(), DriverError> {
        self.interact(format!("click {locator}"))
    }

    async fn fill(
        &self,
        locator: &Locator,
        text: &str,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.interact(format!("fill {locator}"))?;
        self.page().filled = Some(text.to_string());
        Ok(())
    }

    async fn select_index(
        &self,
        locator: &Locator,
        index: usize,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.interact(format!("select {locator}"))?;
        self.page().selected_index = Some(index);
        Ok(())
    }

    async fn options(&self, _locator: &Locator) -> Result<Vec<DropdownOption>, DriverError> {
        Ok(self.page().options.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), DriverError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }

    async fn outer_html(&self) -> Result<String, DriverError> {
        Ok("<html><body></body></html>".into())
    }

    async fn start_trace(&self) -> Result<(), DriverError> {
        let mut page = self.page();
        if page.fail_trace_start {
            return Err(DriverError::Browser("tracing domain unavailable".into()));
        }
        page.tracing = true;
        Ok(())
    }

    async fn stop_trace(&self, path: &Path) -> Result<(), DriverError> {
        self.page().tracing = false;
        let mut trace = TraceRecorder::default();
        trace.record("click", None, None);
        trace
            .write_zip(path)
            .map_err(|e| DriverError::Browser(e.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut page = self.page();
        page.calls.push("close".into());
        page.closed = true;
        Ok(())
    }
}

pub struct FakeLauncher {
    pub page: Arc<Mutex<FakePage>>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    type Driver = FakeDriver;

    async fn launch(&self, url: &str) -> Result<FakeDriver, DriverError> {
        if self.page.lock().unwrap().fail_launch {
            return Err(DriverError::Browser("chrome not found".into()));
        }
        let driver = FakeDriver {
            page: self.page.clone(),
        };
        driver.navigate(url).await?;
        Ok(driver)
    }
}

pub fn config(data_dir: &Path) -> AnnotatorConfig {
    AnnotatorConfig {
        data_dir: data_dir.to_path_buf(),
        notify_base: "http://127.0.0.1:3000".into(),
        executor: ExecutorConfig {
            settle_delay: Duration::ZERO,
            ..Default::default()
        },
    }
}

/// Payload shaped like the tracking script's element report.
pub fn element(tag: &str, xpath: &str, id: Option<&str>) -> Value {
    json!({
        "tagName": tag,
        "xpath": xpath,
        "id": id,
        "textContent": format!("{tag} text"),
        "value": "",
        "attributes": {}
    })
}
