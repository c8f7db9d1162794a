//! Task lifecycle: `Idle → BrowserReady → Active → Finishing → BrowserReady`.
//!
//! [`Annotator`] owns every piece of mutable engine state: the driver, the
//! current task, the locked element and the pending secondary elements. The
//! console and the tracking script only reach it through these operations,
//! and the binary feeds them one at a time from a single command loop.

use std::path::PathBuf;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::assembler::{Assembler, Capture};
use crate::config::AnnotatorConfig;
use crate::driver::{BrowserDriver, BrowserLauncher, Locator, normalize_url};
use crate::error::SessionError;
use crate::executor::Executor;
use crate::resolver::resolve;
use crate::tracking::Tracker;
use crate::types::{
    ActionKind, ActionRecord, ElementDescriptor, LockedElement, SessionStatus, StatusView,
    TaskSession,
};

/// What happened to a recorded action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Appended to the log; `executed` is false when the page rejected it.
    Recorded { index: usize, executed: bool },
    Ignored,
    Finished(FinishReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishReport {
    pub task_id: String,
    pub actions: usize,
    pub archive: Option<PathBuf>,
    /// Persistence or tracing problems. The task is finished regardless.
    pub errors: Vec<String>,
}

/// Outcome of starting (or toggling) a task.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started {
        task_id: String,
        /// Set when the execution trace could not be started.
        trace_warning: Option<String>,
    },
    Finished(FinishReport),
}

pub struct Annotator<L: BrowserLauncher> {
    launcher: L,
    driver: Option<L::Driver>,
    url: String,
    status: SessionStatus,
    session: Option<TaskSession>,
    locked: Option<LockedElement>,
    secondary: Vec<ElementDescriptor>,
    tracing_active: bool,
    tracker: Tracker,
    executor: Executor,
    assembler: Assembler,
}

impl<L: BrowserLauncher> Annotator<L> {
    pub fn new(launcher: L, config: AnnotatorConfig) -> Self {
        let tracker = Tracker::new(&config.notify_base);
        Self {
            launcher,
            driver: None,
            url: String::new(),
            status: SessionStatus::Idle,
            session: None,
            locked: None,
            secondary: Vec::new(),
            tracing_active: false,
            executor: Executor::new(config.executor, tracker.clone()),
            tracker,
            assembler: Assembler::new(config.data_dir),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn locked(&self) -> Option<&LockedElement> {
        self.locked.as_ref()
    }

    pub fn secondary(&self) -> &[ElementDescriptor] {
        &self.secondary
    }

    pub fn session(&self) -> Option<&TaskSession> {
        self.session.as_ref()
    }

    pub fn action_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.actions.len())
    }

    pub fn view(&self) -> StatusView {
        let locked = self.locked.as_ref();
        StatusView {
            status: self.status,
            task_id: self.session.as_ref().map(|s| s.task_id.clone()),
            locked_tag: locked.map(|l| l.descriptor.tag_name.clone()),
            locked_text: locked.map(|l| l.descriptor.text_content.chars().take(50).collect()),
            suggested_action: locked.map(|l| l.suggested),
            suggested_value: locked.and_then(|l| match l.suggested {
                ActionKind::Type => l.descriptor.value.clone(),
                _ => None,
            }),
            options: locked.map(|l| l.options.clone()).unwrap_or_default(),
            action_count: self.action_count(),
        }
    }

    fn require(&self, operation: &'static str, allowed: &[SessionStatus]) -> Result<(), SessionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                status: self.status,
            })
        }
    }

    fn driver(&self, operation: &'static str) -> Result<&L::Driver, SessionError> {
        self.driver.as_ref().ok_or(SessionError::InvalidState {
            operation,
            status: self.status,
        })
    }

    /// Acquire a page on `url` and prepare it for tracking.
    pub async fn launch_browser(&mut self, url: &str) -> Result<String, SessionError> {
        self.require("launch browser", &[SessionStatus::Idle])?;
        let url = normalize_url(url);
        info!(%url, "launching browser");

        let driver = self
            .launcher
            .launch(&url)
            .await
            .map_err(|e| SessionError::BrowserAcquisition(e.to_string()))?;

        if let Err(e) = self.tracker.install(&driver).await {
            error!(error = %e, "tracking setup failed, releasing browser");
            if let Err(close_err) = driver.close().await {
                warn!(error = %close_err, "error releasing browser");
            }
            return Err(SessionError::BrowserAcquisition(format!(
                "element tracking setup failed: {e}"
            )));
        }

        self.driver = Some(driver);
        self.url = url.clone();
        self.status = SessionStatus::BrowserReady;
        info!("browser ready");
        Ok(url)
    }

    /// Start a task, or finish the running one (the start control toggles).
    pub async fn start_task(&mut self, description: &str) -> Result<StartOutcome, SessionError> {
        if self.status == SessionStatus::Active {
            info!("start requested while active, finishing current task");
            return self.finish_task().await.map(StartOutcome::Finished);
        }
        self.require("start task", &[SessionStatus::BrowserReady])?;

        let description = description.trim();
        if description.is_empty() {
            return Err(SessionError::EmptyDescription);
        }

        let driver = self.driver("start task")?;
        let session = TaskSession::new(description, self.url.clone());
        let task_id = session.task_id.clone();

        if let Err(e) = self.assembler.prepare(&task_id) {
            warn!(error = %e, "could not create task directory");
        }
        if let Err(e) = self.tracker.resume(driver).await {
            warn!(error = %e, "could not enable annotation mode");
        }
        let trace_started = driver.start_trace().await;
        let trace_warning = match trace_started {
            Ok(()) => {
                self.tracing_active = true;
                None
            }
            Err(e) => {
                warn!(error = %e, "execution trace not started");
                Some(e.to_string())
            }
        };

        info!(%task_id, description, "task started");
        self.session = Some(session);
        self.locked = None;
        self.secondary.clear();
        self.status = SessionStatus::Active;
        Ok(StartOutcome::Started {
            task_id,
            trace_warning,
        })
    }

    /// Pull the operator's newly locked element from the page.
    ///
    /// The previous lock is dropped whatever the outcome, so only the most
    /// recent selection can ever be acted upon. Secondary elements gathered
    /// for a replaced lock go with it.
    pub async fn element_selected(&mut self) -> Result<&LockedElement, SessionError> {
        self.require("select element", &[SessionStatus::Active])?;
        if self.locked.take().is_some() && !self.secondary.is_empty() {
            debug!(count = self.secondary.len(), "lock replaced, dropping secondary elements");
            self.secondary.clear();
        }
        let driver = self.driver("select element")?;

        let descriptor = self
            .tracker
            .selected(driver)
            .await?
            .ok_or_else(|| SessionError::InvalidDescriptor("no element is selected in the page".into()))?;

        let suggested = ActionKind::suggested_for(&descriptor.tag_name).unwrap_or(ActionKind::Click);
        let options = match (&suggested, &descriptor.xpath) {
            (ActionKind::Select, Some(xpath)) => driver
                .options(&Locator::XPath(xpath.clone()))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "could not read dropdown options");
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        info!(element = %descriptor.summary(), xpath = ?descriptor.xpath, %suggested, "element locked");
        Ok(self.locked.insert(LockedElement {
            descriptor,
            suggested,
            options,
        }))
    }

    /// Pull the secondary element list from the page.
    pub async fn secondary_selected(&mut self) -> Result<usize, SessionError> {
        self.require("select secondary elements", &[SessionStatus::Active])?;
        let driver = self.driver("select secondary elements")?;
        let secondary = self
            .tracker
            .secondary(driver)
            .await
            .map_err(|e| SessionError::InvalidDescriptor(e.to_string()))?;
        info!(count = secondary.len(), "secondary elements updated");
        self.secondary = secondary;
        Ok(self.secondary.len())
    }

    /// Confirm an action on the locked element.
    pub async fn record_action(
        &mut self,
        kind: ActionKind,
        value: Option<&str>,
    ) -> Result<ActionOutcome, SessionError> {
        self.require("record action", &[SessionStatus::Active])?;
        match kind {
            ActionKind::Finish => self.finish_task().await.map(ActionOutcome::Finished),
            ActionKind::Ignore => self.ignore().await,
            ActionKind::Click | ActionKind::Type | ActionKind::Select => {
                self.perform(kind, value).await
            }
        }
    }

    async fn ignore(&mut self) -> Result<ActionOutcome, SessionError> {
        let locked = self.locked.take().ok_or(SessionError::NoElementLocked)?;
        self.secondary.clear();
        let driver = self.driver("ignore element")?;
        if let Err(e) = self.tracker.unlock(driver).await {
            warn!(error = %e, "could not unlock element in page");
        }
        info!(element = %locked.descriptor.summary(), "element ignored");
        Ok(ActionOutcome::Ignored)
    }

    async fn perform(
        &mut self,
        kind: ActionKind,
        value: Option<&str>,
    ) -> Result<ActionOutcome, SessionError> {
        let descriptor = self
            .locked
            .as_ref()
            .map(|l| l.descriptor.clone())
            .ok_or(SessionError::NoElementLocked)?;
        let driver = self.driver.as_ref().ok_or(SessionError::InvalidState {
            operation: "record action",
            status: self.status,
        })?;
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "record action",
                status: self.status,
            });
        };

        // stays locked on failure so the operator can ignore or reselect it
        let target = resolve(driver, &descriptor).await?;

        let index = session.actions.len();
        let Capture {
            screenshot,
            snapshot,
        } = self.assembler.capture(driver, &session.task_id, index).await;

        let value = value.map(String::from).filter(|v| !v.is_empty());
        let timestamp = Local::now();
        let executed = self
            .executor
            .execute(driver, kind, &target, value.as_deref())
            .await;

        session.actions.push(ActionRecord {
            kind,
            value,
            element: descriptor,
            secondary_elements: std::mem::take(&mut self.secondary),
            timestamp,
            screenshot,
            snapshot,
            executed,
        });
        self.locked = None;

        if executed {
            info!(index, %kind, "action recorded");
        } else {
            warn!(index, %kind, "action recorded but execution failed");
        }
        Ok(ActionOutcome::Recorded { index, executed })
    }

    /// Close out the active task and package its artifacts.
    ///
    /// Always ends in `BrowserReady` with the log cleared; problems on the
    /// way are collected into the report instead of aborting.
    pub async fn finish_task(&mut self) -> Result<FinishReport, SessionError> {
        self.require("finish task", &[SessionStatus::Active])?;
        self.status = SessionStatus::Finishing;
        info!("finishing task");

        let mut errors = Vec::new();
        let session = self.session.take();
        self.locked = None;
        self.secondary.clear();

        if let Some(driver) = self.driver.as_ref() {
            if let Err(e) = self.tracker.set_annotation_mode(driver, false).await {
                warn!(error = %e, "could not disable annotation mode");
            }
            if let Err(e) = self.tracker.unlock(driver).await {
                warn!(error = %e, "could not unlock element in page");
            }
            if self.tracing_active {
                if let Some(s) = session.as_ref() {
                    if let Err(e) = driver.stop_trace(&self.assembler.trace_path(&s.task_id)).await {
                        error!(error = %e, "execution trace lost");
                        errors.push(format!("trace: {e}"));
                    }
                }
            }
        }
        self.tracing_active = false;

        let Some(session) = session else {
            self.status = SessionStatus::BrowserReady;
            return Err(SessionError::InvalidState {
                operation: "finish task",
                status: SessionStatus::Active,
            });
        };

        let archive = match self.assembler.write_actions(&session) {
            Ok(path) => {
                info!(path = %path.display(), actions = session.actions.len(), "actions saved");
                match self.assembler.package(&session.task_id).await {
                    Ok(archive) => Some(archive),
                    Err(e) => {
                        error!(error = %e, "archive packaging failed");
                        errors.push(format!("archive: {e}"));
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "saving actions failed");
                errors.push(format!("actions: {e}"));
                None
            }
        };

        self.status = SessionStatus::BrowserReady;
        info!(task_id = %session.task_id, "task finished");
        Ok(FinishReport {
            task_id: session.task_id,
            actions: session.actions.len(),
            archive,
            errors,
        })
    }

    /// Finish any active task and release the browser.
    pub async fn stop_browser(&mut self) -> Option<FinishReport> {
        let report = if self.status == SessionStatus::Active {
            self.finish_task().await.ok()
        } else {
            None
        };
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                warn!(error = %e, "browser teardown incomplete");
            }
        }
        self.status = SessionStatus::Idle;
        self.url.clear();
        info!("browser released");
        report
    }
}
