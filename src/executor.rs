//! Drive a resolved element on behalf of the operator.

use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::driver::{BrowserDriver, Locator};
use crate::error::DriverError;
use crate::matcher::best_match;
use crate::tracking::Tracker;
use crate::types::ActionKind;

pub struct Executor {
    config: ExecutorConfig,
    tracker: Tracker,
}

impl Executor {
    pub fn new(config: ExecutorConfig, tracker: Tracker) -> Self {
        Self { config, tracker }
    }

    /// Perform `kind` on `target`. Failures are logged and reported as `false`.
    ///
    /// Tracking is paused around the interaction so the overlay does not take
    /// the automated click for a new operator selection.
    pub async fn execute<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
        kind: ActionKind,
        target: &Locator,
        value: Option<&str>,
    ) -> bool {
        if !kind.touches_page() {
            return true;
        }

        self.suspend_tracking(driver).await;
        tokio::time::sleep(self.config.settle_delay).await;

        let result = self.perform(driver, kind, target, value.unwrap_or_default()).await;

        if let Err(e) = self.tracker.resume(driver).await {
            warn!(error = %e, "could not re-enable annotation mode");
        }

        match result {
            Ok(()) => {
                info!(%kind, %target, "action executed");
                true
            }
            Err(e) => {
                error!(%kind, %target, error = %e, "action failed");
                false
            }
        }
    }

    async fn suspend_tracking<D: BrowserDriver + ?Sized>(&self, driver: &D) {
        if let Err(e) = self.tracker.unlock(driver).await {
            warn!(error = %e, "could not unlock element in page");
        }
        if let Err(e) = self.tracker.set_annotation_mode(driver, false).await {
            warn!(error = %e, "could not disable annotation mode");
        }
    }

    async fn perform<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
        kind: ActionKind,
        target: &Locator,
        value: &str,
    ) -> Result<(), DriverError> {
        match kind {
            ActionKind::Click => driver.click(target, self.config.click_timeout).await,
            ActionKind::Type => driver.fill(target, value, self.config.type_timeout).await,
            ActionKind::Select => {
                let options = driver.options(target).await?;
                let index = best_match(&options, value).ok_or_else(|| {
                    DriverError::Script(format!("{target} has no options to select"))
                })?;
                info!(index, option = %options[index].text, wanted = value, "option matched");
                driver
                    .select_index(target, index, self.config.select_timeout)
                    .await
            }
            ActionKind::Ignore | ActionKind::Finish => Ok(()),
        }
    }
}
