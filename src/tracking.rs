//! In-page element tracking: the injected script and the engine's handle on it.

use serde_json::Value;
use tracing::{debug, warn};

use crate::driver::BrowserDriver;
use crate::error::{DriverError, SessionError};
use crate::types::ElementDescriptor;

/// JavaScript injected into the page to let the operator pick elements.
/// Idempotent: a second injection on the same document is a no-op.
///
/// The script:
///   1. Outlines the hovered element while annotation mode is on.
///   2. On click, swallows the event, locks the element and publishes its
///      descriptor as `window._selectedElement`. Replacing an earlier lock
///      also drops its secondary elements.
///   3. On shift-click, appends a descriptor to `window._secondaryElements`.
///   4. Pings the operator console so the engine pulls the new state.
///   5. Exposes `setAnnotationMode(bool)` and `unlockElement()`.
const TRACKING_JS: &str = r#"
(() => {
  if (window.__annotatorInstalled) return true;
  window.__annotatorInstalled = true;
  const NOTIFY = '__NOTIFY_BASE__';
  let enabled = false;
  let locked = null;
  let hovered = null;
  window._selectedElement = null;
  window._secondaryElements = [];

  const style = document.createElement('style');
  style.textContent =
    '.__ann-hover{outline:2px dashed #3b82f6 !important}' +
    '.__ann-locked{outline:3px solid #ef4444 !important}' +
    '.__ann-secondary{outline:2px solid #f59e0b !important}';
  document.documentElement.appendChild(style);

  function xpathOf(el) {
    const parts = [];
    for (; el && el.nodeType === 1; el = el.parentNode) {
      let i = 1;
      for (let s = el.previousElementSibling; s; s = s.previousElementSibling) {
        if (s.tagName === el.tagName) i++;
      }
      parts.unshift(el.tagName.toLowerCase() + '[' + i + ']');
    }
    return '/' + parts.join('/');
  }

  function describe(el) {
    const attributes = {};
    for (const a of el.attributes) {
      if (a.name !== 'class' || !a.value.includes('__ann-')) attributes[a.name] = a.value;
    }
    return {
      tagName: el.tagName,
      xpath: xpathOf(el),
      id: el.id || null,
      textContent: (el.textContent || '').trim().slice(0, 200),
      value: 'value' in el ? String(el.value) : null,
      attributes,
    };
  }

  function notify(kind) {
    fetch(NOTIFY + '/api/notify-' + kind + '-selected', { mode: 'no-cors' }).catch(() => {});
  }

  function clearHover() {
    if (hovered) hovered.classList.remove('__ann-hover');
    hovered = null;
  }

  document.addEventListener('mouseover', (e) => {
    if (!enabled || locked) return;
    clearHover();
    hovered = e.target;
    hovered.classList.add('__ann-hover');
  }, true);

  document.addEventListener('click', (e) => {
    if (!enabled) return;
    e.preventDefault();
    e.stopPropagation();
    const el = e.target;
    clearHover();
    if (e.shiftKey) {
      window._secondaryElements.push(describe(el));
      el.classList.add('__ann-secondary');
      notify('secondary');
      return;
    }
    if (locked) {
      // secondaries belong to the lock being replaced
      locked.classList.remove('__ann-locked');
      document.querySelectorAll('.__ann-secondary').forEach((n) => n.classList.remove('__ann-secondary'));
      window._secondaryElements = [];
    }
    window._selectedElement = describe(el);
    locked = el;
    el.classList.add('__ann-locked');
    notify('primary');
  }, true);

  window.setAnnotationMode = (on) => {
    enabled = !!on;
    if (!enabled) clearHover();
  };

  window.unlockElement = () => {
    if (locked) locked.classList.remove('__ann-locked');
    locked = null;
    window._selectedElement = null;
    document.querySelectorAll('.__ann-secondary').forEach((n) => n.classList.remove('__ann-secondary'));
    window._secondaryElements = [];
  };

  return true;
})()
"#;

/// Handle on the in-page tracking script.
#[derive(Debug, Clone)]
pub struct Tracker {
    script: String,
}

impl Tracker {
    /// `notify_base` is the console origin the script pings, e.g. `http://127.0.0.1:3000`.
    pub fn new(notify_base: &str) -> Self {
        Self {
            script: TRACKING_JS.replace("__NOTIFY_BASE__", notify_base.trim_end_matches('/')),
        }
    }

    pub async fn install<D: BrowserDriver + ?Sized>(&self, driver: &D) -> Result<(), DriverError> {
        driver.evaluate(&self.script).await?;
        debug!("tracking script installed");
        Ok(())
    }

    pub async fn set_annotation_mode<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
        enabled: bool,
    ) -> Result<(), DriverError> {
        driver
            .evaluate(&format!("window.setAnnotationMode({enabled})"))
            .await?;
        debug!(enabled, "annotation mode set");
        Ok(())
    }

    /// Reinstall (the page may have navigated) and switch annotation mode on.
    pub async fn resume<D: BrowserDriver + ?Sized>(&self, driver: &D) -> Result<(), DriverError> {
        self.install(driver).await?;
        self.set_annotation_mode(driver, true).await
    }

    pub async fn unlock<D: BrowserDriver + ?Sized>(&self, driver: &D) -> Result<(), DriverError> {
        driver.evaluate("window.unlockElement()").await?;
        Ok(())
    }

    /// The element the operator locked, if any.
    pub async fn selected<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<Option<ElementDescriptor>, SessionError> {
        let payload = driver
            .evaluate("window._selectedElement")
            .await
            .map_err(|e| SessionError::InvalidDescriptor(e.to_string()))?;
        if payload.is_null() {
            return Ok(None);
        }
        ElementDescriptor::from_payload(&payload).map(Some)
    }

    /// Secondary elements; malformed entries are dropped.
    pub async fn secondary<D: BrowserDriver + ?Sized>(
        &self,
        driver: &D,
    ) -> Result<Vec<ElementDescriptor>, DriverError> {
        let payload = driver.evaluate("window._secondaryElements").await?;
        let Value::Array(items) = payload else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| match ElementDescriptor::from_payload(item) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(error = %e, "dropping malformed secondary element");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_base_is_substituted() {
        let t = Tracker::new("http://127.0.0.1:3000/");
        assert!(t.script.contains("const NOTIFY = 'http://127.0.0.1:3000';"));
        assert!(!t.script.contains("__NOTIFY_BASE__"));
    }
}
