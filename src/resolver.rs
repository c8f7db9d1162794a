//! Map a loosely described element back to exactly one live node.
//!
//! Strategies are tried in order; the first one whose locator matches exactly
//! one node wins. A locator that matches nothing (stale) or several nodes
//! (ambiguous) is skipped rather than acted upon.

use tracing::{debug, warn};

use crate::driver::{BrowserDriver, Locator};
use crate::error::ResolveError;
use crate::types::ElementDescriptor;

type Strategy = fn(&ElementDescriptor) -> Option<Locator>;

const STRATEGIES: &[(&str, Strategy)] = &[("xpath", by_xpath), ("id", by_id)];

fn by_xpath(d: &ElementDescriptor) -> Option<Locator> {
    d.xpath.clone().map(Locator::XPath)
}

fn by_id(d: &ElementDescriptor) -> Option<Locator> {
    d.id.as_deref().map(|id| Locator::Css(format!("#{}", css_escape(id))))
}

pub async fn resolve<D>(driver: &D, descriptor: &ElementDescriptor) -> Result<Locator, ResolveError>
where
    D: BrowserDriver + ?Sized,
{
    for (name, strategy) in STRATEGIES {
        let Some(locator) = strategy(descriptor) else {
            continue;
        };
        match driver.count(&locator).await {
            Ok(1) => {
                debug!(strategy = *name, %locator, "element resolved");
                return Ok(locator);
            }
            Ok(n) => warn!(strategy = *name, %locator, matches = n, "expected exactly one match"),
            Err(e) => warn!(strategy = *name, %locator, error = %e, "locator query failed"),
        }
    }

    warn!(element = %descriptor.summary(), "no strategy located the element");
    Err(ResolveError::ElementNotFound {
        descriptor: Box::new(descriptor.clone()),
    })
}

/// Escape an identifier for use in a CSS `#id` selector.
pub fn css_escape(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, c) in ident.chars().enumerate() {
        match c {
            'a'..='z' | 'A'..='Z' | '_' | '-' => out.push(c),
            c if !c.is_ascii() => out.push(c),
            '0'..='9' if i > 0 => out.push(c),
            // leading digits need the code point form
            '0'..='9' => out.push_str(&format!("\\{:x} ", c as u32)),
            _ => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_awkward_ids() {
        assert_eq!(css_escape("search-box"), "search-box");
        assert_eq!(css_escape("a.b:c"), "a\\.b\\:c");
        assert_eq!(css_escape("1st"), "\\31 st");
    }

    #[test]
    fn strategies_skip_missing_fields() {
        let d = ElementDescriptor {
            tag_name: "DIV".into(),
            xpath: None,
            id: Some("main".into()),
            text_content: String::new(),
            value: None,
            attributes: Default::default(),
        };
        assert_eq!(by_xpath(&d), None);
        assert_eq!(by_id(&d), Some(Locator::Css("#main".into())));
    }
}
