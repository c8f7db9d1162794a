mod common;

use common::{FakeDriver, FakePage, element};
use task_annotator::resolver::resolve;
use task_annotator::{ElementDescriptor, Locator, ResolveError};

fn descriptor(xpath: &str, id: Option<&str>) -> ElementDescriptor {
    ElementDescriptor::from_payload(&element("button", xpath, id)).unwrap()
}

fn id_locator(id: &str) -> Locator {
    Locator::Css(format!("#{id}"))
}

#[tokio::test]
async fn unique_xpath_wins_without_trying_id() {
    let page = FakePage::shared();
    page.lock()
        .unwrap()
        .counts
        .insert(Locator::XPath("/html[1]/body[1]/button[1]".into()), 1);
    let driver = FakeDriver { page: page.clone() };

    let found = resolve(&driver, &descriptor("/html[1]/body[1]/button[1]", Some("buy")))
        .await
        .unwrap();
    assert_eq!(found, Locator::XPath("/html[1]/body[1]/button[1]".into()));
    assert_eq!(
        page.lock().unwrap().calls,
        ["count xpath=/html[1]/body[1]/button[1]"]
    );
}

#[tokio::test]
async fn ambiguous_xpath_falls_back_to_id() {
    let page = FakePage::shared();
    {
        let mut p = page.lock().unwrap();
        p.counts.insert(Locator::XPath("//button".into()), 2);
        p.counts.insert(id_locator("buy"), 1);
    }
    let driver = FakeDriver { page };

    let found = resolve(&driver, &descriptor("//button", Some("buy")))
        .await
        .unwrap();
    assert_eq!(found, id_locator("buy"));
}

#[tokio::test]
async fn stale_xpath_falls_back_to_id() {
    let page = FakePage::shared();
    page.lock().unwrap().counts.insert(id_locator("buy"), 1);
    let driver = FakeDriver { page };

    let found = resolve(&driver, &descriptor("/html[1]/div[9]", Some("buy")))
        .await
        .unwrap();
    assert_eq!(found, id_locator("buy"));
}

#[tokio::test]
async fn broken_xpath_falls_back_to_id() {
    let page = FakePage::shared();
    {
        let mut p = page.lock().unwrap();
        p.broken_locators.insert(Locator::XPath("/html[1]/[".into()));
        p.counts.insert(id_locator("buy"), 1);
    }
    let driver = FakeDriver { page };

    let found = resolve(&driver, &descriptor("/html[1]/[", Some("buy")))
        .await
        .unwrap();
    assert_eq!(found, id_locator("buy"));
}

#[tokio::test]
async fn nothing_unique_is_not_found() {
    let page = FakePage::shared();
    {
        let mut p = page.lock().unwrap();
        p.counts.insert(Locator::XPath("//li".into()), 4);
        p.counts.insert(id_locator("dup"), 2);
    }
    let driver = FakeDriver { page };

    let err = resolve(&driver, &descriptor("//li", Some("dup")))
        .await
        .unwrap_err();
    let ResolveError::ElementNotFound { descriptor } = err;
    assert_eq!(descriptor.xpath.as_deref(), Some("//li"));
}
