//! Frame navigator tests
//!
//! Focus stack discipline, target resolution and tree export against the
//! mock page.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use crate::capability::{FrameEventKind, FrameHandle, MockFrame, MockPage, PageHandle, PageRef};
use crate::events::{EventCategory, EventDispatcher, LifecycleEvent};
use crate::frames::{FrameNavigator, ROOT_IDENTIFIER};
use crate::Error;

/// Shop page with a named payment frame holding an unnamed 3-D Secure frame
struct Shop {
    page: Arc<MockPage>,
    payment: Arc<MockFrame>,
    secure: Arc<MockFrame>,
}

fn shop() -> Shop {
    let page = Arc::new(MockPage::new("https://shop.test/cart"));
    let main = page.main();
    let payment = page.attach_frame(&main, Some("payment"), "https://pay.test/checkout/form.html");
    let secure = page.attach_frame(&payment, None, "https://bank.test/3ds/challenge");
    page.attach_frame(&main, None, "about:blank");

    Shop { page, payment, secure }
}

fn navigator(page: &Arc<MockPage>) -> FrameNavigator {
    FrameNavigator::new(page.clone() as PageRef)
}

#[test]
fn test_generated_identifiers() {
    let page = Arc::new(MockPage::new("https://shop.test/"));
    let outer = page.attach_frame(&page.main(), None, "about:blank");
    page.attach_frame(&outer, None, "about:blank");

    let nav = navigator(&page);
    let tree = nav.get_frame_tree();

    assert_eq!(tree.identifier, ROOT_IDENTIFIER);
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].identifier, "frame[0]");
    assert_eq!(tree.children[0].children[0].identifier, "frame[0]");

    let frames = nav.get_all_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].path, "frame[0]/frame[0]");
    assert_eq!(frames[1].depth, 2);
}

#[test]
fn test_identifier_precedence_and_duplicates() {
    let page = Arc::new(MockPage::new("https://news.test/"));
    let main = page.main();
    page.attach_frame(&main, Some("ad"), "https://ads.test/a");
    page.attach_frame(&main, Some("ad"), "https://ads.test/b");
    page.attach_frame(&main, None, "https://video.test/embed/player.html?autoplay=1");

    let tree = navigator(&page).get_frame_tree();
    let identifiers: Vec<&str> = tree.children.iter().map(|c| c.identifier.as_str()).collect();

    assert_eq!(identifiers, vec!["frame[0]", "frame[1]", "player.html"]);
}

#[test]
fn test_frame_tree_serializes() {
    let shop = shop();
    let tree = navigator(&shop.page).get_frame_tree();

    let json = serde_json::to_value(&tree).unwrap();
    assert_eq!(json["identifier"], "main");
    assert_eq!(json["children"][0]["identifier"], "payment");
    assert_eq!(json["children"][0]["children"][0]["identifier"], "challenge");
    assert_eq!(json["children"][1]["is_detached"], false);
}

#[test]
fn test_switch_to_parent_at_root_fails() {
    let shop = shop();
    let nav = navigator(&shop.page);

    let err = nav.switch_to_parent().unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
    assert!(nav.is_at_root());
}

#[tokio::test]
async fn test_switch_round_trip() {
    let shop = shop();
    let nav = navigator(&shop.page);
    let before = nav.state();

    let payment = assert_ok!(nav.switch_to("payment").await);
    assert_eq!(payment.id(), shop.payment.id());
    assert_eq!(nav.depth(), 1);

    // Generated identifiers resolve relative to the current focus
    let secure = assert_ok!(nav.switch_to("challenge").await);
    assert_eq!(secure.id(), shop.secure.id());
    assert_eq!(nav.stack_identifiers(), vec!["main", "payment", "challenge"]);

    assert_ok!(nav.switch_to_parent());
    assert_eq!(nav.current_frame().unwrap().id(), shop.payment.id());
    assert_ok!(nav.switch_to_parent());
    assert!(nav.state().same_as(&before));

    nav.switch_to("payment").await.unwrap();
    nav.switch_to("challenge").await.unwrap();
    assert_ok!(nav.switch_to_root());
    assert_eq!(nav.depth(), 0);
    assert_eq!(nav.current_frame().unwrap().id(), shop.page.main().id());
}

#[tokio::test]
async fn test_switch_by_url() {
    let shop = shop();
    let nav = navigator(&shop.page);

    let exact = nav
        .switch_to("https://bank.test/3ds/challenge")
        .await
        .unwrap();
    assert_eq!(exact.id(), shop.secure.id());
    nav.switch_to_root().unwrap();

    let partial = nav.switch_to("pay.test").await.unwrap();
    assert_eq!(partial.id(), shop.payment.id());
}

#[tokio::test]
async fn test_unknown_target_is_not_found() {
    let shop = shop();
    let nav = navigator(&shop.page);

    let err = assert_err!(nav.switch_to("nope").await);
    assert!(matches!(err, Error::NotFound(_)));
    let err = assert_err!(nav.switch_to("").await);
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(nav.depth(), 0);
}

#[tokio::test]
async fn test_detached_target() {
    let shop = shop();
    let nav = navigator(&shop.page);
    let handle = shop.payment.clone() as Arc<dyn FrameHandle>;

    shop.page.detach_frame(&shop.payment);

    let err = assert_err!(nav.switch_to(&handle).await);
    assert!(matches!(err, Error::DetachedResource(_)));
    assert!(err.is_not_found());

    let err = assert_err!(nav.switch_to("payment").await);
    assert!(matches!(err, Error::NotFound(_)));
    assert!(nav.is_at_root());
}

#[tokio::test]
async fn test_focused_frame_detaches() {
    let shop = shop();
    let nav = navigator(&shop.page);

    nav.switch_to("payment").await.unwrap();
    shop.page.detach_frame(&shop.payment);

    let err = nav.current_frame().unwrap_err();
    assert!(matches!(err, Error::DetachedResource(_)));

    // Popping back out of a dead frame still works
    assert_ok!(nav.switch_to_parent());
    assert_ok!(nav.current_frame());
}

#[tokio::test]
async fn test_execute_in_scope_restores_on_error() {
    let shop = shop();
    let nav = navigator(&shop.page);
    nav.switch_to("payment").await.unwrap();
    let before = nav.state();

    let result: crate::Result<()> = nav
        .execute_in_scope("challenge", |frame| async move {
            assert!(frame.url().contains("3ds"));
            Err(Error::internal("form submission failed"))
        })
        .await;

    assert!(matches!(result, Err(Error::Internal(_))));
    assert!(nav.state().same_as(&before));
}

#[tokio::test]
async fn test_execute_in_scope_returns_value() {
    let shop = shop();
    let nav = navigator(&shop.page);

    let url = nav
        .execute_in_scope("payment", |frame| async move { Ok(frame.url()) })
        .await
        .unwrap();

    assert_eq!(url, "https://pay.test/checkout/form.html");
    assert!(nav.is_at_root());

    // Failed resolution leaves the state untouched as well
    assert_err!(nav.execute_in_scope("missing", |_| async { Ok(()) }).await);
    assert!(nav.is_at_root());
}

#[tokio::test]
async fn test_execute_in_scope_unresolved_target_keeps_state() {
    let shop = shop();
    let nav = navigator(&shop.page);
    nav.switch_to("payment").await.unwrap();
    nav.switch_to("challenge").await.unwrap();
    let before = nav.state();
    let ran = AtomicUsize::new(0);

    let err = assert_err!(
        nav.execute_in_scope("missing", |_| async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    );

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(nav.state().same_as(&before));
    assert_eq!(nav.stack_identifiers(), vec!["main", "payment", "challenge"]);
    assert_eq!(nav.current_frame().unwrap().id(), shop.secure.id());
}

#[tokio::test]
async fn test_selector_resolution_is_cached() {
    let page = Arc::new(MockPage::new("https://shop.test/"));
    let main = page.main();
    let checkout = page.attach_frame_with_selector(&main, "#checkout iframe", None, "about:blank");
    let nav = navigator(&page);

    let frame = nav.switch_to("#checkout iframe").await.unwrap();
    assert_eq!(frame.id(), checkout.id());
    nav.switch_to_root().unwrap();

    page.forget_selector(&main, "#checkout iframe");
    let frame = nav.switch_to("#checkout iframe").await.unwrap();
    assert_eq!(frame.id(), checkout.id());
    nav.switch_to_root().unwrap();

    page.detach_frame(&checkout);
    let err = assert_err!(nav.switch_to("#checkout iframe").await);
    assert!(matches!(err, Error::DetachedResource(_)));

    let err = assert_err!(nav.switch_to("#checkout iframe").await);
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_find_helpers() {
    let shop = shop();
    let captcha = shop
        .page
        .attach_frame_with_selector(&shop.secure, "iframe.captcha", Some("captcha"), "https://captcha.test/");
    let nav = navigator(&shop.page);

    assert_eq!(nav.find_frame_by_name("payment").unwrap().id(), shop.payment.id());
    assert!(nav.find_frame_by_name("nope").is_none());
    assert_eq!(
        nav.find_frame_by_url("https://bank.test/3ds/challenge").unwrap().id(),
        shop.secure.id()
    );
    assert_eq!(nav.find_frame_by_url("captcha").unwrap().id(), captcha.id());
    assert!(nav.find_frame_by_url("").is_none());

    let found = nav.find_frames_by_selector("iframe.captcha").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), captcha.id());
    assert!(nav.find_frames_by_selector("iframe.none").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_monitor_changes() {
    let page = Arc::new(MockPage::new("https://shop.test/"));
    let nav = navigator(&page);
    let attached = Arc::new(AtomicUsize::new(0));
    let detached = Arc::new(AtomicUsize::new(0));

    let monitor = {
        let attached = attached.clone();
        let detached = detached.clone();
        nav.monitor_changes(move |event| match event.kind {
            FrameEventKind::Attached => {
                attached.fetch_add(1, Ordering::SeqCst);
            }
            FrameEventKind::Detached => {
                detached.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    assert_eq!(page.listener_count(), 2);
    assert!(monitor.is_active());

    let frame = page.attach_frame(&page.main(), None, "about:blank");
    page.detach_frame(&frame);
    assert_eq!(attached.load(Ordering::SeqCst), 1);
    assert_eq!(detached.load(Ordering::SeqCst), 1);

    assert_eq!(monitor.dispose(), 2);
    assert_eq!(monitor.dispose(), 0);
    assert_eq!(page.listener_count(), 0);

    page.attach_frame(&page.main(), None, "about:blank");
    assert_eq!(attached.load(Ordering::SeqCst), 1);
}

#[test]
fn test_monitor_dropped() {
    let page = Arc::new(MockPage::new("https://shop.test/"));
    let nav = navigator(&page);

    {
        let _monitor = nav.monitor_changes(|_| {});
        assert_eq!(page.listener_count(), 2);
    }
    assert_eq!(page.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_frame() {
    let page = Arc::new(MockPage::new("https://shop.test/"));
    let nav = navigator(&page);

    let late = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        late.attach_frame(&late.main(), Some("late"), "https://late.test/");
    });

    let frame = nav
        .wait_for_frame("late", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(frame.name().as_deref(), Some("late"));
    // Waiting does not move the focus
    assert!(nav.is_at_root());

    let err = assert_err!(nav.wait_for_frame("never", Duration::from_millis(300)).await);
    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn test_switch_events() {
    let shop = shop();
    let events = Arc::new(EventDispatcher::new(16));
    let mut rx = events.subscribe_filtered(vec![EventCategory::Frame]);
    let nav = FrameNavigator::with_events(shop.page.clone() as PageRef, events);

    nav.switch_to("payment").await.unwrap();
    nav.switch_to_parent().unwrap();

    match rx.try_recv() {
        Some(LifecycleEvent::Frame(e)) => {
            assert_eq!(e.page_id, shop.page.id());
            assert_eq!(e.from, None);
            assert_eq!(e.to.as_deref(), Some("https://pay.test/checkout/form.html"));
            assert_eq!(e.depth, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
    match rx.try_recv() {
        Some(LifecycleEvent::Frame(e)) => {
            assert_eq!(e.to, None);
            assert_eq!(e.depth, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
