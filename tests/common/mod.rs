//! Common test utilities
//!
//! This module provides shared fixtures for all integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chaser_pom::cache::LazyElements;
use chaser_pom::capability::{MockFrame, MockPage, PageRef};
use chaser_pom::config::Config;
use chaser_pom::PageObject;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Checkout page with a payment frame and a nested 3-D Secure frame
pub struct CheckoutFixture {
    pub page: Arc<MockPage>,
    pub payment: Arc<MockFrame>,
    pub secure: Arc<MockFrame>,
}

impl CheckoutFixture {
    pub fn page_ref(&self) -> PageRef {
        self.page.clone()
    }
}

/// Setup a mock checkout page
pub fn setup_checkout_page() -> CheckoutFixture {
    let page = Arc::new(MockPage::new("https://shop.test/checkout"));
    let main = page.main();
    let payment = page.attach_frame_with_selector(
        &main,
        "#payment iframe",
        Some("payment"),
        "https://pay.test/form.html",
    );
    let secure = page.attach_frame(&payment, None, "https://bank.test/3ds/challenge");

    CheckoutFixture {
        page,
        payment,
        secure,
    }
}

/// Configuration with a short TTL and a small cache
pub fn test_config() -> Config {
    Config {
        cache_ttl_ms: 100,
        cache_max_size: 4,
        cache_sweep_interval_ms: Some(50),
        history_capacity: 16,
        ..Config::default()
    }
}

/// Page object that counts its initializations and cleanups
#[derive(Default)]
pub struct CheckoutPage {
    pub url: Option<String>,
    pub elements: LazyElements<String>,
    pub cleanups: Option<Arc<AtomicUsize>>,
}

impl CheckoutPage {
    pub fn tracked(cleanups: Arc<AtomicUsize>) -> Self {
        Self {
            cleanups: Some(cleanups),
            ..Default::default()
        }
    }

    pub fn pay_button(&self) -> Arc<String> {
        self.elements
            .get_or_init("pay_button", || "button#pay".to_string())
    }
}

#[async_trait]
impl PageObject for CheckoutPage {
    async fn initialize(&mut self, page: PageRef) -> chaser_pom::Result<()> {
        self.url = Some(page.url());
        Ok(())
    }

    async fn cleanup(&self) -> chaser_pom::Result<()> {
        if let Some(cleanups) = &self.cleanups {
            cleanups.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
