//! # Page-object cache
//!
//! Memoizes construction of page objects per (type, locator, disambiguator)
//! key with single-flight semantics: however many callers ask for a key while
//! its construction is in flight, the constructor runs once and every caller
//! receives the same `Arc` (or the same error).
//!
//! ## Main features
//! - **Single-flight**: concurrent `acquire` calls share one construction
//! - **Bounded**: strict LRU eviction at `max_size`, optional TTL
//! - **Background sweep**: periodic removal of expired entries
//! - **Lifecycle hooks**: `initialize` before sharing, `cleanup` on removal
//!   (cleanup failures are logged, never returned)
//!
//! ## Module structure
//! - `traits`: `PageObject` trait, acquire options, policy and stats
//! - `key`: `CacheKey`
//! - `manager`: `PageObjectCache`
//! - `lazy`: `LazyElements`, name-keyed element slots built on first access
//!
//! ## Usage example
//! ```rust,no_run
//! use chaser_pom::cache::{AcquireOptions, CacheKey, PageObject, PageObjectCache};
//! use chaser_pom::capability::PageRef;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct LoginPage {
//!     page: Option<PageRef>,
//! }
//!
//! #[async_trait::async_trait]
//! impl PageObject for LoginPage {
//!     async fn initialize(&mut self, page: PageRef) -> chaser_pom::Result<()> {
//!         self.page = Some(page);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example(page: PageRef) -> chaser_pom::Result<()> {
//! let cache = PageObjectCache::new();
//! let key = CacheKey::for_page::<LoginPage>(page.as_ref());
//! let login = cache
//!     .acquire(key, || async { Ok(LoginPage::default()) }, AcquireOptions::with_page(page))
//!     .await?;
//! # let _ = login;
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod key;
pub mod lazy;
pub mod manager;


pub use key::CacheKey;
pub use lazy::LazyElements;
pub use manager::PageObjectCache;
pub use traits::{AcquireOptions, CachePolicy, CacheStats, PageObject, ReadinessHook};
