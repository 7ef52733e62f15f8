//! Cache key

use std::any::{type_name, TypeId};
use std::fmt;

use crate::capability::PageHandle;

/// Identity of a cached page object
///
/// (page-object type, resource locator, optional disambiguator).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    type_id: TypeId,
    type_name: &'static str,
    locator: String,
    disambiguator: Option<String>,
}

impl CacheKey {
    /// Key for page object `T` at `locator`
    pub fn of<T: 'static>(locator: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            locator: locator.into(),
            disambiguator: None,
        }
    }

    /// Key for page object `T` at the page's current URL
    pub fn for_page<T: 'static>(page: &dyn PageHandle) -> Self {
        Self::of::<T>(page.url())
    }

    /// Distinguish several instances of the same type at the same locator
    pub fn with_disambiguator(mut self, disambiguator: impl Into<String>) -> Self {
        self.disambiguator = Some(disambiguator.into());
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Unqualified type name, e.g. `LoginPage`
    pub fn type_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn disambiguator(&self) -> Option<&str> {
        self.disambiguator.as_deref()
    }

    /// Check if this key describes page object `T`
    pub fn is_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name(), self.locator)?;
        if let Some(d) = &self.disambiguator {
            write!(f, "#{}", d)?;
        }
        Ok(())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    // Generic parameters may contain paths of their own
    let base = full.split('<').next().unwrap_or(full);
    let start = base.rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}
