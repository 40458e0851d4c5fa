//! Cache key specs
//!
//! A [`CacheKeySpec`] names one cached collection: a namespaced prefix, a pure
//! function turning `(prefix, args)` into a concrete key, and the TTL entries
//! of that collection live for. The specs used by the lending projections are
//! defined here once, as process-wide constants.

use crate::cache::types::CacheKey;
use std::fmt;
use std::time::Duration;

/// Key construction function: `(prefix, args) -> key`
pub type KeyFn = fn(&str, &[String]) -> CacheKey;

/// Default TTL of the lending projections (10 minutes)
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Named key template for one cached collection
#[derive(Clone, Copy)]
pub struct CacheKeySpec {
    /// Namespaced prefix, unique per spec
    pub key_prefix: &'static str,

    /// Key construction function
    pub key_fn: KeyFn,

    /// Time-to-live of entries under this spec
    pub ttl: Duration,
}

impl CacheKeySpec {
    /// Spec whose keys are `prefix:arg1:arg2...`
    pub const fn per_id(key_prefix: &'static str, ttl: Duration) -> Self {
        Self {
            key_prefix,
            key_fn: prefixed_key,
            ttl,
        }
    }

    /// Spec whose single key is the prefix itself
    pub const fn singleton(key_prefix: &'static str, ttl: Duration) -> Self {
        Self {
            key_prefix,
            key_fn: bare_key,
            ttl,
        }
    }

    /// The same keys, living for `ttl`
    pub const fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Build the key for raw arguments
    pub fn key(&self, args: &[String]) -> CacheKey {
        (self.key_fn)(self.key_prefix, args)
    }

    /// Build the key for an entity id followed by extra arguments
    pub fn key_for<I: fmt::Display>(&self, id: &I, extra: &[String]) -> CacheKey {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(id.to_string());
        args.extend_from_slice(extra);
        self.key(&args)
    }
}

impl fmt::Debug for CacheKeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKeySpec")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl PartialEq for CacheKeySpec {
    fn eq(&self, other: &Self) -> bool {
        self.key_prefix == other.key_prefix
    }
}

impl Eq for CacheKeySpec {}

/// `prefix:arg1:arg2`
pub fn prefixed_key(prefix: &str, args: &[String]) -> CacheKey {
    let mut key = String::from(prefix);
    for arg in args {
        key.push(':');
        key.push_str(arg);
    }
    key
}

/// The prefix alone; arguments are ignored
pub fn bare_key(prefix: &str, _args: &[String]) -> CacheKey {
    prefix.to_string()
}

/// Book projection by book id
pub const BOOK_INFOS: CacheKeySpec = CacheKeySpec::per_id("book.infos", DEFAULT_EXPIRY);

/// Club-book projection by club-book id
pub const CLUB_BOOK_INFOS: CacheKeySpec = CacheKeySpec::per_id("club_book.infos", DEFAULT_EXPIRY);

/// Club member projection by member id
pub const MEMBER_INFOS: CacheKeySpec = CacheKeySpec::per_id("member.infos", DEFAULT_EXPIRY);

/// Membership order projection by order id
pub const ORDER_INFOS: CacheKeySpec = CacheKeySpec::per_id("order.infos", DEFAULT_EXPIRY);

/// Club order projection by order id
pub const DFREE_ORDER_INFOS: CacheKeySpec =
    CacheKeySpec::per_id("dfree_order.infos", DEFAULT_EXPIRY);

/// Book copy projection by book copy id
pub const BOOK_COPY_INFOS: CacheKeySpec = CacheKeySpec::per_id("book_copy.infos", DEFAULT_EXPIRY);

/// Member-held copy projection by member book copy id
pub const MEMBER_BOOK_COPY_INFOS: CacheKeySpec =
    CacheKeySpec::per_id("member_book_copy.infos", DEFAULT_EXPIRY);

/// Author dictionary
pub const AUTHOR_INFOS_DICT: CacheKeySpec = CacheKeySpec::singleton("author.infos", DEFAULT_EXPIRY);

/// Category dictionary
pub const CATEGORY_INFOS_DICT: CacheKeySpec =
    CacheKeySpec::singleton("category.infos", DEFAULT_EXPIRY);

/// Publisher dictionary
pub const PUBLISHER_INFOS_DICT: CacheKeySpec =
    CacheKeySpec::singleton("publisher.infos", DEFAULT_EXPIRY);

/// Club dictionary
pub const CLUB_INFOS_DICT: CacheKeySpec = CacheKeySpec::singleton("club.infos", DEFAULT_EXPIRY);

/// Active membership dictionary
pub const MEMBERSHIP_INFOS_DICT: CacheKeySpec =
    CacheKeySpec::singleton("membership.infos", DEFAULT_EXPIRY);

/// Every spec defined above
pub const ALL_SPECS: [CacheKeySpec; 12] = [
    BOOK_INFOS,
    CLUB_BOOK_INFOS,
    MEMBER_INFOS,
    ORDER_INFOS,
    DFREE_ORDER_INFOS,
    BOOK_COPY_INFOS,
    MEMBER_BOOK_COPY_INFOS,
    AUTHOR_INFOS_DICT,
    CATEGORY_INFOS_DICT,
    PUBLISHER_INFOS_DICT,
    CLUB_INFOS_DICT,
    MEMBERSHIP_INFOS_DICT,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_per_id_keys() {
        assert_eq!(BOOK_INFOS.key_for(&12, &[]), "book.infos:12");
        assert_eq!(
            ORDER_INFOS.key_for(&7, &["club".to_string(), "3".to_string()]),
            "order.infos:7:club:3"
        );
    }

    #[test]
    fn test_singleton_keys_ignore_args() {
        assert_eq!(AUTHOR_INFOS_DICT.key(&[]), "author.infos");
        assert_eq!(AUTHOR_INFOS_DICT.key(&["1".to_string()]), "author.infos");
    }

    #[test]
    fn test_prefixes_are_unique() {
        let prefixes: HashSet<&str> = ALL_SPECS.iter().map(|s| s.key_prefix).collect();
        assert_eq!(prefixes.len(), ALL_SPECS.len());
    }

    #[test]
    fn test_same_id_different_specs_never_collide() {
        let keys: HashSet<CacheKey> = ALL_SPECS.iter().map(|s| s.key_for(&1, &[])).collect();
        assert_eq!(keys.len(), ALL_SPECS.len());
    }

    #[test]
    fn test_with_ttl_keeps_keys() {
        let short = ORDER_INFOS.with_ttl(Duration::from_secs(5));
        assert_eq!(short.ttl, Duration::from_secs(5));
        assert_eq!(ORDER_INFOS.ttl, DEFAULT_EXPIRY);
        assert_eq!(short, ORDER_INFOS);
        assert_eq!(short.key_for(&7, &[]), ORDER_INFOS.key_for(&7, &[]));
    }

    #[test]
    fn test_custom_key_fn() {
        fn reversed(prefix: &str, args: &[String]) -> CacheKey {
            format!("{}/{}", args.join("/"), prefix)
        }

        let spec = CacheKeySpec {
            key_prefix: "custom",
            key_fn: reversed,
            ttl: Duration::from_secs(5),
        };
        assert_eq!(spec.key_for(&"a", &["b".to_string()]), "a/b/custom");
    }
}
