pub(crate) mod cache_state;
pub(crate) mod deferred;
pub(crate) mod entry;
pub(crate) mod error;
pub(crate) mod key_set;
pub(crate) mod time;

/// The prefix put in front of log messages of a named cache.
#[cfg(feature = "logging")]
pub(crate) fn log_prefix(cache_name: Option<&str>) -> String {
    cache_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::log_prefix;

    #[test]
    fn prefixes_named_caches_only() {
        assert_eq!(log_prefix(Some("users")), "[users] ");
        assert_eq!(log_prefix(None), "");
    }
}
