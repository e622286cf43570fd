use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CookieConfig;
use crate::errors::StorageError;
use crate::notify::{Notifier, COOKIES_NOT_SUPPORTED};
use crate::CookieJar;

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// 9999-12-31T23:59:59Z, the last instant a four-digit cookie date can express.
const LATEST_EXPIRY_TIMESTAMP: i64 = 253_402_300_799;

/// Prefixed key/value access to a cookie jar. Used directly by callers and as the fallback of
/// [`PrefixedStorage`](crate::PrefixedStorage).
#[derive(Clone)]
pub struct CookieStorage {
    jar: Arc<dyn CookieJar>,
    prefix: String,
    config: CookieConfig,
    notifier: Notifier,
}

impl CookieStorage {
    pub(crate) fn new(jar: Arc<dyn CookieJar>, prefix: String, config: CookieConfig, notifier: Notifier) -> Self {
        Self { jar, prefix, config, notifier }
    }

    pub fn is_supported(&self) -> bool {
        self.jar.is_enabled()
    }

    /// Writes `value` under `key`.
    ///
    /// Strings are stored verbatim, `null` deletes the cookie, everything else is stored as JSON.
    /// `days` of `None` or `Some(0)` falls back to the configured expiry; `secure` overrides the
    /// configured flag when given.
    pub fn set<T>(&self, key: &str, value: &T, days: Option<u32>, secure: Option<bool>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                self.notifier.error(StorageError::from(e).to_string());
                return false;
            }
        };

        match value {
            Value::Null => self.write(key, None, days, secure),
            Value::String(text) => self.write(key, Some(&text), days, secure),
            value => self.write(key, Some(&value.to_string()), days, secure),
        }
    }

    /// Reads `key`. Values that look like JSON numbers come back as strings.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.is_supported() {
            self.notifier.error(COOKIES_NOT_SUPPORTED);
            return None;
        }

        let cookies = match self.jar.cookie_string() {
            Ok(cookies) => cookies,
            Err(e) => {
                self.notifier.error(e.to_string());
                return None;
            }
        };

        let name = format!("{}{}=", self.prefix, key);
        cookies.split(';').map(|cookie| cookie.trim_start_matches(' ')).find_map(|cookie| {
            let raw = cookie.strip_prefix(name.as_str())?;
            let stored = urlencoding::decode(raw).map(Cow::into_owned).unwrap_or_else(|_| raw.to_owned());
            parse_stored(stored)
        })
    }

    pub fn remove(&self, key: &str) {
        self.write(key, None, None, None);
    }

    /// Deletes every cookie under the prefix.
    pub fn clear_all(&self) -> bool {
        self.clear_matching(None)
    }

    pub(crate) fn clear_matching(&self, filter: Option<&Regex>) -> bool {
        if !self.is_supported() {
            self.notifier.error(COOKIES_NOT_SUPPORTED);
            return false;
        }

        let cookies = match self.jar.cookie_string() {
            Ok(cookies) => cookies,
            Err(e) => {
                self.notifier.error(e.to_string());
                return false;
            }
        };

        let keys: Vec<&str> = cookies
            .split(';')
            .filter_map(|cookie| cookie.trim_start_matches(' ').split_once('='))
            .filter_map(|(name, _)| name.strip_prefix(self.prefix.as_str()))
            .filter(|key| filter.map_or(true, |filter| filter.is_match(key)))
            .collect();

        keys.into_iter().fold(true, |cleared, key| self.write(key, None, None, None) && cleared)
    }

    /// `value` of `None` is the null marker and expires the cookie.
    pub(crate) fn write(&self, key: &str, value: Option<&str>, days: Option<u32>, secure: Option<bool>) -> bool {
        if !self.is_supported() {
            self.notifier.error(COOKIES_NOT_SUPPORTED);
            return false;
        }
        if key.is_empty() {
            debug!("skipping cookie write for an empty key");
            return false;
        }

        let now = Utc::now();
        let expires = match value {
            None => Some(now - TimeDelta::days(1)),
            Some(_) => days
                .filter(|days| *days != 0)
                .or(Some(self.config.expiry).filter(|days| *days != 0))
                .map(|days| expiry_after(now, days)),
        };

        let mut assignment = format!("{}{}={}", self.prefix, key, urlencoding::encode(value.unwrap_or_default()));
        if let Some(expires) = expires {
            assignment.push_str(&format!("; expires={}", expires.format(COOKIE_DATE_FORMAT)));
        }
        assignment.push_str(&format!("; path={}", self.config.path));
        if let Some(domain) = &self.config.domain {
            assignment.push_str(&format!("; domain={domain}"));
        }
        if secure.unwrap_or(self.config.secure) {
            assignment.push_str("; secure");
        }

        match self.jar.set_cookie(&assignment) {
            Ok(()) => true,
            Err(e) => {
                self.notifier.error(e.to_string());
                false
            }
        }
    }
}

/// Clamped to the latest date a cookie can carry.
fn expiry_after(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let latest = DateTime::<Utc>::from_timestamp(LATEST_EXPIRY_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
    TimeDelta::try_days(i64::from(days))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .filter(|expires| *expires <= latest)
        .unwrap_or_else(|| {
            warn!(days, "cookie lifetime clamped to the latest expiry date");
            latest
        })
}

fn parse_stored(stored: String) -> Option<Value> {
    match serde_json::from_str::<Value>(&stored) {
        Ok(Value::Null) => None,
        // keep numeric-looking text as written
        Ok(Value::Number(_)) => Some(Value::String(stored)),
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(stored)),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::Datelike as _;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::CookieStorage;
    use crate::backend::MemoryCookieJar;
    use crate::config::CookieConfig;
    use crate::notify::{Notifier, StorageEvent, COOKIES_NOT_SUPPORTED};
    use crate::{CookieJar, MockCookieJar};

    fn cookie_storage(jar: Arc<dyn CookieJar>, config: CookieConfig) -> (CookieStorage, Notifier) {
        let notifier = Notifier::default();
        (CookieStorage::new(jar, "ls.".to_owned(), config, notifier.clone()), notifier)
    }

    #[test]
    fn when_setting_values_then_get_returns_them_with_numbers_as_strings() {
        let jar = Arc::new(MemoryCookieJar::new());
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::default());

        assert!(cookies.set("name", "Daft Punk", None, None));
        assert!(cookies.set("favorites", &json!([{"_id": "abc"}]), None, None));
        assert!(cookies.set("volume", &42, None, None));
        assert!(cookies.set("muted", &true, None, None));

        assert_eq!(cookies.get("name"), Some(json!("Daft Punk")));
        assert_eq!(cookies.get("favorites"), Some(json!([{"_id": "abc"}])));
        assert_eq!(cookies.get("volume"), Some(json!("42")));
        assert_eq!(cookies.get("muted"), Some(json!(true)));
        assert_eq!(cookies.get("missing"), None);
        assert_eq!(jar.cookie("ls.name").expect("cookie should exist").value, "Daft%20Punk");
    }

    #[test]
    fn when_setting_null_then_cookie_is_removed() {
        let jar = Arc::new(MemoryCookieJar::new());
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::default());
        cookies.set("FAVORITE", "abc", None, None);

        assert!(cookies.set("FAVORITE", &None::<String>, None, None));

        assert_eq!(cookies.get("FAVORITE"), None);
        assert!(jar.cookie("ls.FAVORITE").is_none());
    }

    #[test]
    fn when_key_shares_a_prefix_with_another_key_then_only_exact_name_matches() {
        let (cookies, _) = cookie_storage(Arc::new(MemoryCookieJar::new()), CookieConfig::default());
        cookies.set("ab", "long", None, None);

        assert_eq!(cookies.get("a"), None);
        assert_eq!(cookies.get("ab"), Some(json!("long")));
    }

    #[test]
    fn when_writing_then_configured_attributes_are_applied() {
        let mut jar = MockCookieJar::new();
        jar.expect_is_enabled().return_const(true);
        jar.expect_set_cookie()
            .withf(|assignment| {
                assignment.starts_with("ls.k=v; expires=")
                    && assignment.ends_with(" GMT; path=/player; domain=example.com; secure")
            })
            .times(1)
            .returning(|_| Ok(()));
        let config =
            CookieConfig::builder().expiry(7).path("/player").secure(true).domain("example.com".to_owned()).build();
        let (cookies, _) = cookie_storage(Arc::new(jar), config);

        assert!(cookies.set("k", "v", None, None));
    }

    #[test]
    fn when_secure_is_given_per_call_then_it_overrides_configuration() {
        let mut jar = MockCookieJar::new();
        jar.expect_is_enabled().return_const(true);
        jar.expect_set_cookie().withf(|assignment| assignment.to_string() == "ls.k=v; path=/").times(1).returning(|_| Ok(()));
        let (cookies, _) = cookie_storage(Arc::new(jar), CookieConfig::builder().secure(true).build());

        assert!(cookies.set("k", "v", Some(0), Some(false)));
    }

    #[test]
    fn when_days_are_given_then_they_take_precedence_over_configured_expiry() {
        let jar = Arc::new(MemoryCookieJar::new());
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::builder().expiry(1).build());

        cookies.set("k", "v", Some(365), None);

        let expires = jar.cookie("ls.k").and_then(|cookie| cookie.expires).expect("cookie should expire");
        assert!(expires > chrono::Utc::now() + chrono::Duration::days(364));
    }

    #[test]
    fn when_days_exceed_the_calendar_then_expiry_is_clamped_to_year_9999() {
        let jar = Arc::new(MemoryCookieJar::new());
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::default());

        assert!(cookies.set("max", "v", Some(u32::MAX), None));
        assert!(cookies.set("far", "v", Some(100_000_000), None));

        for name in ["ls.max", "ls.far"] {
            let expires = jar.cookie(name).and_then(|cookie| cookie.expires).expect("cookie should expire");
            assert_eq!(expires.year(), 9999);
        }
        assert_eq!(cookies.get("max"), Some(json!("v")));
    }

    #[test]
    fn when_configured_expiry_is_huge_then_write_still_succeeds() {
        let jar = Arc::new(MemoryCookieJar::new());
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::builder().expiry(u32::MAX).build());

        assert!(cookies.set("k", "v", None, None));

        assert!(jar.cookie("ls.k").is_some());
    }

    #[test]
    fn when_clearing_then_only_prefixed_cookies_are_removed() {
        let jar = Arc::new(MemoryCookieJar::new());
        jar.set_cookie("session=other-app; path=/").expect("setting cookie should be successful");
        let (cookies, _) = cookie_storage(jar.clone(), CookieConfig::default());
        cookies.set("song1", "a", None, None);
        cookies.set("fav1", "b", None, None);

        assert!(cookies.clear_all());

        assert_eq!(jar.cookie_string().expect("reading cookies should be successful"), "session=other-app");
    }

    #[test]
    fn when_cookies_are_disabled_then_error_is_notified_and_failure_returned() {
        let (cookies, notifier) = cookie_storage(Arc::new(MemoryCookieJar::disabled()), CookieConfig::default());
        let mut events = notifier.subscribe();

        assert!(!cookies.is_supported());
        assert!(!cookies.set("k", "v", None, None));
        assert_eq!(cookies.get("k"), None);
        assert!(!cookies.clear_all());

        for _ in 0..3 {
            assert_eq!(
                events.try_recv().expect("error should be notified"),
                StorageEvent::Error { message: COOKIES_NOT_SUPPORTED.to_owned() }
            );
        }
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }
}
