use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::StorageError;
use crate::CookieJar;

/// A cookie as held by [`MemoryCookieJar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
}

impl Cookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// In-process cookie jar for a single origin. Cookies are keyed by name only; path and domain are
/// recorded but not used for matching.
pub struct MemoryCookieJar {
    enabled: bool,
    cookies: RwLock<Vec<Cookie>>,
}

impl Default for MemoryCookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self { enabled: true, cookies: RwLock::new(vec![]) }
    }

    /// A jar reporting cookies as disabled, like `navigator.cookieEnabled == false`.
    pub fn disabled() -> Self {
        Self { enabled: false, cookies: RwLock::new(vec![]) }
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|cookie| cookie.name == name && !cookie.is_expired(now))
            .cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn cookie_string(&self) -> Result<String, StorageError> {
        if !self.enabled {
            return Err(StorageError::CookiesUnsupported);
        }

        let now = Utc::now();
        let cookies = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        Ok(cookies
            .iter()
            .filter(|cookie| !cookie.is_expired(now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; "))
    }

    fn set_cookie(&self, assignment: &str) -> Result<(), StorageError> {
        if !self.enabled {
            return Err(StorageError::CookiesUnsupported);
        }

        let cookie = parse_assignment(assignment)?;
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        let position = cookies.iter().position(|existing| existing.name == cookie.name);

        if cookie.is_expired(Utc::now()) {
            if let Some(position) = position {
                cookies.remove(position);
                debug!(name = %cookie.name, "expired cookie");
            }
        } else if let Some(position) = position {
            cookies[position] = cookie;
        } else {
            cookies.push(cookie);
        }

        Ok(())
    }
}

fn parse_assignment(assignment: &str) -> Result<Cookie, StorageError> {
    let malformed = || StorageError::MalformedCookie(assignment.to_owned());

    let mut parts = assignment.split(';');
    let (name, value) = parts.next().and_then(|pair| pair.split_once('=')).ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(malformed());
    }

    let mut cookie = Cookie {
        name: name.to_owned(),
        value: value.trim().to_owned(),
        expires: None,
        path: None,
        domain: None,
        secure: false,
    };

    for attribute in parts {
        let (attribute, argument) = match attribute.split_once('=') {
            Some((attribute, argument)) => (attribute.trim(), Some(argument.trim())),
            None => (attribute.trim(), None),
        };

        match (attribute.to_ascii_lowercase().as_str(), argument) {
            ("expires", Some(date)) => {
                let expires = DateTime::parse_from_rfc2822(date).map_err(|_| malformed())?;
                cookie.expires = Some(expires.with_timezone(&Utc));
            }
            ("path", Some(path)) => cookie.path = Some(path.to_owned()),
            ("domain", Some(domain)) => cookie.domain = Some(domain.to_owned()),
            ("secure", _) => cookie.secure = true,
            _ => {}
        }
    }

    Ok(cookie)
}
