//! Cookies and the cookie jar.
//!
//! # Responsibilities
//! - Build `Set-Cookie` values with the configured defaults
//! - Queue cookies during a request for the kernel to attach to the response
//! - Read cookies from an incoming request
//!
//! Queued cookies are per-request state: the jar is rebuilt after every
//! request so a cookie queued for one client is never sent to the next.

use std::sync::{Arc, Mutex};

use crate::config::CookieConfig;
use crate::container::{lock, Application, ContainerError, ServiceProvider};
use crate::http::{KernelRequest, RequestCookies};

/// Five years, in minutes.
const FOREVER_MINUTES: i64 = 2_628_000;

/// An outgoing cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    /// Lifetime in seconds; `None` for a browser-session cookie.
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

impl Cookie {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age.max(0)));
        }
        out.push_str(&format!("; Path={}", self.path));
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={}", domain));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = &self.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        out
    }
}

/// Read a cookie from the request, preferring cookies the supervisor parsed.
pub fn request_cookie(request: &KernelRequest, name: &str) -> Option<String> {
    if let Some(cookies) = request.extensions().get::<RequestCookies>() {
        if let Some(value) = cookies.0.get(name) {
            return Some(value.clone());
        }
    }

    request
        .headers()
        .get_all(hyper::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Cookie factory with a queue of cookies for the current response.
pub struct CookieJar {
    config: CookieConfig,
    queued: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new(config: CookieConfig) -> Self {
        Self {
            config,
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Make a cookie that lives for `minutes` (0 for a browser-session cookie).
    pub fn make(&self, name: &str, value: &str, minutes: i64) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: self.config.path.clone(),
            domain: self.config.domain.clone(),
            max_age: (minutes != 0).then_some(minutes.saturating_mul(60)),
            secure: self.config.secure,
            http_only: true,
            same_site: self.config.same_site.clone(),
        }
    }

    pub fn forever(&self, name: &str, value: &str) -> Cookie {
        self.make(name, value, FOREVER_MINUTES)
    }

    /// A cookie that tells the client to delete `name`.
    pub fn forget(&self, name: &str) -> Cookie {
        self.make(name, "", -FOREVER_MINUTES)
    }

    /// Queue a cookie, replacing any queued cookie with the same name.
    pub fn queue(&self, cookie: Cookie) {
        let mut queued = lock(&self.queued);
        queued.retain(|c| c.name != cookie.name);
        queued.push(cookie);
    }

    pub fn unqueue(&self, name: &str) {
        lock(&self.queued).retain(|c| c.name != name);
    }

    pub fn queued(&self, name: &str) -> Option<Cookie> {
        lock(&self.queued).iter().find(|c| c.name == name).cloned()
    }

    pub fn has_queued(&self, name: &str) -> bool {
        self.queued(name).is_some()
    }

    pub fn queued_cookies(&self) -> Vec<Cookie> {
        lock(&self.queued).clone()
    }
}

/// Binds the `cookie` jar.
pub struct CookieServiceProvider {
    config: CookieConfig,
}

impl CookieServiceProvider {
    pub const NAME: &'static str = "cookie";

    pub fn new(config: CookieConfig) -> Self {
        Self { config }
    }
}

impl ServiceProvider for CookieServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        let config = self.config.clone();
        app.singleton("cookie", move |_| Ok(Arc::new(CookieJar::new(config.clone()))));
        Ok(())
    }
}
