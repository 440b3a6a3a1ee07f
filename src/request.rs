//! # Request Module
//!
//! Defines the [`Request`] handed between spiders, the scheduler, and the
//! downloader.
//!
//! ## Overview
//!
//! A `Request` carries everything a downloader needs to fetch one page: the
//! raw URL string, the HTTP verb, a header bag, and the identifier of the
//! downloader expected to execute it. On top of that it carries crawl-side
//! bookkeeping that the engine itself consumes: the name of the rule that
//! should parse the eventual response, the owning spider's name, and a
//! per-request scratch store that rules use to pass values forward along a
//! crawl chain.
//!
//! The URL is kept as the raw string the spider author wrote, so that the
//! value observed before and after the fetch is byte-identical (no percent
//! re-encoding of non-ASCII path segments). [`Request::prepare`] validates
//! it against `url::Url` without replacing it.

use crate::error::SpiderError;
use http::header::REFERER;
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;
use url::Url;

/// Identifies which downloader implementation a request is routed to.
///
/// The content decoder keys off this: a plain HTTP client hands back the
/// body bytes exactly as they came off the wire, so charset detection and
/// transcoding apply; a headless browser has already decoded the page into
/// UTF-8 before the engine ever sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloaderId {
    /// A raw HTTP client; body bytes are untouched wire bytes.
    #[default]
    HttpClient,
    /// A rendering/headless downloader whose output is already UTF-8.
    HeadlessBrowser,
}

impl DownloaderId {
    /// Whether the downloader delivers text that is already decoded.
    pub fn reports_decoded(self) -> bool {
        matches!(self, DownloaderId::HeadlessBrowser)
    }
}

/// The scratch store type carried by every request.
pub type Temp = HashMap<String, Value>;

/// A single crawl request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Raw URL exactly as the spider author supplied it.
    pub url: String,
    method: Option<Method>,
    headers: HeaderMap,
    temp: Temp,
    rule: Option<String>,
    spider: Option<String>,
    downloader: DownloaderId,
    enable_cookie: bool,
}

impl Request {
    /// Creates a request for `url` with everything else left to defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Request {
            url: url.into(),
            method: None,
            headers: HeaderMap::new(),
            temp: Temp::new(),
            rule: None,
            spider: None,
            downloader: DownloaderId::default(),
            enable_cookie: false,
        }
    }

    /// Sets the HTTP verb (builder style).
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Names the rule that should parse the response (builder style).
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Routes the request to a specific downloader (builder style).
    pub fn with_downloader(mut self, downloader: DownloaderId) -> Self {
        self.downloader = downloader;
        self
    }

    /// Stores a scratch value under `key` (builder style).
    ///
    /// Values that fail to serialize are skipped with a warning; a scratch
    /// entry is never worth failing request construction over.
    pub fn with_temp(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.set_temp(key, value);
        self
    }

    /// Adds a header (builder style). Invalid header values are skipped.
    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => warn!("dropping invalid header value for {name}"),
        }
        self
    }

    /// The HTTP verb, defaulting to `GET` when none was set.
    pub fn method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }

    /// Whether an explicit verb was set on this request.
    pub fn has_method(&self) -> bool {
        self.method.is_some()
    }

    /// Fills in `method` only if the request did not set one.
    pub(crate) fn default_method(&mut self, method: Method) {
        if self.method.is_none() {
            self.method = Some(method);
        }
    }

    /// The header bag.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the header bag.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The `Referer` header, if set.
    pub fn referer(&self) -> Option<String> {
        self.headers
            .get(REFERER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    /// Sets the `Referer` header. Invalid values are skipped with a warning.
    pub fn set_referer(&mut self, referer: &str) {
        match HeaderValue::from_str(referer) {
            Ok(v) => {
                self.headers.insert(REFERER, v);
            }
            Err(_) => warn!("dropping unencodable Referer value `{referer}`"),
        }
    }

    /// The rule assigned to parse this request's response.
    pub fn rule_name(&self) -> Option<&str> {
        self.rule.as_deref()
    }

    /// Records the rule that will parse this request's response.
    pub fn set_rule_name(&mut self, rule: impl Into<String>) {
        self.rule = Some(rule.into());
    }

    /// The owning spider's name, stamped by the engine at enqueue time.
    pub fn spider_name(&self) -> Option<&str> {
        self.spider.as_deref()
    }

    pub(crate) fn set_spider_name(&mut self, spider: impl Into<String>) {
        self.spider = Some(spider.into());
    }

    /// The downloader this request is routed to.
    pub fn downloader(&self) -> DownloaderId {
        self.downloader
    }

    /// Whether the downloader should let this request participate in the
    /// shared cookie jar.
    pub fn enable_cookie(&self) -> bool {
        self.enable_cookie
    }

    pub(crate) fn set_enable_cookie(&mut self, enable: bool) {
        self.enable_cookie = enable;
    }

    /// Reads a scratch value, deserialized into the requested type.
    pub fn temp<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.temp
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Reads a scratch value, falling back to `default` when the key is
    /// absent or does not deserialize.
    pub fn temp_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.temp(key).unwrap_or(default)
    }

    /// Stores a scratch value under `key`.
    pub fn set_temp(&mut self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.temp.insert(key, v);
            }
            Err(e) => warn!("scratch value `{key}` failed to serialize: {e}"),
        }
    }

    /// The whole scratch store.
    pub fn temps(&self) -> &Temp {
        &self.temp
    }

    /// Validates the request before it is handed to the scheduler.
    ///
    /// Checks that the URL is non-empty, parses, and uses an http(s) scheme,
    /// and pins the verb to `GET` if nothing filled it in earlier. The URL
    /// string itself is left untouched.
    pub fn prepare(&mut self) -> Result<(), SpiderError> {
        if self.url.trim().is_empty() {
            return Err(SpiderError::InvalidRequest("empty url".into()));
        }
        let parsed = Url::parse(&self.url)
            .map_err(|e| SpiderError::InvalidRequest(format!("unparseable url `{}`: {e}", self.url)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SpiderError::InvalidRequest(format!(
                    "unsupported scheme `{other}` in `{}`",
                    self.url
                )));
            }
        }
        self.default_method(Method::GET);
        Ok(())
    }

    /// A stable fingerprint of the request, used by schedulers for
    /// duplicate detection.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method().as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}
