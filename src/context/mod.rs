//! # Context Module
//!
//! The per-request execution unit: one request, its response, the decoded
//! views of the body, and the output buffers, all bound together for the
//! lifetime of a single crawl operation.
//!
//! ## Overview
//!
//! A [`Context`] is acquired from the [`ContextPool`] with a spider and a
//! request bound, receives its response once the external downloader has
//! fetched it, and then routes control to the right parsing rule. Parsing
//! code reads the body through [`Context::text`] / [`Context::document`]
//! (decoded and parsed at most once per response), emits records and files
//! into the context's buffers, and enqueues follow-up requests back to the
//! scheduler. A collector drains the buffers on its own schedule; when the
//! operation is over the context is released and recycled.
//!
//! ## Sharing model
//!
//! Contexts are handed out as `Arc<Context>`. Within one context's lifetime
//! the item/file buffers are the only state meant for concurrent access
//! (producer: parsing code, consumer: a draining collector), and both
//! append and drain-and-swap go through the same mutex. Every other lock in
//! here is short-held and never held across a call into parsing code.

mod pool;

pub use pool::{ContextPool, PoolConfig};

use crate::decode::{self, DecodedText};
use crate::error::SpiderError;
use crate::item::{ExtractedFile, ItemPayload, ScrapedRecord};
use crate::request::{Request, Temp};
use crate::response::Response;
use crate::spider::{AidArgs, Rule, Spider};
use crate::stats::StatCollector;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::{Mutex, RwLock};
use scraper::Html;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::mem;
use std::sync::Arc;
use tracing::{error, trace, warn};
use url::Url;

enum DomCache {
    Unset,
    Parsed(Arc<Html>),
    Failed,
}

/// The per-request execution unit.
///
/// See the [module docs](self) for the lifecycle; construction goes through
/// [`ContextPool::acquire`].
pub struct Context {
    spider: RwLock<Option<Arc<Spider>>>,
    request: RwLock<Option<Request>>,
    response: Mutex<Option<Response>>,
    text: Mutex<Option<Bytes>>,
    dom: Mutex<DomCache>,
    items: Mutex<Vec<ScrapedRecord>>,
    files: Mutex<Vec<ExtractedFile>>,
    error: Mutex<Option<SpiderError>>,
    stats: Option<Arc<StatCollector>>,
}

impl Context {
    pub(crate) fn new(stats: Option<Arc<StatCollector>>) -> Self {
        Context {
            spider: RwLock::new(None),
            request: RwLock::new(None),
            response: Mutex::new(None),
            text: Mutex::new(None),
            dom: Mutex::new(DomCache::Unset),
            items: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            stats,
        }
    }

    pub(crate) fn bind(&self, spider: Arc<Spider>, request: Option<Request>) {
        *self.spider.write() = Some(spider);
        *self.request.write() = request;
    }

    /// Zeroes every reference field and truncates the buffers, keeping
    /// their capacity. Dropping the response closes any unread body stream.
    pub(crate) fn clear(&self) {
        *self.response.lock() = None;
        *self.spider.write() = None;
        *self.request.write() = None;
        *self.text.lock() = None;
        *self.dom.lock() = DomCache::Unset;
        self.items.lock().clear();
        self.files.lock().clear();
        *self.error.lock() = None;
    }

    /// Records the fetched response. Decoding stays lazy; any previously
    /// decoded text or parsed document is invalidated.
    pub fn attach_response(&self, response: Response) -> &Self {
        *self.response.lock() = Some(response);
        *self.text.lock() = None;
        *self.dom.lock() = DomCache::Unset;
        self
    }

    /// Records a sticky fetch failure. Dispatch is not aborted; parsing
    /// logic decides what to make of it.
    pub fn mark_error(&self, err: SpiderError) {
        *self.error.lock() = Some(err);
    }

    /// The sticky fetch failure, if any.
    pub fn error(&self) -> Option<SpiderError> {
        self.error.lock().clone()
    }

    /// The owning spider.
    pub fn spider(&self) -> Option<Arc<Spider>> {
        self.spider.read().clone()
    }

    fn spider_name(&self) -> String {
        self.spider().map(|s| s.name()).unwrap_or_default()
    }

    /// URL of the originating request, exactly as the spider author wrote
    /// it (never re-encoded by the fetch).
    pub fn url(&self) -> String {
        self.request
            .read()
            .as_ref()
            .map(|r| r.url.clone())
            .unwrap_or_default()
    }

    /// Rewrites the originating request's URL.
    pub fn set_url(&self, url: impl Into<String>) -> &Self {
        match self.request.write().as_mut() {
            Some(request) => request.url = url.into(),
            None => warn!("set_url on a context with no request bound"),
        }
        self
    }

    /// Sets the `Referer` header on the originating request.
    pub fn set_referer(&self, referer: &str) -> &Self {
        match self.request.write().as_mut() {
            Some(request) => request.set_referer(referer),
            None => warn!("set_referer on a context with no request bound"),
        }
        self
    }

    /// HTTP verb of the originating request.
    pub fn method(&self) -> Method {
        self.request
            .read()
            .as_ref()
            .map(|r| r.method())
            .unwrap_or(Method::GET)
    }

    /// Rule name recorded on the originating request.
    pub fn rule_name(&self) -> Option<String> {
        self.request
            .read()
            .as_ref()
            .and_then(|r| r.rule_name().map(String::from))
    }

    /// Independent clone of the originating request.
    pub fn copy_request(&self) -> Option<Request> {
        self.request.read().clone()
    }

    /// Response status code, absent before fetch.
    pub fn status(&self) -> Option<StatusCode> {
        self.response.lock().as_ref().map(|r| r.status)
    }

    /// Response headers, absent before fetch.
    pub fn response_headers(&self) -> Option<HeaderMap> {
        self.response.lock().as_ref().map(|r| r.headers.clone())
    }

    /// Headers of the request the downloader actually sent, echoed back on
    /// the response.
    pub fn request_headers(&self) -> Option<HeaderMap> {
        self.response
            .lock()
            .as_ref()
            .map(|r| r.request().headers().clone())
    }

    /// The `Referer` the downloader sent, from the response's request echo.
    pub fn referer(&self) -> Option<String> {
        self.response
            .lock()
            .as_ref()
            .and_then(|r| r.request().referer())
    }

    /// Host of the fetched URL, from the response's request echo.
    pub fn host(&self) -> Option<String> {
        self.response
            .lock()
            .as_ref()
            .and_then(|r| Url::parse(&r.request().url).ok())
            .and_then(|u| u.host_str().map(String::from))
    }

    /// The response's `Set-Cookie` header, if any.
    pub fn set_cookie(&self) -> Option<String> {
        self.response
            .lock()
            .as_ref()
            .and_then(|r| r.headers.get(http::header::SET_COOKIE))
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    /// Reads a scratch value from the originating request.
    pub fn temp<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.request.read().as_ref().and_then(|r| r.temp(key))
    }

    /// Reads a scratch value with a fallback.
    pub fn temp_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.temp(key).unwrap_or(default)
    }

    /// Stores a scratch value on the originating request.
    pub fn set_temp(&self, key: impl Into<String>, value: impl Serialize) -> &Self {
        match self.request.write().as_mut() {
            Some(request) => request.set_temp(key, value),
            None => warn!("set_temp on a context with no request bound"),
        }
        self
    }

    /// Clone of the whole scratch store.
    pub fn copy_temps(&self) -> Temp {
        self.request
            .read()
            .as_ref()
            .map(|r| r.temps().clone())
            .unwrap_or_default()
    }

    /// The decoded body text, decoding on first access.
    ///
    /// At most one decode happens per response; later calls return the
    /// cached bytes. With no response attached this logs a defect and
    /// returns empty bytes.
    pub fn text(&self) -> Bytes {
        let mut cached = self.text.lock();
        if let Some(text) = cached.as_ref() {
            return text.clone();
        }
        let decoded = self.decode_body();
        *cached = Some(decoded.clone());
        decoded
    }

    /// The decoded body as an owned string (lossy for the verbatim-bytes
    /// fallback path).
    pub fn text_string(&self) -> String {
        String::from_utf8_lossy(&self.text()).into_owned()
    }

    /// Overrides the decoded text, invalidating the parsed document.
    ///
    /// For downloaders that deliver pre-decoded page text out of band.
    pub fn set_text(&self, text: impl Into<Bytes>) -> &Self {
        *self.text.lock() = Some(text.into());
        *self.dom.lock() = DomCache::Unset;
        self
    }

    /// The parsed document tree over the decoded text, parsing on first
    /// access; `None` when no document could be built.
    pub fn document(&self) -> Option<Arc<Html>> {
        let mut cached = self.dom.lock();
        match &*cached {
            DomCache::Parsed(doc) => Some(Arc::clone(doc)),
            DomCache::Failed => None,
            DomCache::Unset => {
                let text = self.text();
                match decode::parse_document(&text) {
                    Some(doc) => {
                        let doc = Arc::new(doc);
                        *cached = DomCache::Parsed(Arc::clone(&doc));
                        Some(doc)
                    }
                    None => {
                        *cached = DomCache::Failed;
                        None
                    }
                }
            }
        }
    }

    fn decode_body(&self) -> Bytes {
        let request = self.request.read();
        let Some(request) = request.as_ref() else {
            error!("text() called on a context with no request bound");
            return Bytes::new();
        };
        let mut response = self.response.lock();
        let Some(response) = response.as_mut() else {
            error!("text() called before a response was attached ({})", request.url);
            return Bytes::new();
        };
        let DecodedText { text, warning } = decode::decode(request, response);
        if let Some(warning) = warning {
            warn!("{warning} (using verbatim body)");
            if let Some(stats) = &self.stats {
                stats.increment_decode_fallbacks();
            }
        }
        text
    }

    /// Resolves the rule a call applies to.
    ///
    /// An explicit name wins. Otherwise, with no response attached there is
    /// no current rule; with one, the rule name recorded on the request at
    /// fetch time is used. Lookup is by name; absence is reported by the
    /// caller, never invented here.
    fn resolve_rule(&self, explicit: Option<&str>) -> (Option<String>, Option<Arc<Rule>>) {
        let name = match explicit {
            Some(name) => Some(name.to_string()),
            None => {
                let response_attached = self.response.lock().is_some();
                if !response_attached {
                    return (None, None);
                }
                self.rule_name()
            }
        };
        let rule = match (&name, self.spider()) {
            (Some(name), Some(spider)) => spider.get_rule(name),
            _ => None,
        };
        (name, rule)
    }

    /// Dispatches to a parsing rule.
    ///
    /// With `rule_name` given the rule is looked up by name; omitted, the
    /// rule recorded on the request at fetch time is used. When nothing
    /// resolves the spider's root entry runs instead. A resolved rule
    /// without a parse handler is a configuration defect: it is reported
    /// and the context is left otherwise unmodified.
    pub async fn dispatch(self: Arc<Self>, rule_name: Option<&str>) -> Arc<Self> {
        let (name, rule) = self.resolve_rule(rule_name);

        let response_attached = self.response.lock().is_some();
        if response_attached {
            if let Some(name) = &name {
                if let Some(request) = self.request.write().as_mut() {
                    request.set_rule_name(name);
                }
            }
        }

        let Some(rule) = rule else {
            trace!(
                "no rule resolved for spider `{}`; dispatching to root",
                self.spider_name()
            );
            let Some(spider) = self.spider() else {
                error!("dispatch on a context with no spider bound");
                return self;
            };
            let root = Arc::clone(spider.root_handler());
            root.parse(Arc::clone(&self)).await;
            return self;
        };

        match rule.parse_handler() {
            Some(handler) => {
                let handler = Arc::clone(handler);
                handler.parse(Arc::clone(&self)).await;
            }
            None => error!(
                "rule `{}` of spider `{}` has no parse handler; dispatch skipped",
                name.as_deref().unwrap_or_default(),
                self.spider_name()
            ),
        }
        self
    }

    /// Invokes a rule's aid handler with caller-supplied arguments.
    ///
    /// Resolution works exactly as in [`Context::dispatch`]; a missing rule
    /// or handler is reported and yields `None`.
    pub async fn invoke_helper(self: Arc<Self>, rule_name: Option<&str>, args: AidArgs) -> Option<Value> {
        let (name, rule) = self.resolve_rule(rule_name);
        let Some(rule) = rule else {
            match name {
                Some(name) => error!(
                    "spider `{}` has no rule named `{name}` for invoke_helper",
                    self.spider_name()
                ),
                None => error!(
                    "invoke_helper on spider `{}` without a rule name",
                    self.spider_name()
                ),
            }
            return None;
        };
        match rule.aid_handler() {
            Some(aid) => {
                let aid = Arc::clone(aid);
                aid.aid(Arc::clone(&self), args).await
            }
            None => {
                error!(
                    "rule `{}` of spider `{}` has no aid handler",
                    name.as_deref().unwrap_or_default(),
                    self.spider_name()
                );
                None
            }
        }
    }

    /// Finalizes a follow-up request and hands it to the scheduler intake.
    ///
    /// Stamps the spider name, enables cookie-jar participation, validates
    /// via [`Request::prepare`], and auto-fills `Referer` from this
    /// context's URL when the new request did not set one. A request that
    /// fails validation is dropped with a logged error; the call is a
    /// no-op.
    pub async fn enqueue(&self, mut request: Request) -> &Self {
        let Some(spider) = self.spider() else {
            error!("enqueue on a context with no spider bound; request dropped");
            return self;
        };

        request.set_spider_name(spider.name());
        request.set_enable_cookie(true);
        request.default_method(spider.request_type());

        if let Err(e) = request.prepare() {
            error!("dropping request: {e}");
            if let Some(stats) = &self.stats {
                stats.increment_requests_dropped();
            }
            return self;
        }

        let response_attached = self.response.lock().is_some();
        if request.referer().is_none() && response_attached {
            request.set_referer(&self.url());
        }

        match spider.request_push(request).await {
            Ok(()) => {
                if let Some(stats) = &self.stats {
                    stats.increment_requests_enqueued();
                }
            }
            Err(e) => {
                error!("scheduler refused request: {e}");
                if let Some(stats) = &self.stats {
                    stats.increment_requests_dropped();
                }
            }
        }
        self
    }

    /// Field list of the resolved rule.
    pub fn item_fields(&self, rule_name: Option<&str>) -> Option<Vec<String>> {
        let (_, rule) = self.resolve_rule(rule_name);
        match rule {
            Some(rule) => Some(rule.item_fields()),
            None => {
                error!(
                    "item_fields: rule not found on spider `{}`",
                    self.spider_name()
                );
                None
            }
        }
    }

    /// Field name at `index` in the resolved rule, `None` out of range.
    pub fn item_field(&self, index: usize, rule_name: Option<&str>) -> Option<String> {
        let (_, rule) = self.resolve_rule(rule_name);
        match rule {
            Some(rule) => rule.field_at(index),
            None => {
                error!(
                    "item_field: rule not found on spider `{}`",
                    self.spider_name()
                );
                None
            }
        }
    }

    /// Index of `field` in the resolved rule, `None` when absent.
    pub fn item_field_index(&self, field: &str, rule_name: Option<&str>) -> Option<usize> {
        let (_, rule) = self.resolve_rule(rule_name);
        match rule {
            Some(rule) => rule.field_index(field),
            None => {
                error!(
                    "item_field_index: rule not found on spider `{}`",
                    self.spider_name()
                );
                None
            }
        }
    }

    /// Resolves a position-indexed mapping into named fields against the
    /// resolved rule's schema, without emitting anything.
    pub fn create_item(
        &self,
        entries: BTreeMap<usize, Value>,
        rule_name: Option<&str>,
    ) -> Option<Map<String, Value>> {
        let (_, rule) = self.resolve_rule(rule_name);
        match rule {
            Some(rule) => Some(rule.project_positional(entries)),
            None => {
                error!(
                    "create_item: rule not found on spider `{}`",
                    self.spider_name()
                );
                None
            }
        }
    }

    /// Emits one record into the context's item buffer.
    ///
    /// A positional payload is resolved against the rule's current field
    /// list; a named payload appends any new names to the rule's schema
    /// first (schema growth is a side effect of this call). The record is
    /// stamped with rule name, source URL, referrer, and timestamp.
    pub fn emit_item(&self, payload: impl Into<ItemPayload>, rule_name: Option<&str>) {
        let (name, rule) = self.resolve_rule(rule_name);
        let (Some(name), Some(rule)) = (name, rule) else {
            error!(
                "emit_item: rule not found on spider `{}`; record dropped",
                self.spider_name()
            );
            return;
        };

        let fields = match payload.into() {
            ItemPayload::Positional(entries) => rule.project_positional(entries),
            ItemPayload::Named(entries) => {
                for key in entries.keys() {
                    rule.upsert_field(key);
                }
                entries
            }
        };

        let record = ScrapedRecord::new(
            name,
            fields,
            self.url(),
            self.referer().unwrap_or_default(),
        );
        self.items.lock().push(record);
        if let Some(stats) = &self.stats {
            stats.increment_items_emitted();
        }
    }

    /// Emits one binary artifact into the context's file buffer.
    pub fn emit_file(
        &self,
        name: impl Into<String>,
        body: impl Read + Send + 'static,
        rule_name: Option<&str>,
    ) {
        let (rule_name, _) = self.resolve_rule(rule_name);
        self.files.lock().push(ExtractedFile {
            name: name.into(),
            rule: rule_name.unwrap_or_default(),
            body: Box::new(body),
        });
        if let Some(stats) = &self.stats {
            stats.increment_files_emitted();
        }
    }

    /// Atomically swaps the item buffer for an empty one and returns the
    /// previous contents. Safe to call from any task.
    pub fn drain_items(&self) -> Vec<ScrapedRecord> {
        mem::take(&mut *self.items.lock())
    }

    /// Atomically swaps the file buffer for an empty one and returns the
    /// previous contents. Safe to call from any task.
    pub fn drain_files(&self) -> Vec<ExtractedFile> {
        mem::take(&mut *self.files.lock())
    }
}
