//! Error types shared across the crawl engine core.
//!
//! Every failure in this crate is local-recoverable: a misconfigured rule,
//! a transcoding problem, or a rejected request is reported through the
//! logger and the calling operation degrades to a no-op. One broken spider
//! must never take down the others, so nothing here aborts the process.

use thiserror::Error;

/// Errors produced by the crawl engine core.
///
/// The enum is `Clone` so the sticky per-context fetch error can be observed
/// repeatedly by parsing logic without consuming it.
#[derive(Debug, Clone, Error)]
pub enum SpiderError {
    /// A rule was referenced that the spider's rule tree does not define.
    #[error("spider `{spider}` has no rule named `{rule}`")]
    UnknownRule { spider: String, rule: String },

    /// A rule exists but does not define the requested handler.
    #[error("rule `{rule}` of spider `{spider}` does not define {handler}")]
    MissingHandler {
        spider: String,
        rule: String,
        handler: &'static str,
    },

    /// Invalid engine, spider, or builder configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A request failed validation in [`Request::prepare`] and was dropped.
    ///
    /// [`Request::prepare`]: crate::request::Request::prepare
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be transcoded to UTF-8.
    ///
    /// Recoverable: the decoder falls back to the verbatim body bytes.
    #[error("transcoding failed for {url}: {reason}")]
    TranscodeError { url: String, reason: String },

    /// The downloader reported a fetch failure for this context.
    #[error("fetch failed: {0}")]
    FetchError(String),

    /// The scheduler intake refused or lost a request.
    #[error("scheduler intake unavailable: {0}")]
    IntakeError(String),

    /// Catch-all for failures without a more precise variant.
    #[error("{0}")]
    GeneralError(String),
}
