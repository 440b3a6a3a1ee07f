//! # Content Decoder Module
//!
//! Turns a fetched response body into canonical UTF-8 text and, on demand, a
//! parsed document tree.
//!
//! ## Overview
//!
//! Web servers lie about encodings and spiders crawl pages in every charset
//! ever deployed, so this module is deliberately forgiving: it prefers the
//! charset label from the response's `Content-Type` header, falls back to
//! the request's, and sniffs the leading bytes when neither says anything.
//! A label it cannot resolve never fails the fetch; the verbatim body bytes
//! are used instead and the problem is reported as a recoverable warning.
//! Losing one page's diacritics is cheaper than losing the page.
//!
//! ## Contract
//!
//! - The body stream is consumed and closed exactly once per response, no
//!   matter which branch runs.
//! - Output routed through a headless-browser downloader is already UTF-8
//!   and is copied verbatim.
//! - [`parse_document`] is a pure function over decoded text; both decode
//!   and parse results are memoized by the owning execution context, never
//!   here.

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use bytes::Bytes;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use log::{debug, warn};
use mime::Mime;
use scraper::Html;
use std::io::Read;

/// Charset labels that mean "the body already is UTF-8".
const UTF8_LABELS: [&str; 3] = ["utf8", "utf-8", "unicode-1-1-utf-8"];

/// The result of decoding one response body.
pub struct DecodedText {
    /// Canonical UTF-8 text (verbatim body bytes on fallback).
    pub text: Bytes,
    /// Set when transcoding was wanted but fell back to verbatim bytes.
    pub warning: Option<SpiderError>,
}

impl DecodedText {
    fn verbatim(raw: Vec<u8>) -> Self {
        DecodedText {
            text: Bytes::from(raw),
            warning: None,
        }
    }
}

/// Extracts a normalized (lowercased, trimmed) charset label from a
/// `Content-Type` header bag.
pub fn charset_label(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let mime: Mime = content_type.parse().ok()?;
    mime.get_param(mime::CHARSET)
        .map(|cs| cs.as_str().trim().to_ascii_lowercase())
}

/// Decodes `response`'s body into UTF-8 text.
///
/// Consumes the body stream exactly once. The charset label is taken from
/// the response headers, then the request headers; with no label the
/// encoding is sniffed from the bytes, unless the request's downloader
/// reports the content as already decoded.
pub fn decode(request: &Request, response: &mut Response) -> DecodedText {
    let raw = match read_body(response) {
        Ok(raw) => raw,
        Err(e) => {
            return DecodedText {
                text: Bytes::new(),
                warning: Some(SpiderError::TranscodeError {
                    url: request.url.clone(),
                    reason: format!("body read failed: {e}"),
                }),
            };
        }
    };

    if request.downloader().reports_decoded() {
        return DecodedText::verbatim(raw);
    }

    let label = charset_label(&response.headers).or_else(|| charset_label(request.headers()));

    match label.as_deref() {
        Some(label) if UTF8_LABELS.contains(&label) => DecodedText::verbatim(raw),
        Some(label) => match Encoding::for_label_no_replacement(label.as_bytes()) {
            Some(encoding) if encoding == UTF_8 => DecodedText::verbatim(raw),
            Some(encoding) => transcode(encoding, raw, &request.url),
            None => {
                let warning = SpiderError::TranscodeError {
                    url: request.url.clone(),
                    reason: format!("unrecognized charset label `{label}`"),
                };
                DecodedText {
                    text: Bytes::from(raw),
                    warning: Some(warning),
                }
            }
        },
        None => {
            let mut detector = EncodingDetector::new();
            detector.feed(&raw, true);
            let encoding = detector.guess(None, true);
            debug!("no charset label for {}; sniffed {}", request.url, encoding.name());
            if encoding == UTF_8 {
                DecodedText::verbatim(raw)
            } else {
                transcode(encoding, raw, &request.url)
            }
        }
    }
}

/// Parses already-decoded text into a document tree.
///
/// Pure over its input; empty text yields no document. Malformed markup
/// still parses (the tree builder recovers), so the only absent case in
/// practice is an empty body.
pub fn parse_document(text: &[u8]) -> Option<Html> {
    if text.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(text);
    let document = Html::parse_document(&text);
    if !document.errors.is_empty() {
        debug!("document parsed with {} recoverable errors", document.errors.len());
    }
    Some(document)
}

fn read_body(response: &mut Response) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = response.take_body() else {
        // decode is memoized per response upstream; a consumed body here
        // means the response was constructed without one.
        return Ok(Vec::new());
    };
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    Ok(raw)
}

fn transcode(encoding: &'static Encoding, raw: Vec<u8>, url: &str) -> DecodedText {
    let (text, _, had_errors) = encoding.decode(&raw);
    if had_errors {
        warn!(
            "malformed {} sequences in {} replaced during transcoding",
            encoding.name(),
            url
        );
    }
    DecodedText {
        text: Bytes::from(text.into_owned().into_bytes()),
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::DownloaderId;
    use http::HeaderValue;
    use http::StatusCode;

    const GBK_NI_HAO: &[u8] = b"\xc4\xe3\xba\xc3"; // 你好

    fn response_with_charset(body: &[u8], content_type: &str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        Response::new(
            StatusCode::OK,
            headers,
            body.to_vec(),
            Request::new("https://example.com/page"),
        )
    }

    #[test]
    fn declared_gbk_transcodes_to_utf8() {
        let req = Request::new("https://example.com/page");
        let mut resp = response_with_charset(GBK_NI_HAO, "text/html; charset=gbk");
        let decoded = decode(&req, &mut resp);
        assert!(decoded.warning.is_none());
        assert_eq!(&decoded.text[..], "你好".as_bytes());
    }

    #[test]
    fn utf8_label_is_copied_verbatim() {
        let req = Request::new("https://example.com/page");
        let mut resp = response_with_charset("héllo".as_bytes(), "text/html; charset=UTF-8");
        let decoded = decode(&req, &mut resp);
        assert!(decoded.warning.is_none());
        assert_eq!(&decoded.text[..], "héllo".as_bytes());
    }

    #[test]
    fn unknown_label_falls_back_to_verbatim_with_warning() {
        let req = Request::new("https://example.com/page");
        let mut resp = response_with_charset(GBK_NI_HAO, "text/html; charset=no-such-charset");
        let decoded = decode(&req, &mut resp);
        assert!(matches!(
            decoded.warning,
            Some(SpiderError::TranscodeError { .. })
        ));
        assert_eq!(&decoded.text[..], GBK_NI_HAO);
    }

    #[test]
    fn missing_label_sniffs_the_encoding() {
        let req = Request::new("https://example.com/page");
        // windows-1252 "Café" with no charset declared anywhere.
        let mut resp = Response::ok(b"Caf\xe9 au lait, tr\xe8s bon".to_vec(), Request::new("https://example.com"));
        let decoded = decode(&req, &mut resp);
        assert!(decoded.warning.is_none());
        let text = String::from_utf8(decoded.text.to_vec()).unwrap();
        assert!(text.starts_with("Café"));
    }

    #[test]
    fn request_header_charset_is_the_fallback_label() {
        let mut req = Request::new("https://example.com/page");
        req.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=gbk"),
        );
        let mut resp = Response::ok(GBK_NI_HAO.to_vec(), Request::new("https://example.com"));
        let decoded = decode(&req, &mut resp);
        assert_eq!(&decoded.text[..], "你好".as_bytes());
    }

    #[test]
    fn browser_output_is_never_transcoded() {
        let req =
            Request::new("https://example.com/page").with_downloader(DownloaderId::HeadlessBrowser);
        let mut resp = response_with_charset(GBK_NI_HAO, "text/html; charset=gbk");
        let decoded = decode(&req, &mut resp);
        assert_eq!(&decoded.text[..], GBK_NI_HAO);
    }

    #[test]
    fn body_is_consumed_exactly_once() {
        let req = Request::new("https://example.com/page");
        let mut resp = Response::ok("first", Request::new("https://example.com"));
        let first = decode(&req, &mut resp);
        assert_eq!(&first.text[..], b"first");
        assert!(!resp.body_pending());
        let second = decode(&req, &mut resp);
        assert!(second.text.is_empty());
    }

    #[test]
    fn empty_text_yields_no_document() {
        assert!(parse_document(b"").is_none());
        assert!(parse_document(b"<html><body><p>ok</p></body></html>").is_some());
    }
}
