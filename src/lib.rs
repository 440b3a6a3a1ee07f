//! # arachne-core
//!
//! Core engine of a rule-driven web crawler: pooled per-request execution
//! contexts, rule dispatch, content decoding, and the spider registry.
//!
//! A spider definition declares a root entry point and a set of named
//! rules. The engine binds each fetched response to its originating request
//! in a pooled [`Context`], lazily decodes the body into UTF-8 text and a
//! DOM view, routes control to the right rule, and buffers extracted
//! records and files for an external collector to drain. Downloading,
//! scheduling, and persistence stay outside; they plug in through the
//! [`Request`]/[`Response`] types and the [`SchedulerIntake`] trait.
//!
//! ## Example
//!
//! ```rust,ignore
//! use arachne_core::{
//!     ChannelIntake, ContextPool, ItemPayload, Request, Rule, Spider, SpiderRegistry,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = SpiderRegistry::new();
//! let quotes = registry.add(
//!     Spider::builder("quotes")
//!         .description("collects quotes")
//!         .root(|ctx| async move {
//!             ctx.enqueue(Request::new("https://quotes.example/page/1").with_rule("page"))
//!                 .await;
//!         })
//!         .rule(
//!             "page",
//!             Rule::new()
//!                 .with_item_fields(["author", "quote"])
//!                 .with_parse(|ctx| async move {
//!                     let _doc = ctx.document();
//!                     ctx.emit_item(
//!                         ItemPayload::positional([(0, json!("a")), (1, json!("q"))]),
//!                         None,
//!                     );
//!                 }),
//!         )
//!         .build()?,
//! );
//!
//! let pool = ContextPool::new();
//! let (intake, scheduler_rx) = ChannelIntake::unbounded();
//! quotes.clone().start(&pool, intake).await;
//! // scheduler_rx now carries the seed request; fetch it, attach the
//! // response to an acquired context, and dispatch.
//! ```

pub mod context;
pub mod decode;
pub mod error;
pub mod intake;
pub mod item;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod response;
pub mod spider;
pub mod stats;

pub use context::{Context, ContextPool, PoolConfig};
pub use error::SpiderError;
pub use intake::{ChannelIntake, SchedulerIntake};
pub use item::{ExtractedFile, ItemPayload, ScrapedRecord};
pub use registry::SpiderRegistry;
pub use request::{DownloaderId, Request};
pub use response::{Body, Response};
pub use spider::{
    AidArgs, AidHandler, ParseHandler, Rule, Spider, SpiderBuilder, SpiderStatus, aid_fn, parse_fn,
};
pub use stats::StatCollector;

pub use async_trait::async_trait;
pub use scraper::{Html, Selector};
pub use tokio;
