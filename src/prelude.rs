//! A "prelude" for users of the `arachne-core` crate.
//!
//! This prelude re-exports the most commonly used traits, structs, and
//! helpers so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use arachne_core::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Context,
    ContextPool,
    ItemPayload,
    Request,
    Response,
    Rule,
    Spider,
    SpiderBuilder,
    SpiderRegistry,
    // Core traits
    AidHandler,
    ParseHandler,
    SchedulerIntake,
    // Errors
    SpiderError,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::intake::ChannelIntake;
pub use crate::request::DownloaderId;
