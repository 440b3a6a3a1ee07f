//! Recycling pool for execution contexts.
//!
//! Crawls churn through one context per in-flight request; allocating those
//! fresh each time wastes the buffer capacity the previous operation
//! already grew. The pool keeps released contexts on a lock-free free list
//! and hands them back out, with the queue's push/pop pair acting as the
//! memory-visibility barrier between the old user and the new one.
//!
//! A context is only recycled when the releasing caller holds the sole
//! `Arc`. If a collector (or anything else) still holds a clone, the
//! context is dropped instead of pooled, so a reacquired context can never
//! observe a live alias from its previous life.

use super::Context;
use crate::request::Request;
use crate::spider::Spider;
use crate::stats::StatCollector;
use crossbeam::queue::SegQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Configuration for the context pool.
pub struct PoolConfig {
    /// Upper bound on idle contexts kept for reuse.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: (num_cpus::get() * 8).max(32),
        }
    }
}

/// Recycles [`Context`]s across crawl operations.
pub struct ContextPool {
    idle: SegQueue<Arc<Context>>,
    idle_count: AtomicUsize,
    max_idle: usize,
    stats: Option<Arc<StatCollector>>,
}

impl Default for ContextPool {
    fn default() -> Self {
        ContextPool::new()
    }
}

impl ContextPool {
    /// A pool with default sizing and no stat collector.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// A pool with explicit sizing.
    pub fn with_config(config: PoolConfig) -> Self {
        ContextPool {
            idle: SegQueue::new(),
            idle_count: AtomicUsize::new(0),
            max_idle: config.max_idle,
            stats: None,
        }
    }

    /// A pool whose contexts report engine events into `stats`.
    pub fn with_stats(config: PoolConfig, stats: Arc<StatCollector>) -> Self {
        ContextPool {
            idle: SegQueue::new(),
            idle_count: AtomicUsize::new(0),
            max_idle: config.max_idle,
            stats: Some(stats),
        }
    }

    /// Obtains a context bound to `spider` and `request`.
    ///
    /// Reuses an idle context when one is available, otherwise constructs a
    /// fresh one. The root entry passes `request: None`, every fetch-backed
    /// operation passes the originating request.
    pub fn acquire(&self, spider: Arc<Spider>, request: Option<Request>) -> Arc<Context> {
        let ctx = match self.idle.pop() {
            Some(ctx) => {
                self.idle_count.fetch_sub(1, Ordering::SeqCst);
                trace!("reusing pooled context");
                ctx
            }
            None => Arc::new(Context::new(self.stats.clone())),
        };
        ctx.bind(spider, request);
        if let Some(stats) = &self.stats {
            stats.increment_contexts_acquired();
        }
        ctx
    }

    /// Clears a context and returns it to the pool.
    ///
    /// Closes any unread response stream, zeroes every reference field, and
    /// truncates the buffers to empty-but-retained capacity. Safe to call
    /// whether or not decode/parse ever ran. Contexts whose `Arc` is still
    /// aliased elsewhere are dropped instead of pooled.
    pub fn release(&self, ctx: Arc<Context>) {
        ctx.clear();

        if Arc::strong_count(&ctx) > 1 {
            debug!("context still referenced elsewhere; dropping instead of pooling");
            return;
        }
        if self.idle_count.load(Ordering::SeqCst) >= self.max_idle {
            trace!("pool at capacity; dropping context");
            return;
        }

        self.idle_count.fetch_add(1, Ordering::SeqCst);
        self.idle.push(ctx);
        if let Some(stats) = &self.stats {
            stats.increment_contexts_recycled();
        }
    }

    /// Number of idle contexts currently pooled.
    pub fn idle_len(&self) -> usize {
        self.idle_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemPayload;
    use crate::response::Response;
    use crate::spider::{Rule, SpiderBuilder};
    use serde_json::json;

    fn spider() -> Arc<Spider> {
        Arc::new(
            SpiderBuilder::new("pooled")
                .root(|_ctx| async move {})
                .rule(
                    "r",
                    Rule::new()
                        .with_item_fields(["f"])
                        .with_parse(|_ctx| async move {}),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn reacquired_contexts_carry_nothing_over() {
        let pool = ContextPool::new();
        let spider = spider();

        let mut request = Request::new("https://example.com/a");
        request.set_rule_name("r");
        let ctx = pool.acquire(Arc::clone(&spider), Some(request.clone()));
        ctx.attach_response(Response::ok("<p>body</p>", request));

        ctx.emit_item(ItemPayload::named([("f", json!(1))]), None);
        ctx.emit_file("f.bin", std::io::Cursor::new(vec![0u8]), Some("r"));
        ctx.mark_error(crate::error::SpiderError::FetchError("boom".into()));
        assert!(!ctx.text().is_empty());
        assert!(ctx.document().is_some());

        pool.release(ctx);
        assert_eq!(pool.idle_len(), 1);

        let reused = pool.acquire(spider, Some(Request::new("https://example.com/b")));
        assert_eq!(pool.idle_len(), 0);
        assert!(reused.drain_items().is_empty());
        assert!(reused.drain_files().is_empty());
        assert!(reused.error().is_none());
        assert!(reused.status().is_none());
        // No response bound yet: text is empty, no document.
        assert!(reused.text().is_empty());
        assert!(reused.document().is_none());
        assert_eq!(reused.url(), "https://example.com/b");
    }

    #[test]
    fn release_is_safe_without_decode_or_fetch() {
        let pool = ContextPool::new();
        let ctx = pool.acquire(spider(), None);
        pool.release(ctx);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn aliased_contexts_are_dropped_not_pooled() {
        let pool = ContextPool::new();
        let ctx = pool.acquire(spider(), Some(Request::new("https://example.com")));
        let alias = Arc::clone(&ctx);

        pool.release(ctx);
        assert_eq!(pool.idle_len(), 0);
        drop(alias);
    }

    #[test]
    fn pool_respects_its_idle_bound() {
        let pool = ContextPool::with_config(PoolConfig { max_idle: 1 });
        let spider = spider();
        let a = pool.acquire(Arc::clone(&spider), None);
        let b = pool.acquire(Arc::clone(&spider), None);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn stats_track_pool_traffic() {
        let stats = Arc::new(StatCollector::new());
        let pool = ContextPool::with_stats(PoolConfig::default(), Arc::clone(&stats));
        let ctx = pool.acquire(spider(), None);
        pool.release(ctx);
        let _ = pool.acquire(spider(), None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.contexts_acquired, 2);
        assert_eq!(snapshot.contexts_recycled, 1);
    }
}
