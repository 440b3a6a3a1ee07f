//! # Spider Module
//!
//! Defines the [`Spider`], its rule tree, and the handler contracts that
//! spider authors plug their parsing logic into.
//!
//! ## Overview
//!
//! A spider is a long-lived definition: a name, a default request verb, and
//! a tree of named [`Rule`]s rooted in a distinguished entry handler. The
//! root handler runs against a freshly acquired, response-less context and
//! seeds the crawl by enqueuing the first request(s); every other rule runs
//! against a fetched response routed to it by name.
//!
//! ## Key Components
//!
//! - **Spider**: identity, status, rule tree, and the scheduler intake hook
//! - **SpiderBuilder**: fluent construction of a spider definition
//! - **Rule**: a parse handler, an optional aid handler, and an append-only
//!   item-field schema
//! - **ParseHandler / AidHandler**: the async extension contract; plain
//!   closures are wrapped automatically
//!
//! ## Mutability
//!
//! The tree's structure is frozen once the spider is built. The only
//! steady-state mutation is each rule's item-field list, which grows
//! append-only as parsing code discovers new output fields, and the status
//! flag flipped by `start`/`stop`. Concurrently running instances of the
//! same definition should each work on a [`Spider::copy`] so their schema
//! growth never races.

use crate::context::{Context, ContextPool};
use crate::error::SpiderError;
use crate::intake::SchedulerIntake;
use crate::request::Request;
use async_trait::async_trait;
use http::Method;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Arguments handed to an aid handler: an arbitrary name → value mapping.
pub type AidArgs = Map<String, Value>;

/// Lifecycle state of a spider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiderStatus {
    /// Registered but not crawling.
    #[default]
    Stopped,
    /// The root entry has been invoked; the scheduler may feed requests.
    Running,
}

/// A rule's parsing entry point.
///
/// Implemented automatically for async closures taking an `Arc<Context>`.
#[async_trait]
pub trait ParseHandler: Send + Sync {
    /// Parses the context's response (or, for the root, seeds the crawl).
    async fn parse(&self, ctx: Arc<Context>);
}

/// A rule's optional helper, invoked on demand by parsing logic rather than
/// by the dispatcher.
#[async_trait]
pub trait AidHandler: Send + Sync {
    /// Runs the helper with caller-supplied arguments.
    async fn aid(&self, ctx: Arc<Context>, args: AidArgs) -> Option<Value>;
}

struct FnParse<F>(F);

#[async_trait]
impl<F, Fut> ParseHandler for FnParse<F>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn parse(&self, ctx: Arc<Context>) {
        (self.0)(ctx).await;
    }
}

struct FnAid<F>(F);

#[async_trait]
impl<F, Fut> AidHandler for FnAid<F>
where
    F: Fn(Arc<Context>, AidArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Option<Value>> + Send,
{
    async fn aid(&self, ctx: Arc<Context>, args: AidArgs) -> Option<Value> {
        (self.0)(ctx, args).await
    }
}

/// Wraps an async closure into a [`ParseHandler`] trait object.
pub fn parse_fn<F, Fut>(f: F) -> Arc<dyn ParseHandler>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnParse(f))
}

/// Wraps an async closure into an [`AidHandler`] trait object.
pub fn aid_fn<F, Fut>(f: F) -> Arc<dyn AidHandler>
where
    F: Fn(Arc<Context>, AidArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    Arc::new(FnAid(f))
}

/// One named parsing rule inside a spider's rule tree.
pub struct Rule {
    item_fields: RwLock<Vec<String>>,
    parse: Option<Arc<dyn ParseHandler>>,
    aid: Option<Arc<dyn AidHandler>>,
}

impl Default for Rule {
    fn default() -> Self {
        Rule::new()
    }
}

impl Rule {
    /// An empty rule with no handlers and no fields.
    pub fn new() -> Self {
        Rule {
            item_fields: RwLock::new(Vec::new()),
            parse: None,
            aid: None,
        }
    }

    /// Declares the rule's initial item fields, in output order.
    pub fn with_item_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            self.upsert_field(&field.into());
        }
        self
    }

    /// Attaches the parse handler.
    pub fn with_parse<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.parse = Some(parse_fn(f));
        self
    }

    /// Attaches the aid handler.
    pub fn with_aid<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>, AidArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        self.aid = Some(aid_fn(f));
        self
    }

    /// Snapshot of the current field list.
    pub fn item_fields(&self) -> Vec<String> {
        self.item_fields.read().clone()
    }

    /// Field name at `index`, or `None` when out of range.
    pub fn field_at(&self, index: usize) -> Option<String> {
        self.item_fields.read().get(index).cloned()
    }

    /// Index of `field`, or `None` when the schema does not contain it.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.item_fields.read().iter().position(|f| f == field)
    }

    /// Ensures `field` is in the schema, returning its index.
    ///
    /// The sole mutator of a rule's schema: existing names keep their index,
    /// new names append. Idempotent under repeated calls.
    pub fn upsert_field(&self, field: &str) -> usize {
        let mut fields = self.item_fields.write();
        if let Some(index) = fields.iter().position(|f| f == field) {
            return index;
        }
        fields.push(field.to_string());
        fields.len() - 1
    }

    /// Resolves a position-indexed payload against the schema, producing a
    /// named mapping. Indices outside the schema are skipped with a warning
    /// rather than emitted under an empty name.
    pub fn project_positional(&self, entries: BTreeMap<usize, Value>) -> Map<String, Value> {
        let fields = self.item_fields.read();
        let mut out = Map::new();
        for (index, value) in entries {
            match fields.get(index) {
                Some(name) => {
                    out.insert(name.clone(), value);
                }
                None => warn!(
                    "positional index {index} is outside the rule schema ({} fields); value skipped",
                    fields.len()
                ),
            }
        }
        out
    }

    /// The parse handler, when defined.
    pub fn parse_handler(&self) -> Option<&Arc<dyn ParseHandler>> {
        self.parse.as_ref()
    }

    /// The aid handler, when defined.
    pub fn aid_handler(&self) -> Option<&Arc<dyn AidHandler>> {
        self.aid.as_ref()
    }

    /// Structurally independent duplicate: own field list, shared handlers.
    fn duplicate(&self) -> Rule {
        Rule {
            item_fields: RwLock::new(self.item_fields.read().clone()),
            parse: self.parse.clone(),
            aid: self.aid.clone(),
        }
    }
}

/// A spider's rule tree: the root entry plus the named rules.
pub struct RuleTree {
    root: Arc<dyn ParseHandler>,
    rules: HashMap<String, Arc<Rule>>,
}

/// A registered spider definition.
pub struct Spider {
    name: RwLock<String>,
    description: String,
    request_type: Method,
    rule_tree: RuleTree,
    status: RwLock<SpiderStatus>,
    intake: RwLock<Option<Arc<dyn SchedulerIntake>>>,
}

impl Spider {
    /// Starts building a spider definition.
    pub fn builder(name: impl Into<String>) -> SpiderBuilder {
        SpiderBuilder::new(name)
    }

    /// The spider's (possibly registry-renamed) display name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Default HTTP verb for requests that do not set one.
    pub fn request_type(&self) -> Method {
        self.request_type.clone()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SpiderStatus {
        *self.status.read()
    }

    /// The distinguished root entry handler.
    pub fn root_handler(&self) -> &Arc<dyn ParseHandler> {
        &self.rule_tree.root
    }

    /// All named rules.
    pub fn rules(&self) -> &HashMap<String, Arc<Rule>> {
        &self.rule_tree.rules
    }

    /// Looks up a rule by name.
    pub fn get_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.rule_tree.rules.get(name).cloned()
    }

    /// Looks up a rule the caller guarantees to exist.
    ///
    /// # Panics
    ///
    /// Panics when the rule is absent; use [`Spider::get_rule`] for
    /// anything coming from outside the spider's own definition.
    pub fn must_get_rule(&self, name: &str) -> Arc<Rule> {
        match self.get_rule(name) {
            Some(rule) => rule,
            None => panic!("spider `{}` has no rule named `{name}`", self.name()),
        }
    }

    /// Snapshot of a rule's field list.
    pub fn get_item_fields(&self, rule: &Rule) -> Vec<String> {
        rule.item_fields()
    }

    /// Field name at `index` in `rule`, or `None` when out of range.
    pub fn get_item_field(&self, rule: &Rule, index: usize) -> Option<String> {
        rule.field_at(index)
    }

    /// Index of `field` in `rule`, or `None` when absent.
    pub fn get_item_field_index(&self, rule: &Rule, field: &str) -> Option<usize> {
        rule.field_index(field)
    }

    /// Ensures `field` is in `rule`'s schema, returning its index.
    pub fn upsert_item_field(&self, rule: &Rule, field: &str) -> usize {
        rule.upsert_field(field)
    }

    /// Produces a structurally independent copy of this definition.
    ///
    /// Each rule gets its own field-list storage so concurrently running
    /// instances never race on schema growth; the parse/aid handlers are
    /// stateless behavior and stay shared. The copy starts Stopped with no
    /// intake attached.
    pub fn copy(&self) -> Spider {
        let rules = self
            .rule_tree
            .rules
            .iter()
            .map(|(name, rule)| (name.clone(), Arc::new(rule.duplicate())))
            .collect();
        Spider {
            name: RwLock::new(self.name()),
            description: self.description.clone(),
            request_type: self.request_type.clone(),
            rule_tree: RuleTree {
                root: Arc::clone(&self.rule_tree.root),
                rules,
            },
            status: RwLock::new(SpiderStatus::Stopped),
            intake: RwLock::new(None),
        }
    }

    /// Starts the crawl: flips Stopped→Running, stores the scheduler intake,
    /// and invokes the root entry with a freshly acquired, response-less
    /// context. Running the root IS the starting push onto the scheduler.
    pub async fn start(self: Arc<Self>, pool: &ContextPool, intake: Arc<dyn SchedulerIntake>) {
        {
            let mut status = self.status.write();
            if *status == SpiderStatus::Running {
                debug!("spider `{}` is already running", self.name());
                return;
            }
            *status = SpiderStatus::Running;
        }
        *self.intake.write() = Some(intake);

        info!("starting spider `{}`", self.name());
        let ctx = pool.acquire(Arc::clone(&self), None);
        self.rule_tree.root.parse(Arc::clone(&ctx)).await;
        pool.release(ctx);
    }

    /// Stops the crawl. Idempotent; in-flight parse calls are not
    /// interrupted, the transition is advisory for the external scheduler.
    pub fn stop(&self) {
        let mut status = self.status.write();
        if *status == SpiderStatus::Stopped {
            trace!("spider `{}` is already stopped", self.name());
            return;
        }
        *status = SpiderStatus::Stopped;
        info!("stopped spider `{}`", self.name());
    }

    /// Hands a finalized request to the attached scheduler intake.
    pub async fn request_push(&self, request: Request) -> Result<(), SpiderError> {
        let intake = { self.intake.read().clone() };
        match intake {
            Some(intake) => intake.push(request).await,
            None => {
                let err = SpiderError::ConfigurationError(format!(
                    "spider `{}` has no scheduler intake attached",
                    self.name()
                ));
                error!("{err}");
                Err(err)
            }
        }
    }
}

/// Fluent builder for [`Spider`] definitions.
pub struct SpiderBuilder {
    name: String,
    description: String,
    request_type: Method,
    root: Option<Arc<dyn ParseHandler>>,
    rules: HashMap<String, Arc<Rule>>,
}

impl SpiderBuilder {
    /// Starts a definition with the given display name.
    pub fn new(name: impl Into<String>) -> Self {
        SpiderBuilder {
            name: name.into(),
            description: String::new(),
            request_type: Method::GET,
            root: None,
            rules: HashMap::new(),
        }
    }

    /// Sets the description shown in registry listings.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the default HTTP verb for the spider's requests.
    pub fn request_type(mut self, method: Method) -> Self {
        self.request_type = method;
        self
    }

    /// Sets the root entry handler.
    pub fn root<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.root = Some(parse_fn(f));
        self
    }

    /// Adds a named rule to the tree.
    pub fn rule(mut self, name: impl Into<String>, rule: Rule) -> Self {
        let name = name.into();
        if self.rules.insert(name.clone(), Arc::new(rule)).is_some() {
            warn!("rule `{name}` defined twice; the later definition wins");
        }
        self
    }

    /// Validates and assembles the spider.
    ///
    /// The root handler is the one structurally required piece; a spider
    /// without it could never seed a crawl.
    pub fn build(self) -> Result<Spider, SpiderError> {
        let root = self.root.ok_or_else(|| {
            SpiderError::ConfigurationError(format!(
                "spider `{}` has no root entry handler",
                self.name
            ))
        })?;
        Ok(Spider {
            name: RwLock::new(self.name),
            description: self.description,
            request_type: self.request_type,
            rule_tree: RuleTree {
                root,
                rules: self.rules,
            },
            status: RwLock::new(SpiderStatus::Stopped),
            intake: RwLock::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::ChannelIntake;
    use serde_json::json;

    fn price_spider() -> Spider {
        Spider::builder("prices")
            .description("test definition")
            .root(|ctx| async move {
                ctx.enqueue(Request::new("https://example.com/list").with_rule("list"))
                    .await;
            })
            .rule(
                "list",
                Rule::new()
                    .with_item_fields(["id", "price"])
                    .with_parse(|_ctx| async move {}),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_a_root_handler() {
        let err = Spider::builder("empty").build();
        assert!(matches!(err, Err(SpiderError::ConfigurationError(_))));
    }

    #[test]
    fn upsert_field_is_idempotent() {
        let spider = price_spider();
        let rule = spider.must_get_rule("list");
        assert_eq!(spider.upsert_item_field(&rule, "price"), 1);
        assert_eq!(spider.upsert_item_field(&rule, "currency"), 2);
        assert_eq!(spider.upsert_item_field(&rule, "currency"), 2);
        assert_eq!(rule.item_fields(), vec!["id", "price", "currency"]);
    }

    #[test]
    fn field_lookups_are_bounds_checked() {
        let spider = price_spider();
        let rule = spider.must_get_rule("list");
        assert_eq!(spider.get_item_field(&rule, 0).as_deref(), Some("id"));
        assert_eq!(spider.get_item_field(&rule, 9), None);
        assert_eq!(spider.get_item_field_index(&rule, "price"), Some(1));
        assert_eq!(spider.get_item_field_index(&rule, "missing"), None);
    }

    #[test]
    fn positional_projection_follows_the_schema() {
        let spider = price_spider();
        let rule = spider.must_get_rule("list");
        let named = rule.project_positional(
            [(0, json!("x")), (1, json!("y")), (7, json!("dropped"))]
                .into_iter()
                .collect(),
        );
        assert_eq!(named.len(), 2);
        assert_eq!(named["id"], json!("x"));
        assert_eq!(named["price"], json!("y"));
    }

    #[test]
    fn copy_is_structurally_independent_but_shares_handlers() {
        let spider = price_spider();
        let copy = spider.copy();

        let original_rule = spider.must_get_rule("list");
        let copied_rule = copy.must_get_rule("list");
        copied_rule.upsert_field("extra");

        assert_eq!(original_rule.item_fields(), vec!["id", "price"]);
        assert_eq!(copied_rule.item_fields(), vec!["id", "price", "extra"]);
        assert!(Arc::ptr_eq(
            original_rule.parse_handler().unwrap(),
            copied_rule.parse_handler().unwrap()
        ));
        assert_eq!(copy.status(), SpiderStatus::Stopped);
    }

    #[tokio::test]
    async fn start_and_stop_drive_the_status_machine() {
        let spider = Arc::new(price_spider());
        let pool = ContextPool::new();
        let (intake, rx) = ChannelIntake::unbounded();

        assert_eq!(spider.status(), SpiderStatus::Stopped);
        spider.clone().start(&pool, intake).await;
        assert_eq!(spider.status(), SpiderStatus::Running);

        // The root pushed the seed request through the intake.
        let seeded = rx.recv().await.unwrap();
        assert_eq!(seeded.url, "https://example.com/list");
        assert_eq!(seeded.rule_name(), Some("list"));

        spider.stop();
        assert_eq!(spider.status(), SpiderStatus::Stopped);
        spider.stop();
        assert_eq!(spider.status(), SpiderStatus::Stopped);
    }
}
