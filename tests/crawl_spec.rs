//! End-to-end exercises of the engine loop: a spider definition, a hand
//! driven fetch cycle, rule dispatch, and collector drains, with the
//! downloader and scheduler simulated in the test.

use arachne_core::{
    ChannelIntake, ContextPool, ItemPayload, PoolConfig, Request, Response, Rule, Selector,
    Spider, SpiderRegistry, StatCollector,
};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const SHELF_URL: &str = "https://books.example/shelf";

fn site() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        (
            SHELF_URL,
            r#"<html><body>
                <ul>
                  <li><a class="book" href="https://books.example/b/1">One</a></li>
                  <li><a class="book" href="https://books.example/b/2">Two</a></li>
                </ul>
            </body></html>"#,
        ),
        (
            "https://books.example/b/1",
            r#"<html><body><h1 class="title">Practical Weaving</h1><span class="price">12.50</span></body></html>"#,
        ),
        (
            "https://books.example/b/2",
            r#"<html><body><h1 class="title">Silk and Steel</h1><span class="price">8.00</span></body></html>"#,
        ),
    ])
}

fn bookstore_spider() -> Spider {
    Spider::builder("bookstore")
        .description("scrapes the example shelf")
        .root(|ctx| async move {
            ctx.enqueue(Request::new(SHELF_URL).with_rule("shelf")).await;
        })
        .rule(
            "shelf",
            Rule::new().with_parse(|ctx| async move {
                let doc = ctx.document().expect("shelf page parses");
                let links = Selector::parse("a.book").unwrap();
                let hrefs: Vec<String> = doc
                    .select(&links)
                    .filter_map(|a| a.value().attr("href"))
                    .map(String::from)
                    .collect();
                for href in hrefs {
                    ctx.enqueue(Request::new(href).with_rule("book")).await;
                }
            }),
        )
        .rule(
            "book",
            Rule::new()
                .with_item_fields(["title", "price"])
                .with_parse(|ctx| async move {
                    let doc = ctx.document().expect("book page parses");
                    let title_sel = Selector::parse("h1.title").unwrap();
                    let price_sel = Selector::parse("span.price").unwrap();
                    let title: String =
                        doc.select(&title_sel).flat_map(|n| n.text()).collect();
                    let price: String =
                        doc.select(&price_sel).flat_map(|n| n.text()).collect();
                    ctx.emit_item(
                        ItemPayload::positional([(0, json!(title)), (1, json!(price))]),
                        None,
                    );
                }),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn full_crawl_cycle_extracts_items_with_provenance() {
    let pages = site();
    let stats = Arc::new(StatCollector::new());
    let pool = ContextPool::with_stats(PoolConfig::default(), Arc::clone(&stats));
    let registry = SpiderRegistry::new();
    let spider = registry.add(bookstore_spider());
    let (intake, rx) = ChannelIntake::unbounded();

    spider.clone().start(&pool, intake).await;

    let mut collected = Vec::new();
    while let Ok(Some(request)) = rx.try_recv() {
        let body = *pages.get(request.url.as_str()).expect("known page");
        let ctx = pool.acquire(Arc::clone(&spider), Some(request.clone()));
        ctx.attach_response(Response::ok(body, request));
        let ctx = ctx.dispatch(None).await;
        collected.extend(ctx.drain_items());
        pool.release(ctx);
    }

    assert_eq!(collected.len(), 2);
    for record in &collected {
        assert_eq!(record.rule, "book");
        assert_eq!(record.referer, SHELF_URL);
        assert!(record.url.starts_with("https://books.example/b/"));
    }
    let titles: Vec<&str> = collected
        .iter()
        .map(|r| r.fields["title"].as_str().unwrap())
        .collect();
    assert!(titles.contains(&"Practical Weaving"));
    assert!(titles.contains(&"Silk and Steel"));

    // Three fetches drove the crawl; the pool recycled their contexts.
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.requests_enqueued, 3);
    assert_eq!(snapshot.items_emitted, 2);
    assert!(pool.idle_len() >= 1);
}

#[tokio::test]
async fn gbk_pages_reach_rules_as_utf8() {
    let pool = ContextPool::new();
    let spider = Arc::new(
        Spider::builder("legacy-news")
            .root(|ctx| async move {
                ctx.enqueue(Request::new("https://news.example/gb").with_rule("story"))
                    .await;
            })
            .rule(
                "story",
                Rule::new().with_parse(|ctx| async move {
                    ctx.emit_item(
                        ItemPayload::named([("body", json!(ctx.text_string()))]),
                        None,
                    );
                }),
            )
            .build()
            .unwrap(),
    );
    let (intake, rx) = ChannelIntake::unbounded();
    spider.clone().start(&pool, intake).await;
    let request = rx.recv().await.unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=gbk"),
    );
    // GBK bytes for 你好
    let ctx = pool.acquire(Arc::clone(&spider), Some(request.clone()));
    ctx.attach_response(Response::new(
        StatusCode::OK,
        headers,
        b"\xc4\xe3\xba\xc3".to_vec(),
        request,
    ));
    let ctx = ctx.dispatch(None).await;

    let items = ctx.drain_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].fields["body"], json!("你好"));
}

#[tokio::test]
async fn registry_keeps_colliding_spiders_apart() {
    let registry = SpiderRegistry::new();
    registry.add(bookstore_spider());

    let gold_a = registry.add(
        Spider::builder("Gold")
            .root(|_ctx| async move {})
            .build()
            .unwrap(),
    );
    let gold_b = registry.add(
        Spider::builder("Gold")
            .root(|_ctx| async move {})
            .build()
            .unwrap(),
    );

    assert_eq!(gold_a.name(), "Gold");
    assert_eq!(gold_b.name(), "Gold(2)");
    assert!(Arc::ptr_eq(
        &registry.get_by_name("Gold").unwrap(),
        &gold_a
    ));
    assert!(Arc::ptr_eq(
        &registry.get_by_name("Gold(2)").unwrap(),
        &gold_b
    ));

    let names: Vec<String> = registry.get().iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["bookstore", "Gold", "Gold(2)"]);
}

#[tokio::test]
async fn released_contexts_start_the_next_operation_clean() {
    let pool = ContextPool::new();
    let spider = Arc::new(bookstore_spider());

    let mut request = Request::new("https://books.example/b/1");
    request.set_rule_name("book");
    let ctx = pool.acquire(Arc::clone(&spider), Some(request.clone()));
    ctx.attach_response(Response::ok(site()["https://books.example/b/1"], request));
    let ctx = ctx.dispatch(None).await;
    assert_eq!(ctx.drain_items().len(), 1);
    pool.release(ctx);

    let reused = pool.acquire(spider, Some(Request::new("https://books.example/b/2")));
    assert!(reused.drain_items().is_empty());
    assert!(reused.error().is_none());
    assert!(reused.status().is_none());
    assert!(reused.document().is_none());
}
