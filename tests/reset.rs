//! Per-request provider state is gone by the next request.

mod common;

use std::sync::Arc;

use hyper::StatusCode;
use serde_json::json;

use common::{get, json_body, set_cookies, with_cookies};
use resident_worker::demo_routes;
use resident_worker::kernel::{self, Router};
use resident_worker::services::{CookieJar, RedisManager, RedisServer, Store};

fn stateful_routes() -> Router {
    Router::new()
        .get("/queue", |app, _| {
            let jar = app.make_as::<CookieJar>("cookie")?;
            jar.queue(jar.make("tracking", "first", 10));
            Ok(kernel::text(StatusCode::OK, "queued"))
        })
        .get("/select", |app, _| {
            app.make_as::<RedisManager>("redis")?.connection(None).select(5);
            Ok(kernel::text(StatusCode::OK, "selected"))
        })
        .get("/state", |app, _| {
            let db = app.make_as::<RedisManager>("redis")?.connection(None).database();
            let jar = app.make_as::<CookieJar>("cookie")?;
            let session = app.make_as::<Store>("session.store")?;
            kernel::json(
                StatusCode::OK,
                &json!({
                    "database": db,
                    "tracking_queued": jar.has_queued("tracking"),
                    "note": session.get("note"),
                }),
            )
        })
        .get("/note", |app, _| {
            app.make_as::<Store>("session.store")?.put("note", "first request");
            Ok(kernel::text(StatusCode::OK, "noted"))
        })
}

#[tokio::test]
async fn cookies_database_and_session_do_not_survive() {
    let config = common::config();
    let (mut worker, mut supervisor) = common::worker(&config, stateful_routes());

    let client = async move {
        let queued = supervisor.roundtrip(&get("/queue")).await;
        supervisor.roundtrip(&get("/select")).await;
        supervisor.roundtrip(&get("/note")).await;
        let state = supervisor.roundtrip(&get("/state")).await;
        supervisor.close().await;
        (queued, state)
    };

    let (stats, (queued, state)) = tokio::join!(worker.run(), client);
    assert_eq!(stats.unwrap().served, 4);

    assert_eq!(set_cookies(&queued).get("tracking").map(String::as_str), Some("first"));
    assert!(!set_cookies(&state).contains_key("tracking"));
    assert_eq!(
        json_body(&state),
        json!({"database": 0, "tracking_queued": false, "note": null})
    );
}

#[tokio::test]
async fn session_data_persists_only_through_the_session_cookie() {
    let config = common::config();
    let redis = RedisServer::new();
    let (mut worker, mut supervisor) =
        common::worker_with_redis(&config, demo_routes(), Arc::clone(&redis));

    let client = async move {
        let first = supervisor.roundtrip(&get("/visits")).await;
        let second = supervisor
            .roundtrip(&with_cookies(get("/visits"), &set_cookies(&first)))
            .await;
        let stranger = supervisor.roundtrip(&get("/visits")).await;
        supervisor.close().await;
        (first, second, stranger)
    };

    let (_, (first, second, stranger)) = tokio::join!(worker.run(), client);
    assert_eq!(json_body(&first)["visits"], 1);
    assert_eq!(json_body(&second)["visits"], 2);
    assert_eq!(json_body(&stranger)["visits"], 1);

    // Two distinct sessions were written to the shared keyspace.
    assert_eq!(redis.dbsize(0), 2);
}

#[tokio::test]
async fn providers_are_fresh_instances_after_each_request() {
    let config = common::config();
    let (mut worker, mut supervisor) = common::worker(&config, demo_routes());
    let app = Arc::clone(worker.app());
    let before = app.make_as::<CookieJar>("cookie").unwrap();

    let client = async move {
        supervisor.roundtrip(&get("/")).await;
        supervisor.close().await;
    };
    let (stats, ()) = tokio::join!(worker.run(), client);
    assert_eq!(stats.unwrap().served, 1);

    let after = app.make_as::<CookieJar>("cookie").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.queued_cookies().is_empty());
}

#[tokio::test]
async fn unknown_reset_names_are_ignored() {
    let mut config = common::config();
    config.reset.providers = vec!["cookie".into(), "queue".into()];
    let (mut worker, mut supervisor) = common::worker(&config, demo_routes());
    let app = Arc::clone(worker.app());

    let client = async move {
        let response = supervisor.roundtrip(&get("/")).await;
        supervisor.close().await;
        response
    };
    let (stats, response) = tokio::join!(worker.run(), client);
    let stats = stats.unwrap();
    assert_eq!((stats.served, stats.failed), (1, 0));
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.get_provider("queue").is_none());
}
