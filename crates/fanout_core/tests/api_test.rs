/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP surface tests, driven in-process through the router.

mod common;

use axum::body::Body;
use common::*;
use fanout_core::api::{router, ApiState, CLIENT_HEADER, INTERNAL_HEADER, USER_HEADER};
use fanout_core::hub::Subscriptions;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "internal-secret";

fn app() -> (TempDir, axum::Router, Arc<fanout_core::Engine>) {
    let (dir, engine) = engine_with(&["alice", "bob"]);
    let engine = Arc::new(engine);
    let state = ApiState {
        engine: engine.clone(),
        subscriptions: Subscriptions::open(dir.path().join("fanout.db")).unwrap(),
        internal_token: TOKEN.to_string(),
        max_body_bytes: 64 * 1024,
    };
    (dir, router(state), engine)
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, as_user: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(u) = as_user {
        b = b.header(USER_HEADER, u);
    }
    b.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, as_user: Option<&str>, body: &Value) -> Request<Body> {
    let mut b = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(u) = as_user {
        b = b.header(USER_HEADER, u);
    }
    b.body(Body::from(body.to_string())).unwrap()
}

fn path_of(id: &str) -> String {
    id.strip_prefix(BASE).unwrap().to_string()
}

// =============================================================================
// Health & routing
// =============================================================================

#[tokio::test]
async fn test_health_and_security_headers() {
    let (_dir, app, _) = app();
    let resp = app.clone().oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");

    let resp = app.clone().oneshot(get("/readyz", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, body) = send(&app, get("/nowhere", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
}

// =============================================================================
// Users
// =============================================================================

#[tokio::test]
async fn test_registration_needs_internal_token() {
    let (_dir, app, _) = app();
    let body = json!({ "nickname": "carol", "displayName": "Carol" });

    let (status, _) = send(&app, post_json("/api/users", None, &body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut req = post_json("/api/users", None, &body);
    req.headers_mut().insert(INTERNAL_HEADER, TOKEN.parse().unwrap());
    let (status, created) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["nickname"], "carol");
    assert_eq!(created["profile"]["displayName"], "Carol");

    let mut again = post_json("/api/users", None, &body);
    again.headers_mut().insert(INTERNAL_HEADER, TOKEN.parse().unwrap());
    let (status, _) = send(&app, again).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, profile) = send(&app, get("/api/user/carol/profile", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["objectType"], "person");
    let (status, _) = send(&app, get("/api/user/nobody", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Posting
// =============================================================================

#[tokio::test]
async fn test_posting_requires_matching_user() {
    let (_dir, app, _) = app();
    let activity = json!({ "verb": "post", "object": { "objectType": "note", "content": "hi" } });

    let (status, _) = send(&app, post_json("/api/user/alice/feed", None, &activity)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut client_only = post_json("/api/user/alice/feed", None, &activity);
    client_only.headers_mut().insert(CLIENT_HEADER, "app".parse().unwrap());
    let (status, _) = send(&app, client_only).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, post_json("/api/user/alice/feed", Some("bob"), &activity)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, posted) = send(&app, post_json("/api/user/alice/feed", Some("alice"), &activity)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posted["verb"], "post");
    assert_eq!(posted["cc"][0]["id"], format!("{BASE}/api/user/alice/followers"));
    assert!(posted.get("to").is_none());
}

#[tokio::test]
async fn test_nickname_in_path_is_case_insensitive() {
    let (_dir, app, _) = app();
    let activity = json!({ "verb": "post", "object": { "objectType": "note", "content": "hi" } });
    let (status, posted) = send(&app, post_json("/api/user/Alice/feed", Some("Alice"), &activity)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, page) = send(&app, get("/api/user/ALICE/feed", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"][0]["id"], posted["id"]);
    let (status, _) = send(&app, get("/api/user/ALICE/profile", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_endpoint_mismatch_and_bad_bodies_are_400() {
    let (_dir, app, _) = app();
    let note = json!({ "verb": "post", "object": { "objectType": "note", "content": "hi" } });
    let (status, _) = send(&app, post_json("/api/user/alice/feed/minor", Some("alice"), &note)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, post_json("/api/user/alice/feed", Some("alice"), &json!("nope"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid JSON"));

    let (status, _) = send(&app, post_json("/api/user/alice/feed/major", Some("alice"), &note)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_inbox_post_is_not_allowed() {
    let (_dir, app, _) = app();
    let activity = json!({ "verb": "post", "object": { "objectType": "note" } });
    let (status, _) = send(&app, post_json("/api/user/alice/inbox", Some("bob"), &activity)).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Reading
// =============================================================================

#[tokio::test]
async fn test_reading_streams_and_objects() {
    let (_dir, app, engine) = app();
    let public = json!({
        "verb": "post",
        "to": [{ "id": fanout_protocol::PUBLIC_COLLECTION, "objectType": "collection" }],
        "object": { "objectType": "note", "content": "open" }
    });
    let (_, posted) = send(&app, post_json("/api/user/alice/feed", Some("alice"), &public)).await;
    let activity_id = posted["id"].as_str().unwrap().to_string();
    let object_id = posted["object"]["id"].as_str().unwrap().to_string();

    let (status, page) = send(&app, get("/api/user/alice/feed", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["totalItems"], 1);
    assert_eq!(page["items"][0]["id"], activity_id.as_str());
    assert_eq!(page["links"]["first"]["href"], format!("{BASE}/api/user/alice/feed"));

    let (status, single) = send(&app, get(&path_of(&activity_id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["object"]["likes"]["totalItems"], 0);

    let (status, object) = send(&app, get(&path_of(&object_id), Some("bob"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(object["liked"], false);

    let (status, likes) = send(&app, get(&format!("{}/likes", path_of(&object_id)), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(likes["totalItems"], 0);

    let (status, _) = send(&app, get("/api/user/alice/inbox", Some("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, get("/api/user/bob/inbox/major", Some("bob"))).await;
    assert_eq!(status, StatusCode::OK);

    let unknown = urlencoding::encode(&engine.ids().activity_id("missing")).into_owned();
    let (status, _) = send(&app, get(&format!("/api/user/alice/feed?before={unknown}"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/api/user/alice/feed?count=abc", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/api/user/alice/feed?count=500", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_object_put_and_delete() {
    let (_dir, app, _) = app();
    let note = json!({ "verb": "post", "object": { "objectType": "note", "content": "v1" } });
    let (_, posted) = send(&app, post_json("/api/user/alice/feed", Some("alice"), &note)).await;
    let path = path_of(posted["object"]["id"].as_str().unwrap());

    let put = |user: &str| {
        Request::builder()
            .method("PUT")
            .uri(&path)
            .header(USER_HEADER, user)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "content": "v2" }).to_string()))
            .unwrap()
    };
    let (status, _) = send(&app, put("bob")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, updated) = send(&app, put("alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["content"], "v2");

    let delete = Request::builder()
        .method("DELETE")
        .uri(&path)
        .header(USER_HEADER, "alice")
        .body(Body::empty())
        .unwrap();
    let (status, deleted) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["verb"], "delete");

    let (status, _) = send(&app, get(&path, Some("alice"))).await;
    assert_eq!(status, StatusCode::GONE);

    let activity_path = path_of(posted["id"].as_str().unwrap());
    let put_activity = Request::builder()
        .method("PUT")
        .uri(&activity_path)
        .header(USER_HEADER, "alice")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = send(&app, put_activity).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Push hub
// =============================================================================

#[tokio::test]
async fn test_hub_subscription_control() {
    let (_dir, app, _) = app();
    let topic = urlencoding::encode(&format!("{BASE}/api/user/alice/feed")).into_owned();
    let form = |mode: &str| {
        Request::builder()
            .method("POST")
            .uri("/main/push/hub")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "hub.mode={mode}&hub.topic={topic}&hub.callback=https%3A%2F%2Fsub.test%2Fcb"
            )))
            .unwrap()
    };
    let (status, _) = send(&app, form("subscribe")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&app, form("publish")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let foreign = json!({
        "hub.mode": "subscribe",
        "hub.topic": "https://other.test/api/user/x/feed",
        "hub.callback": "https://sub.test/cb"
    });
    let (status, _) = send(&app, post_json("/main/push/hub", None, &foreign)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
