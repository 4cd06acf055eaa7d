/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{body::Body, extract::DefaultBodyLimit, routing::any, Router};
use fanout_protocol::{Activity, ActivityObject, HubRequest, RegisterUser, Verb};
use http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::classify::Endpoint;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::hub::Subscriptions;
use crate::stream_reader::PageParams;
use crate::stream_store::StreamKey;
use crate::visibility::Viewer;

pub const USER_HEADER: &str = "X-Fanout-User";
pub const CLIENT_HEADER: &str = "X-Fanout-Client";
pub const INTERNAL_HEADER: &str = "X-Fanout-Internal-Token";

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub subscriptions: Subscriptions,
    pub internal_token: String,
    pub max_body_bytes: usize,
}

pub fn router(state: ApiState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .fallback(any(move |req| {
            let st = state.clone();
            async move { handle_request(&st, req).await }
        }))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

pub async fn handle_request(state: &ApiState, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();
    let mut segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    // nicknames are stored lowercase, as the user header is read
    let nick = match segs.as_slice() {
        ["api", "user", nick, ..] => Some(nick.to_ascii_lowercase()),
        _ => None,
    };
    if let Some(nick) = &nick {
        segs[2] = nick;
    }
    let resp = match (method.as_str(), segs.as_slice()) {
        ("GET", ["healthz"]) => simple(StatusCode::OK, "ok"),
        ("GET", ["readyz"]) => readyz_get(state).await,
        ("POST", ["api", "users"]) => register_post(state, req).await,
        ("GET", ["api", "user", nick]) => user_get(state, nick).await,
        ("GET", ["api", "user", nick, "profile"]) => profile_get(state, nick).await,
        ("POST", ["api", "user", nick, "feed"]) => feed_post(state, req, nick, Endpoint::General).await,
        ("POST", ["api", "user", nick, "feed", "major"]) => feed_post(state, req, nick, Endpoint::MajorOnly).await,
        ("POST", ["api", "user", nick, "feed", "minor"]) => feed_post(state, req, nick, Endpoint::MinorOnly).await,
        ("POST", ["api", "user", _, "inbox", ..]) => {
            error_json(StatusCode::METHOD_NOT_ALLOWED, "remote delivery is not supported")
        }
        ("GET", ["api", "user", nick, rest @ ..]) => match StreamKey::for_user_path(nick, rest) {
            Some(key) => stream_get(state, req, key).await,
            None => error_json(StatusCode::NOT_FOUND, "not found"),
        },
        ("GET", ["api", "activity", hex]) => activity_get(state, req, hex).await,
        ("PUT" | "DELETE", ["api", "activity", _]) => {
            error_json(StatusCode::BAD_REQUEST, "activities are immutable")
        }
        ("GET", ["api", "collection", hex, "members"]) => {
            let id = state.engine.ids().object_id("collection", hex);
            stream_get(state, req, StreamKey::Members(id)).await
        }
        ("GET", ["api", ty, hex, kind @ ("likes" | "shares" | "replies")]) => {
            let id = state.engine.ids().object_id(ty, hex);
            let key = match *kind {
                "likes" => StreamKey::Likes(id),
                "shares" => StreamKey::Shares(id),
                _ => StreamKey::Replies(id),
            };
            stream_get(state, req, key).await
        }
        ("GET", ["api", ty, hex]) => object_get(state, req, ty, hex).await,
        ("PUT", ["api", ty, hex]) => object_put(state, req, ty, hex).await,
        ("DELETE", ["api", ty, hex]) => object_delete(state, req, ty, hex).await,
        ("POST", ["main", "push", "hub"]) => hub_post(state, req).await,
        _ => error_json(StatusCode::NOT_FOUND, "not found"),
    };
    add_security_headers(resp)
}

async fn readyz_get(state: &ApiState) -> Response<Body> {
    let ok = blocking(state, |e| Ok(e.repository().health_check()?)).await.is_ok();
    if ok {
        simple(StatusCode::OK, "ready")
    } else {
        simple(StatusCode::SERVICE_UNAVAILABLE, "db not ready")
    }
}

async fn register_post(state: &ApiState, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    if let Err(resp) = require_internal(state, &parts.headers) {
        return resp;
    }
    let reg: RegisterUser = match read_json(state, body).await {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    let res = blocking(state, move |e| e.register_user(&reg.nickname, reg.display_name.as_deref())).await;
    respond(StatusCode::CREATED, res)
}

async fn user_get(state: &ApiState, nick: &str) -> Response<Body> {
    let nick = nick.to_string();
    respond(StatusCode::OK, blocking(state, move |e| e.get_user(&nick)).await)
}

async fn profile_get(state: &ApiState, nick: &str) -> Response<Body> {
    let nick = nick.to_string();
    respond(StatusCode::OK, blocking(state, move |e| Ok(e.get_user(&nick)?.profile)).await)
}

async fn feed_post(state: &ApiState, req: Request<Body>, nick: &str, endpoint: Endpoint) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let caller = match authenticated_as(&parts.headers, nick) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let activity: Activity = match read_json(state, body).await {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    let res = blocking(state, move |e| e.distribute(&caller, endpoint, activity)).await;
    respond(StatusCode::OK, res)
}

async fn stream_get(state: &ApiState, req: Request<Body>, key: StreamKey) -> Response<Body> {
    let viewer = viewer_of(req.headers());
    let query = parse_query(req.uri().query());
    let params = match PageParams::from_query(&query, state.engine.settings()) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let res = blocking(state, move |e| e.read_stream(&key, &params, &viewer)).await;
    respond(StatusCode::OK, res)
}

async fn activity_get(state: &ApiState, req: Request<Body>, hex: &str) -> Response<Body> {
    let viewer = viewer_of(req.headers());
    let id = state.engine.ids().activity_id(hex);
    respond(StatusCode::OK, blocking(state, move |e| e.read_activity(&id, &viewer)).await)
}

async fn object_get(state: &ApiState, req: Request<Body>, ty: &str, hex: &str) -> Response<Body> {
    let viewer = viewer_of(req.headers());
    let id = state.engine.ids().object_id(ty, hex);
    respond(StatusCode::OK, blocking(state, move |e| e.read_object(&id, &viewer)).await)
}

/// PUT on an object is an `update` posted on the caller's behalf.
async fn object_put(state: &ApiState, req: Request<Body>, ty: &str, hex: &str) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let Some(caller) = viewer_of(&parts.headers).nickname().map(str::to_string) else {
        return error_json(StatusCode::UNAUTHORIZED, "user credentials required");
    };
    let mut patch: ActivityObject = match read_json(state, body).await {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    patch.id = state.engine.ids().object_id(ty, hex);
    patch.object_type = ty.to_string();
    let activity = Activity::new(Verb::Update, patch);
    let res = blocking(state, move |e| {
        let done = e.distribute(&caller, Endpoint::General, activity)?;
        done.object
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("update without object")))
    })
    .await;
    respond(StatusCode::OK, res)
}

/// DELETE on an object is a `delete` posted on the caller's behalf.
async fn object_delete(state: &ApiState, req: Request<Body>, ty: &str, hex: &str) -> Response<Body> {
    let Some(caller) = viewer_of(req.headers()).nickname().map(str::to_string) else {
        return error_json(StatusCode::UNAUTHORIZED, "user credentials required");
    };
    let object = ActivityObject {
        id: state.engine.ids().object_id(ty, hex),
        object_type: ty.to_string(),
        ..Default::default()
    };
    let activity = Activity::new(Verb::Delete, object);
    let res = blocking(state, move |e| e.distribute(&caller, Endpoint::General, activity)).await;
    respond(StatusCode::OK, res)
}

async fn hub_post(state: &ApiState, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let hub_req: HubRequest = if is_json {
        match read_json(state, body).await {
            Ok(v) => v,
            Err(e) => return error_response(&e),
        }
    } else {
        let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
            Ok(b) => b,
            Err(_) => return error_json(StatusCode::PAYLOAD_TOO_LARGE, "body too large"),
        };
        let form = parse_query(Some(&String::from_utf8_lossy(&bytes)));
        let field = |k: &str| form.get(k).cloned().unwrap_or_default();
        HubRequest {
            mode: field("hub.mode"),
            topic: field("hub.topic"),
            callback: field("hub.callback"),
        }
    };
    let subs = state.subscriptions.clone();
    let res = blocking(state, move |e| subs.handle_control(e.ids(), &hub_req)).await;
    match res {
        Ok(_) => simple(StatusCode::ACCEPTED, ""),
        Err(e) => error_response(&e),
    }
}

/// Runs a blocking engine call off the async executor.
async fn blocking<T, F>(state: &ApiState, f: F) -> EngineResult<T>
where
    F: FnOnce(&Engine) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine)).await?
}

fn viewer_of(headers: &HeaderMap) -> Viewer {
    if let Some(user) = header_value(headers, USER_HEADER) {
        return Viewer::User(user.to_ascii_lowercase());
    }
    if let Some(client) = header_value(headers, CLIENT_HEADER) {
        return Viewer::Client(client);
    }
    Viewer::Anonymous
}

fn authenticated_as(headers: &HeaderMap, nick: &str) -> Result<String, Response<Body>> {
    match viewer_of(headers) {
        Viewer::User(user) if user == nick => Ok(user),
        Viewer::User(_) => Err(error_response(&EngineError::Forbidden)),
        _ => Err(error_json(StatusCode::UNAUTHORIZED, "user credentials required")),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_internal(state: &ApiState, headers: &HeaderMap) -> Result<(), Response<Body>> {
    if state.internal_token.is_empty() {
        return Ok(());
    }
    if header_value(headers, INTERNAL_HEADER).as_deref() != Some(state.internal_token.as_str()) {
        warn!("rejected administrative call: bad internal token");
        return Err(error_response(&EngineError::Forbidden));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(state: &ApiState, body: Body) -> EngineResult<T> {
    let bytes = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| EngineError::validation("body too large or unreadable"))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::validation(format!("invalid JSON: {e}")))
}

pub fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in raw.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(decode_component(k), decode_component(v));
    }
    out
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(c) => c.into_owned(),
        Err(_) => s.clone(),
    }
}

fn respond<T: Serialize>(status: StatusCode, res: EngineResult<T>) -> Response<Body> {
    match res {
        Ok(v) => json_response(status, &v),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &EngineError) -> Response<Body> {
    if let EngineError::Internal(inner) = e {
        error!("request failed: {inner:#}");
    }
    error_json(e.status(), &e.public_message())
}

fn error_json(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, &json!({ "error": msg }))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = match serde_json::to_vec(value) {
        Ok(b) => b,
        Err(e) => {
            error!("encode response: {e}");
            return simple(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn simple(status: StatusCode, msg: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.to_string()));
    *resp.status_mut() = status;
    resp
}

fn add_security_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.entry("X-Content-Type-Options").or_insert(HeaderValue::from_static("nosniff"));
    headers.entry("X-Frame-Options").or_insert(HeaderValue::from_static("DENY"));
    headers.entry("Referrer-Policy").or_insert(HeaderValue::from_static("no-referrer"));
    resp
}

#[cfg(test)]
mod tests {
    use super::parse_query;

    #[test]
    fn query_components_are_decoded() {
        let q = parse_query(Some("before=http%3A%2F%2Fh%2Fapi%2Factivity%2F1&count=5&hub.mode=sub+scribe"));
        assert_eq!(q["before"], "http://h/api/activity/1");
        assert_eq!(q["count"], "5");
        assert_eq!(q["hub.mode"], "sub scribe");
        assert!(parse_query(None).is_empty());
    }
}
