use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::{rss_configs, Db};
use crate::models::RssConfig;

use super::render::{mime_for_extension, render_feed};
use super::store::{Entry, RssStore};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub store: Arc<RssStore>,
    pub config: Arc<Config>,
}

pub async fn run_server(config: Arc<Config>, db: Db, store: Arc<RssStore>) {
    let state = AppState {
        db,
        store,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/rss/feed/{rule_id}", get(feed))
        .route("/media/{rule_id}/{filename}", get(media))
        .route("/api/entries/{rule_id}/add", post(add_entry))
        .route("/api/entries/{rule_id}/{entry_id}", delete(delete_entry))
        .route("/api/rule/{rule_id}", delete(delete_rule))
        .route("/api/entries/{rule_id}", get(list_entries))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.rss_bind_addr())
        .await
        .expect("failed to bind RSS listener");
    info!("RSS service listening on {}", config.rss_bind_addr());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("RSS server failed");
}

/// Mutating endpoints accept loopback and private-network peers only.
pub fn is_trusted_peer(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                // ULA fc00::/7 and link-local fe80::/10.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(is_trusted_v4_mapped)
        }
    }
}

fn is_trusted_v4_mapped(v4: std::net::Ipv4Addr) -> bool {
    v4.is_loopback() || v4.is_private() || v4.is_link_local()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"status": "error", "message": "forbidden"})),
    )
        .into_response()
}

async fn rss_config_or_default(state: &AppState, rule_id: i64) -> Result<RssConfig, StatusCode> {
    let mut conn = state
        .db
        .pool
        .acquire()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let config = rss_configs::get(&mut conn, rule_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(config.unwrap_or(RssConfig {
        rule_id,
        enabled: false,
        title: format!("Rule {rule_id}"),
        description: String::new(),
        language: "en".to_string(),
        max_items: 50,
    }))
}

async fn feed(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<Response, StatusCode> {
    let config = rss_config_or_default(&state, rule_id).await?;
    let entries = state
        .store
        .list(rule_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let xml = render_feed(
        &state.store,
        &config,
        &state.config.rss_base_url,
        &state.config.rss_media_base_url,
        entries,
    );

    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

async fn media(
    State(state): State<AppState>,
    Path((rule_id, filename)): Path<(i64, String)>,
) -> Result<Response, StatusCode> {
    let path = state.store.media_path(rule_id, &filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    Ok(([(header::CONTENT_TYPE, mime_for_extension(ext))], bytes).into_response())
}

async fn add_entry(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(rule_id): Path<i64>,
    Json(entry): Json<Entry>,
) -> Response {
    if !is_trusted_peer(addr.ip()) {
        return forbidden();
    }

    let config = match rss_config_or_default(&state, rule_id).await {
        Ok(c) => c,
        Err(code) => return code.into_response(),
    };

    match state
        .store
        .add(rule_id, entry, config.max_items.max(1) as usize)
        .await
    {
        Ok(added) => Json(json!({"status": "success", "message": added.id})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn delete_entry(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((rule_id, entry_id)): Path<(i64, String)>,
) -> Response {
    if !is_trusted_peer(addr.ip()) {
        return forbidden();
    }

    match state.store.delete(rule_id, &entry_id).await {
        Ok(true) => Json(json!({"status": "success"})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "entry not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn delete_rule(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(rule_id): Path<i64>,
) -> Response {
    if !is_trusted_peer(addr.ip()) {
        return forbidden();
    }

    match state.store.delete_rule(rule_id).await {
        Ok(()) => Json(json!({"status": "success"})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_entries(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Entry>>, StatusCode> {
    let mut entries = state
        .store
        .list(rule_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    entries.sort_by(|a, b| b.published.cmp(&a.published));

    let offset = params.offset.unwrap_or(0).min(entries.len());
    let limit = params.limit.unwrap_or(entries.len());
    let page: Vec<Entry> = entries.into_iter().skip(offset).take(limit).collect();
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_peers_are_trusted() {
        assert!(is_trusted_peer("127.0.0.1".parse().unwrap()));
        assert!(is_trusted_peer("10.1.2.3".parse().unwrap()));
        assert!(is_trusted_peer("172.20.0.1".parse().unwrap()));
        assert!(is_trusted_peer("192.168.1.10".parse().unwrap()));
        assert!(is_trusted_peer("::1".parse().unwrap()));
        assert!(is_trusted_peer("fd12:3456::1".parse().unwrap()));
    }

    #[test]
    fn public_peers_are_rejected() {
        assert!(!is_trusted_peer("8.8.8.8".parse().unwrap()));
        assert!(!is_trusted_peer("1.1.1.1".parse().unwrap()));
        assert!(!is_trusted_peer("2001:4860:4860::8888".parse().unwrap()));
    }
}
