// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Router,
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, ensure};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::ServiceHandler;
use crate::{
    BindSnafu, NoBindAddressSnafu, ParseAddressSnafu, Result,
    error::ForbiddenSnafu,
};

/// Default maximum HTTP request body size (100 MB)
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RestServerConfig {
    /// Addresses to listen on; the same router is served on each
    #[default(vec!["127.0.0.1:3000".to_string()])]
    #[builder(default = vec!["127.0.0.1:3000".to_string()])]
    pub bind_addresses: Vec<String>,
    /// Maximum HTTP request body size in bytes
    #[default(DEFAULT_MAX_HTTP_BODY_SIZE)]
    #[builder(default = DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size:  usize,
    /// Whether to enable CORS
    #[default = false]
    #[builder(default)]
    pub enable_cors:    bool,
    /// Whether to gzip responses for clients that accept it
    #[default = false]
    #[builder(default)]
    pub enable_gzip:    bool,
    /// Client IPs allowed to connect; empty allows everyone
    #[builder(default)]
    pub ip_allow_list:  Vec<String>,
}

impl RestServerConfig {
    fn bind_addrs(&self) -> Result<Vec<SocketAddr>> {
        ensure!(!self.bind_addresses.is_empty(), NoBindAddressSnafu);
        self.bind_addresses
            .iter()
            .map(|addr| addr.parse().context(ParseAddressSnafu { addr }))
            .collect()
    }

    fn allowed_ips(&self) -> Result<HashSet<IpAddr>> {
        self.ip_allow_list
            .iter()
            .map(|ip| ip.parse().context(ParseAddressSnafu { addr: ip }))
            .collect()
    }
}

/// Builds the router served on every address.
///
/// Route handlers are registered first so that every middleware layer,
/// including the IP allow-list, wraps all of their routes as well as
/// `/health`.
///
/// # Errors
/// Returns an error if an allow-list entry is not an IP address.
pub fn build_router<F>(config: &RestServerConfig, route_handlers: &[F]) -> Result<Router>
where
    F: Fn(Router) -> Router,
{
    let mut router = Router::new().route("/health", get(health_check));

    for handler in route_handlers {
        info!("Registering REST route handler");
        router = handler(router);
    }

    router = router
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());

    if config.enable_gzip {
        router = router.layer(CompressionLayer::new());
    }

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    let allowed = config.allowed_ips()?;
    if !allowed.is_empty() {
        info!(allowed = allowed.len(), "IP allow-list enabled");
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(allowed),
            ip_allow_list,
        ));
    }

    Ok(router)
}

/// Starts the REST server and returns a handle for managing its lifecycle.
///
/// This method:
/// 1. Builds the router with [`build_router`]
/// 2. Parses and binds every configured address
/// 3. Spawns one server task per listener
/// 4. Returns a handle for lifecycle management
///
/// Binding happens before this returns, so an address in use is reported
/// here rather than inside a background task.
///
/// # Errors
/// Returns an error if an address cannot be parsed or bound.
///
/// # Example
///
/// ```rust,ignore
/// use axum::{Router, routing::get};
/// use lmq_server::http::{RestServerConfig, start_rest_server};
///
/// fn my_routes(router: Router) -> Router {
///     router.route("/hello", get(|| async { "Hello, World!" }))
/// }
///
/// let handle = start_rest_server(RestServerConfig::default(), vec![my_routes]).await?;
/// ```
pub async fn start_rest_server<F>(
    config: RestServerConfig,
    route_handlers: Vec<F>,
) -> Result<ServiceHandler>
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    let router = build_router(&config, &route_handlers)?;

    let mut listeners = Vec::new();
    for addr in config.bind_addrs()? {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context(BindSnafu { addr })?;
        let local_addr = listener.local_addr().context(BindSnafu { addr })?;
        listeners.push((listener, local_addr));
    }

    let cancellation_token = CancellationToken::new();
    let mut join_handles = Vec::with_capacity(listeners.len());
    let mut started = Vec::with_capacity(listeners.len());
    let mut local_addrs = Vec::with_capacity(listeners.len());

    for (listener, bind_addr) in listeners {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let token = cancellation_token.clone();
        let app = router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();

        let join_handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = started_tx.send(());
                    info!(addr = %bind_addr, "REST server started");
                    token.cancelled().await;
                    info!(addr = %bind_addr, "REST server received shutdown signal");
                })
                .await;

            info!(addr = %bind_addr, result = ?result, "REST server task completed");
        });

        join_handles.push(join_handle);
        started.push(started_rx);
        local_addrs.push(bind_addr);
    }

    Ok(ServiceHandler {
        join_handles,
        cancellation_token,
        started_rx: started,
        local_addrs,
    })
}

/// Rejects clients whose IP is not in the allow-list.
async fn ip_allow_list(
    State(allowed): State<Arc<HashSet<IpAddr>>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    // IPv4 clients of a dual-stack listener show up as mapped IPv6.
    let ip = peer.ip().to_canonical();
    if allowed.contains(&ip) {
        return next.run(request).await;
    }
    warn!(peer = %ip, uri = %request.uri(), "Client not in IP allow-list");
    ForbiddenSnafu.build().into_response()
}

/// Health check endpoint for the REST server
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "lmq",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
