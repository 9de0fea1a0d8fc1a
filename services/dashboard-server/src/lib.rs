//! Production server for the placer dashboard
//!
//! Serves pre-built client assets with long-lived caching for fingerprinted
//! bundles and hands every other request to the server-rendering runtime.

pub mod assets;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ssr;

pub use assets::{AssetFs, AssetLookup, StaticAssetResolver, TokioAssetFs};
pub use cache::CachePolicy;
pub use config::{load_config, Config};
pub use dispatcher::RequestDispatcher;
pub use error::{DashboardError, Result};
pub use ssr::{ProxySsrHandler, SsrHandler};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Build the router: a single fallback that dispatches every request
pub fn build_router(dispatcher: Arc<RequestDispatcher>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn dispatch(State(dispatcher): State<Arc<RequestDispatcher>>, request: Request) -> Response {
    dispatcher.handle(request).await
}

/// Wire the production collaborators from `config`
pub fn build_dispatcher(config: &Config) -> Result<RequestDispatcher> {
    let resolver = StaticAssetResolver::new(&config.assets.root, Arc::new(TokioAssetFs::new()));
    let policy = CachePolicy::new(&config.assets.immutable_prefix);
    let ssr = ProxySsrHandler::new(&config.ssr.upstream_url, config.ssr.max_request_body_bytes)?;

    Ok(RequestDispatcher::new(resolver, policy, Arc::new(ssr)))
}

/// Serve until `cancel` is triggered
pub async fn start_server(config: Config, cancel: CancellationToken) -> Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    tracing::debug!(
        "Assets root {:?}, immutable prefix {:?}, SSR upstream {}",
        config.assets.root,
        config.assets.immutable_prefix,
        config.ssr.upstream_url
    );

    let router = build_router(Arc::new(dispatcher));
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dashboard listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    tracing::debug!("Dashboard stopped");
    Ok(())
}
