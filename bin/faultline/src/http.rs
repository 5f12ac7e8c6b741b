use std::time::Instant;

use anyhow::{bail, Context as _};
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Url;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument as _, Span};

use crate::{
    catalog::CatalogItem,
    error::GenericError,
    span::RequestSpan,
    storefront::{CartError, Storefront},
};

/// Shared state for the storefront routes.
#[derive(Clone)]
pub struct AppState {
    storefront: Storefront,
    spans_enabled: bool,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// When `spans_enabled` is `false`, requests are served without opening any spans.
    pub fn new(storefront: Storefront, spans_enabled: bool) -> Self {
        Self {
            storefront,
            spans_enabled,
        }
    }

    fn open_span(&self, route: &'static str) -> Option<RequestSpan> {
        self.spans_enabled.then(|| RequestSpan::server(route))
    }
}

impl IntoResponse for CartError {
    fn into_response(self) -> Response {
        match self {
            CartError::NotFound { .. } => (StatusCode::NOT_FOUND, "Product not found").into_response(),
            CartError::DownstreamFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Builds the storefront router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(handle_list_products))
        .route("/cart/add/{id}", post(handle_add_to_cart))
        .route("/order", post(handle_place_order))
        .layer(middleware::from_fn(log_access))
        .with_state(state)
}

/// Serves the storefront on the given listener until `shutdown` is cancelled.
///
/// # Errors
///
/// If the server fails while accepting connections, an error is returned.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<(), GenericError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(Into::into)
}

/// Parses a base URL that request paths can be appended to.
///
/// # Errors
///
/// If `raw` is not a valid URL, or is a URL that cannot carry a path (such as `mailto:`), an error is returned.
pub fn parse_base_url(raw: &str) -> Result<Url, GenericError> {
    let url = Url::parse(raw).with_context(|| format!("Invalid URL '{}'.", raw))?;
    if url.cannot_be_a_base() {
        bail!("URL '{}' cannot have a path appended to it.", raw);
    }

    Ok(url)
}

/// Appends `segments` to the path of `base`, percent-encoding each segment.
///
/// `base` should come from [`parse_base_url`]. A URL that cannot carry a path is returned unchanged.
pub fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

async fn handle_list_products(State(state): State<AppState>) -> Json<Vec<CatalogItem>> {
    Json(state.storefront.list_catalog().to_vec())
}

async fn handle_add_to_cart(State(state): State<AppState>, Path(item_id): Path<String>) -> Response {
    let mut span = state.open_span("POST /cart/add/{id}");
    let current = current_span(span.as_ref());
    let result = state
        .storefront
        .add_to_cart(&item_id, span.as_mut())
        .instrument(current)
        .await;
    if let Some(span) = span {
        span.end();
    }

    match result {
        Ok(name) => format!("Product added to cart: {}", name).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_place_order(State(state): State<AppState>) -> String {
    let span = state.open_span("POST /order");
    let order_id = current_span(span.as_ref()).in_scope(|| state.storefront.place_order(span.as_ref()));
    if let Some(span) = span {
        span.end();
    }

    format!("Order placed: {}", order_id)
}

fn current_span(span: Option<&RequestSpan>) -> Span {
    span.map_or_else(Span::none, RequestSpan::handle)
}

async fn log_access(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!(%method, path = %path, status, latency_ms, "{} {} {}", method, path, status);

    response
}
