//! Trace spans and the attribute conventions used on them.
//!
//! Spans are regular `tracing` spans, using the `otel.*` field conventions understood by OpenTelemetry bridges, so that
//! any downstream exporter sees the same attribute names regardless of how it is wired up. `tracing` only records
//! fields that were declared when the span was created, so every attribute this crate may set is declared up front
//! and left empty until it is known.

use tracing::{field::Empty, info_span, Span};

/// Attribute keys.
pub mod attributes {
    /// Database product name.
    pub const DB_SYSTEM: &str = "db.system";

    /// Database (schema) name.
    pub const DB_NAME: &str = "db.name";

    /// Database operation, such as `SELECT`.
    pub const DB_OPERATION: &str = "db.operation";

    /// Database statement, with parameters elided.
    pub const DB_STATEMENT: &str = "db.statement";

    /// Database instance identifier.
    pub const DB_INSTANCE_ID: &str = "db.instance.id";

    /// Database user.
    pub const DB_USER: &str = "db.user";

    /// Identifier of the product a request acted on.
    pub const APP_PRODUCT_ID: &str = "app.product.id";

    /// Name of the product a request acted on.
    pub const APP_PRODUCT_NAME: &str = "app.product.name";

    /// Identifier of the order a request created.
    pub const APP_ORDER_ID: &str = "app.order.id";

    /// Span status code. Only ever set to `ERROR`.
    pub const OTEL_STATUS_CODE: &str = "otel.status_code";

    /// Span status description.
    pub const OTEL_STATUS_MESSAGE: &str = "otel.status_message";
}

use self::attributes::*;

/// An owned handle to an in-progress span.
///
/// The span is ended exactly once: either explicitly via [`end`][Self::end], or implicitly when the handle is dropped,
/// which covers early returns and unwinding. Once ended, the span cannot be annotated any further.
#[derive(Debug)]
pub struct RequestSpan {
    span: Option<Span>,
}

impl RequestSpan {
    /// Opens a server span for an inbound request on the given route.
    pub fn server(route: &'static str) -> Self {
        let span = info_span!(
            "request",
            otel.name = route,
            otel.kind = "server",
            app.product.id = Empty,
            app.product.name = Empty,
            app.order.id = Empty,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );

        Self::from_span(span)
    }

    /// Opens a client span for a `SELECT` against the product database.
    ///
    /// The span is parented to `parent` when given, and is a root span otherwise. All database attributes are set.
    pub fn database_select(parent: Option<&RequestSpan>, statement: &'static str) -> Self {
        let parent_id = parent.and_then(RequestSpan::id);
        let span = info_span!(
            parent: parent_id,
            "SELECT",
            otel.kind = "client",
            db.system = Empty,
            db.name = Empty,
            db.operation = Empty,
            db.statement = Empty,
            db.instance.id = Empty,
            db.user = Empty,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );

        let span = Self::from_span(span);
        for (key, value) in [
            (DB_SYSTEM, "mysql"),
            (DB_NAME, "ecommerce"),
            (DB_OPERATION, "SELECT"),
            (DB_STATEMENT, statement),
            (DB_INSTANCE_ID, "mysql-e26b99z.ecomm.com"),
            (DB_USER, "readonly_user"),
        ] {
            span.set_attribute(key, value);
        }
        span
    }

    fn from_span(span: Span) -> Self {
        Self { span: Some(span) }
    }

    fn id(&self) -> Option<tracing::Id> {
        self.span.as_ref().and_then(Span::id)
    }

    /// Sets a string attribute on the span.
    ///
    /// Keys that were not declared when the span was opened are ignored.
    pub fn set_attribute(&self, key: &'static str, value: &str) {
        if let Some(span) = &self.span {
            span.record(key, value);
        }
    }

    /// Marks the span as failed with the given message.
    pub fn set_error(&mut self, message: &str) {
        if let Some(span) = &self.span {
            span.record(OTEL_STATUS_CODE, "ERROR");
            span.record(OTEL_STATUS_MESSAGE, message);
        }
    }

    /// Returns a `tracing` handle to the span, for entering it or instrumenting futures with it.
    ///
    /// Ending this `RequestSpan` while the returned handle is still alive defers the close until the handle is dropped.
    pub fn handle(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::none)
    }

    /// Ends the span.
    pub fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        // Dropping the last handle to a `tracing` span is what closes it.
        drop(self.span.take());
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        self.close();
    }
}
