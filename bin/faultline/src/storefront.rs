use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use snafu::{OptionExt as _, Snafu};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    catalog::{Catalog, CatalogItem},
    span::{
        attributes::{APP_ORDER_ID, APP_PRODUCT_ID, APP_PRODUCT_NAME},
        RequestSpan,
    },
};

const PRODUCT_LOOKUP_STATEMENT: &str = "SELECT * FROM products WHERE id=?";

/// Cart operation error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CartError {
    /// The requested item is not in the catalog.
    #[snafu(display("Product not found: {}", item_id))]
    NotFound {
        /// Requested item identifier.
        item_id: String,
    },

    /// The simulated product database failed to return the requested item.
    #[snafu(display("Database error: Product not found"))]
    DownstreamFailure {
        /// Requested item identifier.
        item_id: String,
    },
}

/// How add-to-cart requests resolve item identifiers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CartLookup {
    /// Look the item up directly in the catalog.
    ///
    /// Unknown identifiers are reported as [`CartError::NotFound`].
    Catalog,

    /// Look the item up through a simulated, traced database call.
    ///
    /// Unknown identifiers are reported as [`CartError::DownstreamFailure`].
    #[default]
    Database,
}

/// The mock storefront.
///
/// Implements the three operations exposed to clients: listing the catalog, adding an item to the cart, and placing an
/// order. Each operation that takes a span annotates it, but never ends it: the caller owns the span.
#[derive(Clone, Debug)]
pub struct Storefront {
    catalog: Arc<Catalog>,
    lookup: CartLookup,
    db_latency: Duration,
}

impl Storefront {
    /// Creates a new `Storefront` over the given catalog.
    pub fn new(catalog: Arc<Catalog>, lookup: CartLookup, db_latency: Duration) -> Self {
        Self {
            catalog,
            lookup,
            db_latency,
        }
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Lists every item in the catalog.
    pub fn list_catalog(&self) -> &[CatalogItem] {
        info!("Products viewed");
        self.catalog.items()
    }

    /// Adds the item with the given identifier to the cart, returning the item's name.
    ///
    /// The product identifier, and the product name when the item was found, are attached to `span`. When the lookup
    /// fails because of the simulated database, `span` is also marked as failed.
    ///
    /// # Errors
    ///
    /// If the item cannot be found, an error is returned. The kind of error depends on the configured [`CartLookup`].
    pub async fn add_to_cart(&self, item_id: &str, mut span: Option<&mut RequestSpan>) -> Result<String, CartError> {
        if let Some(span) = span.as_deref() {
            span.set_attribute(APP_PRODUCT_ID, item_id);
        }

        let result = match self.lookup {
            CartLookup::Catalog => self.catalog.lookup(item_id).cloned().context(NotFound { item_id }),
            CartLookup::Database => self.select_product(item_id, span.as_deref()).await,
        };

        match result {
            Ok(item) => {
                if let Some(span) = span.as_deref() {
                    span.set_attribute(APP_PRODUCT_NAME, &item.name);
                }

                info!(item_id, "Product added to cart: {}", item.name);
                Ok(item.name)
            }
            Err(e) => {
                match &e {
                    CartError::NotFound { .. } => warn!(item_id, "Error adding product to cart: {}", e),
                    CartError::DownstreamFailure { .. } => {
                        if let Some(span) = span.as_deref_mut() {
                            span.set_error(&e.to_string());
                        }
                        error!(item_id, "Error adding product to cart: {}", e);
                    }
                }
                Err(e)
            }
        }
    }

    /// Places an order, returning the new order identifier.
    ///
    /// The order identifier is attached to `span`.
    pub fn place_order(&self, span: Option<&RequestSpan>) -> String {
        let order_id = Uuid::new_v4().to_string();
        if let Some(span) = span {
            span.set_attribute(APP_ORDER_ID, &order_id);
        }

        info!("Order placed: {}", order_id);
        order_id
    }

    async fn select_product(&self, item_id: &str, parent: Option<&RequestSpan>) -> Result<CatalogItem, CartError> {
        let mut db_span = RequestSpan::database_select(parent, PRODUCT_LOOKUP_STATEMENT);

        tokio::time::sleep(self.db_latency).await;

        match self.catalog.lookup(item_id) {
            Some(item) => {
                db_span.end();
                Ok(item.clone())
            }
            None => {
                db_span.set_error("Product not found");
                db_span.end();
                DownstreamFailure { item_id }.fail()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, future::Future, num::NonZeroUsize};

    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;
    use crate::span::{attributes::*, testing::SpanCapture};

    fn widget_catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_items(vec![CatalogItem::new("abc", "Widget", "9.99")]))
    }

    fn storefront(lookup: CartLookup) -> Storefront {
        Storefront::new(widget_catalog(), lookup, Duration::from_millis(15))
    }

    #[test]
    fn list_catalog_returns_every_item() {
        let storefront = storefront(CartLookup::Catalog);
        let items = storefront.list_catalog();
        assert_eq!(items, &[CatalogItem::new("abc", "Widget", "9.99")]);
    }

    #[tokio::test]
    async fn add_known_item_succeeds_in_both_modes() {
        for lookup in [CartLookup::Catalog, CartLookup::Database] {
            let name = storefront(lookup).add_to_cart("abc", None).await.unwrap();
            assert_eq!(name, "Widget");
        }
    }

    #[tokio::test]
    async fn add_unknown_item_is_not_found_in_catalog_mode() {
        let err = storefront(CartLookup::Catalog)
            .add_to_cart("zzz", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotFound { ref item_id } if item_id == "zzz"));
    }

    #[tokio::test]
    async fn add_unknown_item_is_downstream_failure_in_database_mode() {
        let err = storefront(CartLookup::Database)
            .add_to_cart("zzz", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::DownstreamFailure { ref item_id } if item_id == "zzz"));
        assert_eq!(err.to_string(), "Database error: Product not found");
    }

    #[tokio::test]
    async fn add_to_cart_annotates_spans_on_success() {
        let capture = SpanCapture::default();
        let _guard = capture.install();

        let mut span = RequestSpan::server("POST /cart/add/{id}");
        storefront(CartLookup::Database)
            .add_to_cart("abc", Some(&mut span))
            .await
            .unwrap();
        span.end();

        let request = &capture.named("request")[0];
        assert_eq!(request.field(APP_PRODUCT_ID), Some("abc"));
        assert_eq!(request.field(APP_PRODUCT_NAME), Some("Widget"));
        assert!(!request.is_error());
        assert_eq!(request.close_count, 1);

        let db = &capture.named("SELECT")[0];
        assert_eq!(db.parent, Some("request"));
        assert_eq!(db.field(DB_STATEMENT), Some(PRODUCT_LOOKUP_STATEMENT));
        assert!(!db.is_error());
        assert_eq!(db.close_count, 1);
    }

    #[tokio::test]
    async fn add_to_cart_marks_spans_on_downstream_failure() {
        let capture = SpanCapture::default();
        let _guard = capture.install();

        let mut span = RequestSpan::server("POST /cart/add/{id}");
        let result = storefront(CartLookup::Database).add_to_cart("zzz", Some(&mut span)).await;
        assert!(result.is_err());
        span.end();

        let request = &capture.named("request")[0];
        assert_eq!(request.field(APP_PRODUCT_ID), Some("zzz"));
        assert_eq!(request.field(APP_PRODUCT_NAME), None);
        assert!(request.is_error());
        assert_eq!(
            request.field(OTEL_STATUS_MESSAGE),
            Some("Database error: Product not found")
        );
        assert_eq!(request.close_count, 1);

        let db = &capture.named("SELECT")[0];
        assert!(db.is_error());
        assert_eq!(db.field(OTEL_STATUS_MESSAGE), Some("Product not found"));
        assert_eq!(db.close_count, 1);
    }

    #[tokio::test]
    async fn add_to_cart_not_found_leaves_span_status_alone() {
        let capture = SpanCapture::default();
        let _guard = capture.install();

        let mut span = RequestSpan::server("POST /cart/add/{id}");
        let result = storefront(CartLookup::Catalog).add_to_cart("zzz", Some(&mut span)).await;
        assert!(matches!(result, Err(CartError::NotFound { .. })));
        span.end();

        let request = &capture.named("request")[0];
        assert_eq!(request.field(APP_PRODUCT_ID), Some("zzz"));
        assert!(!request.is_error());
        assert!(capture.named("SELECT").is_empty());
    }

    #[test]
    fn place_order_ids_are_unique_and_attached() {
        let capture = SpanCapture::default();
        let _guard = capture.install();

        let storefront = storefront(CartLookup::Database);
        let span = RequestSpan::server("POST /order");
        let first = storefront.place_order(Some(&span));
        span.end();

        let mut seen = HashSet::new();
        seen.insert(first.clone());
        for _ in 0..1000 {
            assert!(seen.insert(storefront.place_order(None)), "order ids must be unique");
        }

        let request = &capture.named("request")[0];
        assert_eq!(request.field(APP_ORDER_ID), Some(first.as_str()));
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn arb_catalog() -> impl Strategy<Value = Arc<Catalog>> {
        (1usize..=50, any::<u64>()).prop_map(|(size, seed)| {
            let size = NonZeroUsize::new(size).unwrap();
            Arc::new(Catalog::generate(size, &mut StdRng::seed_from_u64(seed)))
        })
    }

    fn arb_item_id() -> impl Strategy<Value = String> {
        prop_oneof![
            any::<String>(),
            "[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}",
        ]
    }

    fn arb_lookup() -> impl Strategy<Value = CartLookup> {
        prop_oneof![Just(CartLookup::Catalog), Just(CartLookup::Database)]
    }

    proptest! {
        #[test]
        fn property_test_unknown_item_is_rejected(catalog in arb_catalog(), item_id in arb_item_id()) {
            prop_assume!(catalog.lookup(&item_id).is_none());

            let by_catalog = Storefront::new(Arc::clone(&catalog), CartLookup::Catalog, Duration::ZERO);
            let by_database = Storefront::new(catalog, CartLookup::Database, Duration::ZERO);

            block_on(async {
                let err = by_catalog.add_to_cart(&item_id, None).await.unwrap_err();
                assert!(matches!(err, CartError::NotFound { item_id: ref id } if *id == item_id));

                let err = by_database.add_to_cart(&item_id, None).await.unwrap_err();
                assert!(matches!(err, CartError::DownstreamFailure { item_id: ref id } if *id == item_id));
            });
        }

        #[test]
        fn property_test_known_item_returns_its_name(catalog in arb_catalog(), lookup in arb_lookup()) {
            let storefront = Storefront::new(Arc::clone(&catalog), lookup, Duration::ZERO);

            block_on(async {
                for item in catalog.items() {
                    let name = storefront.add_to_cart(&item.id, None).await.unwrap();
                    assert_eq!(name, item.name);
                }
            });
        }
    }
}
