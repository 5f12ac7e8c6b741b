use std::sync::Arc;

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng as _};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument as _};

use crate::{
    catalog::{random_id, Catalog},
    error::GenericError,
    fault::FaultState,
    http::{join_segments, parse_base_url},
    storefront::Storefront,
};

/// Category of synthetic request, drawn uniformly on every tick.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ActionCategory {
    /// List the catalog.
    ListCatalog,

    /// Add a random catalog item to the cart.
    AddToCart,

    /// Place an order.
    PlaceOrder,

    /// Add to cart, targeting a nonexistent item while faults are being injected.
    StressAddToCart,
}

impl ActionCategory {
    const ALL: [ActionCategory; 4] = [
        ActionCategory::ListCatalog,
        ActionCategory::AddToCart,
        ActionCategory::PlaceOrder,
        ActionCategory::StressAddToCart,
    ];

    fn random(rng: &mut StdRng) -> Self {
        Self::ALL[rng.random_range(0..Self::ALL.len())]
    }
}

/// A concrete synthetic request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrafficAction {
    /// `GET /products`
    ListCatalog,

    /// `POST /cart/add/{item_id}`
    AddToCart {
        /// Item to add.
        item_id: String,
    },

    /// `POST /order`
    PlaceOrder,
}

/// Something that synthetic requests can be dispatched to.
#[async_trait]
pub trait RequestTarget: Send + Sync + 'static {
    /// Dispatches a single request.
    ///
    /// # Errors
    ///
    /// If the request cannot be sent, or the target reports a failure, an error is returned.
    async fn dispatch(&self, action: &TrafficAction) -> Result<(), GenericError>;
}

/// Dispatches requests to a storefront over HTTP.
///
/// Any non-success status code is treated as a failed dispatch.
pub struct HttpTarget {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTarget {
    /// Creates a new `HttpTarget` for the storefront at `base_url`.
    ///
    /// # Errors
    ///
    /// If `base_url` is not a valid base URL, an error is returned.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, GenericError> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
        })
    }

    fn url(&self, action: &TrafficAction) -> Url {
        match action {
            TrafficAction::ListCatalog => join_segments(&self.base_url, &["products"]),
            TrafficAction::AddToCart { item_id } => join_segments(&self.base_url, &["cart", "add", item_id.as_str()]),
            TrafficAction::PlaceOrder => join_segments(&self.base_url, &["order"]),
        }
    }
}

#[async_trait]
impl RequestTarget for HttpTarget {
    async fn dispatch(&self, action: &TrafficAction) -> Result<(), GenericError> {
        let url = self.url(action);
        let request = match action {
            TrafficAction::ListCatalog => self.client.get(url),
            TrafficAction::AddToCart { .. } | TrafficAction::PlaceOrder => self.client.post(url),
        };

        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Dispatches requests directly to an in-process storefront, without opening any spans.
#[async_trait]
impl RequestTarget for Storefront {
    async fn dispatch(&self, action: &TrafficAction) -> Result<(), GenericError> {
        match action {
            TrafficAction::ListCatalog => {
                self.list_catalog();
            }
            TrafficAction::AddToCart { item_id } => {
                self.add_to_cart(item_id, None).await?;
            }
            TrafficAction::PlaceOrder => {
                self.place_order(None);
            }
        }

        Ok(())
    }
}

/// Synthetic traffic generator.
///
/// On every tick, a random [`ActionCategory`] is drawn and turned into a request. The stress category is where faults
/// are injected: while the fault flag is set, it targets a freshly generated identifier that is not in the catalog,
/// and otherwise it behaves exactly like [`ActionCategory::AddToCart`]. The target itself is never altered.
pub struct TrafficGenerator<T> {
    target: Arc<T>,
    catalog: Arc<Catalog>,
    fault: FaultState,
    rng: StdRng,
}

impl<T: RequestTarget> TrafficGenerator<T> {
    /// Creates a new `TrafficGenerator`.
    pub fn new(target: Arc<T>, catalog: Arc<Catalog>, fault: FaultState, rng: StdRng) -> Self {
        Self {
            target,
            catalog,
            fault,
            rng,
        }
    }

    /// Draws the next request to send.
    pub fn next_action(&mut self) -> TrafficAction {
        let category = ActionCategory::random(&mut self.rng);
        self.action_for(category)
    }

    /// Builds a request for the given category, taking the current fault state into account.
    pub fn action_for(&mut self, category: ActionCategory) -> TrafficAction {
        match category {
            ActionCategory::ListCatalog => TrafficAction::ListCatalog,
            ActionCategory::AddToCart => self.add_random_item(),
            ActionCategory::PlaceOrder => TrafficAction::PlaceOrder,
            ActionCategory::StressAddToCart => {
                if self.fault.get() {
                    TrafficAction::AddToCart {
                        item_id: random_id(&mut self.rng),
                    }
                } else {
                    self.add_random_item()
                }
            }
        }
    }

    fn add_random_item(&mut self) -> TrafficAction {
        // An empty catalog has nothing valid to add, so the request degrades to a miss.
        let item_id = match self.catalog.random_item(&mut self.rng) {
            Some(item) => item.id.clone(),
            None => random_id(&mut self.rng),
        };

        TrafficAction::AddToCart { item_id }
    }

    /// Runs a single tick.
    ///
    /// The request is dispatched on a separate task so that slow or failing requests never delay subsequent ticks.
    /// Dispatch failures are logged and otherwise discarded. The returned handle never resolves to an error unless the
    /// task itself is aborted.
    pub fn tick(&mut self) -> JoinHandle<()> {
        let action = self.next_action();
        let target = Arc::clone(&self.target);

        tokio::spawn(
            async move {
                debug!(?action, "Dispatching synthetic request.");
                if let Err(e) = target.dispatch(&action).await {
                    error!("Traffic generation error: {:#}", e);
                }
            }
            .in_current_span(),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Target that records every dispatched action, optionally failing all of them.
    #[derive(Default)]
    pub struct RecordingTarget {
        actions: Mutex<Vec<TrafficAction>>,
        fail: bool,
    }

    impl RecordingTarget {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn actions(&self) -> Vec<TrafficAction> {
            self.actions.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.actions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RequestTarget for RecordingTarget {
        async fn dispatch(&self, action: &TrafficAction) -> Result<(), GenericError> {
            self.actions.lock().unwrap().push(action.clone());
            if self.fail {
                Err(anyhow::anyhow!("target unavailable"))
            } else {
                Ok(())
            }
        }
    }
}
