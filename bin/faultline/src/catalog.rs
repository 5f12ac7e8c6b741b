use std::num::NonZeroUsize;

use rand::{seq::IndexedRandom as _, Rng};
use serde::Serialize;
use uuid::Builder;

const ADJECTIVES: &[&str] = &[
    "Awesome",
    "Ergonomic",
    "Fantastic",
    "Gorgeous",
    "Handcrafted",
    "Incredible",
    "Intelligent",
    "Licensed",
    "Practical",
    "Refined",
    "Rustic",
    "Sleek",
    "Small",
    "Tasty",
    "Unbranded",
];

const MATERIALS: &[&str] = &[
    "Bamboo", "Bronze", "Concrete", "Cotton", "Frozen", "Fresh", "Granite", "Metal", "Plastic", "Rubber", "Soft",
    "Steel", "Wooden",
];

const PRODUCTS: &[&str] = &[
    "Bacon", "Ball", "Bike", "Car", "Chair", "Cheese", "Chips", "Computer", "Fish", "Gloves", "Hat", "Keyboard", "Mouse",
    "Pants", "Pizza", "Salad", "Sausages", "Shirt", "Shoes", "Soap", "Table", "Towels",
];

const MIN_PRICE_CENTS: u32 = 100;
const MAX_PRICE_CENTS: u32 = 100_000;

/// A single item in the mock catalog.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CatalogItem {
    /// Unique identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Price, as a decimal string with two fractional digits.
    pub price: String,
}

impl CatalogItem {
    /// Creates a new `CatalogItem` from its parts.
    pub fn new<I, N, P>(id: I, name: N, price: P) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            price: price.into(),
        }
    }

    fn generate<R: Rng>(rng: &mut R) -> Self {
        let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Generic");
        let material = MATERIALS.choose(rng).copied().unwrap_or("Plastic");
        let product = PRODUCTS.choose(rng).copied().unwrap_or("Widget");
        let price_cents = rng.random_range(MIN_PRICE_CENTS..=MAX_PRICE_CENTS);

        Self::new(
            random_id(rng),
            format!("{} {} {}", adjective, material, product),
            format!("{}.{:02}", price_cents / 100, price_cents % 100),
        )
    }
}

/// Generates a random identifier in the same format as catalog item identifiers.
///
/// The identifier space is large enough that a freshly generated identifier will, for all practical purposes, never
/// collide with an existing catalog item.
pub fn random_id<R: Rng>(rng: &mut R) -> String {
    Builder::from_random_bytes(rng.random()).into_uuid().to_string()
}

/// The mock catalog.
///
/// Generated once at startup and never modified afterwards.
#[derive(Debug)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

impl Catalog {
    /// Generates a catalog with `count` random items.
    pub fn generate<R: Rng>(count: NonZeroUsize, rng: &mut R) -> Self {
        Self::from_items((0..count.get()).map(|_| CatalogItem::generate(rng)).collect())
    }

    /// Creates a catalog from a fixed set of items.
    pub fn from_items(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// Returns all items in the catalog.
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// Looks up the item with the given identifier.
    ///
    /// Returns `None` if no item has that identifier.
    pub fn lookup(&self, id: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Picks a random item from the catalog.
    ///
    /// Returns `None` only if the catalog is empty.
    pub fn random_item<R: Rng>(&self, rng: &mut R) -> Option<&CatalogItem> {
        self.items.choose(rng)
    }

    /// Returns the number of items in the catalog.
    pub fn len(&self) -> usize {
        self.items.len()
    }
}
