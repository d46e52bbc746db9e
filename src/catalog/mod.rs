//! Product catalog: the static set of tradable symbols and their rules.
//!
//! The catalog is read-mostly: it is populated at startup and only touched
//! afterwards by rare admin updates (activation toggles, limit changes), so
//! it lives behind a single `RwLock`. Every order admission reads it once.

mod fees;

pub use fees::FeeSchedule;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// Static trading rules for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Symbol identifier, e.g. `"XAU-USD"`.
    pub symbol: String,
    /// Minimum price increment in micro-units. Accepted prices are multiples.
    pub tick_size: u64,
    /// Minimum quantity increment in micro-lots. Accepted quantities are
    /// multiples.
    pub lot_size: u64,
    /// Notional multiplier: quote value of one whole contract lot.
    pub contract_size: u64,
    /// Initial margin rate in basis points of notional, in (0, 10_000].
    pub margin_rate_bps: u32,
    /// Maintenance margin rate in basis points of notional.
    pub maintenance_margin_rate_bps: u32,
    /// Maker fee in basis points (negative = rebate).
    pub maker_fee_bps: i32,
    /// Taker fee in basis points.
    pub taker_fee_bps: i32,
    /// Minimum accepted order notional, micro-units.
    pub min_notional: u64,
    /// Minimum fee charged per execution, micro-units.
    pub min_fee: u64,
    /// Whether the symbol currently accepts orders.
    pub active: bool,
    /// Optional downstream hedging linkage (an external venue symbol).
    /// The core only carries it on exposure events; it never trades it.
    pub hedge_symbol: Option<String>,
}

impl Product {
    /// Fee schedule derived from this product's fee fields.
    #[must_use]
    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.maker_fee_bps, self.taker_fee_bps, self.min_fee)
    }
}

/// Thread-safe registry of [`Product`] definitions.
pub struct ProductCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl ProductCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
        }
    }

    /// Create a catalog pre-populated with `products`.
    #[must_use]
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for p in products {
            catalog.upsert(p);
        }
        catalog
    }

    /// Insert or replace a product definition.
    pub fn upsert(&self, product: Product) {
        info!(symbol = %product.symbol, active = product.active, "catalog upsert");
        self.products
            .write()
            .expect("catalog lock poisoned")
            .insert(product.symbol.clone(), product);
    }

    /// Look up a product by symbol. Returns a clone; definitions are small.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Product> {
        self.products
            .read()
            .expect("catalog lock poisoned")
            .get(symbol)
            .cloned()
    }

    /// Look up a product that is currently accepting orders.
    #[must_use]
    pub fn get_active(&self, symbol: &str) -> Option<Product> {
        self.get(symbol).filter(|p| p.active)
    }

    /// Toggle the activation flag. Returns `false` for unknown symbols.
    pub fn set_active(&self, symbol: &str, active: bool) -> bool {
        let mut guard = self.products.write().expect("catalog lock poisoned");
        match guard.get_mut(symbol) {
            Some(p) => {
                p.active = active;
                info!(symbol, active, "catalog activation changed");
                true
            }
            None => false,
        }
    }

    /// All known symbols, in no particular order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.products
            .read()
            .expect("catalog lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.read().expect("catalog lock poisoned").len()
    }

    /// `true` when no products are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::new()
    }
}
