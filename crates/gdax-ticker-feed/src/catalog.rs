/*
[INPUT]:  Configured base/target ticker symbol pairs
[OUTPUT]: Ordered, de-duplicated list of known products
[POS]:    Configuration layer - trading pairs offered to the user
[UPDATE]: When product construction rules change
*/

use anyhow::anyhow;

use gdax_ticker_adapter::{Currency, Product};

use crate::config::ProductConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductCatalog {
    products: Vec<Product>,
}

impl ProductCatalog {
    /// Resolve every pair through the currency table. Duplicates are dropped,
    /// first occurrence wins.
    pub fn from_config(entries: &[ProductConfig]) -> anyhow::Result<Self> {
        let mut products: Vec<Product> = Vec::with_capacity(entries.len());

        for entry in entries {
            let base = resolve(&entry.base)?;
            let target = resolve(&entry.target)?;
            let product = Product::from_pair(base, target)?;
            if !products.contains(&product) {
                products.push(product);
            }
        }

        Ok(Self { products })
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn contains(&self, product: &Product) -> bool {
        self.products.contains(product)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

fn resolve(symbol: &str) -> anyhow::Result<Currency> {
    Currency::from_ticker_symbol(symbol).ok_or_else(|| anyhow!("unknown currency '{symbol}'"))
}
