/*
[INPUT]:  Per-product display settings persisted as JSON
[OUTPUT]: "Was subscribed last session" flags and window positions
[POS]:    Persistence layer - settings store consumed at startup
[UPDATE]: When adding persisted per-product settings
*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use gdax_ticker_adapter::Product;

use crate::catalog::ProductCatalog;
use crate::feed::PriceFeed;

const APP_DIR: &str = "gdax-ticker";
const SETTINGS_FILE: &str = "settings.json";

/// Persisted settings of one product's ticker window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSetting {
    pub product: Product,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub subscribed: bool,
    pub updated_at: DateTime<Utc>,
}

impl TickerSetting {
    pub fn new(product: Product) -> Self {
        Self {
            product,
            top: 0.0,
            left: 0.0,
            subscribed: false,
            updated_at: Utc::now(),
        }
    }
}

/// Source of the persisted subscription flag.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn is_subscribed(&self, product: &Product) -> Result<bool>;
    async fn set_subscribed(&self, product: &Product, subscribed: bool) -> Result<()>;
}

/// Settings kept in a single JSON file
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: Mutex<HashMap<Product, TickerSetting>>,
}

impl JsonSettingsStore {
    /// Open the store in the platform data directory.
    pub async fn new() -> Result<Self> {
        Self::open(default_settings_path()?).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let settings = Self::load(&path).await?;
        debug!(path = %path.display(), entries = settings.len(), "settings loaded");

        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<HashMap<Product, TickerSetting>> {
        if !fs::try_exists(path).await? {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let list: Vec<TickerSetting> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(list.into_iter().map(|s| (s.product.clone(), s)).collect())
    }

    pub async fn get(&self, product: &Product) -> Option<TickerSetting> {
        self.settings.lock().await.get(product).cloned()
    }

    pub async fn set_position(&self, product: &Product, top: f64, left: f64) -> Result<()> {
        self.update(product, |setting| {
            setting.top = top;
            setting.left = left;
        })
        .await
    }

    async fn update(&self, product: &Product, f: impl FnOnce(&mut TickerSetting)) -> Result<()> {
        let mut settings = self.settings.lock().await;
        let setting = settings
            .entry(product.clone())
            .or_insert_with(|| TickerSetting::new(product.clone()));
        f(setting);
        setting.updated_at = Utc::now();
        self.save(&settings).await
    }

    async fn save(&self, settings: &HashMap<Product, TickerSetting>) -> Result<()> {
        let mut list: Vec<_> = settings.values().cloned().collect();
        list.sort_by(|a, b| a.product.cmp(&b.product));
        let content = serde_json::to_string_pretty(&list)?;

        // Atomic write: write to temp file then rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn is_subscribed(&self, product: &Product) -> Result<bool> {
        Ok(self
            .settings
            .lock()
            .await
            .get(product)
            .is_some_and(|setting| setting.subscribed))
    }

    async fn set_subscribed(&self, product: &Product, subscribed: bool) -> Result<()> {
        self.update(product, |setting| setting.subscribed = subscribed)
            .await
    }
}

pub fn default_settings_path() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?
        .join(APP_DIR)
        .join(SETTINGS_FILE))
}

/// Subscribe every catalog product flagged in the store. Returns how many.
pub async fn restore_subscriptions(
    feed: &dyn PriceFeed,
    catalog: &ProductCatalog,
    store: &dyn SettingsStore,
) -> Result<usize> {
    let mut restored = 0;
    for product in catalog.products() {
        if store.is_subscribed(product).await? {
            feed.subscribe(product.clone());
            restored += 1;
        }
    }
    info!(restored, known = catalog.len(), "subscriptions restored from settings");
    Ok(restored)
}
