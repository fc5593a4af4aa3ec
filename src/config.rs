use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::selector::parse_selector_groups;
use crate::{Error, Result};

/// Page-wide settings. Every section falls back to the storefront defaults,
/// so a TOML file only needs the keys it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorefrontConfig {
    pub cart: CartConfig,
    pub catalog: CatalogConfig,
    pub branding: BrandingConfig,
    pub pruning: PruningConfig,
    pub convergence: ConvergenceConfig,
}

impl StorefrontConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cart.storage_key.is_empty() {
            return Err(Error::InvalidInput("cart.storage_key must not be empty".into()));
        }
        self.convergence.validate()?;
        if self.branding.max_rounds == 0 {
            return Err(Error::InvalidInput("branding.max_rounds must be at least 1".into()));
        }
        if self.pruning.short_label_max_chars == 0 {
            return Err(Error::InvalidInput(
                "pruning.short_label_max_chars must be at least 1".into(),
            ));
        }
        for selector in self.selectors() {
            parse_selector_groups(selector)?;
        }
        Ok(())
    }

    /// Every selector the page will query, so a typo fails at load time
    /// instead of in the middle of a timer run.
    fn selectors(&self) -> impl Iterator<Item = &str> {
        let cart = [
            &self.cart.badge_selector,
            &self.cart.items_selector,
            &self.cart.total_selector,
        ]
        .into_iter()
        .filter_map(|selector| selector.as_deref());
        let pruning = self
            .pruning
            .nav_selectors
            .iter()
            .map(String::as_str)
            .chain(
                Some(self.pruning.container_selector.as_str())
                    .filter(|selector| !selector.trim().is_empty()),
            );
        cart.chain(pruning)
            .chain(std::iter::once(self.convergence.readiness_selector.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartConfig {
    pub storage_key: String,
    pub badge_selector: Option<String>,
    pub items_selector: Option<String>,
    pub total_selector: Option<String>,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            storage_key: "shoppingCart".into(),
            badge_selector: Some("#bag-count".into()),
            items_selector: Some("#cart-items".into()),
            total_selector: Some("#cart-total".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub products: BTreeMap<String, String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let products = [
            ("phone-15-pro", "Phone 15 Pro"),
            ("desktopbook-air-m3", "DesktopBook Air M3"),
            ("pad-pro", "Pad Pro"),
            ("magic-mouse", "Magic Mouse"),
            ("magic-keyboard", "Magic Keyboard"),
            ("airtag", "AirTag"),
            ("lightning-cable", "Lightning to USB-C Cable"),
        ]
        .into_iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();
        Self { products }
    }
}

impl CatalogConfig {
    /// Display name for a product id; unknown ids are shown as-is.
    pub fn product_name<'a>(&'a self, product_id: &'a str) -> &'a str {
        self.products
            .get(product_id)
            .map(String::as_str)
            .unwrap_or(product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub replacement: String,
}

impl RuleConfig {
    fn new(pattern: &str, replacement: &str) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandingConfig {
    pub enabled: bool,
    pub rules: Vec<RuleConfig>,
    /// Attributes rewritten with the case-sensitive rules.
    pub attributes: Vec<String>,
    /// Attributes rewritten case-insensitively with lowercased replacements.
    pub data_attributes: Vec<String>,
    /// Base rewrite round budget; each input char adds one more round.
    pub max_rounds: usize,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        // "WATCHOS" maps to "LEMON WATCH OS": a replacement that still
        // contains its own pattern would be rewritten again on every pass.
        let rules = [
            ("Apple", "LemOn"),
            ("apple", "LemOn"),
            ("APPLE", "LEMON"),
            ("Mac", "Desktop"),
            ("mac", "Desktop"),
            ("MAC", "DESKTOP"),
            ("MacBook", "DesktopBook"),
            ("macbook", "DesktopBook"),
            ("MACBOOK", "DESKTOPBOOK"),
            ("iMac", "iDesktop"),
            ("imac", "iDesktop"),
            ("IMAC", "IDESKTOP"),
            ("iPad", "Pad"),
            ("ipad", "Pad"),
            ("IPAD", "PAD"),
            ("iPhone", "Phone"),
            ("iphone", "Phone"),
            ("IPHONE", "PHONE"),
            ("Apple Watch", "LemOn Watch"),
            ("apple watch", "LemOn Watch"),
            ("APPLE WATCH", "LEMON WATCH"),
            ("MacOS", "DesktopOS"),
            ("macOS", "DesktopOS"),
            ("MACOS", "DESKTOPOS"),
            ("iPadOS", "PadOS"),
            ("ipadOS", "PadOS"),
            ("IPADOS", "PADOS"),
            ("iOS", "PhoneOS"),
            ("ios", "PhoneOS"),
            ("IOS", "PHONEOS"),
            ("watchOS", "LemOn WatchOS"),
            ("watchos", "LemOn WatchOS"),
            ("WATCHOS", "LEMON WATCH OS"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| RuleConfig::new(pattern, replacement))
        .collect();

        Self {
            enabled: true,
            rules,
            attributes: vec!["alt".into(), "title".into(), "aria-label".into()],
            data_attributes: vec![
                "data-product".into(),
                "data-category".into(),
                "data-name".into(),
            ],
            max_rounds: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    pub enabled: bool,
    pub remove: Vec<String>,
    pub keep: Vec<String>,
    pub nav_selectors: Vec<String>,
    pub container_selector: String,
    pub short_label_max_chars: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            enabled: true,
            remove: strings(&[
                "airpods",
                "air pods",
                "tv & home",
                "tv and home",
                "tv-home",
                "entertainment",
                "accessories",
                "support",
            ]),
            keep: strings(&["home", "shop", "store", "desktop", "pad", "phone", "watch"]),
            nav_selectors: strings(&[
                "nav a",
                ".nav a",
                ".navigation a",
                ".menu a",
                ".navbar a",
                "[role=\"navigation\"] a",
                ".nav-link",
                ".nav-item",
                "button",
                "[role=\"button\"]",
            ]),
            container_selector: "nav li, .nav li, .navigation li, .menu li".into(),
            short_label_max_chars: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub readiness_selector: String,
    pub initial_delay_ms: i64,
    pub poll_interval_ms: i64,
    pub debounce_ms: i64,
    pub max_poll_attempts: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            readiness_selector: "#root".into(),
            initial_delay_ms: 1500,
            poll_interval_ms: 100,
            debounce_ms: 500,
            max_poll_attempts: 600,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.readiness_selector.trim().is_empty() {
            return Err(Error::InvalidInput(
                "convergence.readiness_selector must not be empty".into(),
            ));
        }
        if self.initial_delay_ms < 0 {
            return Err(Error::InvalidInput(
                "convergence.initial_delay_ms must not be negative".into(),
            ));
        }
        if self.poll_interval_ms <= 0 {
            return Err(Error::InvalidInput(
                "convergence.poll_interval_ms must be positive".into(),
            ));
        }
        if self.debounce_ms <= 0 {
            return Err(Error::InvalidInput("convergence.debounce_ms must be positive".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(Error::InvalidInput(
                "convergence.max_poll_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
