//! Deterministic model of a storefront page.
//!
//! A [`Page`] owns an arena DOM, a virtual clock, a durable storage slot, the
//! shopping cart and the convergence engines that rebrand text and prune
//! navigation entries once externally rendered content shows up.

mod cart;
mod cart_view;
mod config;
mod convergence;
mod dom;
mod html;
mod page;
mod prune;
mod rewrite;
mod scheduler;
mod selector;
mod storage;
mod trace;

pub use cart::{Cart, CartManager, CheckoutReceipt, LineItem, format_price};
pub use cart_view::CartView;
pub use config::{
    BrandingConfig, CartConfig, CatalogConfig, ConvergenceConfig, PruningConfig, RuleConfig,
    StorefrontConfig,
};
pub use convergence::{ConvergencePass, EngineId, EngineState, EngineStatus, PassReport};
pub use dom::{Dom, MutationKind, MutationRecord, NodeId};
pub use page::Page;
pub use prune::{RemovalCriterion, SectionPruner};
pub use rewrite::{Rebrander, RewriteRule, RuleSet};
pub use scheduler::{PendingTimer, TimerId};
pub use storage::{FileStorage, MemoryStorage, Storage};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cart is empty")]
    EmptyCart,
    #[error("stored cart snapshot is corrupt: {0}")]
    StorageCorrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("conflicting rules: {0}")]
    RuleConflict(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("dom error: {0}")]
    Dom(String),
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error(
        "flush exceeded max timer steps: limit={limit}, now_ms={now_ms}, pending={pending}"
    )]
    TimerStepLimit {
        limit: usize,
        now_ms: i64,
        pending: usize,
    },
    #[error(
        "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
    )]
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}
