use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::Storage;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "price")]
    pub unit_price: f64,
    pub quantity: u32,
}

impl LineItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

pub fn format_price(value: f64) -> String {
    format!("{value:.2}")
}

fn validate_price(unit_price: f64) -> Result<()> {
    if !unit_price.is_finite() {
        return Err(Error::InvalidInput(format!(
            "unit price must be finite, got {unit_price}"
        )));
    }
    if unit_price < 0.0 {
        return Err(Error::InvalidInput(format!(
            "unit price must not be negative, got {unit_price}"
        )));
    }
    Ok(())
}

/// Ordered line items, at most one per product id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<LineItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn quantity_of(&self, id: &str) -> u32 {
        self.get(id).map(|item| item.quantity).unwrap_or(0)
    }

    /// Adds one unit of `id`. A repeated id only bumps the quantity; the
    /// name and price from the first insertion are kept.
    pub fn add(&mut self, id: &str, name: &str, unit_price: f64) -> Result<&LineItem> {
        if id.is_empty() {
            return Err(Error::InvalidInput("product id must not be empty".into()));
        }
        validate_price(unit_price)?;

        let index = match self.items.iter().position(|item| item.id == id) {
            Some(index) => {
                let item = &mut self.items[index];
                item.quantity = item.quantity.checked_add(1).ok_or_else(|| {
                    Error::InvalidInput(format!("quantity overflow for {id}"))
                })?;
                index
            }
            None => {
                self.items.push(LineItem {
                    id: id.to_string(),
                    name: name.to_string(),
                    unit_price,
                    quantity: 1,
                });
                self.items.len() - 1
            }
        };
        Ok(&self.items[index])
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        before != self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(LineItem::subtotal).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn to_snapshot(&self) -> Result<String> {
        serde_json::to_string(&self.items).map_err(|err| Error::Storage(err.to_string()))
    }

    /// Strict snapshot parser; any malformed or inconsistent entry is
    /// reported as [`Error::StorageCorrupt`].
    pub fn from_snapshot(raw: &str) -> Result<Self> {
        let items: Vec<LineItem> =
            serde_json::from_str(raw).map_err(|err| Error::StorageCorrupt(err.to_string()))?;

        for (index, item) in items.iter().enumerate() {
            if item.id.is_empty() {
                return Err(Error::StorageCorrupt(format!("item {index} has an empty id")));
            }
            if item.quantity == 0 {
                return Err(Error::StorageCorrupt(format!(
                    "item {} has zero quantity",
                    item.id
                )));
            }
            validate_price(item.unit_price)
                .map_err(|_| Error::StorageCorrupt(format!("item {} has a bad price", item.id)))?;
            if items[..index].iter().any(|earlier| earlier.id == item.id) {
                return Err(Error::StorageCorrupt(format!("duplicate item id {}", item.id)));
            }
        }

        Ok(Self { items })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub items: Vec<LineItem>,
    pub total: f64,
}

impl CheckoutReceipt {
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

impl fmt::Display for CheckoutReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checkout complete! Total: ${}", format_price(self.total))?;
        write!(f, "\n\nItems:")?;
        for item in &self.items {
            write!(f, "\n{} × {}", item.name, item.quantity)?;
        }
        Ok(())
    }
}

/// The cart plus the storage slot it is mirrored to. Every mutation is
/// written through before returning.
#[derive(Debug)]
pub struct CartManager {
    cart: Cart,
    storage: Box<dyn Storage>,
    storage_key: String,
}

impl CartManager {
    pub fn new(storage: Box<dyn Storage>, storage_key: impl Into<String>) -> Self {
        Self {
            cart: Cart::new(),
            storage,
            storage_key: storage_key.into(),
        }
    }

    /// Creates a manager and restores whatever snapshot the slot holds.
    pub fn open(storage: Box<dyn Storage>, storage_key: impl Into<String>) -> Self {
        let mut manager = Self::new(storage, storage_key);
        manager.restore();
        manager
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn items(&self) -> &[LineItem] {
        self.cart.items()
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn total(&self) -> f64 {
        self.cart.total()
    }

    pub fn item_count(&self) -> u32 {
        self.cart.item_count()
    }

    pub fn quantity_of(&self, id: &str) -> u32 {
        self.cart.quantity_of(id)
    }

    pub fn add_item(&mut self, id: &str, name: &str, unit_price: f64) -> Result<()> {
        let mut next = self.cart.clone();
        let quantity = next.add(id, name, unit_price)?.quantity;
        self.commit(next)?;
        tracing::debug!(id, quantity, "cart item added");
        Ok(())
    }

    pub fn remove_item(&mut self, id: &str) -> Result<()> {
        let mut next = self.cart.clone();
        let removed = next.remove(id);
        self.commit(next)?;
        if removed {
            tracing::debug!(id, "cart item removed");
        }
        Ok(())
    }

    pub fn checkout(&mut self) -> Result<CheckoutReceipt> {
        if self.cart.is_empty() {
            return Err(Error::EmptyCart);
        }
        let receipt = CheckoutReceipt {
            items: self.cart.items().to_vec(),
            total: self.cart.total(),
        };
        self.commit(Cart::new())?;
        tracing::info!(
            total = %format_price(receipt.total),
            items = receipt.item_count(),
            "checkout complete"
        );
        Ok(receipt)
    }

    pub fn persist(&mut self) -> Result<()> {
        let snapshot = self.cart.to_snapshot()?;
        self.storage.set_item(&self.storage_key, &snapshot)
    }

    /// Writes `next` to storage and only then makes it the current cart, so a
    /// failed write leaves both sides at the previous state.
    fn commit(&mut self, next: Cart) -> Result<()> {
        let snapshot = next.to_snapshot()?;
        self.storage.set_item(&self.storage_key, &snapshot)?;
        self.cart = next;
        Ok(())
    }

    /// Reloads the cart from storage. A missing slot gives an empty cart and
    /// so does a corrupt one, after logging the problem.
    pub fn restore(&mut self) {
        self.cart = match self.storage.get_item(&self.storage_key) {
            None => Cart::new(),
            Some(raw) => match Cart::from_snapshot(&raw) {
                Ok(cart) => cart,
                Err(err) => {
                    tracing::warn!(key = %self.storage_key, error = %err, "discarding stored cart");
                    Cart::new()
                }
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const KEY: &str = "shoppingCart";

    fn manager() -> CartManager {
        CartManager::new(Box::new(MemoryStorage::new()), KEY)
    }

    /// Reads from a seeded slot, rejects every write.
    #[derive(Debug)]
    struct ReadOnlyStorage(MemoryStorage);

    impl Storage for ReadOnlyStorage {
        fn get_item(&self, key: &str) -> Option<String> {
            self.0.get_item(key)
        }

        fn set_item(&mut self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }

        fn remove_item(&mut self, _key: &str) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
    }

    #[test]
    fn add_twice_then_remove_leaves_empty_cart() -> Result<()> {
        let mut cart = manager();
        cart.add_item("x1", "Widget", 10.0)?;
        cart.add_item("x1", "Widget", 10.0)?;
        assert_eq!(cart.quantity_of("x1"), 2);
        cart.remove_item("x1")?;

        assert!(cart.cart().is_empty());
        assert_eq!(cart.total(), 0.0);
        assert_eq!(cart.item_count(), 0);
        assert_eq!(cart.storage().get_item(KEY).as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn duplicate_add_keeps_first_name_and_price() -> Result<()> {
        let mut cart = Cart::new();
        cart.add("pad-pro", "Pad Pro", 799.0)?;
        cart.add("pad-pro", "Pad Pro (renamed)", 1.0)?;

        let item = cart.get("pad-pro").ok_or(Error::EmptyCart)?;
        assert_eq!(item.name, "Pad Pro");
        assert_eq!(item.unit_price, 799.0);
        assert_eq!(item.quantity, 2);
        assert_eq!(cart.total(), 1598.0);
        Ok(())
    }

    #[test]
    fn insertion_order_is_preserved() -> Result<()> {
        let mut cart = Cart::new();
        cart.add("b", "B", 1.0)?;
        cart.add("a", "A", 2.0)?;
        cart.add("b", "B", 1.0)?;
        let ids = cart.items().iter().map(|item| item.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "a"]);
        Ok(())
    }

    #[test]
    fn invalid_prices_are_rejected_without_persisting() {
        let mut cart = manager();
        for price in [-0.01, f64::NAN, f64::INFINITY] {
            let err = cart.add_item("x", "X", price).expect_err("bad price");
            assert!(matches!(err, Error::InvalidInput(_)));
        }
        assert_eq!(cart.storage().get_item(KEY), None);
        assert!(cart.add_item("", "X", 1.0).is_err());
    }

    #[test]
    fn zero_price_is_allowed() -> Result<()> {
        let mut cart = manager();
        cart.add_item("free", "Sticker", 0.0)?;
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total(), 0.0);
        Ok(())
    }

    #[test]
    fn remove_of_missing_id_is_a_no_op() -> Result<()> {
        let mut cart = manager();
        cart.add_item("a", "A", 3.0)?;
        cart.remove_item("nope")?;
        assert_eq!(cart.item_count(), 1);
        Ok(())
    }

    #[test]
    fn persist_then_restore_round_trips() -> Result<()> {
        let mut first = manager();
        first.add_item("phone-15-pro", "Phone 15 Pro", 999.0)?;
        first.add_item("airtag", "AirTag", 29.0)?;
        first.add_item("airtag", "AirTag", 29.0)?;
        let snapshot = first.storage().get_item(KEY).ok_or(Error::EmptyCart)?;

        let restored = CartManager::open(Box::new(MemoryStorage::with_items(&[(KEY, snapshot.as_str())])), KEY);
        assert_eq!(restored.cart(), first.cart());
        assert_eq!(format_price(restored.total()), "1057.00");
        Ok(())
    }

    #[test]
    fn persist_rewrites_a_corrupt_slot() -> Result<()> {
        let mut cart = CartManager::open(Box::new(MemoryStorage::with_items(&[(KEY, "garbage")])), KEY);
        assert!(cart.cart().is_empty());
        cart.persist()?;
        assert_eq!(cart.storage().get_item(KEY).as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn snapshot_uses_storefront_field_names() -> Result<()> {
        let mut cart = Cart::new();
        cart.add("magic-mouse", "Magic Mouse", 79.5)?;
        assert_eq!(
            cart.to_snapshot()?,
            r#"[{"id":"magic-mouse","name":"Magic Mouse","price":79.5,"quantity":1}]"#
        );
        Ok(())
    }

    #[test]
    fn corrupt_snapshots_restore_as_empty() {
        for raw in [
            "{not json",
            r#"{"id":"a"}"#,
            r#"[{"id":"a","name":"A","price":-1,"quantity":1}]"#,
            r#"[{"id":"a","name":"A","price":1,"quantity":0}]"#,
            r#"[{"id":"a","name":"A","price":1,"quantity":1},{"id":"a","name":"A","price":1,"quantity":1}]"#,
        ] {
            assert!(matches!(Cart::from_snapshot(raw), Err(Error::StorageCorrupt(_))), "{raw}");
            let manager = CartManager::open(Box::new(MemoryStorage::with_items(&[(KEY, raw)])), KEY);
            assert!(manager.cart().is_empty(), "{raw}");
            assert_eq!(manager.storage().get_item(KEY).as_deref(), Some(raw));
        }
    }

    #[test]
    fn checkout_on_empty_cart_leaves_storage_untouched() {
        let mut cart = CartManager::open(Box::new(MemoryStorage::with_items(&[(KEY, "garbage")])), KEY);
        assert_eq!(cart.checkout(), Err(Error::EmptyCart));
        assert_eq!(cart.storage().get_item(KEY).as_deref(), Some("garbage"));
    }

    #[test]
    fn checkout_clears_and_persists_empty_state() -> Result<()> {
        let mut cart = manager();
        cart.add_item("pad-pro", "Pad Pro", 799.0)?;
        cart.add_item("magic-keyboard", "Magic Keyboard", 99.0)?;
        cart.add_item("magic-keyboard", "Magic Keyboard", 99.0)?;

        let receipt = cart.checkout()?;
        assert_eq!(receipt.item_count(), 3);
        assert_eq!(
            receipt.to_string(),
            "Checkout complete! Total: $997.00\n\nItems:\nPad Pro × 1\nMagic Keyboard × 2"
        );
        assert!(cart.cart().is_empty());
        assert_eq!(cart.storage().get_item(KEY).as_deref(), Some("[]"));
        Ok(())
    }

    #[test]
    fn failed_write_leaves_cart_and_slot_unchanged() -> Result<()> {
        let seeded = r#"[{"id":"airtag","name":"AirTag","price":29.0,"quantity":1}]"#;
        let mut cart = CartManager::open(
            Box::new(ReadOnlyStorage(MemoryStorage::with_items(&[(KEY, seeded)]))),
            KEY,
        );
        assert_eq!(cart.item_count(), 1);

        let err = cart.add_item("pad-pro", "Pad Pro", 799.0).expect_err("write fails");
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.quantity_of("pad-pro"), 0);

        assert!(cart.add_item("airtag", "AirTag", 29.0).is_err());
        assert_eq!(cart.quantity_of("airtag"), 1);

        assert!(cart.remove_item("airtag").is_err());
        assert_eq!(cart.quantity_of("airtag"), 1);

        assert!(matches!(cart.checkout(), Err(Error::Storage(_))));
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.storage().get_item(KEY).as_deref(), Some(seeded));
        Ok(())
    }
}
