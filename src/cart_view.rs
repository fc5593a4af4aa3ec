use crate::cart::{Cart, format_price};
use crate::config::CartConfig;
use crate::dom::{Dom, NodeId};
use crate::html::{escape_html, escape_text};
use crate::Result;

pub(crate) const EMPTY_CART_HTML: &str = r#"<div class="empty-cart"><p>Your bag is empty</p></div>"#;

/// Element references one page region uses to show the shared cart. Any of
/// them may be absent, from the view or from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartView {
    badge: Option<String>,
    items: Option<String>,
    total: Option<String>,
}

impl CartView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CartConfig) -> Self {
        Self {
            badge: config.badge_selector.clone(),
            items: config.items_selector.clone(),
            total: config.total_selector.clone(),
        }
    }

    pub fn with_badge(mut self, selector: impl Into<String>) -> Self {
        self.badge = Some(selector.into());
        self
    }

    pub fn with_items(mut self, selector: impl Into<String>) -> Self {
        self.items = Some(selector.into());
        self
    }

    pub fn with_total(mut self, selector: impl Into<String>) -> Self {
        self.total = Some(selector.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.badge.is_none() && self.items.is_none() && self.total.is_none()
    }

    pub fn render(&self, dom: &mut Dom, cart: &Cart) -> Result<()> {
        if let Some(badge) = find(dom, self.badge.as_deref())? {
            let count = cart.item_count();
            set_text_if_changed(dom, badge, &count.to_string())?;
            dom.style_set(badge, "display", if count > 0 { "flex" } else { "none" })?;
        }

        if let Some(items) = find(dom, self.items.as_deref())? {
            let html = items_html(cart);
            if dom.inner_html(items)? != html {
                dom.set_inner_html(items, &html)?;
            }
        }

        if let Some(total) = find(dom, self.total.as_deref())? {
            set_text_if_changed(dom, total, &format_price(cart.total()))?;
        }
        Ok(())
    }
}

fn find(dom: &Dom, selector: Option<&str>) -> Result<Option<NodeId>> {
    match selector {
        Some(selector) => dom.query_selector(selector),
        None => Ok(None),
    }
}

fn set_text_if_changed(dom: &mut Dom, node: NodeId, value: &str) -> Result<()> {
    if dom.text_content(node) != value {
        dom.set_text_content(node, value)?;
    }
    Ok(())
}

pub(crate) fn items_html(cart: &Cart) -> String {
    if cart.is_empty() {
        return EMPTY_CART_HTML.to_string();
    }
    let mut out = String::new();
    for item in cart.items() {
        out.push_str(r#"<div class="cart-item"><div class="cart-item-info"><div class="cart-item-name">"#);
        out.push_str(&escape_text(&item.name));
        out.push_str(r#"</div><div class="cart-item-price">$"#);
        out.push_str(&format_price(item.unit_price));
        out.push_str(" × ");
        out.push_str(&item.quantity.to_string());
        out.push_str(r#"</div></div><button class="remove-item" data-product-id=""#);
        out.push_str(&escape_html(&item.id));
        out.push_str(r#"">Remove</button></div>"#);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn select(dom: &Dom, selector: &str) -> Result<NodeId> {
        dom.query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn full_view() -> CartView {
        CartView::new()
            .with_badge("#bag-count")
            .with_items("#cart-items")
            .with_total("#cart-total")
    }

    #[test]
    fn renders_badge_items_and_total() -> Result<()> {
        let mut dom = Dom::from_html(
            r#"<span id="bag-count"></span><div id="cart-items"></div><span id="cart-total"></span>"#,
        )?;
        let mut cart = Cart::new();
        cart.add("pad-pro", "Pad Pro", 799.0)?;
        cart.add("airtag", "AirTag", 29.0)?;
        cart.add("airtag", "AirTag", 29.0)?;

        full_view().render(&mut dom, &cart)?;

        let badge = select(&dom, "#bag-count")?;
        assert_eq!(dom.text_content(badge), "3");
        assert_eq!(dom.style_get(badge, "display").as_deref(), Some("flex"));
        assert_eq!(dom.text_content(select(&dom, "#cart-total")?), "857.00");

        let prices = dom
            .query_selector_all(".cart-item-price")?
            .into_iter()
            .map(|node| dom.text_content(node))
            .collect::<Vec<_>>();
        assert_eq!(prices, vec!["$799.00 × 1".to_string(), "$29.00 × 2".to_string()]);
        let button = select(&dom, "#cart-items .cart-item:last-child button.remove-item")?;
        assert_eq!(dom.attr(button, "data-product-id"), Some("airtag"));
        Ok(())
    }

    #[test]
    fn empty_cart_hides_badge_and_shows_placeholder() -> Result<()> {
        let mut dom = Dom::from_html(
            r#"<span id="bag-count">4</span><div id="cart-items"><p>old</p></div><span id="cart-total"></span>"#,
        )?;
        full_view().render(&mut dom, &Cart::new())?;

        let badge = select(&dom, "#bag-count")?;
        assert_eq!(dom.text_content(badge), "0");
        assert_eq!(dom.style_get(badge, "display").as_deref(), Some("none"));
        assert_eq!(dom.text_content(select(&dom, ".empty-cart p")?), "Your bag is empty");
        assert_eq!(dom.text_content(select(&dom, "#cart-total")?), "0.00");
        Ok(())
    }

    #[test]
    fn missing_elements_are_skipped() -> Result<()> {
        let mut dom = Dom::from_html("<p>no cart here</p>")?;
        let mut cart = Cart::new();
        cart.add("x", "X", 1.0)?;
        full_view().render(&mut dom, &cart)?;
        assert_eq!(dom.pending_mutation_count(), 0);
        Ok(())
    }

    #[test]
    fn unchanged_render_writes_nothing() -> Result<()> {
        let mut dom = Dom::from_html(r#"<div id="cart-items"></div><span id="cart-total"></span>"#)?;
        let mut cart = Cart::new();
        cart.add("x", "X & Co", 1.5)?;
        let view = CartView::new().with_items("#cart-items").with_total("#cart-total");

        view.render(&mut dom, &cart)?;
        dom.take_mutation_records();
        view.render(&mut dom, &cart)?;
        assert_eq!(dom.pending_mutation_count(), 0);
        Ok(())
    }
}
