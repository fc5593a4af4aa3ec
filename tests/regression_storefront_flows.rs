use storefront_kit::{
    CartView, EngineState, Error, FileStorage, MemoryStorage, Page, Storage, StorefrontConfig,
};

const STOREFRONT_HTML: &str = r#"
<body>
  <header>
    <nav class="main-nav">
      <a href="/">Home</a>
      <span id="bag-count" style="display: none">0</span>
    </nav>
  </header>
  <div id="root"></div>
  <aside id="cart-modal">
    <div id="cart-items"></div>
    <span id="cart-total">0.00</span>
  </aside>
</body>
"#;

const RENDERED_APP: &str = r#"
<nav class="navigation">
  <ul>
    <li><a href="/store">Store</a></li>
    <li><a href="/mac">Mac</a></li>
    <li><a href="/ipad">iPad</a></li>
    <li><a href="/airpods">AirPods</a></li>
    <li><a href="/tv-home">TV &amp; Home</a></li>
    <li><a href="/support">Support</a></li>
  </ul>
</nav>
<section class="hero">
  <h1>The new iPhone is here</h1>
  <img src="hero.png" alt="Apple iPhone" title="iPhone 15 Pro">
  <div class="product-card" data-product="iphone-15-pro" data-category="iPhone">
    <p>Works with Apple Watch and AirPods.</p>
  </div>
</section>
"#;

fn nav_labels(page: &Page) -> storefront_kit::Result<Vec<String>> {
    let dom = page.dom();
    Ok(dom
        .query_selector_all(".navigation a")?
        .into_iter()
        .map(|node| dom.text_content(node))
        .collect())
}

#[test]
fn rendered_app_is_rebranded_and_pruned_after_polling() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(STOREFRONT_HTML)?;

    page.advance_time(1000)?;
    page.set_inner_html("#root", RENDERED_APP)?;
    page.advance_time(499)?;
    page.assert_text("#root h1", "The new iPhone is here")?;

    page.advance_time(1)?;
    page.assert_text("#root h1", "The new Phone is here")?;
    assert_eq!(
        nav_labels(&page)?,
        vec!["Store".to_string(), "Desktop".to_string(), "Pad".to_string()]
    );
    // Emptied list items are swept too.
    assert_eq!(page.dom().query_selector_all(".navigation li")?.len(), 3);

    let img = page
        .dom()
        .query_selector("#root img")?
        .ok_or_else(|| Error::SelectorNotFound("#root img".into()))?;
    assert_eq!(page.dom().attr(img, "alt"), Some("LemOn Phone"));
    assert_eq!(page.dom().attr(img, "title"), Some("Phone 15 Pro"));

    let card = page
        .dom()
        .query_selector(".product-card")?
        .ok_or_else(|| Error::SelectorNotFound(".product-card".into()))?;
    assert_eq!(page.dom().attr(card, "data-product"), Some("phone-15-pro"));
    assert_eq!(page.dom().attr(card, "data-category"), Some("phone"));
    page.assert_text(".product-card p", "Works with LemOn Watch and AirPods.")?;

    // The header nav lives outside the rendered app and keeps its "Home".
    page.assert_text("header nav a", "Home")?;
    Ok(())
}

#[test]
fn second_convergence_pass_changes_nothing() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(STOREFRONT_HTML)?;
    page.set_inner_html("#root", RENDERED_APP)?;
    page.notify_rendered()?;
    let once = page.dump_dom("#root")?;

    // An unrelated insertion reruns both engines after the debounce.
    page.append_html("#root", "<footer></footer>")?;
    page.advance_time(500)?;
    let twice = page.dump_dom("#root")?;
    let expected = format!(
        "{}<footer></footer></div>",
        once.strip_suffix("</div>").unwrap_or(&once)
    );
    assert_eq!(twice, expected);

    for status in page.engine_statuses() {
        assert_eq!(status.state, EngineState::Observing);
        assert_eq!(status.passes, 2);
        let report = status.last_report.ok_or(Error::EmptyCart)?;
        assert!(report.is_noop(), "{} changed on its second pass", status.name);
    }
    Ok(())
}

#[test]
fn content_arriving_after_convergence_is_handled() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(STOREFRONT_HTML)?;
    page.set_inner_html("#root", "<main><ul class=\"menu\"></ul></main>")?;
    page.notify_rendered()?;

    page.append_html(
        "#root .menu",
        r#"<li><a href="/acc">Accessories</a></li><li><a href="/watch">Apple Watch</a></li>"#,
    )?;
    page.advance_time(499)?;
    page.assert_exists("#root .menu a[href=\"/acc\"]")?;

    page.advance_time(1)?;
    page.assert_absent("#root .menu a[href=\"/acc\"]")?;
    page.assert_text("#root .menu", "LemOn Watch")?;
    assert_eq!(page.dom().query_selector_all("#root .menu li")?.len(), 1);
    Ok(())
}

#[test]
fn never_rendered_app_times_out_without_touching_the_page() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(
        r#"<div id="root"></div><p>Apple Support</p><button>Support</button>"#,
    )?;
    page.flush()?;

    for status in page.engine_statuses() {
        assert_eq!(status.state, EngineState::TimedOut);
        assert_eq!(status.poll_attempts, 600);
        assert_eq!(status.passes, 0);
    }
    assert_eq!(page.now_ms(), 1500 + 599 * 100);
    page.assert_text("p", "Apple Support")?;
    page.assert_exists("button")?;
    Ok(())
}

#[test]
fn shared_cart_drives_every_view() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(
        r#"<span id="bag-count"></span><div id="cart-items"></div><span id="cart-total"></span>
        <div class="mini"><span class="mini-badge"></span></div>"#,
    )?;
    page.add_cart_view(CartView::new().with_badge(".mini-badge"))?;
    page.assert_text(".mini-badge", "0")?;

    page.add_to_cart("phone-15-pro", 999.0)?;
    page.add_to_cart("magic-mouse", 79.0)?;
    page.add_to_cart("magic-mouse", 79.0)?;

    page.assert_text("#bag-count", "3")?;
    page.assert_text(".mini-badge", "3")?;
    page.assert_text("#cart-total", "1157.00")?;
    page.assert_text(
        "#cart-items .cart-item:first-child .cart-item-price",
        "$999.00 × 1",
    )?;

    let badge = page
        .dom()
        .query_selector(".mini-badge")?
        .ok_or_else(|| Error::SelectorNotFound(".mini-badge".into()))?;
    assert_eq!(page.dom().style_get(badge, "display").as_deref(), Some("flex"));
    Ok(())
}

#[test]
fn checkout_clears_cart_and_renders_empty_state() -> storefront_kit::Result<()> {
    let mut page = Page::from_html(STOREFRONT_HTML)?;
    assert_eq!(page.checkout(), Err(Error::EmptyCart));
    assert_eq!(page.storage().get_item("shoppingCart"), None);

    page.add_to_cart("pad-pro", 799.0)?;
    let receipt = page.checkout()?;
    assert_eq!(receipt.total, 799.0);
    assert_eq!(receipt.items[0].name, "Pad Pro");

    page.assert_text("#cart-items .empty-cart p", "Your bag is empty")?;
    page.assert_text("#bag-count", "0")?;
    page.assert_text("#cart-total", "0.00")?;
    assert_eq!(page.storage().get_item("shoppingCart").as_deref(), Some("[]"));
    Ok(())
}

#[test]
fn cart_survives_a_page_reload_through_file_storage() -> storefront_kit::Result<()> {
    let dir = tempfile::tempdir().map_err(|err| Error::Storage(err.to_string()))?;
    let path = dir.path().join("local-storage.json");

    let mut first = Page::with_storage(
        STOREFRONT_HTML,
        Box::new(FileStorage::open(&path)?),
    )?;
    first.add_to_cart("airtag", 29.0)?;
    first.add_to_cart("airtag", 29.0)?;
    drop(first);

    let second = Page::with_storage(
        STOREFRONT_HTML,
        Box::new(FileStorage::open(&path)?),
    )?;
    assert_eq!(second.cart().quantity_of("airtag"), 2);
    second.assert_text("#bag-count", "2")?;
    second.assert_text("#cart-total", "58.00")?;
    Ok(())
}

#[test]
fn corrupt_stored_cart_loads_as_empty() -> storefront_kit::Result<()> {
    let storage = MemoryStorage::with_items(&[("shoppingCart", r#"[{"id":"x","price":"free"}]"#)]);
    let page = Page::with_storage(STOREFRONT_HTML, Box::new(storage))?;
    assert_eq!(page.cart().item_count(), 0);
    page.assert_text("#cart-items", "Your bag is empty")?;
    Ok(())
}

#[test]
fn config_can_disable_engines_and_rename_the_slot() -> storefront_kit::Result<()> {
    let config = StorefrontConfig::from_toml_str(
        r##"
        [cart]
        storage_key = "appleStoreCart"

        [branding]
        enabled = false

        [convergence]
        readiness_selector = "#app"
        "##,
    )?;
    let mut page = Page::with_config(
        r#"<div id="app"><p>iPhone</p><nav><a>Support</a></nav></div><span id="bag-count"></span>"#,
        config,
        Box::new(MemoryStorage::new()),
    )?;
    assert_eq!(page.engine_statuses().len(), 1);
    page.advance_time(1500)?;

    page.assert_text("#app p", "iPhone")?;
    page.assert_absent("#app nav a")?;

    page.add_item("custom", "Custom Thing", 1.25)?;
    assert!(page.storage().get_item("appleStoreCart").is_some());
    assert_eq!(page.storage().get_item("shoppingCart"), None);
    Ok(())
}
