use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseError, TestCaseResult};
use storefront_kit::{
    BrandingConfig, ConvergencePass, Dom, PruningConfig, Rebrander, RuleSet, SectionPruner,
};

const CONVERGENCE_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/convergence_property_fuzz_test.txt";
const DEFAULT_CONVERGENCE_PROPTEST_CASES: u32 = 128;

fn convergence_proptest_cases() -> u32 {
    std::env::var("STOREFRONT_KIT_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CONVERGENCE_PROPTEST_CASES)
}

fn branded_text_strategy() -> BoxedStrategy<String> {
    prop_oneof![
        3 => branded_fragment_strategy(),
        1 => (0usize..=40, prop_oneof![Just("Pad"), Just("Phone"), Just("pad"), Just("OS")])
            .prop_map(|(depth, tail)| format!("{}{tail}", "i".repeat(depth))),
    ]
    .boxed()
}

fn branded_fragment_strategy() -> BoxedStrategy<String> {
    vec(
        prop_oneof![
            Just("Apple"),
            Just("apple"),
            Just("iPhone"),
            Just("Mac"),
            Just("Book"),
            Just("OS"),
            Just("watch"),
            Just("WATCH"),
            Just("Pad"),
            Just("ios"),
            Just("x"),
            Just(" "),
            Just("-"),
        ],
        0..=12,
    )
    .prop_map(|parts| parts.concat())
    .boxed()
}

fn nav_label_strategy() -> BoxedStrategy<String> {
    prop_oneof![
        Just("Store".to_string()),
        Just("AirPods".to_string()),
        Just("TV & Home".to_string()),
        Just("Phone Accessories".to_string()),
        Just("Support".to_string()),
        Just("Watch".to_string()),
        Just("Entertainment and more".to_string()),
        Just("".to_string()),
    ]
    .boxed()
}

fn fail(err: storefront_kit::Error) -> TestCaseError {
    TestCaseError::fail(format!("{err:?}"))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
}

fn assert_rebrand_is_idempotent(parts: &[String]) -> TestCaseResult {
    let body = parts
        .iter()
        .map(|text| format!(r#"<p title="{0}" data-name="{0}">{0}</p>"#, escape(text)))
        .collect::<String>();
    let mut dom = Dom::from_html(&format!("<body>{body}</body>")).map_err(fail)?;
    let mut pass = Rebrander::from_config(&BrandingConfig::default()).map_err(fail)?;

    pass.apply(&mut dom).map_err(fail)?;
    let once = dom.dump_node(dom.root());
    dom.take_mutation_records();

    let second = pass.apply(&mut dom).map_err(fail)?;
    prop_assert!(second.is_noop(), "second pass changed {second:?}");
    prop_assert_eq!(dom.dump_node(dom.root()), once);
    prop_assert_eq!(dom.pending_mutation_count(), 0);
    Ok(())
}

fn assert_prune_is_idempotent(labels: &[String]) -> TestCaseResult {
    let items = labels
        .iter()
        .map(|label| format!(r#"<li><a href="/">{}</a></li>"#, escape(label)))
        .collect::<String>();
    let mut dom = Dom::from_html(&format!("<nav><ul>{items}</ul></nav>")).map_err(fail)?;
    let mut pass = SectionPruner::from_config(&PruningConfig::default()).map_err(fail)?;

    let first = pass.apply(&mut dom).map_err(fail)?;
    let remaining = dom.query_selector_all("nav a").map_err(fail)?;
    for node in &remaining {
        let label = dom.text_content(*node);
        prop_assert!(
            !pass.criterion().should_remove(&label),
            "left {label:?} behind after {first:?}"
        );
    }

    let second = pass.apply(&mut dom).map_err(fail)?;
    prop_assert!(second.is_noop(), "second pass changed {second:?}");
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: convergence_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(CONVERGENCE_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn rule_set_reaches_a_fixed_point(text in branded_text_strategy()) {
        let rules = RuleSet::from_config(&BrandingConfig::default()).map_err(fail)?;
        let once = rules.apply(&text).map_err(fail)?.unwrap_or_else(|| text.clone());
        prop_assert_eq!(rules.apply(&once).map_err(fail)?, None);
    }

    #[test]
    fn rebrand_pass_twice_equals_once(parts in vec(branded_text_strategy(), 1..=6)) {
        assert_rebrand_is_idempotent(&parts)?;
    }

    #[test]
    fn prune_pass_twice_equals_once(labels in vec(nav_label_strategy(), 0..=8)) {
        assert_prune_is_idempotent(&labels)?;
    }
}
