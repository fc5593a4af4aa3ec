use unicode_normalization::UnicodeNormalization;

use crate::config::PruningConfig;
use crate::convergence::{ConvergencePass, PassReport};
use crate::dom::Dom;
use crate::selector::parse_selector_groups;
use crate::{Error, Result};

/// NFKC-normalized, trimmed, lowercased form used to compare labels.
pub(crate) fn normalize_label(text: &str) -> String {
    text.nfkc().collect::<String>().trim().to_lowercase()
}

/// Decides which navigation labels go. Keep keywords win over remove
/// keywords; the two sets never share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalCriterion {
    remove: Vec<String>,
    keep: Vec<String>,
    short_label_max_chars: usize,
}

impl RemovalCriterion {
    pub fn new<R, K>(remove: R, keep: K) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let remove = normalize_keywords(remove)?;
        let keep = normalize_keywords(keep)?;
        if let Some(shared) = remove.iter().find(|keyword| keep.contains(*keyword)) {
            return Err(Error::RuleConflict(format!(
                "{shared:?} is both a remove and a keep keyword"
            )));
        }
        Ok(Self {
            remove,
            keep,
            short_label_max_chars: 30,
        })
    }

    pub fn with_short_label_max_chars(mut self, max_chars: usize) -> Self {
        self.short_label_max_chars = max_chars;
        self
    }

    pub fn remove_keywords(&self) -> &[String] {
        &self.remove
    }

    pub fn keep_keywords(&self) -> &[String] {
        &self.keep
    }

    /// Whether an element with this visible text should be removed.
    pub fn should_remove(&self, label: &str) -> bool {
        let label = normalize_label(label);
        if label.is_empty() || self.is_kept(&label) {
            return false;
        }
        let short = label.chars().count() < self.short_label_max_chars;
        self.remove
            .iter()
            .any(|keyword| label == *keyword || (short && label.contains(keyword.as_str())))
    }

    fn is_kept(&self, label: &str) -> bool {
        let first_word = label.split_whitespace().next().unwrap_or_default();
        self.keep
            .iter()
            .any(|keyword| label == keyword.as_str() || first_word == keyword.as_str())
    }
}

fn normalize_keywords<I>(keywords: I) -> Result<Vec<String>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for keyword in keywords {
        let keyword = normalize_label(keyword.as_ref());
        if keyword.is_empty() {
            return Err(Error::InvalidInput("keywords must not be blank".into()));
        }
        if !out.contains(&keyword) {
            out.push(keyword);
        }
    }
    Ok(out)
}

/// Section-pruning pass: drops navigation entries matching the criterion,
/// then sweeps list items left empty.
#[derive(Debug, Clone)]
pub struct SectionPruner {
    criterion: RemovalCriterion,
    nav_selector: String,
    container_selector: String,
}

impl SectionPruner {
    /// Fails with `UnsupportedSelector` when any selector cannot be parsed.
    /// An empty container selector turns the sweep off.
    pub fn new<S>(
        criterion: RemovalCriterion,
        nav_selectors: &[S],
        container_selector: &str,
    ) -> Result<Self>
    where
        S: AsRef<str>,
    {
        for selector in nav_selectors {
            parse_selector_groups(selector.as_ref())?;
        }
        if !container_selector.trim().is_empty() {
            parse_selector_groups(container_selector)?;
        }
        Ok(Self {
            criterion,
            nav_selector: nav_selectors
                .iter()
                .map(|selector| selector.as_ref())
                .collect::<Vec<&str>>()
                .join(", "),
            container_selector: container_selector.trim().to_string(),
        })
    }

    pub fn from_config(config: &PruningConfig) -> Result<Self> {
        let criterion = RemovalCriterion::new(&config.remove, &config.keep)?
            .with_short_label_max_chars(config.short_label_max_chars);
        Self::new(criterion, &config.nav_selectors, &config.container_selector)
    }

    pub fn criterion(&self) -> &RemovalCriterion {
        &self.criterion
    }
}

impl ConvergencePass for SectionPruner {
    fn name(&self) -> &str {
        "pruning"
    }

    fn apply(&mut self, dom: &mut Dom) -> Result<PassReport> {
        let mut report = PassReport::default();

        if !self.nav_selector.is_empty() {
            for node in dom.query_selector_all(&self.nav_selector)? {
                // An earlier removal may have taken this one with it.
                if !dom.is_connected(node) {
                    continue;
                }
                let text = dom.text_content(node);
                if self.criterion.should_remove(&text) {
                    tracing::debug!(label = %text.trim(), "removing navigation entry");
                    dom.remove_node(node)?;
                    report.removed_labels.push(normalize_label(&text));
                }
            }
        }

        if !self.container_selector.is_empty() {
            for node in dom.query_selector_all(&self.container_selector)? {
                if dom.is_connected(node)
                    && dom.child_element_count(node) == 0
                    && dom.text_content(node).trim().is_empty()
                {
                    dom.remove_node(node)?;
                    report.containers_removed += 1;
                }
            }
        }

        Ok(report)
    }
}
