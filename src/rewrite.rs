use fancy_regex::{NoExpand, Regex};

use crate::config::BrandingConfig;
use crate::convergence::{ConvergencePass, PassReport};
use crate::dom::Dom;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CaseInsensitiveRule {
    lowered: String,
    pattern: Regex,
    replacement: String,
}

/// Ordered, conflict-checked text substitutions. Longer patterns run first;
/// declaration order breaks ties.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
    insensitive: Vec<CaseInsensitiveRule>,
    max_rounds: usize,
}

impl RuleSet {
    pub fn new(rules: Vec<RewriteRule>) -> Result<Self> {
        for (index, rule) in rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(Error::RuleConflict(format!("rule {index} has an empty pattern")));
            }
            if rules[..index].iter().any(|earlier| earlier.pattern == rule.pattern) {
                return Err(Error::RuleConflict(format!(
                    "duplicate pattern {:?}",
                    rule.pattern
                )));
            }
        }
        for rule in &rules {
            if let Some(other) = rules
                .iter()
                .find(|other| rule.replacement.contains(other.pattern.as_str()))
            {
                return Err(Error::RuleConflict(format!(
                    "replacement {:?} for {:?} contains pattern {:?}",
                    rule.replacement, rule.pattern, other.pattern
                )));
            }
        }

        let mut rules = rules;
        // Stable sort keeps declaration order among equal lengths.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.pattern.chars().count()));

        let insensitive = build_case_insensitive(&rules)?;
        Ok(Self {
            rules,
            insensitive,
            max_rounds: 8,
        })
    }

    pub fn from_config(config: &BrandingConfig) -> Result<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| RewriteRule::new(rule.pattern.clone(), rule.replacement.clone()))
            .collect();
        Ok(Self::new(rules)?.with_max_rounds(config.max_rounds))
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Rules in the order they are applied.
    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Patterns kept for case-insensitive attribute rewriting, lowercased.
    pub fn case_insensitive_patterns(&self) -> Vec<String> {
        self.insensitive
            .iter()
            .map(|rule| rule.lowered.clone())
            .collect()
    }

    /// Rewrites `text` until no rule matches. Returns `None` when no rule
    /// matched at all.
    ///
    /// A rewrite can complete a new occurrence at its edges (`iiPad` needs
    /// two rounds), so the round budget is `max_rounds` plus one round per
    /// input char. Running out of rounds means the rule set does not
    /// terminate on this input and is reported as a conflict.
    pub fn apply(&self, text: &str) -> Result<Option<String>> {
        let mut current = text.to_string();
        for round in 0..self.round_budget(text) {
            let mut changed = false;
            for rule in &self.rules {
                if current.contains(rule.pattern.as_str()) {
                    current = current.replace(rule.pattern.as_str(), &rule.replacement);
                    changed = true;
                }
            }
            if !changed {
                return Ok((round > 0).then_some(current));
            }
        }
        Err(self.unsettled(text))
    }

    /// Case-insensitive variant used for data attributes; replacements are
    /// lowercased.
    pub fn apply_case_insensitive(&self, text: &str) -> Result<Option<String>> {
        let mut current = text.to_string();
        for round in 0..self.round_budget(text) {
            let mut changed = false;
            for rule in &self.insensitive {
                let next = rule
                    .pattern
                    .try_replacen(&current, 0, NoExpand(&rule.replacement))
                    .map_err(|err| Error::RuleConflict(err.to_string()))?
                    .into_owned();
                if next != current {
                    current = next;
                    changed = true;
                }
            }
            if !changed {
                return Ok((round > 0).then_some(current));
            }
        }
        Err(self.unsettled(text))
    }

    fn round_budget(&self, text: &str) -> usize {
        self.max_rounds.saturating_add(text.chars().count()).saturating_add(1)
    }

    fn unsettled(&self, text: &str) -> Error {
        tracing::warn!(text, "rewrite did not settle");
        Error::RuleConflict(format!(
            "rewriting {text:?} did not settle within {} rounds",
            self.round_budget(text)
        ))
    }
}

fn build_case_insensitive(rules: &[RewriteRule]) -> Result<Vec<CaseInsensitiveRule>> {
    let lowered = rules
        .iter()
        .map(|rule| (rule.pattern.to_lowercase(), rule.replacement.to_lowercase()))
        .collect::<Vec<_>>();

    let mut out: Vec<CaseInsensitiveRule> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for (pattern, replacement) in &lowered {
        if seen.contains(&pattern.as_str()) {
            continue;
        }
        seen.push(pattern);
        if lowered.iter().any(|(other, _)| replacement.contains(other.as_str())) {
            tracing::debug!(pattern, "rule left out of case-insensitive rewriting");
            continue;
        }
        let regex = Regex::new(&format!("(?i){}", fancy_regex::escape(pattern)))
            .map_err(|err| Error::RuleConflict(err.to_string()))?;
        out.push(CaseInsensitiveRule {
            lowered: pattern.clone(),
            pattern: regex,
            replacement: replacement.clone(),
        });
    }
    Ok(out)
}

/// Branding pass: rewrites body text, descriptive attributes, and data
/// attributes.
#[derive(Debug, Clone)]
pub struct Rebrander {
    rules: RuleSet,
    attributes: Vec<String>,
    data_attributes: Vec<String>,
}

impl Rebrander {
    pub fn new(rules: RuleSet) -> Self {
        let defaults = BrandingConfig::default();
        Self {
            rules,
            attributes: defaults.attributes,
            data_attributes: defaults.data_attributes,
        }
    }

    pub fn from_config(config: &BrandingConfig) -> Result<Self> {
        Ok(Self {
            rules: RuleSet::from_config(config)?,
            attributes: config.attributes.clone(),
            data_attributes: config.data_attributes.clone(),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

impl ConvergencePass for Rebrander {
    fn name(&self) -> &str {
        "branding"
    }

    fn apply(&mut self, dom: &mut Dom) -> Result<PassReport> {
        let mut report = PassReport::default();

        for node in dom.text_nodes_under(dom.body()) {
            let Some(text) = dom.text(node) else {
                continue;
            };
            if let Some(next) = self.rules.apply(text)? {
                dom.set_text(node, &next)?;
                report.text_rewrites += 1;
            }
        }

        for node in dom.all_element_nodes() {
            for name in &self.attributes {
                let Some(value) = dom.attr(node, name) else {
                    continue;
                };
                if let Some(next) = self.rules.apply(value)? {
                    dom.set_attr(node, name, &next)?;
                    report.attribute_rewrites += 1;
                }
            }
            for name in &self.data_attributes {
                let Some(value) = dom.attr(node, name) else {
                    continue;
                };
                if let Some(next) = self.rules.apply_case_insensitive(value)? {
                    dom.set_attr(node, name, &next)?;
                    report.attribute_rewrites += 1;
                }
            }
        }

        tracing::debug!(
            text = report.text_rewrites,
            attributes = report.attribute_rewrites,
            "branding pass complete"
        );
        Ok(report)
    }
}
