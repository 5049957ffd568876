//! Knowledge-domain descriptors.
//!
//! Every domain is a configuration of the same pipeline: a namespace, a
//! dashboard template, and a table of section-level update rules consumed by
//! one generic synthesis function. Adding a domain means adding data here,
//! not code anywhere else.

use crate::types::{Entry, Intent};

/// When a section participates in a synthesis pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Updated on every pass, including refresh.
    Always,
    /// Updated only when a new entry is being integrated.
    OnNewFact,
    /// Updated only when the new entry carries this tag.
    OnTag(String),
    /// Updated only by requests with this intent.
    OnIntent(Intent),
}

impl Trigger {
    /// Whether this trigger fires for the given pass.
    pub fn fires(&self, new_entry: Option<&Entry>, intent: Intent) -> bool {
        match self {
            Self::Always => true,
            Self::OnNewFact => new_entry.is_some(),
            Self::OnTag(tag) => new_entry
                .map(|e| e.tags.iter().any(|t| t == tag))
                .unwrap_or(false),
            Self::OnIntent(required) => intent == *required,
        }
    }
}

/// How new material is folded into a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Rolling list capped at N items; oldest items fall off.
    AppendBounded(usize),
    /// Free-form prose rewritten to absorb the new fact.
    RewriteNarrative,
    /// Distilled facts only, no commentary or speculation.
    FactsOnly,
    /// Items are added but never removed or rewritten.
    AppendOnly,
    /// Copied through untouched unless this section's trigger fired.
    Preserve,
}

/// Update policy for one `## `-level markdown section.
#[derive(Debug, Clone)]
pub struct SectionRule {
    /// Heading text without the `## ` prefix.
    pub heading: String,
    pub trigger: Trigger,
    pub merge: MergeRule,
}

impl SectionRule {
    fn new(heading: &str, trigger: Trigger, merge: MergeRule) -> Self {
        Self {
            heading: heading.to_string(),
            trigger,
            merge,
        }
    }
}

/// One knowledge domain: namespace, template, section rules.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub name: String,
    /// Vector index namespace isolating this domain's similarity search.
    pub namespace: String,
    /// Markdown seed used when the dashboard doesn't exist yet.
    pub template: String,
    pub rules: Vec<SectionRule>,
}

impl DomainConfig {
    pub fn rule_for(&self, heading: &str) -> Option<&SectionRule> {
        self.rules.iter().find(|r| r.heading == heading)
    }
}

/// The set of configured domains.
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    domains: Vec<DomainConfig>,
}

impl DomainRegistry {
    pub fn new(domains: Vec<DomainConfig>) -> Self {
        Self { domains }
    }

    pub fn get(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn all(&self) -> &[DomainConfig] {
        &self.domains
    }

    /// All namespaces, for cross-domain query fusion.
    pub fn namespaces(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.namespace.clone()).collect()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        builtin_domains()
    }
}

/// Name of the domain targeted by the `log_reading` intent.
pub const READING_LIST: &str = "reading_list";

/// Heading of the subsection owned by the reading-log updater.
pub const CURRENT_READING_HEADING: &str = "Current Reading";

/// The built-in domain set.
pub fn builtin_domains() -> DomainRegistry {
    DomainRegistry::new(vec![
        DomainConfig {
            name: "life_log".into(),
            namespace: "biography".into(),
            template: "# Life Log\n\n## Narrative\n\n## Daily Pulse\n\n\
                       ## Recovered Memories\n\n## Contradictions\n"
                .into(),
            rules: vec![
                SectionRule::new("Narrative", Trigger::OnNewFact, MergeRule::RewriteNarrative),
                SectionRule::new("Daily Pulse", Trigger::Always, MergeRule::AppendBounded(10)),
                SectionRule::new(
                    "Recovered Memories",
                    Trigger::OnTag("memory".into()),
                    MergeRule::AppendBounded(7),
                ),
                SectionRule::new("Contradictions", Trigger::OnNewFact, MergeRule::AppendOnly),
            ],
        },
        DomainConfig {
            name: "story_bible".into(),
            namespace: "fiction".into(),
            template: "# Story Bible\n\n## Characters\n\n## World\n\n\
                       ## Plot Threads\n\n## Open Contradictions\n"
                .into(),
            rules: vec![
                SectionRule::new("Characters", Trigger::OnNewFact, MergeRule::FactsOnly),
                SectionRule::new("World", Trigger::OnNewFact, MergeRule::FactsOnly),
                SectionRule::new(
                    "Plot Threads",
                    Trigger::OnNewFact,
                    MergeRule::RewriteNarrative,
                ),
                SectionRule::new(
                    "Open Contradictions",
                    Trigger::OnNewFact,
                    MergeRule::AppendOnly,
                ),
            ],
        },
        DomainConfig {
            name: "dream_journal".into(),
            namespace: "dreams".into(),
            template: "# Dream Journal\n\n## Dream Log\n\n## Recurring Themes\n\n## Symbols\n"
                .into(),
            rules: vec![
                SectionRule::new("Dream Log", Trigger::OnNewFact, MergeRule::AppendBounded(10)),
                SectionRule::new("Recurring Themes", Trigger::Always, MergeRule::FactsOnly),
                SectionRule::new("Symbols", Trigger::OnNewFact, MergeRule::FactsOnly),
            ],
        },
        DomainConfig {
            name: "lyric_lab".into(),
            namespace: "lyrics".into(),
            template: "# Lyric Lab\n\n## Fragments\n\n## Themes\n".into(),
            rules: vec![
                SectionRule::new("Fragments", Trigger::OnNewFact, MergeRule::AppendBounded(12)),
                SectionRule::new("Themes", Trigger::Always, MergeRule::RewriteNarrative),
            ],
        },
        DomainConfig {
            name: "idea_garden".into(),
            namespace: "ideas".into(),
            template: "# Idea Garden\n\n## Seedlings\n\n## Growing\n\n## Connections\n".into(),
            rules: vec![
                SectionRule::new("Seedlings", Trigger::OnNewFact, MergeRule::AppendBounded(10)),
                SectionRule::new("Growing", Trigger::OnNewFact, MergeRule::RewriteNarrative),
                SectionRule::new("Connections", Trigger::Always, MergeRule::FactsOnly),
            ],
        },
        DomainConfig {
            name: READING_LIST.into(),
            namespace: "reading".into(),
            template: "# Reading List\n\n## Current Reading\n\n## Recommendations\n\n\
                       ## Finished\n"
                .into(),
            rules: vec![
                // Owned by the log_reading updater; every other writer must
                // carry this section through untouched.
                SectionRule::new(
                    CURRENT_READING_HEADING,
                    Trigger::OnIntent(Intent::LogReading),
                    MergeRule::Preserve,
                ),
                SectionRule::new(
                    "Recommendations",
                    Trigger::Always,
                    MergeRule::RewriteNarrative,
                ),
                SectionRule::new("Finished", Trigger::OnNewFact, MergeRule::AppendOnly),
            ],
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, MediaType};

    fn entry_with_tags(tags: &[&str]) -> Entry {
        let verdict = Classification {
            intent: Intent::Save,
            content: "x".into(),
            is_original: true,
            source_url: None,
            source_title: None,
            source_author: None,
            media_type: MediaType::Text,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        Entry::from_classification("u", "life_log", "x".into(), &verdict)
    }

    #[test]
    fn builtin_registry_is_complete() {
        let registry = builtin_domains();
        for name in [
            "life_log",
            "story_bible",
            "dream_journal",
            "lyric_lab",
            "idea_garden",
            "reading_list",
        ] {
            assert!(registry.get(name).is_some(), "missing domain {name}");
        }
        // Namespaces are distinct
        let mut namespaces = registry.namespaces();
        namespaces.sort();
        namespaces.dedup();
        assert_eq!(namespaces.len(), registry.all().len());
    }

    #[test]
    fn templates_contain_their_rule_headings() {
        for domain in builtin_domains().all() {
            for rule in &domain.rules {
                assert!(
                    domain.template.contains(&format!("## {}", rule.heading)),
                    "{} template missing section {}",
                    domain.name,
                    rule.heading
                );
            }
        }
    }

    #[test]
    fn tag_trigger_fires_only_on_matching_tag() {
        let trigger = Trigger::OnTag("memory".into());
        let tagged = entry_with_tags(&["memory", "childhood"]);
        let untagged = entry_with_tags(&["food"]);
        assert!(trigger.fires(Some(&tagged), Intent::Save));
        assert!(!trigger.fires(Some(&untagged), Intent::Save));
        assert!(!trigger.fires(None, Intent::Save));
    }

    #[test]
    fn intent_trigger_fires_without_entry() {
        let trigger = Trigger::OnIntent(Intent::LogReading);
        assert!(trigger.fires(None, Intent::LogReading));
        assert!(!trigger.fires(None, Intent::Save));
    }

    #[test]
    fn current_reading_is_preserved_by_rule() {
        let registry = builtin_domains();
        let reading = registry.get(READING_LIST).unwrap();
        let rule = reading.rule_for(CURRENT_READING_HEADING).unwrap();
        assert_eq!(rule.merge, MergeRule::Preserve);
        assert_eq!(rule.trigger, Trigger::OnIntent(Intent::LogReading));
    }
}
