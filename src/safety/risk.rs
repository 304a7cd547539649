//! Risk classification
//!
//! Pure mapping from an action plus minimal page context to a
//! [`RiskAssessment`]. All thresholds and keyword lists come from
//! [`SafetyConfig`]; patterns are compiled once per classifier.

use regex::Regex;

use crate::core::config::SafetyConfig;
use crate::core::{Action, ActionKind, Result, RiskAssessment, RiskCategory, RiskTier, WardenError};

/// Page context the classifier may look at
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    /// Current page URL
    pub url: String,
    /// Visible label of the targeted element, if any
    pub target_label: Option<String>,
}

impl RiskContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            target_label: None,
        }
    }

    pub fn with_target_label(mut self, label: impl Into<String>) -> Self {
        self.target_label = Some(label.into());
        self
    }

    fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }
}

/// Compiled risk policy
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    financial: Option<Regex>,
    account_deletion: Option<Regex>,
    credential: Option<Regex>,
    deletion: Option<Regex>,
    unsubscribe: Option<Regex>,
    modification: Option<Regex>,
    personal_data: Option<Regex>,
    sensitive_domains: Vec<String>,
    confirm_medium: bool,
}

/// Build a case-insensitive, word-bounded alternation of keywords
fn keyword_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| WardenError::config(format!("Invalid risk keyword pattern: {}", e)))
}

impl RiskClassifier {
    pub fn new(policy: &SafetyConfig) -> Result<Self> {
        Ok(Self {
            financial: keyword_pattern(&policy.financial_keywords)?,
            account_deletion: keyword_pattern(&policy.account_deletion_keywords)?,
            credential: keyword_pattern(&policy.credential_keywords)?,
            deletion: keyword_pattern(&policy.deletion_keywords)?,
            unsubscribe: keyword_pattern(&policy.unsubscribe_keywords)?,
            modification: keyword_pattern(&policy.modification_keywords)?,
            personal_data: keyword_pattern(&policy.personal_data_keywords)?,
            sensitive_domains: policy
                .sensitive_domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            confirm_medium: policy.confirm_medium,
        })
    }

    /// Whether the host matches a configured sensitive domain fragment
    pub fn is_sensitive_domain(&self, context: &RiskContext) -> bool {
        context.host().is_some_and(|host| {
            self.sensitive_domains
                .iter()
                .any(|fragment| host.contains(fragment.as_str()))
        })
    }

    /// Whether confirmation is needed for a tier under this policy
    pub fn tier_requires_confirmation(&self, tier: RiskTier) -> bool {
        match tier {
            RiskTier::Critical | RiskTier::High => true,
            RiskTier::Medium => self.confirm_medium,
            RiskTier::Low => false,
        }
    }

    /// Classify an action. Deterministic and side-effect free.
    pub fn classify(&self, action: &Action, context: &RiskContext) -> RiskAssessment {
        let mut findings = Findings::default();

        if !action.kind.is_read_only() {
            let text = interaction_text(action, context);
            let hit = |re: &Option<Regex>| {
                re.as_ref()
                    .and_then(|r| r.find(&text))
                    .map(|m| m.as_str().to_lowercase())
            };

            if let Some(word) = hit(&self.financial) {
                findings.raise(
                    RiskTier::Critical,
                    RiskCategory::Financial,
                    format!("financial transaction ('{}')", word),
                );
            }
            if let Some(word) = hit(&self.account_deletion) {
                findings.raise(
                    RiskTier::Critical,
                    RiskCategory::AccountDeletion,
                    format!("irreversible account deletion ('{}')", word),
                );
            }
            if let Some(word) = hit(&self.credential) {
                findings.raise(
                    RiskTier::Critical,
                    RiskCategory::CredentialChange,
                    format!("credential change ('{}')", word),
                );
            }
            if let Some(word) = hit(&self.deletion) {
                findings.raise(
                    RiskTier::High,
                    RiskCategory::Deletion,
                    format!("deletes data ('{}')", word),
                );
            }
            if let Some(word) = hit(&self.unsubscribe) {
                findings.raise(
                    RiskTier::High,
                    RiskCategory::Unsubscribe,
                    format!("unsubscribes ('{}')", word),
                );
            }
            if self.is_sensitive_domain(context) {
                if let Some(word) = hit(&self.modification) {
                    findings.raise(
                        RiskTier::High,
                        RiskCategory::Modification,
                        format!("modification ('{}') on a sensitive domain", word),
                    );
                    findings.tag(RiskCategory::SensitiveDomain);
                }
            }
            if matches!(
                action.kind,
                ActionKind::Type | ActionKind::Submit | ActionKind::Select
            ) {
                if let Some(word) = hit(&self.personal_data) {
                    findings.raise(
                        RiskTier::Medium,
                        RiskCategory::PersonalData,
                        format!("form input with personal data ('{}')", word),
                    );
                }
            }
        }

        if action.destructive || action.requires_confirmation {
            findings.raise(
                RiskTier::High,
                RiskCategory::FlaggedByModel,
                "flagged by the model as needing confirmation".to_string(),
            );
        }

        if findings.reasons.is_empty() {
            return RiskAssessment::low();
        }

        RiskAssessment {
            tier: findings.tier,
            requires_confirmation: self.tier_requires_confirmation(findings.tier),
            categories: findings.categories,
            rationale: findings.reasons.join("; "),
        }
    }
}

#[derive(Default)]
struct Findings {
    tier: RiskTier,
    categories: Vec<RiskCategory>,
    reasons: Vec<String>,
}

impl Findings {
    fn raise(&mut self, tier: RiskTier, category: RiskCategory, reason: String) {
        self.tier = self.tier.max(tier);
        self.tag(category);
        self.reasons.push(reason);
    }

    fn tag(&mut self, category: RiskCategory) {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
    }
}

/// Text describing what an action will interact with
fn interaction_text(action: &Action, context: &RiskContext) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(label) = context.target_label.as_deref() {
        parts.push(label);
    }
    if !action.description.is_empty() {
        parts.push(&action.description);
    }
    for key in ["text", "value"] {
        if let Some(v) = action.get_string(key) {
            parts.push(v);
        }
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(&SafetyConfig::default()).unwrap()
    }

    #[test]
    fn test_navigation_is_low() {
        let assessment = classifier().classify(
            &Action::navigate("https://example.com/checkout"),
            &RiskContext::new("https://example.com"),
        );
        assert_eq!(assessment.tier, RiskTier::Low);
        assert!(!assessment.requires_confirmation);
    }

    #[test]
    fn test_payment_is_critical() {
        let ctx = RiskContext::new("https://shop.example.com/cart").with_target_label("Place order");
        let assessment = classifier().classify(&Action::click("e9"), &ctx);
        assert_eq!(assessment.tier, RiskTier::Critical);
        assert!(assessment.requires_confirmation);
        assert!(assessment.categories.contains(&RiskCategory::Financial));
    }

    #[test]
    fn test_deletion_is_high() {
        let ctx = RiskContext::new("https://mail.example.com").with_target_label("Delete");
        let assessment = classifier().classify(&Action::click("e1"), &ctx);
        assert_eq!(assessment.tier, RiskTier::High);
        assert!(assessment.requires_confirmation);
    }

    #[test]
    fn test_word_boundaries() {
        // "display" must not match "pay"
        let ctx = RiskContext::new("https://example.com").with_target_label("Display options");
        let assessment = classifier().classify(&Action::click("e1"), &ctx);
        assert_eq!(assessment.tier, RiskTier::Low);
    }

    #[test]
    fn test_modification_only_high_on_sensitive_domain() {
        let plain = RiskContext::new("https://blog.example.com").with_target_label("Save");
        assert_eq!(
            classifier().classify(&Action::click("e1"), &plain).tier,
            RiskTier::Low
        );

        let bank = RiskContext::new("https://mybank.example.com").with_target_label("Save");
        let assessment = classifier().classify(&Action::click("e1"), &bank);
        assert_eq!(assessment.tier, RiskTier::High);
        assert!(assessment.categories.contains(&RiskCategory::SensitiveDomain));
    }

    #[test]
    fn test_medium_confirmation_is_configurable() {
        let action = Action::type_text("e2", "jane@example.com")
            .with_description("fill email field");
        let ctx = RiskContext::new("https://forms.example.com");

        let assessment = classifier().classify(&action, &ctx);
        assert_eq!(assessment.tier, RiskTier::Medium);
        assert!(!assessment.requires_confirmation);

        let policy = SafetyConfig {
            confirm_medium: true,
            ..SafetyConfig::default()
        };
        let strict = RiskClassifier::new(&policy).unwrap();
        assert!(strict.classify(&action, &ctx).requires_confirmation);
    }

    #[test]
    fn test_model_flag_raises_to_high() {
        let action = Action::click("e1").destructive();
        let assessment = classifier().classify(&action, &RiskContext::new("https://x.test"));
        assert_eq!(assessment.tier, RiskTier::High);
        assert!(assessment.requires_confirmation);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let ctx = RiskContext::new("https://paypal.com").with_target_label("Send payment");
        let action = Action::click("e4");
        assert_eq!(c.classify(&action, &ctx), c.classify(&action, &ctx));
    }
}
