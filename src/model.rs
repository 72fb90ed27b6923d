use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static LANGUAGE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<language>[a-z]{2,3})(?:-(?P<script>[a-z]{4}))?(?:-(?P<region>[a-z]{2}|[0-9]{3}))?(?:-x-(?P<private>[a-z0-9]{1,8}(?:-[a-z0-9]{1,8})*))?$",
    )
    .expect("valid language tag regex")
});

/// Non-text models and their display labels
const NON_TEXT_MODELS: [(&str, &str); 3] = [
    ("zxx-Zsym-x-autodraw", "Autodraw"),
    ("zxx-Zsye-x-emoji", "Emoji"),
    ("zxx-Zsym-x-shapes", "Shapes"),
];

const GESTURE_SUBTAG: &str = "gesture";

/// The tag did not match the identifier grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid language tag `{0}`")]
pub struct InvalidLanguageTag(pub String);

/// Names one recognition model, e.g. `en-US`, `zh-Hani-CN` or `und-Latn-x-gesture`
///
/// Subtags are normalized on parse, so two identifiers are equal exactly when
/// their canonical tags are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelIdentifier {
    tag: String,
    language: String,
    script: Option<String>,
    region: Option<String>,
    private_use: Vec<String>,
}

impl ModelIdentifier {
    pub fn from_language_tag(tag: &str) -> Result<Self, InvalidLanguageTag> {
        let caps = LANGUAGE_TAG_RE
            .captures(tag.trim())
            .ok_or_else(|| InvalidLanguageTag(tag.to_string()))?;

        let language = caps["language"].to_ascii_lowercase();
        let script = caps.name("script").map(|m| titlecase(m.as_str()));
        let region = caps.name("region").map(|m| m.as_str().to_ascii_uppercase());
        let private_use: Vec<String> = caps
            .name("private")
            .map(|m| {
                m.as_str()
                    .split('-')
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let mut canonical = language.clone();
        for subtag in script.iter().chain(region.iter()) {
            canonical.push('-');
            canonical.push_str(subtag);
        }
        if !private_use.is_empty() {
            canonical.push_str("-x-");
            canonical.push_str(&private_use.join("-"));
        }

        Ok(Self {
            tag: canonical,
            language,
            script,
            region,
            private_use,
        })
    }

    pub fn language_tag(&self) -> &str {
        &self.tag
    }

    pub fn language_subtag(&self) -> &str {
        &self.language
    }

    pub fn script_subtag(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn region_subtag(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn category(&self) -> ModelCategory {
        if NON_TEXT_MODELS.iter().any(|(tag, _)| *tag == self.tag) {
            ModelCategory::NonText
        } else if self.private_use.last().map(String::as_str) == Some(GESTURE_SUBTAG) {
            ModelCategory::Gesture
        } else {
            ModelCategory::Text
        }
    }

    /// Human-readable label, e.g. `sr (RS), Latn Script`
    pub fn label(&self) -> String {
        if let Some((_, label)) = NON_TEXT_MODELS.iter().find(|(tag, _)| *tag == self.tag) {
            return label.to_string();
        }

        let mut label = self.language.clone();
        if let Some(region) = &self.region {
            label.push_str(&format!(" ({})", region));
        }
        if let Some(script) = &self.script {
            let suffix = match self.category() {
                ModelCategory::Gesture => "Script gesture classifier",
                _ => "Script",
            };
            label.push_str(&format!(", {} {}", script, suffix));
        }
        label
    }
}

fn titlecase(s: &str) -> String {
    let lower = s.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl TryFrom<String> for ModelIdentifier {
    type Error = InvalidLanguageTag;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_language_tag(&value)
    }
}

impl From<ModelIdentifier> for String {
    fn from(value: ModelIdentifier) -> Self {
        value.tag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Text,
    NonText,
    Gesture,
}

/// Kind of model held by a model repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ModelKind {
    DigitalInk,
}

/// Network and power requirements for a model download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConditions {
    #[serde(default)]
    pub require_wifi: bool,
    #[serde(default)]
    pub require_charging: bool,
}

/// Turns a user-supplied language tag into a model identifier
pub trait ModelIdentifierParser: Send + Sync {
    /// `Ok(None)` means the tag is well formed but no model exists for it.
    fn parse(&self, tag: &str) -> Result<Option<ModelIdentifier>, InvalidLanguageTag>;
}

/// Grammar-based parser, optionally restricted to a catalog of known models
#[derive(Debug, Clone, Default)]
pub struct LanguageTagParser {
    catalog: Option<BTreeSet<ModelIdentifier>>,
}

impl LanguageTagParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: impl IntoIterator<Item = ModelIdentifier>) -> Self {
        Self {
            catalog: Some(catalog.into_iter().collect()),
        }
    }

    pub fn catalog(&self) -> Option<&BTreeSet<ModelIdentifier>> {
        self.catalog.as_ref()
    }
}

impl ModelIdentifierParser for LanguageTagParser {
    fn parse(&self, tag: &str) -> Result<Option<ModelIdentifier>, InvalidLanguageTag> {
        let identifier = ModelIdentifier::from_language_tag(tag)?;
        match &self.catalog {
            Some(catalog) if !catalog.contains(&identifier) => Ok(None),
            _ => Ok(Some(identifier)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_normalized() {
        let id = ModelIdentifier::from_language_tag("ZH-hani-cn").unwrap();
        assert_eq!(id.language_tag(), "zh-Hani-CN");
        assert_eq!(id.language_subtag(), "zh");
        assert_eq!(id.script_subtag(), Some("Hani"));
        assert_eq!(id.region_subtag(), Some("CN"));

        let id = ModelIdentifier::from_language_tag("en").unwrap();
        assert_eq!(id.to_string(), "en");
        assert_eq!(id.region_subtag(), None);

        let id = ModelIdentifier::from_language_tag("es-419").unwrap();
        assert_eq!(id.region_subtag(), Some("419"));
    }

    #[test]
    fn test_invalid_tags_are_rejected() {
        for tag in ["", "english", "en_US", "en-US-", "x-gesture", "en-Latn-USA-x"] {
            assert!(
                ModelIdentifier::from_language_tag(tag).is_err(),
                "{} should not parse",
                tag
            );
        }
    }

    #[test]
    fn test_categories_and_labels() {
        let emoji = ModelIdentifier::from_language_tag("zxx-Zsye-x-emoji").unwrap();
        assert_eq!(emoji.category(), ModelCategory::NonText);
        assert_eq!(emoji.label(), "Emoji");

        let gesture = ModelIdentifier::from_language_tag("und-Latn-x-gesture").unwrap();
        assert_eq!(gesture.category(), ModelCategory::Gesture);
        assert_eq!(gesture.label(), "und, Latn Script gesture classifier");

        let serbian = ModelIdentifier::from_language_tag("sr-Latn-RS").unwrap();
        assert_eq!(serbian.category(), ModelCategory::Text);
        assert_eq!(serbian.label(), "sr (RS), Latn Script");
    }

    #[test]
    fn test_catalog_parser_reports_unknown_models() {
        let parser = LanguageTagParser::with_catalog(
            ["en-US", "de"]
                .iter()
                .map(|t| ModelIdentifier::from_language_tag(t).unwrap()),
        );

        assert_eq!(
            parser.parse("en-us").unwrap().map(|id| id.to_string()),
            Some("en-US".to_string())
        );
        assert_eq!(parser.parse("fr").unwrap(), None);
        assert!(parser.parse("not a tag").is_err());

        assert!(LanguageTagParser::new().parse("fr").unwrap().is_some());
    }

    #[test]
    fn test_identifier_serializes_as_tag() {
        let id = ModelIdentifier::from_language_tag("en-US").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"en-US\"");

        let back: ModelIdentifier = serde_json::from_str("\"en-us\"").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ModelIdentifier>("\"??\"").is_err());
    }
}
