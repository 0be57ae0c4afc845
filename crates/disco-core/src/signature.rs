//! Entity signatures
//!
//! A signature is the static declaration of the named sub-values an entity
//! reports, in declaration order, with the display metadata the controller
//! needs to render them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Values reported by one read, keyed by sub-key, in signature order
pub type Readings = IndexMap<String, serde_json::Value>;

/// Error for an unparseable value transform
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("value transform cannot be empty")]
pub struct ValueTransformError;

/// Template filter applied to a sub-value on the controller side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueTransform {
    /// `round(n)`
    Round(u8),
    /// `int`
    Int,
    /// `float`
    Float,
    /// Any other filter expression, passed through verbatim
    Custom(String),
}

impl ValueTransform {
    /// The filter expression as it appears after `|` in a value template
    pub fn filter(&self) -> String {
        match self {
            Self::Round(digits) => format!("round({digits})"),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::Custom(expr) => expr.clone(),
        }
    }
}

impl FromStr for ValueTransform {
    type Err = ValueTransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValueTransformError);
        }

        let parsed = match s {
            "int" => Self::Int,
            "float" => Self::Float,
            _ => s
                .strip_prefix("round(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|digits| digits.trim().parse().ok())
                .map(Self::Round)
                .unwrap_or_else(|| Self::Custom(s.to_string())),
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for ValueTransform {
    type Error = ValueTransformError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ValueTransform> for String {
    fn from(transform: ValueTransform) -> String {
        transform.filter()
    }
}

impl fmt::Display for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filter())
    }
}

/// Display metadata for one sub-value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Icon, e.g. `mdi:thermometer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Unit of measurement, e.g. `C`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Filter composed into the default value template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ValueTransform>,
    /// Reported in the state payload but not discovered on its own.
    /// Auxiliary values are referenced from another sub-value's discovery
    /// fields (a light's brightness, for example).
    #[serde(default)]
    pub auxiliary: bool,
}

impl SignatureEntry {
    /// An entry without metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the icon
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the unit of measurement
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the value transform
    pub fn transform(mut self, transform: ValueTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Mark as auxiliary
    pub fn auxiliary(mut self) -> Self {
        self.auxiliary = true;
        self
    }
}

/// Ordered mapping from sub-key to display metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    entries: IndexMap<String, SignatureEntry>,
}

impl Signature {
    /// An empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// A signature with exactly one entry
    pub fn single(key: impl Into<String>, entry: SignatureEntry) -> Self {
        Self::new().with(key, entry)
    }

    /// Add an entry, keeping declaration order
    pub fn with(mut self, key: impl Into<String>, entry: SignatureEntry) -> Self {
        self.entries.insert(key.into(), entry);
        self
    }

    /// Get the entry for a sub-key
    pub fn get(&self, key: &str) -> Option<&SignatureEntry> {
        self.entries.get(key)
    }

    /// Whether a sub-key is declared
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SignatureEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All sub-keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries that get their own discovery config
    pub fn discoverable(&self) -> impl Iterator<Item = (&str, &SignatureEntry)> {
        self.iter().filter(|(_, entry)| !entry.auxiliary)
    }

    /// Whether exactly one entry is discoverable, which selects the short
    /// naming form for topics and unique ids
    pub fn is_single(&self) -> bool {
        self.discoverable().count() == 1
    }

    /// Number of declared entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default value template for a sub-key: a reference into the published
    /// JSON body, composed with the declared transform if any
    pub fn default_value_template(&self, key: &str) -> String {
        match self.get(key).and_then(|e| e.transform.as_ref()) {
            Some(transform) => format!("{{{{ value_json.{key} | {} }}}}", transform.filter()),
            None => format!("{{{{ value_json.{key} }}}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bme280() -> Signature {
        Signature::new()
            .with(
                "temp",
                SignatureEntry::new()
                    .icon("mdi:thermometer")
                    .unit("C")
                    .transform(ValueTransform::Round(2)),
            )
            .with(
                "humidity",
                SignatureEntry::new().icon("mdi:water-percent").unit("%"),
            )
            .with("pressure", SignatureEntry::new().icon("mdi:weight").unit("hPa"))
    }

    #[test]
    fn test_declaration_order() {
        let keys: Vec<_> = bme280().keys().map(str::to_string).collect();
        assert_eq!(keys, vec!["temp", "humidity", "pressure"]);
    }

    #[test]
    fn test_default_value_template() {
        let sig = bme280();
        assert_eq!(
            sig.default_value_template("temp"),
            "{{ value_json.temp | round(2) }}"
        );
        assert_eq!(
            sig.default_value_template("humidity"),
            "{{ value_json.humidity }}"
        );
    }

    #[test]
    fn test_single_ignores_auxiliary() {
        let sig = Signature::new()
            .with("lamp_state", SignatureEntry::new())
            .with("lamp_brightness", SignatureEntry::new().auxiliary());
        assert!(sig.is_single());
        assert_eq!(sig.len(), 2);
        assert!(!bme280().is_single());
    }

    #[test]
    fn test_parse_transform() {
        assert_eq!("round(2)".parse(), Ok(ValueTransform::Round(2)));
        assert_eq!("int".parse(), Ok(ValueTransform::Int));
        assert_eq!("float".parse(), Ok(ValueTransform::Float));
        assert_eq!(
            "multiply(0.1)".parse(),
            Ok(ValueTransform::Custom("multiply(0.1)".to_string()))
        );
        assert_eq!("".parse::<ValueTransform>(), Err(ValueTransformError));
    }

    #[test]
    fn test_entry_from_yaml_like_json() {
        let entry: SignatureEntry =
            serde_json::from_str(r#"{"icon": "mdi:thermometer", "unit": "C", "transform": "round(1)"}"#)
                .unwrap();
        assert_eq!(entry.transform, Some(ValueTransform::Round(1)));
        assert!(!entry.auxiliary);
    }
}
