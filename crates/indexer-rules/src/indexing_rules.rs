//! A single indexing rule: where a keyword comes from and how it is shaped.

use serde_json::Value;

use crate::error::RulesError;
use crate::keyword_type::KeywordType;
use crate::path::ObjectJsonPath;
use crate::transform::Transform;

/// Where a rule reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    /// A path into the (sub)object JSON
    Path(ObjectJsonPath),
    /// The output of another rule, by key name
    SourceKey(String),
}

/// One keyword extraction rule. Build with [`IndexingRules::from_path`] or
/// [`IndexingRules::from_source_key`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingRules {
    source: RuleSource,
    key_name: String,
    full_text: bool,
    keyword_type: KeywordType,
    transform: Option<Transform>,
    from_parent: bool,
    not_indexed: bool,
    default_value: Option<Value>,
    ui_name: Option<String>,
    ui_hidden: bool,
    ui_link_key: Option<String>,
}

impl IndexingRules {
    /// Rule reading from a JSON path. The key name defaults to the path's
    /// last named segment.
    pub fn from_path(path: ObjectJsonPath) -> IndexingRulesBuilder {
        let key_name = path.last_key().unwrap_or_default().to_string();
        IndexingRulesBuilder::new(RuleSource::Path(path), key_name)
    }

    /// Rule deriving a value from another rule's output key.
    pub fn from_source_key(
        source_key: impl Into<String>,
        key_name: impl Into<String>,
    ) -> IndexingRulesBuilder {
        IndexingRulesBuilder::new(RuleSource::SourceKey(source_key.into()), key_name.into())
    }

    /// Builder from a rule declaration that may name either source.
    ///
    /// Exactly one of `path` and `source_key` must be given.
    pub fn from_either(
        path: Option<ObjectJsonPath>,
        source_key: Option<String>,
    ) -> Result<IndexingRulesBuilder, RulesError> {
        match (path, source_key) {
            (Some(path), None) => Ok(Self::from_path(path)),
            (None, Some(key)) => Ok(Self::from_source_key(key, "")),
            (Some(_), Some(_)) => Err(RulesError::InvalidRule(
                "a rule cannot declare both a path and a source key".to_string(),
            )),
            (None, None) => Err(RulesError::InvalidRule(
                "a rule must declare a path or a source key".to_string(),
            )),
        }
    }

    pub fn source(&self) -> &RuleSource {
        &self.source
    }

    pub fn path(&self) -> Option<&ObjectJsonPath> {
        match &self.source {
            RuleSource::Path(p) => Some(p),
            RuleSource::SourceKey(_) => None,
        }
    }

    pub fn source_key(&self) -> Option<&str> {
        match &self.source {
            RuleSource::Path(_) => None,
            RuleSource::SourceKey(k) => Some(k),
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.source, RuleSource::SourceKey(_))
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn is_full_text(&self) -> bool {
        self.full_text
    }

    pub fn keyword_type(&self) -> KeywordType {
        self.keyword_type
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    pub fn is_from_parent(&self) -> bool {
        self.from_parent
    }

    pub fn is_not_indexed(&self) -> bool {
        self.not_indexed
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn ui_name(&self) -> Option<&str> {
        self.ui_name.as_deref()
    }

    pub fn is_ui_hidden(&self) -> bool {
        self.ui_hidden
    }

    pub fn ui_link_key(&self) -> Option<&str> {
        self.ui_link_key.as_deref()
    }
}

/// Builder for [`IndexingRules`]; [`build`](Self::build) validates.
#[derive(Debug, Clone)]
pub struct IndexingRulesBuilder {
    rules: IndexingRules,
}

impl IndexingRulesBuilder {
    fn new(source: RuleSource, key_name: String) -> Self {
        Self {
            rules: IndexingRules {
                source,
                key_name,
                full_text: false,
                keyword_type: KeywordType::default(),
                transform: None,
                from_parent: false,
                not_indexed: false,
                default_value: None,
                ui_name: None,
                ui_hidden: false,
                ui_link_key: None,
            },
        }
    }

    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.rules.key_name = key_name.into();
        self
    }

    pub fn with_full_text(mut self, full_text: bool) -> Self {
        self.rules.full_text = full_text;
        self
    }

    pub fn with_keyword_type(mut self, keyword_type: KeywordType) -> Self {
        self.rules.keyword_type = keyword_type;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.rules.transform = Some(transform);
        self
    }

    pub fn with_from_parent(mut self, from_parent: bool) -> Self {
        self.rules.from_parent = from_parent;
        self
    }

    pub fn with_not_indexed(mut self, not_indexed: bool) -> Self {
        self.rules.not_indexed = not_indexed;
        self
    }

    pub fn with_default_value(mut self, value: Value) -> Self {
        self.rules.default_value = Some(value);
        self
    }

    pub fn with_ui_name(mut self, ui_name: impl Into<String>) -> Self {
        self.rules.ui_name = Some(ui_name.into());
        self
    }

    pub fn with_ui_hidden(mut self, hidden: bool) -> Self {
        self.rules.ui_hidden = hidden;
        self
    }

    pub fn with_ui_link_key(mut self, key: impl Into<String>) -> Self {
        self.rules.ui_link_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<IndexingRules, RulesError> {
        let rules = self.rules;
        if rules.key_name.trim().is_empty() {
            return Err(RulesError::InvalidRule(format!(
                "rule reading {:?} has no key name",
                rules.source
            )));
        }
        if let RuleSource::SourceKey(key) = &rules.source {
            if key.trim().is_empty() {
                return Err(RulesError::InvalidRule(format!(
                    "rule {} has an empty source key",
                    rules.key_name
                )));
            }
        }
        match &rules.transform {
            Some(Transform::Guid { target_type, .. })
                if target_type.as_deref().map_or(true, str::is_empty) =>
            {
                return Err(RulesError::InvalidRule(format!(
                    "guid transform on {} requires a target type",
                    rules.key_name
                )));
            }
            Some(Transform::Lookup { .. }) if !rules.is_derived() => {
                return Err(RulesError::InvalidRule(format!(
                    "lookup transform on {} requires a source key",
                    rules.key_name
                )));
            }
            _ => {}
        }
        Ok(rules)
    }
}
