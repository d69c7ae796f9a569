//! Compiled merge configuration, as handed over by the configuration compiler.
//!
//! Each subservice contributes one [`MergedTypeConfig`] per merged type: the fields it can supply,
//! the entry points through which the type can be looked up on it, and the schema assembly
//! markers. Argument building is a small closed set of pure transformations (see [`ArgsBuilder`])
//! rather than arbitrary code, so configuration can be (de)serialized and compared.
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::str::FromStr;

use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::error::ConfigError;
use crate::json_ext::Value;

pub(crate) mod args;

/// An ordered set of field names of a merged type.
///
/// Equality and hashing ignore order; iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet(IndexSet<String>);

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> + '_ {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&String> {
        self.0.first()
    }

    /// Returns true if the field was not already part of the set.
    pub fn insert(&mut self, field: impl Into<String>) -> bool {
        self.0.insert(field.into())
    }

    pub fn remove(&mut self, field: &str) -> bool {
        self.0.shift_remove(field)
    }

    pub fn extend<'a>(&mut self, other: impl IntoIterator<Item = &'a String>) {
        self.0.extend(other.into_iter().cloned())
    }

    pub fn is_subset(&self, other: &SelectionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union(&self, other: &SelectionSet) -> SelectionSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &SelectionSet) -> SelectionSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn intersection(&self, other: &SelectionSet) -> SelectionSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// A copy with fields in lexicographic order, for stable cache keys and output.
    pub fn sorted(&self) -> SelectionSet {
        Self(self.0.iter().sorted().cloned().collect())
    }
}

impl Hash for SelectionSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for field in self.0.iter().sorted() {
            field.hash(state);
        }
    }
}

impl FromIterator<String> for SelectionSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for SelectionSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

impl<'a> IntoIterator for &'a SelectionSet {
    type Item = &'a String;
    type IntoIter = indexmap::set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("{}");
        }
        write!(f, "{{ {} }}", self.0.iter().join(" "))
    }
}

impl FromStr for SelectionSet {
    type Err = ConfigError;

    /// Parses the flat form `{ id email }`. Commas are ignored and the braces are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidSelectionSet {
            selection_set: s.to_string(),
            reason,
        };
        let mut body = s.trim();
        if let Some(inner) = body.strip_prefix('{') {
            body = inner
                .strip_suffix('}')
                .ok_or_else(|| invalid("unbalanced braces"))?;
        }
        if body.contains(['{', '}', '(', ')', '@', '.']) {
            return Err(invalid("only flat lists of field names are supported"));
        }
        let mut selection_set = SelectionSet::new();
        for field in body.split(|c: char| c.is_whitespace() || c == ',') {
            if field.is_empty() {
                continue;
            }
            if !is_valid_name(field) {
                return Err(invalid("field names must be GraphQL names"));
            }
            selection_set.insert(field);
        }
        Ok(selection_set)
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl Serialize for SelectionSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SelectionSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Fields(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Fields(fields) => Ok(fields.into_iter().collect()),
        }
    }
}

/// How one subservice supplies one field of a merged type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct FieldMergeConfig {
    /// Fields the subservice needs on the representation before it can resolve this one.
    pub selection_set: SelectionSet,
    /// Computed fields are resolved in a call of their own, scoped to this field.
    pub computed: bool,
    pub nullable: bool,
    /// Schema assembly marker, never read by planning.
    pub canonical: bool,
    pub description: Option<String>,
}

impl Default for FieldMergeConfig {
    fn default() -> Self {
        Self {
            selection_set: SelectionSet::new(),
            computed: false,
            nullable: true,
            canonical: false,
            description: None,
        }
    }
}

impl FieldMergeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn requires(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = selection_set;
        self
    }

    pub fn computed(mut self, selection_set: SelectionSet) -> Self {
        self.computed = true;
        self.selection_set = selection_set;
        self
    }

    pub fn canonical(mut self) -> Self {
        self.canonical = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Where one argument of a singular lookup takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgumentValue {
    /// The value of a field of the object being merged.
    Field(String),
    /// The whole representation: the object projected onto the step's requirements.
    Representation,
    Constant(Value),
}

/// Builds the arguments of an entry point call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgsBuilder {
    /// One call per entity, with arguments taken from the object being merged.
    #[serde(rename_all = "camelCase")]
    FromOriginalObject {
        arguments: IndexMap<String, ArgumentValue>,
    },
    /// One call per batch, passing every collected key as a list in `argument`.
    #[serde(rename_all = "camelCase")]
    FromKeyList {
        argument: String,
        #[serde(default)]
        additional_arguments: IndexMap<String, Value>,
    },
}

impl ArgsBuilder {
    pub fn from_original_object<'a>(
        arguments: impl IntoIterator<Item = (&'a str, ArgumentValue)>,
    ) -> Self {
        ArgsBuilder::FromOriginalObject {
            arguments: arguments
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn from_key_list(argument: impl Into<String>) -> Self {
        ArgsBuilder::FromKeyList {
            argument: argument.into(),
            additional_arguments: IndexMap::new(),
        }
    }
}

/// Extracts the identity of an entity (or of a batched result item).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyExtractor {
    /// The value of a single field.
    Field(String),
    /// An object made of several fields.
    Fields(SelectionSet),
}

/// How the items returned by a batched call are redistributed to the keys that requested them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValuesFromResults {
    /// The n-th item answers the n-th key.
    #[default]
    Positional,
    /// Each item answers the key it carries; `key` defaults to the entry point key extractor.
    ByKey {
        #[serde(default)]
        key: Option<KeyExtractor>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryPointKind {
    Singular {
        args: ArgsBuilder,
    },
    #[serde(rename_all = "camelCase")]
    Batched {
        args: ArgsBuilder,
        #[serde(default)]
        key: Option<KeyExtractor>,
        #[serde(default)]
        values_from_results: ValuesFromResults,
    },
}

/// A lookup method for a merged type on one subservice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    /// The fields the lookup is keyed by.
    pub selection_set: SelectionSet,
    pub field_name: String,
    #[serde(flatten)]
    pub kind: EntryPointKind,
}

impl EntryPoint {
    pub fn singular(selection_set: SelectionSet, field_name: &str, args: ArgsBuilder) -> Self {
        Self {
            selection_set,
            field_name: field_name.to_string(),
            kind: EntryPointKind::Singular { args },
        }
    }

    /// A batched lookup passing the collected keys as the list argument `argument`.
    pub fn batched(selection_set: SelectionSet, field_name: &str, argument: &str) -> Self {
        Self {
            selection_set,
            field_name: field_name.to_string(),
            kind: EntryPointKind::Batched {
                args: ArgsBuilder::from_key_list(argument),
                key: None,
                values_from_results: ValuesFromResults::Positional,
            },
        }
    }

    pub fn with_key(mut self, extractor: KeyExtractor) -> Self {
        if let EntryPointKind::Batched { key, .. } = &mut self.kind {
            *key = Some(extractor);
        }
        self
    }

    pub fn with_values_from_results(mut self, values: ValuesFromResults) -> Self {
        if let EntryPointKind::Batched {
            values_from_results,
            ..
        } = &mut self.kind
        {
            *values_from_results = values;
        }
        self
    }

    pub fn is_batched(&self) -> bool {
        matches!(self.kind, EntryPointKind::Batched { .. })
    }

    pub fn args(&self) -> &ArgsBuilder {
        match &self.kind {
            EntryPointKind::Singular { args } | EntryPointKind::Batched { args, .. } => args,
        }
    }

    /// The extractor producing the batch key of an entity.
    pub fn key_extractor(&self) -> KeyExtractor {
        if let EntryPointKind::Batched { key: Some(key), .. } = &self.kind {
            return key.clone();
        }
        match (self.selection_set.len(), self.selection_set.first()) {
            (1, Some(field)) => KeyExtractor::Field(field.clone()),
            _ => KeyExtractor::Fields(self.selection_set.clone()),
        }
    }

    /// The extractor applied to batched results, when they are correlated by key.
    pub fn result_key_extractor(&self) -> Option<KeyExtractor> {
        match &self.kind {
            EntryPointKind::Batched {
                values_from_results: ValuesFromResults::ByKey { key },
                ..
            } => Some(key.clone().unwrap_or_else(|| self.key_extractor())),
            _ => None,
        }
    }

    pub fn values_from_results(&self) -> ValuesFromResults {
        match &self.kind {
            EntryPointKind::Batched {
                values_from_results,
                ..
            } => values_from_results.clone(),
            EntryPointKind::Singular { .. } => ValuesFromResults::Positional,
        }
    }
}

/// One subservice's view of a merged type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MergedTypeConfig {
    pub subservice: String,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
    /// Every field this subservice can supply for the type.
    #[serde(default)]
    pub fields: IndexMap<String, FieldMergeConfig>,
    /// Schema assembly marker, never read by planning.
    #[serde(default)]
    pub canonical: bool,
}

impl MergedTypeConfig {
    pub fn new(subservice: impl Into<String>) -> Self {
        Self {
            subservice: subservice.into(),
            entry_points: Vec::new(),
            fields: IndexMap::new(),
            canonical: false,
        }
    }

    pub fn entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.entry_points.push(entry_point);
        self
    }

    pub fn field(mut self, name: impl Into<String>, config: FieldMergeConfig) -> Self {
        self.fields.insert(name.into(), config);
        self
    }

    /// Declares several plain nullable fields at once.
    pub fn fields<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.fields
                .insert(name.to_string(), FieldMergeConfig::default());
        }
        self
    }

    pub fn canonical(mut self) -> Self {
        self.canonical = true;
        self
    }

    pub fn provides(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Fields required whenever this subservice is visited: the union of the selection sets of
    /// its non-computed fields.
    pub fn type_selection_set(&self) -> SelectionSet {
        let mut selection_set = SelectionSet::new();
        for config in self.fields.values().filter(|config| !config.computed) {
            selection_set.extend(&config.selection_set);
        }
        selection_set
    }
}
