use super::types::Record;
use crate::Result;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Decides whether a record is delivered to the client.
pub trait RecordFilter: Send + Sync {
    fn matches(&self, record: &Record) -> bool;

    /// Decodes `payload` and applies [`RecordFilter::matches`]. A payload
    /// that does not decode is an error and never matches.
    fn matches_payload(&self, payload: &[u8]) -> Result<bool> {
        let record = Record::from_slice(payload)?;
        Ok(self.matches(&record))
    }
}

/// Constraint on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// The field must be present, with any value.
    Present,
    /// The field must be a string equal to one of these.
    OneOf(Vec<String>),
}

impl Constraint {
    fn accept(&mut self, value: String) {
        match self {
            Constraint::Present => {}
            Constraint::OneOf(_) if value.is_empty() => *self = Constraint::Present,
            Constraint::OneOf(values) => {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
    }
}

/// Field constraints supplied by the client. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    constraints: BTreeMap<String, Constraint>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a spec from query string pairs. Repeated keys accumulate
    /// accepted values, an empty value only requires presence and empty keys
    /// are ignored.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut spec = Self::new();
        for (key, value) in pairs {
            let key = key.into();
            if key.is_empty() {
                continue;
            }
            spec.accept(key, value.into());
        }
        spec
    }

    /// Adds `value` to the accepted values of `field`.
    pub fn accept(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.constraints.entry(field.into()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => entry.get_mut().accept(value),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(if value.is_empty() {
                    Constraint::Present
                } else {
                    Constraint::OneOf(vec![value])
                });
            }
        }
        self
    }

    pub fn require_present(&mut self, field: impl Into<String>) -> &mut Self {
        self.constraints.insert(field.into(), Constraint::Present);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Constraint> {
        self.constraints.get(field)
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.constraints.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Accepted {
            Any,
            One(String),
            Many(Vec<String>),
        }

        let raw = BTreeMap::<String, Accepted>::deserialize(deserializer)?;
        let mut spec = FilterSpec::new();
        for (field, accepted) in raw {
            if field.is_empty() {
                continue;
            }
            match accepted {
                Accepted::Any => {
                    spec.require_present(field);
                }
                Accepted::One(value) => {
                    spec.accept(field, value);
                }
                Accepted::Many(values) if values.is_empty() => {
                    spec.require_present(field);
                }
                Accepted::Many(values) => {
                    for value in values {
                        spec.accept(field.clone(), value);
                    }
                }
            }
        }
        Ok(spec)
    }
}

/// Field filter with OR semantics: a record passes when at least one
/// constraint is satisfied.
#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    spec: FilterSpec,
}

impl FieldFilter {
    pub fn new(spec: FilterSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }
}

impl RecordFilter for FieldFilter {
    fn matches(&self, record: &Record) -> bool {
        if self.spec.is_empty() {
            return true;
        }

        self.spec.iter().any(|(field, constraint)| {
            let Some(value) = record.get(field) else {
                return false;
            };
            match constraint {
                Constraint::Present => true,
                Constraint::OneOf(accepted) => value
                    .as_str()
                    .is_some_and(|text| accepted.iter().any(|a| a == text)),
            }
        })
    }
}
