//! Ticket field templates.
//!
//! A [`TemplateSet`] maps section names (one per call lifecycle transition)
//! to ordered field assignments. [`merge`] renders one section against a
//! call's [`Placeholders`] and applies the result to a [`Ticket`].
use crate::{
    error::{Error, Result},
    ticket::{CustomField, Ticket},
};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, str::FromStr};

mod pattern;
mod placeholder;

pub use pattern::{Conversion, FormatSpec, Pattern, PatternError};
pub use placeholder::{PlaceholderValue, Placeholders};

pub const ISSUE_CREATE: &str = "IssueCreate";
pub const ISSUE_ASSIGN: &str = "IssueAssign";
pub const ISSUE_USER_NOT_FOUND: &str = "IssueUserNotFound";
pub const ISSUE_HANGUP_ANSWERED: &str = "IssueHangupAnswered";
pub const ISSUE_HANGUP_NOT_ANSWERED: &str = "IssueHangupNotAnswered";

pub const KNOWN_SECTIONS: [&str; 5] = [
    ISSUE_CREATE,
    ISSUE_ASSIGN,
    ISSUE_USER_NOT_FOUND,
    ISSUE_HANGUP_ANSWERED,
    ISSUE_HANGUP_NOT_ANSWERED,
];

pub const CUSTOM_FIELDS_SUFFIX: &str = "/custom_fields";

pub fn custom_fields_section(section: &str) -> String {
    format!("{}{}", section, CUSTOM_FIELDS_SUFFIX)
}

/// Configured value of one template field.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// Assigned verbatim, whatever its JSON type.
    Literal(Value),
    Pattern(Pattern),
}

impl TemplateValue {
    pub fn parse(value: &toml::Value) -> Result<Self, PatternError> {
        match value {
            toml::Value::String(s) if !s.contains('%') => {
                Ok(TemplateValue::Literal(Value::String(s.clone())))
            }
            toml::Value::String(s) => Ok(TemplateValue::Pattern(Pattern::parse(s)?)),
            other => Ok(TemplateValue::Literal(toml_to_json(other))),
        }
    }

    pub fn resolve(&self, placeholders: &Placeholders) -> Result<Value, PatternError> {
        match self {
            TemplateValue::Literal(value) => Ok(value.clone()),
            TemplateValue::Pattern(pattern) => pattern.render(placeholders).map(Value::String),
        }
    }
}

fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSection {
    entries: Vec<(String, TemplateValue)>,
}

impl TemplateSection {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TemplateValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, field: &str) -> Option<&TemplateValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "toml::Table")]
pub struct TemplateSet {
    sections: HashMap<String, TemplateSection>,
}

impl TemplateSet {
    /// Builds the set from a TOML table of sections. A `custom_fields`
    /// sub-table inside a section is folded into `<section>/custom_fields`.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut set = TemplateSet::default();
        for (name, value) in table {
            let fields = value
                .as_table()
                .ok_or_else(|| Error::InvalidSection(name.clone()))?;
            for (field, value) in fields {
                if field == "custom_fields" {
                    if let Some(custom) = value.as_table() {
                        let custom_name = custom_fields_section(name);
                        for (id, value) in custom {
                            set.push(&custom_name, id, value)?;
                        }
                        continue;
                    }
                }
                set.push(name, field, value)?;
            }
            set.sections.entry(name.clone()).or_default();
        }
        Ok(set)
    }

    fn push(&mut self, section: &str, field: &str, value: &toml::Value) -> Result<()> {
        let value =
            TemplateValue::parse(value).map_err(|e| Error::template(section, field, e))?;
        self.sections
            .entry(section.to_string())
            .or_default()
            .entries
            .push((field.to_string(), value));
        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&TemplateSection> {
        self.sections.get(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn section_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.sections.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }

    /// Sections that no lifecycle transition will ever merge.
    pub fn unknown_sections(&self) -> Vec<&str> {
        self.section_names()
            .into_iter()
            .filter(|name| {
                let base = name.strip_suffix(CUSTOM_FIELDS_SUFFIX).unwrap_or(name);
                !KNOWN_SECTIONS.contains(&base)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl TryFrom<toml::Table> for TemplateSet {
    type Error = Error;

    fn try_from(table: toml::Table) -> Result<Self> {
        TemplateSet::from_table(&table)
    }
}

impl FromStr for TemplateSet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table: toml::Table = toml::from_str(s)?;
        Ok(TemplateSet::from_table(&table)?)
    }
}

/// Applies `section` and its `<section>/custom_fields` companion to
/// `ticket`. Returns whether anything was assigned.
///
/// Every field is rendered before the first assignment, so a failing field
/// leaves the ticket untouched.
pub fn merge(
    templates: &TemplateSet,
    section: &str,
    placeholders: &Placeholders,
    ticket: &mut Ticket,
) -> Result<bool> {
    let fields = match templates.section(section) {
        Some(entries) => entries
            .iter()
            .map(|(field, value)| {
                value
                    .resolve(placeholders)
                    .map(|value| (field.to_string(), value))
                    .map_err(|e| Error::template(section, field, e))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let custom_name = custom_fields_section(section);
    let custom_fields = match templates.section(&custom_name) {
        Some(entries) => entries
            .iter()
            .map(|(id, value)| {
                value
                    .resolve(placeholders)
                    .map(|value| CustomField {
                        id: id.to_string(),
                        value,
                    })
                    .map_err(|e| Error::template(&custom_name, id, e))
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let mut changed = false;
    for (field, value) in fields {
        ticket.set(field, value);
        changed = true;
    }
    if !custom_fields.is_empty() {
        ticket.custom_fields = custom_fields;
        changed = true;
    }
    Ok(changed)
}
