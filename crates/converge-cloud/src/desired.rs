//! Desired state and configuration sources

use crate::value::{AttrValue, Attributes, Setting};
use std::collections::HashMap;

/// Supplies desired attribute values for one reconciliation pass
pub trait ConfigurationSource {
    /// Value of `name`, or [`Setting::Absent`] when not configured
    fn setting(&self, name: &str) -> Setting;

    /// Names of every explicitly configured attribute
    fn names(&self) -> Vec<String>;
}

/// Explicitly configured attribute values
///
/// An attribute missing from the map is absent; defaults are applied later
/// against a [`ResourceDescriptor`](crate::descriptor::ResourceDescriptor).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    values: Attributes,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every configured value of a source
    pub fn from_source(source: &dyn ConfigurationSource) -> Self {
        let values = source
            .names()
            .into_iter()
            .filter_map(|name| match source.setting(&name) {
                Setting::Set(value) => Some((name, value)),
                Setting::Absent => None,
            })
            .collect();
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn unset(&mut self, name: &str) {
        self.values.remove(name);
    }

    pub fn get(&self, name: &str) -> Setting {
        self.values.get(name).cloned().into()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_attributes(self) -> Attributes {
        self.values
    }
}

impl From<Attributes> for DesiredState {
    fn from(values: Attributes) -> Self {
        Self { values }
    }
}

impl ConfigurationSource for DesiredState {
    fn setting(&self, name: &str) -> Setting {
        self.get(name)
    }

    fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl ConfigurationSource for Attributes {
    fn setting(&self, name: &str) -> Setting {
        self.get(name).cloned().into()
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl ConfigurationSource for HashMap<String, AttrValue> {
    fn setting(&self, name: &str) -> Setting {
        self.get(name).cloned().into()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys().cloned().collect();
        names.sort();
        names
    }
}
