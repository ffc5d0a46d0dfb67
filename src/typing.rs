// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::schema::{ElementBinding, ElementDefinition, FHIR_NS};

use serde::{Deserialize, Serialize};

/// Expand a bare type name into its canonical url.
pub fn type_url(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{FHIR_NS}{name}")
    }
}

/// Short name of a core type url; other urls are returned unchanged.
pub fn type_tail(url: &str) -> &str {
    url.strip_prefix(FHIR_NS).unwrap_or(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Singleton,
    Ordered,
    Unordered,
}

/// A type together with the profiles and bindings inferred for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfiledType {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<ElementBinding>,
}

impl ProfiledType {
    pub fn new(name: &str) -> Self {
        Self {
            uri: type_url(name),
            profiles: vec![],
            bindings: vec![],
        }
    }

    pub fn name(&self) -> &str {
        type_tail(&self.uri)
    }

    pub fn is_core(&self) -> bool {
        self.uri.starts_with(FHIR_NS)
    }

    pub fn add_profile(&mut self, profile: &str) {
        if !self.profiles.iter().any(|p| p == profile) {
            self.profiles.push(profile.to_string());
        }
    }

    pub fn add_binding(&mut self, binding: ElementBinding) {
        self.bindings.push(binding);
    }

    pub fn has_bindings(&self) -> bool {
        !self.bindings.is_empty()
    }
}

/// Static type information: the possible types of a value and its cardinality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDetails {
    pub collection: CollectionStatus,
    pub types: Vec<ProfiledType>,
}

impl TypeDetails {
    pub fn new(collection: CollectionStatus) -> Self {
        Self {
            collection,
            types: vec![],
        }
    }

    pub fn singleton(name: &str) -> Self {
        Self::of(CollectionStatus::Singleton, ProfiledType::new(name))
    }

    pub fn of(collection: CollectionStatus, pt: ProfiledType) -> Self {
        Self {
            collection,
            types: vec![pt],
        }
    }

    /// Declared types of an element, carrying profiles and binding.
    pub fn from_element(def: &ElementDefinition) -> Self {
        let collection = if def.is_repeating() {
            CollectionStatus::Ordered
        } else {
            CollectionStatus::Singleton
        };
        let mut td = Self::new(collection);
        for t in &def.types {
            let mut pt = ProfiledType::new(&t.code);
            if let Some(p) = &t.profile {
                pt.add_profile(p);
            }
            if let Some(b) = &def.binding {
                pt.add_binding(b.clone());
            }
            td.add(pt);
        }
        td
    }

    pub fn add_type(&mut self, name: &str, profile: Option<&str>) {
        let mut pt = ProfiledType::new(name);
        if let Some(p) = profile {
            pt.add_profile(p);
        }
        self.add(pt);
    }

    pub fn add(&mut self, pt: ProfiledType) {
        match self.types.iter_mut().find(|t| t.uri == pt.uri) {
            Some(existing) => {
                for p in &pt.profiles {
                    existing.add_profile(p);
                }
                existing.bindings.extend(pt.bindings);
            }
            None => self.types.push(pt),
        }
    }

    pub fn union(&mut self, other: &TypeDetails) {
        for t in &other.types {
            self.add(t.clone());
        }
        if other.collection != CollectionStatus::Singleton {
            self.collection = other.collection;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Url of the first type.
    pub fn primary(&self) -> Option<&str> {
        self.types.first().map(|t| t.uri.as_str())
    }

    pub fn has_type(&self, name: &str) -> bool {
        let url = type_url(name);
        self.types.iter().any(|t| t.uri == url)
    }

    pub fn binding(&self) -> Option<&ElementBinding> {
        self.types.iter().find_map(|t| t.bindings.first())
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name()).collect()
    }

    pub fn describe(&self) -> String {
        self.type_names().join(" | ")
    }
}
