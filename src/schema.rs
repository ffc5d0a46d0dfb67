// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shape definitions, value sets and code systems consumed by the engine.
//!
//! These mirror the JSON layout of the corresponding FHIR resources closely enough that
//! definitions published as JSON can be loaded directly.

use crate::ast::{Contact, PublicationStatus};
use crate::context::WorkerContext;
use crate::translator::Coding;
use crate::Rc;

use serde::{Deserialize, Serialize};

/// Namespace of the core type definitions. A bare type name `T` stands for `{FHIR_NS}T`.
pub const FHIR_NS: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Version written into derived profiles.
pub const FHIR_VERSION: &str = "3.0.1";

/// Extension carrying the text placed before generated mapping rules.
pub const EXT_MAPPING_PREFIX: &str =
    "http://hl7.org/fhir/tools/StructureDefinition/logical-mapping-prefix";

/// Extension carrying the text placed after generated mapping rules.
pub const EXT_MAPPING_SUFFIX: &str =
    "http://hl7.org/fhir/tools/StructureDefinition/logical-mapping-suffix";

fn structure_definition() -> String {
    "StructureDefinition".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Derivation {
    Specialization,
    Constraint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

/// A mapping declared by a structure definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDeclaration {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementList {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    #[serde(default = "structure_definition")]
    pub resource_type: String,
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PublicationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mapping: Vec<MappingDeclaration>,
    pub kind: StructureKind,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<Derivation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ElementList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differential: Option<ElementList>,
}

impl StructureDefinition {
    pub fn new(url: &str, type_name: &str, kind: StructureKind) -> Self {
        Self {
            resource_type: structure_definition(),
            id: String::new(),
            url: url.to_string(),
            name: String::new(),
            status: None,
            experimental: None,
            date: None,
            description: None,
            copyright: None,
            contact: vec![],
            fhir_version: None,
            extension: vec![],
            mapping: vec![],
            kind,
            is_abstract: false,
            type_name: type_name.to_string(),
            base_definition: None,
            derivation: None,
            snapshot: None,
            differential: None,
        }
    }

    pub fn snapshot_elements(&self) -> &[ElementDefinition] {
        match &self.snapshot {
            Some(s) => &s.element,
            None => &[],
        }
    }

    pub fn differential_elements(&self) -> &[ElementDefinition] {
        match &self.differential {
            Some(d) => &d.element,
            None => &[],
        }
    }

    pub fn differential_mut(&mut self) -> &mut Vec<ElementDefinition> {
        &mut self.differential.get_or_insert_with(ElementList::default).element
    }

    pub fn extension_string(&self, url: &str) -> Option<&str> {
        self.extension
            .iter()
            .find(|e| e.url == url)
            .and_then(|e| e.value_string.as_deref())
    }

    /// Snapshot elements that are direct children of `path`.
    pub fn children_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ElementDefinition> {
        self.snapshot_elements().iter().filter(move |e| {
            e.path
                .strip_prefix(path)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| !rest.contains('.'))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discriminator {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slicing {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discriminator: Vec<Discriminator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    pub rules: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMapping {
    pub identity: String,
    pub map: String,
}

/// A literal value an element is constrained to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixedValue {
    String(String),
    Integer(i64),
    Decimal(String),
    Boolean(bool),
    Coding(Coding),
    CodeableConcept(Vec<Coding>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slicing: Option<Slicing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<FixedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mapping: Vec<ElementMapping>,
}

impl ElementDefinition {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        match self.path.rfind('.') {
            Some(i) => &self.path[i + 1..],
            None => &self.path,
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.max.as_deref().is_some_and(|m| m != "1" && m != "0")
    }

    pub fn mapping_for(&self, identity: &str) -> Option<&str> {
        self.mapping
            .iter()
            .find(|m| m.identity == identity)
            .map(|m| m.map.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionContains {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expansion {
    #[serde(default)]
    pub contains: Vec<ExpansionContains>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeInclude {
    pub system: String,
    #[serde(default)]
    pub concept: Vec<Concept>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compose {
    #[serde(default)]
    pub include: Vec<ComposeInclude>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSet {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<Compose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Expansion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSystem {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub concept: Vec<Concept>,
}

/// An element definition within its structure, used to navigate shapes.
#[derive(Debug, Clone)]
pub struct Property {
    structure: Rc<StructureDefinition>,
    definition: ElementDefinition,
}

impl Property {
    pub fn new(structure: Rc<StructureDefinition>, definition: ElementDefinition) -> Self {
        Self {
            structure,
            definition,
        }
    }

    /// The root element of a structure's snapshot.
    pub fn root(structure: Rc<StructureDefinition>) -> Option<Self> {
        let definition = structure.snapshot_elements().first()?.clone();
        Some(Self::new(structure, definition))
    }

    pub fn structure(&self) -> &Rc<StructureDefinition> {
        &self.structure
    }

    pub fn definition(&self) -> &ElementDefinition {
        &self.definition
    }

    pub fn path(&self) -> &str {
        &self.definition.path
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// First declared type code, or the structure type at the root.
    pub fn type_code(&self) -> Option<String> {
        match self.definition.types.first() {
            Some(t) => Some(t.code.clone()),
            None if !self.definition.path.contains('.') => {
                Some(self.structure.type_name.clone())
            }
            None => None,
        }
    }

    fn find_child(&self, name: &str) -> Option<ElementDefinition> {
        self.structure
            .children_of(self.path())
            .find(|e| {
                let child = e.name();
                child == name
                    || child
                        .strip_suffix("[x]")
                        .and_then(|base| name.strip_prefix(base))
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_uppercase))
            })
            .cloned()
    }

    /// Child element `name`. When the element has no children of its own in this
    /// structure, the definition of its type is searched instead.
    pub fn child(&self, ctx: &dyn WorkerContext, name: &str) -> Option<Property> {
        if let Some(def) = self.find_child(name) {
            return Some(Property::new(self.structure.clone(), def));
        }
        if self.structure.children_of(self.path()).next().is_some() {
            return None;
        }
        let type_code = self.type_code()?;
        let sd = ctx.fetch_structure(&type_code)?;
        if Rc::ptr_eq(&sd, &self.structure) {
            return None;
        }
        Property::root(sd)?.find_child_property(name)
    }

    fn find_child_property(&self, name: &str) -> Option<Property> {
        self.find_child(name)
            .map(|def| Property::new(self.structure.clone(), def))
    }

    /// Type code of a child matched through a choice element such as `value[x]`.
    pub fn choice_type(&self, name: &str) -> Option<String> {
        let base = self.name().strip_suffix("[x]")?;
        let rest = name.strip_prefix(base)?;
        self.definition
            .types
            .iter()
            .find(|t| t.code.eq_ignore_ascii_case(rest))
            .map(|t| t.code.clone())
    }
}
