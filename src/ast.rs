// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use core::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Publication status shared by mappings, concept maps and profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    Draft,
    Active,
    Retired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub telecom: Vec<String>,
}

/// Generated human readable text attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    pub status: String,
    pub div: String,
}

/// A parsed mapping program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
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
    pub text: Option<Narrative>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structures: Vec<Structure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept_maps: Vec<ConceptMap>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Mapping {
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Embedded concept map by local id, with or without the leading `#`.
    pub fn concept_map(&self, id: &str) -> Option<&ConceptMap> {
        let id = id.strip_prefix('#').unwrap_or(id);
        self.concept_maps.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    Source,
    Queried,
    Target,
    Produced,
}

/// A `uses` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub url: String,
    pub mode: ModelMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Direction of a group input and of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub mode: InputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<Dependent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceListMode {
    First,
    Last,
    OnlyOne,
}

impl SourceListMode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::OnlyOne => "only_one",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetListMode {
    First,
    Last,
    Share,
}

impl TargetListMode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::Share => "share",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    pub required: bool,
    /// Declared type, kept for rendering.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_mode: Option<SourceListMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_modes: Vec<TargetListMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rule_id: Option<String>,
}

/// The operation computing a target's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformKind {
    Create,
    Copy,
    Truncate,
    Escape,
    Cast,
    Append,
    Translate,
    Reference,
    DateOp,
    Uuid,
    Pointer,
    Evaluate,
    Cc,
    C,
    Qty,
    Id,
    Cp,
}

impl TransformKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Copy => "copy",
            Self::Truncate => "truncate",
            Self::Escape => "escape",
            Self::Cast => "cast",
            Self::Append => "append",
            Self::Translate => "translate",
            Self::Reference => "reference",
            Self::DateOp => "dateOp",
            Self::Uuid => "uuid",
            Self::Pointer => "pointer",
            Self::Evaluate => "evaluate",
            Self::Cc => "cc",
            Self::C => "c",
            Self::Qty => "qty",
            Self::Id => "id",
            Self::Cp => "cp",
        }
    }
}

impl FromStr for TransformKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "create" => Self::Create,
            "copy" => Self::Copy,
            "truncate" => Self::Truncate,
            "escape" => Self::Escape,
            "cast" => Self::Cast,
            "append" => Self::Append,
            "translate" => Self::Translate,
            "reference" => Self::Reference,
            "dateOp" => Self::DateOp,
            "uuid" => Self::Uuid,
            "pointer" => Self::Pointer,
            "evaluate" => Self::Evaluate,
            "cc" => Self::Cc,
            "c" => Self::C,
            "qty" => Self::Qty,
            "id" => Self::Id,
            "cp" => Self::Cp,
            _ => bail!("unknown transform `{s}`"),
        })
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A transform argument: a variable reference or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    Id(String),
    String(String),
    Integer(i64),
    /// Kept as written so that rendering reproduces it.
    Decimal(String),
    Boolean(bool),
}

impl Parameter {
    pub fn is_id(&self) -> bool {
        matches!(self, Self::Id(_))
    }

    /// Name of the primitive type a literal produces.
    pub fn literal_type(&self) -> Option<&'static str> {
        match self {
            Self::Id(_) => None,
            Self::String(_) => Some("string"),
            Self::Integer(_) => Some("integer"),
            Self::Decimal(_) => Some("decimal"),
            Self::Boolean(_) => Some("boolean"),
        }
    }

    /// Textual value of a literal.
    pub fn literal_value(&self) -> Option<String> {
        match self {
            Self::Id(_) => None,
            Self::String(s) | Self::Decimal(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Boolean(b) => Some(b.to_string()),
        }
    }
}

/// Invocation of another group from a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub name: String,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMap {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub status: PublicationStatus,
    #[serde(default, rename = "group")]
    pub groups: Vec<ConceptMapGroup>,
}

/// Entries translating codes of one source system into one target system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapGroup {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, rename = "element")]
    pub elements: Vec<ConceptMapElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapElement {
    pub code: String,
    #[serde(default, rename = "target")]
    pub targets: Vec<ConceptMapTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMapTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub equivalence: Equivalence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Equivalence {
    Equal,
    #[default]
    Equivalent,
    Disjoint,
    Unmatched,
    Wider,
    Subsumes,
    Narrower,
    Specializes,
    Inexact,
}

impl Equivalence {
    pub const ALL: [Equivalence; 9] = [
        Self::Equal,
        Self::Equivalent,
        Self::Disjoint,
        Self::Unmatched,
        Self::Wider,
        Self::Subsumes,
        Self::Narrower,
        Self::Specializes,
        Self::Inexact,
    ];

    pub fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "=" => Self::Equal,
            "==" => Self::Equivalent,
            "!=" => Self::Disjoint,
            "--" => Self::Unmatched,
            "<=" => Self::Wider,
            "<-" => Self::Subsumes,
            ">=" => Self::Narrower,
            ">-" => Self::Specializes,
            "~" => Self::Inexact,
            _ => return None,
        })
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Equivalent => "==",
            Self::Disjoint => "!=",
            Self::Unmatched => "--",
            Self::Wider => "<=",
            Self::Subsumes => "<-",
            Self::Narrower => ">=",
            Self::Specializes => ">-",
            Self::Inexact => "~",
        }
    }

    /// Whether a target with this equivalence can be used as a translation.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Equal | Self::Equivalent | Self::Wider)
    }
}
