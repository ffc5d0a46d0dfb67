// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Code translation through concept maps.

use crate::ast::{ConceptMap, Equivalence, Mapping};
use crate::context::{TransformContext, TransformerServices, WorkerContext};
use crate::error::MapError;
use crate::model::BaseRef;
use crate::Rc;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Concept map url reserved for converting OIDs into uris.
pub const OID_TO_URI_MAP: &str = "http://hl7.org/fhir/ConceptMap/special-oid2uri";

/// A code with its system and optional display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: Option<&str>, code: &str) -> Self {
        Self {
            system: system.map(str::to_string),
            code: Some(code.to_string()),
            display: None,
        }
    }

    /// A `Coding` node carrying this coding's fields.
    pub fn to_node(&self, ctx: &dyn WorkerContext) -> Result<BaseRef> {
        let node = ctx.create_instance("Coding")?;
        if let Some(s) = &self.system {
            node.set_property("system", ctx.create_primitive("uri", s))?;
        }
        if let Some(c) = &self.code {
            node.set_property("code", ctx.create_primitive("code", c))?;
        }
        if let Some(d) = &self.display {
            node.set_property("display", ctx.create_primitive("string", d))?;
        }
        Ok(node)
    }

    /// Read system, code and display from a `Coding` shaped node.
    pub fn from_node(node: &BaseRef) -> Self {
        let value = |name: &str| {
            node.property(name)
                .first()
                .and_then(|v| v.primitive_value())
        };
        Self {
            system: value("system"),
            code: value("code"),
            display: value("display"),
        }
    }
}

/// Resolve `code` against the value set `uri` when one is known, matching by code or
/// by display ignoring case. Otherwise `uri` is taken as the code system. The display
/// comes from the terminology service when the value set gives none.
pub fn lookup_coding(ctx: &dyn WorkerContext, uri: &str, code: &str) -> Result<Coding> {
    let mut coding = Coding::new(Some(uri), code);

    if let Some(vs) = ctx.fetch_value_set(uri) {
        let contains = ctx.expand_value_set(&vs)?;
        let found = contains.iter().find(|c| {
            c.code.as_deref() == Some(code)
                || c.display
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(code))
        });
        let Some(c) = found else {
            let valid: Vec<_> = contains.iter().filter_map(|c| c.code.as_deref()).collect();
            bail!(MapError::Definition(format!(
                "The code '{code}' is not in the value set '{uri}' (valid codes: {}; also checked displays)",
                valid.join(", ")
            )));
        };
        coding.system = c.system.clone();
        coding.code = c.code.clone();
        coding.display = c.display.clone();
    }

    if coding.display.is_none() {
        if let (Some(system), Some(code)) = (&coding.system, &coding.code) {
            coding.display = ctx.validate_code(system, code);
        }
    }
    Ok(coding)
}

/// What a translation source node carries.
fn source_coding(source: &BaseRef) -> Result<Coding> {
    if source.is_primitive() {
        return Ok(Coding {
            code: source.primitive_value(),
            ..Coding::default()
        });
    }
    let value = |name: &str| {
        source
            .property(name)
            .first()
            .and_then(|v| v.primitive_value())
    };
    match source.type_name().as_str() {
        "Coding" => Ok(Coding::from_node(source)),
        "CE" => Ok(Coding {
            system: value("codeSystem"),
            code: value("code"),
            display: None,
        }),
        other => bail!(MapError::Translation(format!(
            "unable to translate source of type {other}"
        ))),
    }
}

/// Translates codes using the concept maps of one mapping.
pub struct Translator<'a> {
    pub ctx: &'a dyn WorkerContext,
    pub services: Option<&'a dyn TransformerServices>,
    pub context: &'a TransformContext,
    pub map: &'a Mapping,
}

impl Translator<'_> {
    /// Translate `source` with the concept map at `url`. `field == "code"` yields a
    /// `code` primitive, anything else a `Coding` node. `None` means the source is
    /// explicitly unmatched.
    pub fn translate(&self, source: &BaseRef, url: &str, field: Option<&str>) -> Result<Option<BaseRef>> {
        let src = source_coding(source)?;

        if url == OID_TO_URI_MAP {
            let oid = src.code.as_deref().unwrap_or_default();
            let uri = self
                .ctx
                .oid_to_uri(oid)
                .unwrap_or_else(|| format!("urn:oid:{oid}"));
            return match field {
                Some("uri") => Ok(Some(self.ctx.create_primitive("uri", &uri))),
                other => bail!(MapError::Translation(format!(
                    "field `{}` is not supported for oid translation",
                    other.unwrap_or_default()
                ))),
            };
        }

        let outcome = match self.find_map(url) {
            Some(cm) => self.apply(&cm, &src, url)?,
            None => match self.services {
                Some(services) => services.translate(self.context, &src, url)?,
                None => bail!(MapError::Translation(format!("No map found for {url}"))),
            },
        };

        let Some(coding) = outcome else {
            return Ok(None);
        };
        debug!(url, code = ?coding.code, "translated");
        match field {
            Some("code") => Ok(coding
                .code
                .as_deref()
                .map(|c| self.ctx.create_primitive("code", c))),
            _ => Ok(Some(coding.to_node(self.ctx)?)),
        }
    }

    fn find_map(&self, url: &str) -> Option<Rc<ConceptMap>> {
        if url.starts_with('#') {
            if let Some(cm) = self.map.concept_map(url) {
                return Some(Rc::new(cm.clone()));
            }
        }
        self.ctx.fetch_concept_map(url)
    }

    fn apply(&self, cm: &ConceptMap, src: &Coding, url: &str) -> Result<Option<Coding>> {
        let code = src.code.as_deref().unwrap_or_default();
        let matches: Vec<_> = cm
            .groups
            .iter()
            .flat_map(|g| g.elements.iter().map(move |e| (g, e)))
            .filter(|(g, e)| {
                e.code == code
                    && src
                        .system
                        .as_ref()
                        .map_or(true, |system| &g.source == system)
            })
            .collect();

        let Some((group, element)) = matches.first() else {
            bail!(MapError::Translation(format!(
                "unable to find a translation for {}#{code} in {url}",
                src.system.as_deref().unwrap_or_default()
            )));
        };
        if element.targets.is_empty() {
            bail!(MapError::Translation(format!(
                "concept map {url} has no targets for code {code}"
            )));
        }

        // An unmatched entry settles the outcome as "no value".
        let mut done = false;
        let mut found: Option<Coding> = None;
        for target in &element.targets {
            match target.equivalence {
                e if e.is_match() => {
                    if done {
                        bail!(MapError::Translation(format!(
                            "concept map {url} found multiple matches for {code}"
                        )));
                    }
                    done = true;
                    found = Some(Coding {
                        system: group.target.clone(),
                        code: target.code.clone(),
                        display: None,
                    });
                }
                Equivalence::Unmatched => done = true,
                _ => {}
            }
        }
        if !done {
            return Err(anyhow!(MapError::Translation(format!(
                "concept map {url} found no usable translation for {code}"
            ))));
        }
        Ok(found)
    }
}
