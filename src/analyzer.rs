// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static analysis of a mapping: the profiles its targets conform to and a
//! source/target summary table.

use crate::ast::*;
use crate::context::{TransformContext, TransformerServices, WorkerContext};
use crate::error::MapError;
use crate::fhirpath::{self, Expr, HostServices};
use crate::model::BaseRef;
use crate::render::escape_html;
use crate::schema::*;
use crate::translator::{lookup_coding, Coding};
use crate::typing::{type_url, CollectionStatus, ProfiledType, TypeDetails};
use crate::variables::{Describe, Variables};
use crate::walker::{profile_key, walk_group, RuleWalker};
use crate::Rc;

use core::fmt::Write;
use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Header,
    Group,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub kind: RowKind,
    pub source: String,
    pub target: String,
}

/// Two column table describing what each rule reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn to_html(&self) -> String {
        let mut out = String::from("<table class=\"grid\">");
        for row in &self.rows {
            let (source, target) = (escape_html(&row.source), escape_html(&row.target));
            let _ = match row.kind {
                RowKind::Header => write!(
                    out,
                    "<tr><td><b>{source}</b></td><td><b>{target}</b></td></tr>"
                ),
                RowKind::Group => write!(
                    out,
                    "<tr class=\"diff-title\"><td>{source}</td><td>{target}</td></tr>"
                ),
                RowKind::Rule => write!(out, "<tr><td>{source}</td><td>{target}</td></tr>"),
            };
        }
        out.push_str("</table>");
        out
    }
}

/// Result of [`crate::Engine::analyse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Profiles derived for the mapping's targets.
    pub profiles: Vec<StructureDefinition>,
    pub summary: SummaryTable,
    /// Profile url per target, keyed as the interpreter looks them up.
    pub target_profiles: BTreeMap<String, String>,
}

/// An element of a derived profile: profile index and element path.
#[derive(Debug, Clone)]
struct ProfileElement {
    profile: usize,
    path: String,
}

/// What a variable stands for during analysis.
#[derive(Debug, Clone)]
pub struct PropertyWithType {
    path: String,
    base: Property,
    profile: Option<ProfileElement>,
    types: TypeDetails,
}

impl Describe for PropertyWithType {
    fn describe(&self) -> String {
        self.path.clone()
    }
}

struct TypeHost<'v> {
    vars: &'v Variables<PropertyWithType>,
}

impl HostServices for TypeHost<'_> {
    fn resolve_variable(&self, _name: &str) -> Option<BaseRef> {
        None
    }

    fn resolve_variable_type(&self, name: &str) -> Option<TypeDetails> {
        self.vars.lookup(name).map(|p| p.types.clone())
    }
}

fn transform_suffix(kind: Option<TransformKind>) -> &'static str {
    match kind {
        Some(TransformKind::Copy) => "",
        Some(TransformKind::Truncate) => " (truncated)",
        Some(TransformKind::Translate) => " (translated)",
        Some(TransformKind::Cc) => " (--> CodeableConcept)",
        Some(TransformKind::C) => " (--> Coding)",
        Some(TransformKind::Qty) => " (--> Quantity)",
        _ => " {??)",
    }
}

fn describe_system(system: &str) -> &str {
    match system {
        "http://loinc.org" => "LOINC",
        "http://snomed.info/sct" => "SNOMED CT",
        "http://www.nlm.nih.gov/research/umls/rxnorm" => "RxNorm",
        "http://hl7.org/fhir/sid/icd-9" => "ICD-9",
        "http://dicom.nema.org/resources/ontology/DCM" => "DICOM",
        "http://unitsofmeasure.org" => "UCUM",
        other => other,
    }
}

// Elements whose value identifies what kind of instance is being built.
fn is_significant(path: &str, element: &str) -> bool {
    matches!((path, element), ("Observation", "code") | ("Bundle", "type"))
}

fn literal_fixed(p: &Parameter) -> Option<FixedValue> {
    Some(match p {
        Parameter::Id(_) => return None,
        Parameter::String(s) => FixedValue::String(s.clone()),
        Parameter::Integer(i) => FixedValue::Integer(*i),
        Parameter::Decimal(d) => FixedValue::Decimal(d.clone()),
        Parameter::Boolean(b) => FixedValue::Boolean(*b),
    })
}

/// Value an element is pinned to when every parameter of its target is a literal.
fn fixed_value(target: &Target) -> Option<FixedValue> {
    if target.parameters.iter().any(Parameter::is_id) {
        return None;
    }
    let coding = || match target.parameters.as_slice() {
        [system, code, ..] => Some(Coding {
            system: system.literal_value(),
            code: code.literal_value(),
            display: None,
        }),
        _ => None,
    };
    match target.transform? {
        TransformKind::Copy => literal_fixed(target.parameters.first()?),
        TransformKind::Cc => Some(FixedValue::CodeableConcept(vec![coding()?])),
        TransformKind::C => Some(FixedValue::Coding(coding()?)),
        _ => None,
    }
}

/// Collects the descriptions of one rule's targets.
#[derive(Debug, Default)]
struct TargetWriter {
    new_resources: BTreeMap<String, String>,
    assignments: Vec<(String, String)>,
    key_props: Vec<(String, String)>,
    text: Vec<String>,
}

impl TargetWriter {
    fn new_resource(&mut self, var: &str, name: &str) {
        self.new_resources.insert(var.to_string(), name.to_string());
        self.text.push(format!("new {name}"));
    }

    fn value_assignment(&mut self, context: &str, desc: String) {
        self.assignments.push((context.to_string(), desc.clone()));
        self.text.push(desc);
    }

    fn key_assignment(&mut self, context: &str, desc: String) {
        self.key_props.push((context.to_string(), desc.clone()));
        self.text.push(desc);
    }

    fn commit(self) -> String {
        let single_new = |(var, _): &(String, String)| self.new_resources.contains_key(var);
        match (
            self.new_resources.len(),
            self.assignments.as_slice(),
            self.key_props.as_slice(),
        ) {
            (1, [a], [k]) if single_new(a) && single_new(k) => {
                let key = k.1.split_once('.').map_or(k.1.as_str(), |(_, rest)| rest);
                format!("new {} ({key})", a.1)
            }
            (1, [a], []) if single_new(a) => format!("new {}", a.1),
            _ => self.text.join(", "),
        }
    }
}

/// State of one analysis. Built fresh for each call.
pub struct AnalysisRun<'a> {
    ctx: &'a dyn WorkerContext,
    services: Option<&'a dyn TransformerServices>,
    map: &'a Mapping,
    ids: BTreeMap<String, usize>,
    profiles: Vec<StructureDefinition>,
    // Rule name for each differential element, parallel to `profiles`.
    slice_names: Vec<Vec<Option<String>>>,
    target_profiles: BTreeMap<String, String>,
    rows: Vec<SummaryRow>,
    writer: TargetWriter,
    expressions: BTreeMap<String, Rc<Expr>>,
}

impl<'a> AnalysisRun<'a> {
    pub fn new(
        ctx: &'a dyn WorkerContext,
        services: Option<&'a dyn TransformerServices>,
        _context: &'a TransformContext,
        map: &'a Mapping,
    ) -> Self {
        Self {
            ctx,
            services,
            map,
            ids: BTreeMap::new(),
            profiles: vec![],
            slice_names: vec![],
            target_profiles: BTreeMap::new(),
            rows: vec![],
            writer: TargetWriter::default(),
            expressions: BTreeMap::new(),
        }
    }

    pub fn run(mut self) -> Result<Analysis> {
        let map = self.map;
        let start = map
            .groups
            .first()
            .ok_or_else(|| anyhow!(MapError::Definition(format!("mapping {} has no groups", map.url))))?;

        let mut vars = Variables::new();
        for input in &start.inputs {
            let prop = self.resolve_type(input)?;
            let prop = match input.mode {
                InputMode::Source => prop,
                InputMode::Target => self.create_profile(prop, &start.name, None)?,
            };
            vars.add(input.mode, &input.name, prop);
        }

        self.rows.push(SummaryRow {
            kind: RowKind::Header,
            source: "Source".to_string(),
            target: "Target".to_string(),
        });
        self.log(&format!("Start Profiling Transform {}", map.url));
        walk_group(&mut self, start, &vars)?;

        let mut profiles = core::mem::take(&mut self.profiles);
        for (profile, names) in profiles.iter_mut().zip(&self.slice_names) {
            clean_up_differential(profile, names);
        }
        Ok(Analysis {
            profiles,
            summary: SummaryTable { rows: self.rows },
            target_profiles: self.target_profiles,
        })
    }

    fn log(&self, message: &str) {
        if let Some(services) = self.services {
            services.log(message);
        }
    }

    fn expression(&mut self, text: &str) -> Result<Rc<Expr>> {
        if let Some(expr) = self.expressions.get(text) {
            return Ok(expr.clone());
        }
        let expr = Rc::new(fhirpath::parse(text)?);
        self.expressions.insert(text.to_string(), expr.clone());
        Ok(expr)
    }

    /// Seed an entry input from the mapping's `uses` declarations.
    fn resolve_type(&self, input: &Input) -> Result<PropertyWithType> {
        let type_name = input.type_name.as_deref().ok_or_else(|| {
            anyhow!(MapError::Definition(format!(
                "input {} has no type",
                input.name
            )))
        })?;
        for structure in &self.map.structures {
            let matches = matches!(
                (structure.mode, input.mode),
                (ModelMode::Source, InputMode::Source) | (ModelMode::Target, InputMode::Target)
            );
            if !matches {
                continue;
            }
            let sd = self.ctx.fetch_structure(&structure.url).ok_or_else(|| {
                anyhow!(MapError::Definition(format!(
                    "Import {} cannot be resolved",
                    structure.url
                )))
            })?;
            if sd.id == type_name {
                return self.root_property(sd.type_name.clone(), sd);
            }
        }
        bail!(MapError::Definition(format!(
            "Unable to find structure definition for {type_name} in imports"
        )))
    }

    fn root_property(&self, path: String, sd: Rc<StructureDefinition>) -> Result<PropertyWithType> {
        let types = TypeDetails::singleton(&sd.url);
        let base = Property::root(sd.clone()).ok_or_else(|| {
            anyhow!(MapError::Definition(format!(
                "structure {} has no snapshot",
                sd.url
            )))
        })?;
        Ok(PropertyWithType {
            path,
            base,
            profile: None,
            types,
        })
    }

    /// Start a profile constraining the type at `prop`, which must be an entry point.
    fn create_profile(
        &mut self,
        mut prop: PropertyWithType,
        slice_name: &str,
        key: Option<String>,
    ) -> Result<PropertyWithType> {
        let type_name = prop.base.path().to_string();
        if type_name.contains('.') {
            bail!(MapError::Definition(format!(
                "Unable to process entry point {type_name}"
            )));
        }

        let suffix = match self.ids.get_mut(&type_name) {
            Some(n) => {
                *n += 1;
                format!("-{n}")
            }
            None => {
                self.ids.insert(type_name.clone(), 0);
                String::new()
            }
        };

        let map = self.map;
        let url = format!(
            "{}-{type_name}{suffix}",
            map.url.replace("StructureMap", "StructureDefinition")
        );
        let map_id = map
            .id
            .clone()
            .unwrap_or_else(|| map.url.rsplit('/').next().unwrap_or_default().to_string());

        let base = prop.base.structure();
        let mut profile = StructureDefinition::new(&url, &type_name, base.kind);
        profile.id = format!("{map_id}-{type_name}{suffix}");
        profile.name = format!("Profile for {type_name} for {slice_name}");
        profile.derivation = Some(Derivation::Constraint);
        profile.base_definition = Some(base.url.clone());
        profile.status = map.status;
        profile.experimental = map.experimental;
        profile.description = Some("Generated automatically from the mapping".to_string());
        profile.contact = map.contact.clone();
        profile.date = map.date.clone();
        profile.copyright = map.copyright.clone();
        profile.fhir_version = Some(FHIR_VERSION.to_string());
        profile
            .differential_mut()
            .push(ElementDefinition::new(&type_name));

        debug!(profile = %url, "created profile");
        if let Some(key) = key {
            self.target_profiles.insert(key, url);
        }
        prop.profile = Some(ProfileElement {
            profile: self.profiles.len(),
            path: type_name,
        });
        self.profiles.push(profile);
        self.slice_names.push(vec![None]);
        Ok(prop)
    }

    /// Whether `t` may be stored in an element declared as `code`.
    fn is_compatible(&self, t: &str, code: &str) -> bool {
        if t == code {
            return true;
        }
        t == "string"
            && self
                .ctx
                .fetch_structure(&type_url(code))
                .and_then(|sd| sd.base_definition.clone())
                .is_some_and(|b| b == type_url("string"))
    }

    /// Type code to record for `t` at `pc`; `None` when the declared type already fits.
    fn check_type(&self, t: &str, pc: &Property, profiles: &[String]) -> Result<Option<String>> {
        let declared = &pc.definition().types;
        if let [only] = declared.as_slice() {
            let profiles_match = match profiles {
                [] => true,
                [p] => only.profile.as_deref() == Some(p.as_str()),
                _ => false,
            };
            if self.is_compatible(t, &only.code) && profiles_match {
                return Ok(None);
            }
        }
        if let Some(tr) = declared.iter().find(|tr| self.is_compatible(t, &tr.code)) {
            return Ok(Some(tr.code.clone()));
        }
        bail!(MapError::TypeIncompatibility {
            found: t.to_string(),
            path: pc.path().to_string(),
        })
    }

    fn update_profile(
        &mut self,
        var: Option<&PropertyWithType>,
        element: Option<&str>,
        types: TypeDetails,
        slice_name: &str,
        fixed: Option<FixedValue>,
        key: String,
    ) -> Result<PropertyWithType> {
        let (var, element) = match (var, element) {
            (Some(v), Some(e)) => (v, e),
            _ => {
                let primary = types.primary().unwrap_or_default().to_string();
                let sd = self.ctx.fetch_structure(&primary).ok_or_else(|| {
                    anyhow!(MapError::Definition(format!(
                        "unable to find structure definition for {primary}"
                    )))
                })?;
                let mut prop = self.root_property(sd.id.clone(), sd)?;
                prop.types = types;
                return self.create_profile(prop, slice_name, Some(key));
            }
        };

        let pc = var.base.child(self.ctx, element).ok_or_else(|| {
            anyhow!(MapError::Definition(format!(
                "Unable to find a definition for {}.{element}",
                var.base.path()
            )))
        })?;
        let owner = var.profile.clone().ok_or_else(|| {
            anyhow!(MapError::Definition(format!(
                "variable for {} has no profile",
                var.path
            )))
        })?;

        let mut ed = ElementDefinition::new(&format!("{}.{}", owner.path, pc.name()));
        ed.fixed = fixed;
        for pt in &types.types {
            if let Some(b) = pt.bindings.first() {
                ed.binding = Some(b.clone());
            }
            if !pt.is_core() {
                continue;
            }
            if let Some(code) = self.check_type(pt.name(), &pc, &pt.profiles)? {
                if pt.profiles.is_empty() {
                    ed.types.push(TypeRef {
                        code,
                        profile: None,
                        target_profile: None,
                    });
                } else {
                    for p in &pt.profiles {
                        ed.types.push(TypeRef {
                            code: code.clone(),
                            profile: Some(p.clone()),
                            target_profile: None,
                        });
                    }
                }
            }
        }

        let path = ed.path.clone();
        let profile = self.profiles.get_mut(owner.profile).ok_or_else(|| {
            anyhow!("internal error: profile {} not found", owner.profile)
        })?;
        profile.differential_mut().push(ed);
        if let Some(names) = self.slice_names.get_mut(owner.profile) {
            names.push(Some(slice_name.to_string()));
        }

        Ok(PropertyWithType {
            path: format!("{}.{element}", var.path),
            base: pc,
            profile: Some(ProfileElement {
                profile: owner.profile,
                path,
            }),
            types,
        })
    }

    fn param_types(
        vars: &Variables<PropertyWithType>,
        parameter: &Parameter,
    ) -> Result<TypeDetails> {
        match parameter {
            Parameter::Id(name) => vars
                .lookup(name)
                .map(|p| p.types.clone())
                .ok_or_else(|| {
                    anyhow!(MapError::UnknownVariable {
                        name: name.clone(),
                        summary: vars.summary(),
                    })
                }),
            literal => Ok(TypeDetails::singleton(
                literal.literal_type().unwrap_or("string"),
            )),
        }
    }

    fn literal_param(target: &Target, n: usize) -> Result<String> {
        target
            .parameters
            .get(n)
            .and_then(Parameter::literal_value)
            .ok_or_else(|| {
                anyhow!(MapError::Definition(format!(
                    "parameter {} of {} must be a literal",
                    n + 1,
                    target.transform.map_or("target", |k| k.code())
                )))
            })
    }

    fn analyse_transform(
        &mut self,
        target: &Target,
        kind: TransformKind,
        vars: &Variables<PropertyWithType>,
    ) -> Result<TypeDetails> {
        let single = TypeDetails::singleton;
        match kind {
            TransformKind::Create => Ok(single(&Self::literal_param(target, 0)?)),
            TransformKind::Copy => match target.parameters.first() {
                Some(p) => Self::param_types(vars, p),
                None => bail!(MapError::Definition("copy needs a parameter".to_string())),
            },
            TransformKind::Evaluate => {
                let text = match target.parameters.last() {
                    Some(Parameter::String(s)) => s.clone(),
                    _ => bail!(MapError::Definition(
                        "evaluate needs an expression".to_string()
                    )),
                };
                let expr = self.expression(&text)?;
                fhirpath::check(self.ctx, &TypeHost { vars }, None, &expr)
            }
            TransformKind::Truncate => Ok(single("string")),
            TransformKind::Translate => Ok(single("CodeableConcept")),
            TransformKind::Cc => {
                let mut pt = ProfiledType::new("CodeableConcept");
                if let Some(Parameter::Id(name)) = target.parameters.get(1) {
                    if let Some(b) = vars.lookup(name).and_then(|p| p.types.binding()) {
                        pt.add_binding(b.clone());
                    }
                }
                Ok(TypeDetails::of(CollectionStatus::Singleton, pt))
            }
            TransformKind::C => Ok(single("Coding")),
            TransformKind::Qty => Ok(single("Quantity")),
            TransformKind::Reference => {
                let name = match target.parameters.first() {
                    Some(Parameter::Id(name)) => name,
                    _ => bail!(MapError::Definition(
                        "reference needs a variable".to_string()
                    )),
                };
                let var = vars.get(InputMode::Target, name).ok_or_else(|| {
                    anyhow!(MapError::Definition(format!(
                        "Unable to resolve variable \"{name}\""
                    )))
                })?;
                let profile = var
                    .profile
                    .as_ref()
                    .and_then(|p| self.profiles.get(p.profile))
                    .map(|sd| sd.url.clone());
                let mut td = TypeDetails::new(CollectionStatus::Singleton);
                td.add_type("Reference", profile.as_deref());
                Ok(td)
            }
            TransformKind::Uuid => Ok(single("id")),
            TransformKind::Pointer => Ok(single("uri")),
            TransformKind::Escape
            | TransformKind::Cast
            | TransformKind::Append
            | TransformKind::DateOp
            | TransformKind::Id
            | TransformKind::Cp => bail!(MapError::UnsupportedTransform(kind.code().to_string())),
        }
    }

    /// `system#code(display)` for a CC or C target with literal parameters.
    fn describe_coding_target(&self, target: &Target) -> Result<Option<String>> {
        if !matches!(target.transform, Some(TransformKind::Cc | TransformKind::C)) {
            return Ok(None);
        }
        let (uri, code) = match target.parameters.as_slice() {
            [a, b, ..] if !a.is_id() && !b.is_id() => {
                (a.literal_value().unwrap_or_default(), b.literal_value().unwrap_or_default())
            }
            _ => return Ok(None),
        };
        if uri.is_empty() {
            bail!(MapError::Definition("Describe Transform, but the uri is blank".to_string()));
        }
        if code.is_empty() {
            bail!(MapError::Definition("Describe Transform, but the code is blank".to_string()));
        }
        let c = lookup_coding(self.ctx, &uri, &code)?;
        let mut text = format!(
            "{}#{}",
            describe_system(c.system.as_deref().unwrap_or_default()),
            c.code.as_deref().unwrap_or_default()
        );
        if let Some(d) = &c.display {
            let _ = write!(text, "({d})");
        }
        Ok(Some(text))
    }
}

/// Give repeated paths in a differential a slicing entry and name each repeat after
/// the rule that produced it.
fn clean_up_differential(profile: &mut StructureDefinition, slice_names: &[Option<String>]) {
    let elements = core::mem::take(profile.differential_mut());
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for e in &elements {
        *counts.entry(e.path.clone()).or_default() += 1;
    }

    let mut sliced = vec![];
    let mut out = Vec::with_capacity(elements.len());
    for (i, mut e) in elements.into_iter().enumerate() {
        if counts.get(&e.path).copied().unwrap_or_default() > 1 {
            if !sliced.contains(&e.path) {
                sliced.push(e.path.clone());
                let mut slicing = ElementDefinition::new(&e.path);
                slicing.slicing = Some(Slicing {
                    discriminator: vec![],
                    ordered: None,
                    rules: "open".to_string(),
                });
                out.push(slicing);
            }
            e.slice_name = slice_names.get(i).cloned().flatten();
        }
        out.push(e);
    }
    *profile.differential_mut() = out;
}

impl RuleWalker for AnalysisRun<'_> {
    type Value = PropertyWithType;

    fn enter_group(&mut self, group: &Group, vars: &Variables<PropertyWithType>) -> Result<()> {
        self.log(&format!("Analyse Group : {}", group.name));
        let inputs = |mode: InputMode| {
            group
                .inputs
                .iter()
                .filter(|i| i.mode == mode)
                .filter_map(|i| vars.get(mode, &i.name))
                .map(|p| format!("Input: {}", p.path))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.rows.push(SummaryRow {
            kind: RowKind::Group,
            source: inputs(InputMode::Source),
            target: inputs(InputMode::Target),
        });
        Ok(())
    }

    fn enter_rule(&mut self, rule: &Rule, _vars: &Variables<PropertyWithType>) -> Result<()> {
        self.log(&format!("Analyse rule : {}", rule.name));
        self.rows.push(SummaryRow {
            kind: RowKind::Rule,
            source: String::new(),
            target: String::new(),
        });
        self.writer = TargetWriter::default();
        Ok(())
    }

    fn resolve_source(
        &mut self,
        _rule: &Rule,
        source: &Source,
        vars: &Variables<PropertyWithType>,
    ) -> Result<Vec<Variables<PropertyWithType>>> {
        let prop = vars
            .get(InputMode::Source, &source.context)
            .cloned()
            .ok_or_else(|| {
                anyhow!(MapError::UnknownVariable {
                    name: source.context.clone(),
                    summary: vars.summary(),
                })
            })?;

        let mut branch = vars.clone();
        let (text, bound) = match &source.element {
            Some(element) => {
                let child = prop.base.child(self.ctx, element).ok_or_else(|| {
                    anyhow!(MapError::Definition(format!(
                        "Unknown element name {element}"
                    )))
                })?;
                let def = child.definition();
                let types = match child.choice_type(element) {
                    Some(code) => {
                        let mut pt = ProfiledType::new(&code);
                        if let Some(b) = &def.binding {
                            pt.add_binding(b.clone());
                        }
                        TypeDetails::of(CollectionStatus::Singleton, pt)
                    }
                    None => TypeDetails::from_element(def),
                };
                let path = format!("{}.{element}", prop.path);
                (
                    path.clone(),
                    PropertyWithType {
                        path,
                        base: child,
                        profile: None,
                        types,
                    },
                )
            }
            None => (prop.path.clone(), prop),
        };
        if let Some(v) = &source.variable {
            branch.add(InputMode::Source, v, bound);
        }
        if let Some(row) = self.rows.last_mut() {
            row.source = text;
        }
        Ok(vec![branch])
    }

    fn execute_target(
        &mut self,
        rule: &Rule,
        target: &Target,
        vars: &mut Variables<PropertyWithType>,
    ) -> Result<()> {
        let var = match &target.context {
            Some(context) => {
                let var = vars.get(InputMode::Target, context).cloned().ok_or_else(|| {
                    anyhow!(MapError::UnknownVariable {
                        name: context.clone(),
                        summary: vars.summary(),
                    })
                })?;
                if target.element.is_none() {
                    bail!(MapError::Unsupported(
                        "target context without element".to_string()
                    ));
                }
                Some(var)
            }
            None => None,
        };

        let types = match (target.transform, &var, &target.element) {
            (Some(kind), _, _) => self.analyse_transform(target, kind, vars)?,
            (None, Some(v), Some(element)) => {
                let child = v.base.child(self.ctx, element).ok_or_else(|| {
                    anyhow!(MapError::Definition(format!(
                        "Unable to find a definition for {}.{element}",
                        v.base.path()
                    )))
                })?;
                let code = child
                    .choice_type(element)
                    .or_else(|| child.type_code())
                    .unwrap_or_else(|| "BackboneElement".to_string());
                TypeDetails::singleton(&code)
            }
            _ => bail!(MapError::Unsupported(
                "target without context or transform".to_string()
            )),
        };

        let source_var = rule.sources.first().and_then(|s| s.variable.as_deref());
        if target.transform == Some(TransformKind::Create) {
            let name = Self::literal_param(target, 0)?;
            if self.ctx.is_resource(&name) {
                self.writer
                    .new_resource(target.variable.as_deref().unwrap_or_default(), &name);
            }
        } else {
            let maps_source = target
                .parameters
                .iter()
                .any(|p| matches!((p, source_var), (Parameter::Id(id), Some(sv)) if id == sv));
            match (&var, &target.context, &target.element) {
                (Some(v), Some(context), Some(element)) if maps_source => {
                    let desc = format!(
                        "{}.{element}{}",
                        v.path,
                        transform_suffix(target.transform)
                    );
                    self.writer.value_assignment(context, desc);
                }
                (None, _, _) if maps_source => bail!(MapError::Unsupported(
                    "assignment with no context".to_string()
                )),
                (Some(v), Some(context), Some(element)) if is_significant(&v.path, element) => {
                    if let Some(td) = self.describe_coding_target(target)? {
                        let desc = format!("{}.{element} = {td}", v.path);
                        self.writer.key_assignment(context, desc);
                    }
                }
                _ => {}
            }
        }

        let prop = self.update_profile(
            var.as_ref(),
            target.element.as_deref(),
            types,
            &rule.name,
            fixed_value(target),
            profile_key(rule, target),
        )?;
        if let Some(v) = &target.variable {
            vars.add(InputMode::Target, v, prop);
        }
        Ok(())
    }

    fn targets_done(&mut self, _rule: &Rule, _vars: &Variables<PropertyWithType>) -> Result<()> {
        let text = core::mem::take(&mut self.writer).commit();
        if let Some(row) = self.rows.last_mut() {
            row.target = text;
        }
        Ok(())
    }

    fn dispatch_dependent(
        &mut self,
        _rule: &Rule,
        dependent: &Dependent,
        _vars: &Variables<PropertyWithType>,
    ) -> Result<()> {
        debug!(group = %dependent.name, "dependent not analysed");
        Ok(())
    }
}
