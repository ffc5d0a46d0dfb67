// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::context::{TransformContext, TransformerServices, WorkerContext};
use crate::error::MapError;
use crate::fhirpath::{self, Expr, HostServices};
use crate::model::BaseRef;
use crate::render::render_target;
use crate::translator::{lookup_coding, Coding, Translator};
use crate::variables::{Describe, Variables};
use crate::walker::{profile_key, walk_group, RuleWalker};
use crate::Rc;

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, trace};

impl Describe for BaseRef {
    fn describe(&self) -> String {
        self.type_name()
    }
}

struct VariableHost<'v> {
    vars: &'v Variables<BaseRef>,
}

impl HostServices for VariableHost<'_> {
    fn resolve_variable(&self, name: &str) -> Option<BaseRef> {
        self.vars.lookup(name).cloned()
    }
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string().to_lowercase()
}

/// Name of the single input of `mode` in the entry group, or `default` when the
/// group declares none.
fn entry_input(group: &Group, mode: InputMode, default: &str) -> Result<String> {
    let mut names = group.inputs.iter().filter(|i| i.mode == mode);
    match (names.next(), names.next()) {
        (None, _) => Ok(default.to_string()),
        (Some(i), None) => Ok(i.name.clone()),
        (Some(_), Some(_)) => {
            let mode = match mode {
                InputMode::Source => "source",
                InputMode::Target => "target",
            };
            bail!(MapError::Unsupported(format!("multiple {mode} inputs")))
        }
    }
}

/// Executes a mapping against live data.
pub struct Interpreter<'a> {
    ctx: &'a dyn WorkerContext,
    services: Option<&'a dyn TransformerServices>,
    library: &'a BTreeMap<String, Rc<Mapping>>,
    context: &'a TransformContext,
    profiles: Option<&'a BTreeMap<String, String>>,
    map: Rc<Mapping>,
    expressions: BTreeMap<String, Rc<Expr>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        ctx: &'a dyn WorkerContext,
        services: Option<&'a dyn TransformerServices>,
        library: &'a BTreeMap<String, Rc<Mapping>>,
        context: &'a TransformContext,
        map: Rc<Mapping>,
    ) -> Self {
        Self {
            ctx,
            services,
            library,
            context,
            profiles: None,
            map,
            expressions: BTreeMap::new(),
        }
    }

    /// Profiles recorded by an analysis, attached to the instances created for
    /// matching targets.
    pub fn with_target_profiles(mut self, profiles: &'a BTreeMap<String, String>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Run the first group of the mapping with `source` and `target` bound to its inputs.
    pub fn run(&mut self, source: BaseRef, target: BaseRef) -> Result<()> {
        let map = self.map.clone();
        let group = map
            .groups
            .first()
            .ok_or_else(|| anyhow!(MapError::Definition(format!("mapping {} has no groups", map.url))))?;
        let mut vars = Variables::new();
        vars.add(InputMode::Source, &entry_input(group, InputMode::Source, "source")?, source);
        vars.add(InputMode::Target, &entry_input(group, InputMode::Target, "target")?, target);
        walk_group(self, group, &vars)
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

    fn unknown_variable(name: &str, vars: &Variables<BaseRef>) -> anyhow::Error {
        anyhow!(MapError::UnknownVariable {
            name: name.to_string(),
            summary: vars.summary(),
        })
    }

    fn param(&self, vars: &Variables<BaseRef>, parameter: &Parameter) -> Result<BaseRef> {
        let name = match parameter {
            Parameter::Id(name) => name,
            literal => {
                let (Some(type_name), Some(value)) = (literal.literal_type(), literal.literal_value())
                else {
                    bail!("internal error: literal without value");
                };
                return Ok(self.ctx.create_primitive(type_name, &value));
            }
        };
        if let Some(v) = vars.lookup(name) {
            return Ok(v.clone());
        }
        // `a.b.c`: bind `a`, then walk its children.
        let mut segments = name.split('.');
        let head = segments.next().unwrap_or_default();
        let mut node = vars
            .lookup(head)
            .cloned()
            .ok_or_else(|| Self::unknown_variable(name, vars))?;
        for segment in segments {
            node = node
                .children_by_name(segment)
                .into_iter()
                .next()
                .ok_or_else(|| Self::unknown_variable(name, vars))?;
        }
        Ok(node)
    }

    fn param_string(&self, vars: &Variables<BaseRef>, parameter: &Parameter) -> Result<String> {
        let node = self.param(vars, parameter)?;
        node.primitive_value().ok_or_else(|| {
            anyhow!(MapError::Evaluation(format!(
                "parameter `{}` has no primitive value",
                crate::render::render_parameter(parameter)
            )))
        })
    }

    fn nth<'p>(target: &'p Target, n: usize) -> Result<&'p Parameter> {
        target.parameters.get(n).ok_or_else(|| {
            anyhow!(MapError::Evaluation(format!(
                "transform `{}` needs at least {} parameters",
                render_target(target),
                n + 1
            )))
        })
    }

    fn run_transform(
        &mut self,
        rule: &Rule,
        target: &Target,
        kind: TransformKind,
        vars: &Variables<BaseRef>,
    ) -> Result<Option<BaseRef>> {
        trace!(transform = %kind, "running transform");
        match kind {
            TransformKind::Create => {
                let type_name = self.param_string(vars, Self::nth(target, 0)?)?;
                let res = self.ctx.create_instance(&type_name)?;
                if res.is_resource() {
                    let id = match target.parameters.get(1) {
                        Some(p) => self.param_string(vars, p)?,
                        None => new_uuid(),
                    };
                    res.set_id(&id)?;
                }
                let res = match self.services {
                    Some(services) => services.create_resource(self.context, res)?,
                    None => res,
                };
                if let Some(url) = self
                    .profiles
                    .and_then(|p| p.get(&profile_key(rule, target)))
                {
                    res.set_intended_profile(url);
                }
                Ok(Some(res))
            }
            TransformKind::Copy => Ok(Some(self.param(vars, Self::nth(target, 0)?)?)),
            TransformKind::Evaluate => {
                let text = match target.parameters.last() {
                    Some(Parameter::String(s)) => s.clone(),
                    Some(p) => self.param_string(vars, p)?,
                    None => bail!(MapError::Evaluation("evaluate needs an expression".to_string())),
                };
                let focus = match target.parameters.len() {
                    0 | 1 => None,
                    _ => Some(self.param(vars, Self::nth(target, 0)?)?),
                };
                let expr = self.expression(&text)?;
                let mut result =
                    fhirpath::evaluate(&VariableHost { vars }, focus.as_ref(), &expr)?;
                match result.len() {
                    0 => Ok(None),
                    1 => Ok(result.pop()),
                    n => bail!(MapError::Evaluation(format!(
                        "Evaluation of {text} returned {n} objects"
                    ))),
                }
            }
            TransformKind::Truncate => {
                let value = self.param_string(vars, Self::nth(target, 0)?)?;
                let length = self.param_string(vars, Self::nth(target, 1)?)?;
                let value = match length.parse::<usize>() {
                    Ok(l) => value.chars().take(l).collect(),
                    Err(_) => value,
                };
                Ok(Some(self.ctx.create_primitive("string", &value)))
            }
            TransformKind::Escape
            | TransformKind::Cast
            | TransformKind::Append
            | TransformKind::DateOp => {
                bail!(MapError::UnsupportedTransform(kind.code().to_string()))
            }
            TransformKind::Translate => {
                let source = self.param(vars, Self::nth(target, 0)?)?;
                let url = self.param_string(vars, Self::nth(target, 1)?)?;
                let field = match target.parameters.get(2) {
                    Some(p) => Some(self.param_string(vars, p)?),
                    None => None,
                };
                let map = self.map.clone();
                Translator {
                    ctx: self.ctx,
                    services: self.services,
                    context: self.context,
                    map: &map,
                }
                .translate(&source, &url, field.as_deref())
            }
            TransformKind::Reference => {
                let node = self.param(vars, Self::nth(target, 0)?)?;
                let id = self.resource_id(&node)?;
                let reference = self.ctx.create_instance("Reference")?;
                reference.set_property(
                    "reference",
                    self.ctx
                        .create_primitive("string", &format!("{}/{id}", node.type_name())),
                )?;
                Ok(Some(reference))
            }
            TransformKind::Uuid => Ok(Some(self.ctx.create_primitive("id", &new_uuid()))),
            TransformKind::Pointer => {
                let node = self.param(vars, Self::nth(target, 0)?)?;
                let id = self.resource_id(&node)?;
                Ok(Some(
                    self.ctx.create_primitive("uri", &format!("urn:uuid:{id}")),
                ))
            }
            TransformKind::Cc => {
                let coding = self.build_coding(vars, target)?;
                let cc = self.ctx.create_instance("CodeableConcept")?;
                cc.set_property("coding", coding.to_node(self.ctx)?)?;
                Ok(Some(cc))
            }
            TransformKind::C => Ok(Some(self.build_coding(vars, target)?.to_node(self.ctx)?)),
            TransformKind::Qty | TransformKind::Id | TransformKind::Cp => {
                bail!(MapError::UnknownTransform(kind.code().to_string()))
            }
        }
    }

    /// Id of a resource node, assigning a fresh one when it has none.
    fn resource_id(&self, node: &BaseRef) -> Result<String> {
        if !node.is_resource() {
            bail!(MapError::Evaluation(format!(
                "transform engine cannot point at an element of type {}",
                node.type_name()
            )));
        }
        match node.id() {
            Some(id) => Ok(id),
            None => {
                let id = new_uuid();
                node.set_id(&id)?;
                Ok(id)
            }
        }
    }

    fn build_coding(&self, vars: &Variables<BaseRef>, target: &Target) -> Result<Coding> {
        let uri = self.param_string(vars, Self::nth(target, 0)?)?;
        let code = self.param_string(vars, Self::nth(target, 1)?)?;
        lookup_coding(self.ctx, &uri, &code)
    }

    /// The mappings searched for a dependent group: the current one, then its imports.
    fn candidate_maps(&self) -> Result<Vec<Rc<Mapping>>> {
        let mut maps = vec![self.map.clone()];
        for url in &self.map.imports {
            let imported = self
                .library
                .get(url)
                .cloned()
                .or_else(|| self.ctx.fetch_mapping(url))
                .ok_or_else(|| {
                    anyhow!(MapError::Definition(format!("unable to find map {url}")))
                })?;
            maps.push(imported);
        }
        Ok(maps)
    }
}

impl RuleWalker for Interpreter<'_> {
    type Value = BaseRef;

    fn enter_group(&mut self, group: &Group, _vars: &Variables<BaseRef>) -> Result<()> {
        self.log(&format!("Group : {}", group.name));
        Ok(())
    }

    fn enter_rule(&mut self, rule: &Rule, _vars: &Variables<BaseRef>) -> Result<()> {
        self.log(&format!("rule : {}", rule.name));
        Ok(())
    }

    fn resolve_source(
        &mut self,
        _rule: &Rule,
        source: &Source,
        vars: &Variables<BaseRef>,
    ) -> Result<Vec<Variables<BaseRef>>> {
        let node = vars
            .get(InputMode::Source, &source.context)
            .cloned()
            .ok_or_else(|| Self::unknown_variable(&source.context, vars))?;

        if let Some(condition) = &source.condition {
            let expr = self.expression(condition)?;
            if !fhirpath::evaluate_bool(&VariableHost { vars }, Some(&node), &expr)? {
                trace!(condition = %condition, "condition false");
                return Ok(vec![]);
            }
        }
        if let Some(check) = &source.check {
            let expr = self.expression(check)?;
            if !fhirpath::evaluate_bool(&VariableHost { vars }, Some(&node), &expr)? {
                bail!(MapError::CheckFailed(check.clone()));
            }
        }

        let mut items = match &source.element {
            Some(element) => node.children_by_name(element),
            None => vec![node],
        };
        match source.list_mode {
            Some(SourceListMode::First) => items.truncate(1),
            Some(SourceListMode::Last) => {
                let last = items.pop();
                items = last.into_iter().collect();
            }
            Some(SourceListMode::OnlyOne) if items.len() > 1 => {
                bail!(MapError::Evaluation(format!(
                    "source `{}` has {} items but only one is allowed",
                    source.context,
                    items.len()
                )))
            }
            _ => {}
        }

        Ok(items
            .into_iter()
            .map(|item| {
                let mut branch = vars.clone();
                if let Some(v) = &source.variable {
                    branch.add(InputMode::Source, v, item);
                }
                branch
            })
            .collect())
    }

    fn execute_target(
        &mut self,
        rule: &Rule,
        target: &Target,
        vars: &mut Variables<BaseRef>,
    ) -> Result<()> {
        let dest = match &target.context {
            Some(context) => {
                let dest = vars
                    .get(InputMode::Target, context)
                    .cloned()
                    .ok_or_else(|| Self::unknown_variable(context, vars))?;
                if target.element.is_none() {
                    bail!(MapError::Unsupported(
                        "target context without element".to_string()
                    ));
                }
                Some(dest)
            }
            None => None,
        };

        let value = match target.transform {
            Some(kind) => {
                let value = self.run_transform(rule, target, kind, vars)?;
                if let (Some(v), Some(d), Some(e)) = (&value, &dest, &target.element) {
                    d.set_property(e, v.clone())?;
                }
                value
            }
            None => match (&dest, &target.element) {
                (Some(d), Some(e)) => Some(d.make_property(e)?),
                _ => None,
            },
        };

        if let (Some(name), Some(value)) = (&target.variable, value) {
            vars.add(InputMode::Target, name, value);
        }
        Ok(())
    }

    fn dispatch_dependent(
        &mut self,
        _rule: &Rule,
        dependent: &Dependent,
        vars: &Variables<BaseRef>,
    ) -> Result<()> {
        let mut found: Option<(Rc<Mapping>, Group)> = None;
        for map in self.candidate_maps()? {
            for group in map.groups.iter().filter(|g| g.name == dependent.name) {
                if found.is_some() {
                    bail!(MapError::AmbiguousGroup(dependent.name.clone()));
                }
                found = Some((map.clone(), group.clone()));
            }
        }
        let (map, group) =
            found.ok_or_else(|| anyhow!(MapError::UnknownGroup(dependent.name.clone())))?;

        if group.inputs.len() != dependent.variables.len() {
            bail!(MapError::ArityMismatch {
                group: group.name.clone(),
                expected: group.inputs.len(),
                found: dependent.variables.len(),
            });
        }

        let mut fresh = Variables::new();
        for (input, name) in group.inputs.iter().zip(&dependent.variables) {
            let value = vars.get(input.mode, name).cloned().ok_or_else(|| {
                let mode = match input.mode {
                    InputMode::Source => "source",
                    InputMode::Target => "target",
                };
                anyhow!(MapError::UnknownVariable {
                    name: name.clone(),
                    summary: format!(
                        "group `{}` {mode} variable has no value; {}",
                        group.name,
                        vars.summary()
                    ),
                })
            })?;
            fresh.add(input.mode, &input.name, value);
        }

        debug!(group = %group.name, map = %map.url, "dispatching dependent");
        let previous = core::mem::replace(&mut self.map, map);
        let result = walk_group(self, &group, &fresh);
        self.map = previous;
        result
    }
}
