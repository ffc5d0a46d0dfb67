// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traversal of groups and rules shared by the interpreter and the analyser.

use crate::ast::{Dependent, Group, Rule, Source, Target};
use crate::error::MapError;
use crate::render::{render_dependent, render_source, render_target};
use crate::variables::Variables;

use anyhow::{bail, Context, Result};
use tracing::{debug, trace};

/// One pass over a mapping. `Value` is what variables are bound to: live nodes when
/// transforming, typed properties when analysing.
pub trait RuleWalker {
    type Value: Clone;

    fn enter_group(&mut self, group: &Group, vars: &Variables<Self::Value>) -> Result<()>;

    fn enter_rule(&mut self, rule: &Rule, vars: &Variables<Self::Value>) -> Result<()>;

    /// One set of variables per branch the rule runs for. An empty list skips the rule.
    fn resolve_source(
        &mut self,
        rule: &Rule,
        source: &Source,
        vars: &Variables<Self::Value>,
    ) -> Result<Vec<Variables<Self::Value>>>;

    fn execute_target(
        &mut self,
        rule: &Rule,
        target: &Target,
        vars: &mut Variables<Self::Value>,
    ) -> Result<()>;

    /// Called for each branch once all targets have run.
    fn targets_done(&mut self, _rule: &Rule, _vars: &Variables<Self::Value>) -> Result<()> {
        Ok(())
    }

    fn dispatch_dependent(
        &mut self,
        rule: &Rule,
        dependent: &Dependent,
        vars: &Variables<Self::Value>,
    ) -> Result<()>;
}

/// Key under which the profile inferred for a target is recorded.
pub fn profile_key(rule: &Rule, target: &Target) -> String {
    format!("{}|{}", rule.name, render_target(target))
}

pub fn walk_group<W: RuleWalker + ?Sized>(
    walker: &mut W,
    group: &Group,
    vars: &Variables<W::Value>,
) -> Result<()> {
    if group.extends.is_some() {
        bail!(MapError::Unsupported(format!(
            "group extension (group `{}`)",
            group.name
        )));
    }
    debug!(group = %group.name, "entering group");
    walker.enter_group(group, vars)?;
    for rule in &group.rules {
        walk_rule(walker, rule, vars)?;
    }
    Ok(())
}

pub fn walk_rule<W: RuleWalker + ?Sized>(
    walker: &mut W,
    rule: &Rule,
    vars: &Variables<W::Value>,
) -> Result<()> {
    debug!(rule = %rule.name, "entering rule");
    walker.enter_rule(rule, vars)?;
    let source = match rule.sources.as_slice() {
        [source] => source,
        _ => bail!(MapError::Unsupported(format!(
            "multiple sources (rule `{}`)",
            rule.name
        ))),
    };

    let branches = walker
        .resolve_source(rule, source, vars)
        .with_context(|| format!("rule `{}`: source `{}`", rule.name, render_source(source)))?;
    trace!(rule = %rule.name, branches = branches.len(), "source resolved");

    for mut branch in branches {
        for target in &rule.targets {
            walker
                .execute_target(rule, target, &mut branch)
                .with_context(|| {
                    format!("rule `{}`: target `{}`", rule.name, render_target(target))
                })?;
        }
        walker.targets_done(rule, &branch)?;

        if !rule.rules.is_empty() {
            for child in &rule.rules {
                walk_rule(walker, child, &branch)?;
            }
        } else {
            for dependent in &rule.dependents {
                walker
                    .dispatch_dependent(rule, dependent, &branch)
                    .with_context(|| {
                        format!(
                            "rule `{}`: dependent `{}`",
                            rule.name,
                            render_dependent(dependent)
                        )
                    })?;
            }
        }
    }
    Ok(())
}
