// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::ast::{BinaryOp, Expr, Literal};
use super::eval::HostServices;
use crate::context::WorkerContext;
use crate::error::MapError;
use crate::schema::Property;
use crate::typing::{CollectionStatus, TypeDetails};

use anyhow::{bail, Result};

/// Infer the result type of `expr` when evaluated against a focus of type `focus`.
pub fn check(
    ctx: &dyn WorkerContext,
    host: &dyn HostServices,
    focus: Option<&TypeDetails>,
    expr: &Expr,
) -> Result<TypeDetails> {
    let focus = focus
        .cloned()
        .unwrap_or_else(|| TypeDetails::new(CollectionStatus::Singleton));
    Checker { ctx, host }.check(expr, &focus)
}

struct Checker<'a> {
    ctx: &'a dyn WorkerContext,
    host: &'a dyn HostServices,
}

impl Checker<'_> {
    fn check(&self, expr: &Expr, focus: &TypeDetails) -> Result<TypeDetails> {
        match expr {
            Expr::Literal(Literal::String(_)) => Ok(TypeDetails::singleton("string")),
            Expr::Literal(Literal::Number(n)) if n.contains('.') => {
                Ok(TypeDetails::singleton("decimal"))
            }
            Expr::Literal(Literal::Number(_)) => Ok(TypeDetails::singleton("integer")),
            Expr::Literal(Literal::Boolean(_)) => Ok(TypeDetails::singleton("boolean")),
            Expr::Variable(name) => match self.host.resolve_variable_type(name) {
                Some(t) => Ok(t),
                None => bail!(MapError::Evaluation(format!("unknown variable %{name}"))),
            },
            Expr::This => Ok(focus.clone()),
            Expr::Identifier(name) => {
                if let Some(t) = self.host.resolve_variable_type(name) {
                    return Ok(t);
                }
                if focus.has_type(name) {
                    let mut td = TypeDetails::new(focus.collection);
                    td.add_type(name, None);
                    return Ok(td);
                }
                self.child_types(focus, name)
            }
            Expr::Member { target, name } => {
                let t = self.check(target, focus)?;
                self.child_types(&t, name)
            }
            Expr::Index { target, index } => {
                self.check(index, focus)?;
                let mut t = self.check(target, focus)?;
                t.collection = CollectionStatus::Singleton;
                Ok(t)
            }
            Expr::Group(inner) => self.check(inner, focus),
            Expr::Function { target, name, args } => {
                let input = match target {
                    Some(t) => self.check(t, focus)?,
                    None => focus.clone(),
                };
                self.function(name, args, input)
            }
            Expr::Binary { op, left, right } => {
                let l = self.check(left, focus)?;
                let r = self.check(right, focus)?;
                Ok(match op {
                    op if op.is_boolean() => TypeDetails::singleton("boolean"),
                    BinaryOp::Concatenate => TypeDetails::singleton("string"),
                    BinaryOp::Union => {
                        let mut t = l;
                        t.union(&r);
                        if t.collection == CollectionStatus::Singleton {
                            t.collection = CollectionStatus::Unordered;
                        }
                        t
                    }
                    _ => l,
                })
            }
        }
    }

    fn function(&self, name: &str, args: &[Expr], input: TypeDetails) -> Result<TypeDetails> {
        match name {
            "exists" | "empty" | "not" | "hasValue" => {
                for a in args {
                    self.check(a, &input)?;
                }
                Ok(TypeDetails::singleton("boolean"))
            }
            "count" => Ok(TypeDetails::singleton("integer")),
            "first" | "last" | "single" => {
                let mut t = input;
                t.collection = CollectionStatus::Singleton;
                Ok(t)
            }
            "where" => {
                for a in args {
                    self.check(a, &input)?;
                }
                Ok(input)
            }
            "select" => match args {
                [a] => {
                    let mut t = self.check(a, &input)?;
                    if input.collection != CollectionStatus::Singleton {
                        t.collection = input.collection;
                    }
                    Ok(t)
                }
                _ => bail!(MapError::Evaluation(
                    "function select() expects 1 argument".to_string()
                )),
            },
            _ => bail!(MapError::Evaluation(format!("unsupported function {name}()"))),
        }
    }

    fn child_types(&self, focus: &TypeDetails, name: &str) -> Result<TypeDetails> {
        let mut result = TypeDetails::new(focus.collection);
        for pt in &focus.types {
            let key = pt.profiles.first().unwrap_or(&pt.uri);
            let root = self
                .ctx
                .fetch_structure(key)
                .or_else(|| self.ctx.fetch_structure(&pt.uri))
                .and_then(Property::root);
            let Some(child) = root.and_then(|r| r.child(self.ctx, name)) else {
                continue;
            };
            match child.choice_type(name) {
                Some(code) => result.add_type(&code, None),
                None => {
                    let t = TypeDetails::from_element(child.definition());
                    if t.collection != CollectionStatus::Singleton {
                        result.collection = t.collection;
                    }
                    result.union(&t);
                }
            }
        }
        if result.is_empty() {
            bail!(MapError::Evaluation(format!(
                "unknown element `{name}` on {}",
                focus.describe()
            )));
        }
        Ok(result)
    }
}
