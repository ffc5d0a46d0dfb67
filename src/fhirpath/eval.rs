// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::ast::{BinaryOp, Expr, Literal};
use crate::element::Element;
use crate::error::MapError;
use crate::model::BaseRef;
use crate::typing::TypeDetails;
use crate::Rc;

use core::cmp::Ordering;

use anyhow::{anyhow, bail, Result};

/// Resolves `%name` and bare variable names during evaluation and type checking.
pub trait HostServices {
    fn resolve_variable(&self, name: &str) -> Option<BaseRef>;

    fn resolve_variable_type(&self, _name: &str) -> Option<TypeDetails> {
        None
    }
}

/// Host without variables.
#[derive(Debug, Default)]
pub struct NoVariables;

impl HostServices for NoVariables {
    fn resolve_variable(&self, _name: &str) -> Option<BaseRef> {
        None
    }
}

/// Evaluate `expr` with `focus` as the input collection.
pub fn evaluate(host: &dyn HostServices, focus: Option<&BaseRef>, expr: &Expr) -> Result<Vec<BaseRef>> {
    let focus: Vec<BaseRef> = focus.into_iter().cloned().collect();
    Evaluator { host }.eval(expr, &focus)
}

/// Evaluate `expr` and convert the result to a boolean. An empty result is false.
pub fn evaluate_bool(host: &dyn HostServices, focus: Option<&BaseRef>, expr: &Expr) -> Result<bool> {
    Ok(to_bool(&evaluate(host, focus, expr)?).unwrap_or(false))
}

fn boolean(b: bool) -> Vec<BaseRef> {
    vec![Element::primitive("boolean", &b.to_string()).into_ref()]
}

fn to_bool(items: &[BaseRef]) -> Option<bool> {
    match items {
        [] => None,
        [single] if single.type_name() == "boolean" => {
            Some(single.primitive_value().as_deref() == Some("true"))
        }
        _ => Some(true),
    }
}

fn number(v: &BaseRef) -> Option<f64> {
    v.primitive_value()?.parse::<f64>().ok()
}

fn compare(a: &BaseRef, b: &BaseRef) -> Option<Ordering> {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a.primitive_value(), b.primitive_value()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

fn equal(a: &BaseRef, b: &BaseRef) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (a.is_primitive(), b.is_primitive()) {
        (true, true) => compare(a, b) == Some(Ordering::Equal),
        (false, false) => a.to_json() == b.to_json(),
        _ => false,
    }
}

fn equivalent(a: &BaseRef, b: &BaseRef) -> bool {
    match (a.primitive_value(), b.primitive_value()) {
        (Some(x), Some(y)) => {
            x.trim().eq_ignore_ascii_case(y.trim()) || compare(a, b) == Some(Ordering::Equal)
        }
        _ => equal(a, b),
    }
}

struct Evaluator<'a> {
    host: &'a dyn HostServices,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr, focus: &[BaseRef]) -> Result<Vec<BaseRef>> {
        match expr {
            Expr::Literal(Literal::String(s)) => Ok(vec![Element::primitive("string", s).into_ref()]),
            Expr::Literal(Literal::Number(n)) => {
                let t = if n.contains('.') { "decimal" } else { "integer" };
                Ok(vec![Element::primitive(t, n).into_ref()])
            }
            Expr::Literal(Literal::Boolean(b)) => Ok(boolean(*b)),
            Expr::Variable(name) => match self.host.resolve_variable(name) {
                Some(v) => Ok(vec![v]),
                None => bail!(MapError::Evaluation(format!("unknown variable %{name}"))),
            },
            Expr::This => Ok(focus.to_vec()),
            Expr::Identifier(name) => {
                if let Some(v) = self.host.resolve_variable(name) {
                    return Ok(vec![v]);
                }
                let mut result = vec![];
                for item in focus {
                    if item.type_name() == *name && !item.is_primitive() {
                        result.push(item.clone());
                    } else {
                        result.extend(item.children_by_name(name));
                    }
                }
                Ok(result)
            }
            Expr::Member { target, name } => {
                let items = self.eval(target, focus)?;
                Ok(items
                    .iter()
                    .flat_map(|i| i.children_by_name(name))
                    .collect())
            }
            Expr::Index { target, index } => {
                let items = self.eval(target, focus)?;
                let idx = self.eval(index, focus)?;
                let idx = match idx.first().and_then(number) {
                    Some(i) if i >= 0.0 => i as usize,
                    _ => bail!(MapError::Evaluation(format!(
                        "index `{index}` is not a non-negative integer"
                    ))),
                };
                Ok(items.get(idx).cloned().into_iter().collect())
            }
            Expr::Group(inner) => self.eval(inner, focus),
            Expr::Function { target, name, args } => {
                let input = match target {
                    Some(t) => self.eval(t, focus)?,
                    None => focus.to_vec(),
                };
                self.function(name, args, input, focus)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, focus)?;
                let r = self.eval(right, focus)?;
                self.binary(*op, l, r)
            }
        }
    }

    fn filter(&self, criteria: &Expr, input: &[BaseRef]) -> Result<Vec<BaseRef>> {
        let mut result = vec![];
        for item in input {
            let v = self.eval(criteria, core::slice::from_ref(item))?;
            if to_bool(&v) == Some(true) {
                result.push(item.clone());
            }
        }
        Ok(result)
    }

    fn function(
        &self,
        name: &str,
        args: &[Expr],
        input: Vec<BaseRef>,
        _focus: &[BaseRef],
    ) -> Result<Vec<BaseRef>> {
        let arity = |n: usize| -> Result<()> {
            if args.len() != n {
                bail!(MapError::Evaluation(format!(
                    "function {name}() expects {n} arguments, found {}",
                    args.len()
                )));
            }
            Ok(())
        };
        match name {
            "exists" => match args {
                [] => Ok(boolean(!input.is_empty())),
                [criteria] => Ok(boolean(!self.filter(criteria, &input)?.is_empty())),
                _ => Err(anyhow!(MapError::Evaluation(
                    "function exists() takes at most one argument".to_string()
                ))),
            },
            "empty" => {
                arity(0)?;
                Ok(boolean(input.is_empty()))
            }
            "not" => {
                arity(0)?;
                Ok(match to_bool(&input) {
                    Some(b) => boolean(!b),
                    None => vec![],
                })
            }
            "count" => {
                arity(0)?;
                Ok(vec![
                    Element::primitive("integer", &input.len().to_string()).into_ref()
                ])
            }
            "first" => {
                arity(0)?;
                Ok(input.into_iter().take(1).collect())
            }
            "last" => {
                arity(0)?;
                Ok(input.last().cloned().into_iter().collect())
            }
            "single" => {
                arity(0)?;
                if input.len() > 1 {
                    bail!(MapError::Evaluation(format!(
                        "single() applied to a collection of {} items",
                        input.len()
                    )));
                }
                Ok(input)
            }
            "hasValue" => {
                arity(0)?;
                Ok(boolean(
                    input.len() == 1 && input[0].primitive_value().is_some(),
                ))
            }
            "where" => {
                arity(1)?;
                self.filter(&args[0], &input)
            }
            "select" => {
                arity(1)?;
                let mut result = vec![];
                for item in &input {
                    result.extend(self.eval(&args[0], core::slice::from_ref(item))?);
                }
                Ok(result)
            }
            _ => bail!(MapError::Evaluation(format!("unsupported function {name}()"))),
        }
    }

    fn binary(&self, op: BinaryOp, l: Vec<BaseRef>, r: Vec<BaseRef>) -> Result<Vec<BaseRef>> {
        match op {
            BinaryOp::And => Ok(match (to_bool(&l), to_bool(&r)) {
                (Some(false), _) | (_, Some(false)) => boolean(false),
                (Some(true), Some(true)) => boolean(true),
                _ => vec![],
            }),
            BinaryOp::Or => Ok(match (to_bool(&l), to_bool(&r)) {
                (Some(true), _) | (_, Some(true)) => boolean(true),
                (Some(false), Some(false)) => boolean(false),
                _ => vec![],
            }),
            BinaryOp::Xor => Ok(match (to_bool(&l), to_bool(&r)) {
                (Some(a), Some(b)) => boolean(a != b),
                _ => vec![],
            }),
            BinaryOp::Equals | BinaryOp::NotEquals => {
                if l.is_empty() || r.is_empty() {
                    return Ok(vec![]);
                }
                let eq = l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| equal(a, b));
                Ok(boolean(if op == BinaryOp::Equals { eq } else { !eq }))
            }
            BinaryOp::Equivalent => Ok(boolean(
                l.len() == r.len() && l.iter().zip(r.iter()).all(|(a, b)| equivalent(a, b)),
            )),
            BinaryOp::LessThan
            | BinaryOp::LessOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterOrEqual => {
                let (a, b) = match (l.as_slice(), r.as_slice()) {
                    ([a], [b]) => (a, b),
                    ([], _) | (_, []) => return Ok(vec![]),
                    _ => bail!(MapError::Evaluation(format!(
                        "operator {} requires single values",
                        op.symbol()
                    ))),
                };
                let ord = match compare(a, b) {
                    Some(o) => o,
                    None => bail!(MapError::Evaluation(format!(
                        "cannot compare {} with {}",
                        a.type_name(),
                        b.type_name()
                    ))),
                };
                Ok(boolean(match op {
                    BinaryOp::LessThan => ord == Ordering::Less,
                    BinaryOp::LessOrEqual => ord != Ordering::Greater,
                    BinaryOp::GreaterThan => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::Union => {
                let mut result: Vec<BaseRef> = vec![];
                for item in l.into_iter().chain(r) {
                    if !result.iter().any(|x| equal(x, &item)) {
                        result.push(item);
                    }
                }
                Ok(result)
            }
            BinaryOp::Concatenate => {
                let text = |v: &[BaseRef]| v.first().and_then(|x| x.primitive_value()).unwrap_or_default();
                Ok(vec![Element::primitive(
                    "string",
                    &format!("{}{}", text(&l), text(&r)),
                )
                .into_ref()])
            }
            BinaryOp::Plus | BinaryOp::Minus => {
                let (a, b) = match (l.as_slice(), r.as_slice()) {
                    ([a], [b]) => (a, b),
                    _ => return Ok(vec![]),
                };
                match (number(a), number(b), op) {
                    (Some(x), Some(y), _) => {
                        let v = if op == BinaryOp::Plus { x + y } else { x - y };
                        let integral = a.type_name() == "integer" && b.type_name() == "integer";
                        let (t, text) = if integral {
                            ("integer", format!("{}", v as i64))
                        } else {
                            ("decimal", v.to_string())
                        };
                        Ok(vec![Element::primitive(t, &text).into_ref()])
                    }
                    (_, _, BinaryOp::Plus) => {
                        let x = a.primitive_value().unwrap_or_default();
                        let y = b.primitive_value().unwrap_or_default();
                        Ok(vec![Element::primitive("string", &format!("{x}{y}")).into_ref()])
                    }
                    _ => bail!(MapError::Evaluation(format!(
                        "cannot subtract {} from {}",
                        b.type_name(),
                        a.type_name()
                    ))),
                }
            }
        }
    }
}
