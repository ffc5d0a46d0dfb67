// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Canonical text form of a [`Mapping`] and its parts.

use crate::ast::*;
use crate::lexer::escape;

use core::fmt::Write;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Formatting switches. None of them change meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Write all targets of a rule after `make` on one line instead of one per line.
    #[serde(default)]
    pub multiple_targets_one_line: bool,
}

pub fn render(map: &Mapping) -> String {
    Renderer::default().mapping(map)
}

pub fn render_with(map: &Mapping, options: &RenderOptions) -> String {
    Renderer::new(options.clone()).mapping(map)
}

pub fn render_group(group: &Group) -> String {
    let mut out = String::new();
    Renderer::default().group(&mut out, group);
    out
}

pub fn render_rule(rule: &Rule) -> String {
    let mut out = String::new();
    Renderer::default().rule(&mut out, rule, 0);
    out
}

pub fn render_source(source: &Source) -> String {
    let mut out = String::new();
    Renderer::default().source(&mut out, source);
    out
}

pub fn render_target(target: &Target) -> String {
    let mut out = String::new();
    Renderer::default().target(&mut out, target);
    out
}

pub fn render_parameter(parameter: &Parameter) -> String {
    let mut out = String::new();
    Renderer::parameter(&mut out, parameter);
    out
}

pub fn render_dependent(dependent: &Dependent) -> String {
    let mut out = String::new();
    Renderer::dependent(&mut out, dependent);
    out
}

pub fn render_concept_map(map: &ConceptMap) -> String {
    let mut out = String::new();
    Renderer::default().concept_map(&mut out, map);
    out
}

fn doc(out: &mut String, documentation: &Option<String>) {
    if let Some(d) = documentation {
        if !d.is_empty() {
            out.push_str(" // ");
            out.push_str(&d.replace("\r\n", " ").replace(['\r', '\n'], " "));
        }
    }
}

fn indent(out: &mut String, n: usize) {
    out.extend(core::iter::repeat(' ').take(n));
}

fn quoted(out: &mut String, s: &str) {
    out.push('"');
    out.push_str(&escape(s, '"'));
    out.push('"');
}

fn is_plain_code(code: &str) -> bool {
    let mut chars = code.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        Some(c) if c.is_ascii_digit() => match code.split_once('.') {
            Some((int, frac)) => {
                int.chars().all(|c| c.is_ascii_digit())
                    && !frac.is_empty()
                    && frac.chars().all(|c| c.is_ascii_digit())
            }
            None => code.chars().all(|c| c.is_ascii_digit()),
        },
        _ => false,
    }
}

fn code(out: &mut String, code: &str) {
    if is_plain_code(code) {
        out.push_str(code);
    } else {
        quoted(out, code);
    }
}

// Prefix names for the systems used by a concept map: `s`, `s1`, ... and `t`, `t1`, ...
fn prefixes(map: &ConceptMap) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut sources = BTreeMap::new();
    let mut targets = BTreeMap::new();
    let name = |base: &str, n: usize| match n {
        0 => base.to_string(),
        _ => format!("{base}{n}"),
    };
    for g in &map.groups {
        if !sources.contains_key(&g.source) {
            let n = sources.len();
            sources.insert(g.source.clone(), name("s", n));
        }
        if let Some(t) = &g.target {
            if !targets.contains_key(t) {
                let n = targets.len();
                targets.insert(t.clone(), name("t", n));
            }
        }
    }
    (sources, targets)
}

/// Writes mapping text according to [`RenderOptions`].
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    options: RenderOptions,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn mapping(&self, map: &Mapping) -> String {
        let mut out = String::new();
        out.push_str("map ");
        quoted(&mut out, &map.url);
        out.push_str(" = ");
        quoted(&mut out, &map.name);
        out.push_str("\n\n");

        for cm in &map.concept_maps {
            self.concept_map(&mut out, cm);
            out.push('\n');
        }

        for s in &map.structures {
            out.push_str("uses ");
            quoted(&mut out, &s.url);
            let mode = match s.mode {
                ModelMode::Source => "source",
                ModelMode::Queried => "queried",
                ModelMode::Target => "target",
                ModelMode::Produced => "produced",
            };
            let _ = write!(out, " as {mode}");
            doc(&mut out, &s.documentation);
            out.push('\n');
        }
        if !map.structures.is_empty() {
            out.push('\n');
        }

        for i in &map.imports {
            out.push_str("imports ");
            quoted(&mut out, i);
            out.push('\n');
        }
        if !map.imports.is_empty() {
            out.push('\n');
        }

        for (i, g) in map.groups.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            self.group(&mut out, g);
        }
        out
    }

    pub fn concept_map(&self, out: &mut String, map: &ConceptMap) {
        out.push_str("conceptmap ");
        quoted(out, &format!("#{}", map.id));
        out.push_str(" {\n");
        let (sources, targets) = prefixes(map);
        for (url, p) in &sources {
            let _ = write!(out, "  prefix {p} = ");
            quoted(out, url);
            out.push('\n');
        }
        for (url, p) in &targets {
            let _ = write!(out, "  prefix {p} = ");
            quoted(out, url);
            out.push('\n');
        }
        out.push('\n');
        for g in &map.groups {
            let sp = sources.get(&g.source).map(String::as_str).unwrap_or("s");
            let tp = g.target.as_ref().and_then(|t| targets.get(t));
            for e in &g.elements {
                for t in &e.targets {
                    let _ = write!(out, "  {sp}:");
                    code(out, &e.code);
                    let _ = write!(out, " {}", t.equivalence.operator());
                    if let (Some(tp), Some(tc)) = (tp, &t.code) {
                        let _ = write!(out, " {tp}:");
                        code(out, tc);
                    }
                    doc(out, &t.comment);
                    out.push('\n');
                }
            }
        }
        out.push_str("}\n");
    }

    pub fn group(&self, out: &mut String, group: &Group) {
        let _ = write!(out, "group {}", group.name);
        if let Some(e) = &group.extends {
            let _ = write!(out, " extends {e}");
        }
        doc(out, &group.documentation);
        out.push('\n');
        for input in &group.inputs {
            let _ = write!(out, "  input {}", input.name);
            if let Some(t) = &input.type_name {
                let _ = write!(out, " : {t}");
            }
            let mode = match input.mode {
                InputMode::Source => "source",
                InputMode::Target => "target",
            };
            let _ = write!(out, " as {mode};");
            doc(out, &input.documentation);
            out.push('\n');
        }
        if !group.inputs.is_empty() {
            out.push('\n');
        }
        for rule in &group.rules {
            self.rule(out, rule, 2);
        }
        out.push_str("\nendgroup\n");
    }

    pub fn rule(&self, out: &mut String, rule: &Rule, depth: usize) {
        indent(out, depth);
        let _ = write!(out, "{}: for ", rule.name);
        for (i, s) in rule.sources.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.source(out, s);
        }

        if rule.targets.len() > 1 && !self.options.multiple_targets_one_line {
            out.push_str(" make");
            for (i, t) in rule.targets.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('\n');
                indent(out, depth + 4);
                self.target(out, t);
            }
        } else if !rule.targets.is_empty() {
            out.push_str(" make ");
            for (i, t) in rule.targets.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.target(out, t);
            }
        }

        if !rule.rules.is_empty() {
            out.push_str(" then {");
            doc(out, &rule.documentation);
            out.push('\n');
            for r in &rule.rules {
                self.rule(out, r, depth + 2);
            }
            indent(out, depth);
            out.push_str("}\n");
        } else {
            if !rule.dependents.is_empty() {
                out.push_str(" then ");
                for (i, d) in rule.dependents.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    Self::dependent(out, d);
                }
            }
            doc(out, &rule.documentation);
            out.push('\n');
        }
    }

    pub fn source(&self, out: &mut String, source: &Source) {
        if !source.required {
            out.push_str("optional ");
        }
        out.push_str(&source.context);
        if let Some(e) = &source.element {
            let _ = write!(out, ".{e}");
        }
        if let Some(t) = &source.type_name {
            let _ = write!(out, " : {t}");
            if let (Some(min), Some(max)) = (&source.min, &source.max) {
                let _ = write!(out, " {min}..{max}");
            }
        }
        if let Some(m) = &source.list_mode {
            let _ = write!(out, " {}", m.code());
        }
        if let Some(v) = &source.variable {
            let _ = write!(out, " as {v}");
        }
        if let Some(c) = &source.condition {
            let _ = write!(out, " where {c}");
        }
        if let Some(c) = &source.check {
            let _ = write!(out, " check {c}");
        }
    }

    pub fn target(&self, out: &mut String, target: &Target) {
        if let Some(c) = &target.context {
            out.push_str(c);
            if let Some(e) = &target.element {
                let _ = write!(out, ".{e}");
            }
        }
        if let Some(kind) = target.transform {
            if target.context.is_some() {
                out.push_str(" = ");
            }
            match (kind, target.parameters.as_slice()) {
                (TransformKind::Copy, [p]) => Self::parameter(out, p),
                (TransformKind::Evaluate, [Parameter::String(expr)]) => {
                    let _ = write!(out, "({expr})");
                }
                (TransformKind::Evaluate, [focus, Parameter::String(expr)]) => {
                    out.push_str("evaluate(");
                    Self::parameter(out, focus);
                    let _ = write!(out, ", {expr})");
                }
                (kind, params) => {
                    let _ = write!(out, "{}(", kind.code());
                    for (i, p) in params.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        Self::parameter(out, p);
                    }
                    out.push(')');
                }
            }
        }
        if let Some(v) = &target.variable {
            let _ = write!(out, " as {v}");
        }
        for mode in &target.list_modes {
            let _ = write!(out, " {}", mode.code());
            if *mode == TargetListMode::Share {
                if let Some(id) = &target.list_rule_id {
                    let _ = write!(out, " {id}");
                }
            }
        }
    }

    pub fn parameter(out: &mut String, parameter: &Parameter) {
        match parameter {
            Parameter::Id(id) => out.push_str(id),
            Parameter::String(s) => quoted(out, s),
            Parameter::Integer(i) => {
                let _ = write!(out, "{i}");
            }
            Parameter::Decimal(d) => out.push_str(d),
            Parameter::Boolean(b) => {
                let _ = write!(out, "{b}");
            }
        }
    }

    pub fn dependent(out: &mut String, dependent: &Dependent) {
        let _ = write!(
            out,
            "{}({})",
            dependent.name,
            dependent.variables.join(", ")
        );
    }
}

/// Escape text for inclusion in XHTML content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
