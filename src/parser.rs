// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::fhirpath;
use crate::lexer::{self, TokenKind, Tokens};

use core::str::FromStr;
use std::collections::BTreeMap;

use anyhow::Result;

/// Recursive descent parser for mapping source text.
#[derive(Clone)]
pub struct Parser<'source> {
    tokens: Tokens<'source>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source lexer::Source) -> Result<Self> {
        Ok(Self {
            tokens: Tokens::new(source)?,
        })
    }

    fn take_doc(&mut self) -> Option<String> {
        self.tokens.take_comment()
    }

    pub fn parse(&mut self) -> Result<Mapping> {
        if self.tokens.done() {
            return Err(self.tokens.error("map input cannot be empty"));
        }
        self.tokens.expect("map", "at start of mapping")?;
        let mut mapping = Mapping {
            url: self.tokens.read_constant("url")?,
            ..Default::default()
        };
        self.tokens.expect("=", "after map url")?;
        mapping.name = self.tokens.read_constant("name")?;
        self.tokens.skip_comments();

        while self.tokens.has_token("conceptmap") {
            let map = self.parse_concept_map()?;
            mapping.concept_maps.push(map);
        }
        while self.tokens.has_token("uses") {
            let structure = self.parse_uses()?;
            mapping.structures.push(structure);
        }
        while self.tokens.has_token("imports") {
            let import = self.parse_imports()?;
            mapping.imports.push(import);
        }

        mapping.groups.push(self.parse_group()?);
        while !self.tokens.done() {
            mapping.groups.push(self.parse_group()?);
        }
        Ok(mapping)
    }

    fn parse_code(&mut self) -> Result<String> {
        match self.tokens.current().0 {
            TokenKind::Ident | TokenKind::Number | TokenKind::String => self.tokens.take_text(),
            _ => Err(self.tokens.error("expecting code")),
        }
    }

    fn parse_prefix_ref(&mut self, prefixes: &BTreeMap<String, String>) -> Result<String> {
        let tok = self.tokens.current().clone();
        let prefix = self.tokens.take_ident("as concept map prefix")?;
        match prefixes.get(&prefix) {
            Some(url) => Ok(url.clone()),
            None => Err(tok.1.error(&format!("unknown prefix `{prefix}`"))),
        }
    }

    fn parse_equivalence(&mut self) -> Result<Equivalence> {
        let tok = self.tokens.current().clone();
        let text = self.tokens.current_text().to_string();
        match Equivalence::from_operator(&text) {
            Some(eq) if tok.0 == TokenKind::Symbol => {
                self.tokens.take()?;
                Ok(eq)
            }
            _ => Err(tok.1.error(&format!("unknown equivalence token `{}`", tok.1.text()))),
        }
    }

    fn parse_concept_map(&mut self) -> Result<ConceptMap> {
        self.tokens.expect("conceptmap", "")?;
        let id_tok = self.tokens.current().clone();
        let id = self.tokens.read_constant("map id")?;
        let id = match id.strip_prefix('#') {
            Some(id) => id.to_string(),
            None => return Err(id_tok.1.error("concept map identifier must start with #")),
        };
        let mut map = ConceptMap {
            id,
            ..Default::default()
        };
        self.tokens.expect("{", "to start concept map")?;
        self.tokens.skip_comments();

        let mut prefixes = BTreeMap::new();
        while self.tokens.skip_token("prefix")? {
            let name = self.tokens.take_ident("as prefix name")?;
            self.tokens.expect("=", "after prefix name")?;
            let url = self.tokens.read_constant("prefix url")?;
            prefixes.insert(name, url);
        }

        while !self.tokens.has_token("}") {
            if self.tokens.done() {
                return Err(self.tokens.error("premature termination expecting `}` in concept map"));
            }
            let source = self.parse_prefix_ref(&prefixes)?;
            self.tokens.expect(":", "after source system")?;
            let code = self.parse_code()?;
            let equivalence = self.parse_equivalence()?;
            let (target, target_code) = if equivalence == Equivalence::Unmatched {
                (None, None)
            } else {
                let system = self.parse_prefix_ref(&prefixes)?;
                self.tokens.expect(":", "after target system")?;
                (Some(system), Some(self.parse_code()?))
            };
            let comment = self.take_doc();
            add_concept(
                &mut map,
                source,
                target,
                code,
                ConceptMapTarget {
                    code: target_code,
                    equivalence,
                    comment,
                },
            );
        }
        self.tokens.expect("}", "to close concept map")?;
        self.tokens.skip_comments();
        Ok(map)
    }

    fn parse_uses(&mut self) -> Result<Structure> {
        self.tokens.expect("uses", "")?;
        let url = self.tokens.read_constant("url")?;
        self.tokens.expect("as", "after structure url")?;
        let mode = match self.tokens.current_text() {
            "source" => ModelMode::Source,
            "queried" => ModelMode::Queried,
            "target" => ModelMode::Target,
            "produced" => ModelMode::Produced,
            _ => return Err(self.tokens.error("expecting one of source, queried, target, produced")),
        };
        self.tokens.take()?;
        self.tokens.skip_token(";")?;
        let documentation = self.take_doc();
        Ok(Structure {
            url,
            mode,
            documentation,
        })
    }

    fn parse_imports(&mut self) -> Result<String> {
        self.tokens.expect("imports", "")?;
        let url = self.tokens.read_constant("url")?;
        self.tokens.skip_token(";")?;
        self.tokens.skip_comments();
        Ok(url)
    }

    fn parse_group(&mut self) -> Result<Group> {
        self.tokens.expect("group", "")?;
        let mut group = Group {
            name: self.tokens.take_ident("as group name")?,
            ..Default::default()
        };
        if self.tokens.skip_token("extends")? {
            group.extends = Some(self.tokens.take_ident("after extends")?);
        }
        group.documentation = self.take_doc();

        while self.tokens.has_token("input") {
            group.inputs.push(self.parse_input()?);
        }
        while !self.tokens.has_token("endgroup") {
            if self.tokens.done() {
                return Err(self.tokens.error("premature termination expecting `endgroup`"));
            }
            group.rules.push(self.parse_rule()?);
        }
        self.tokens.take()?;
        self.tokens.skip_comments();
        Ok(group)
    }

    fn parse_input(&mut self) -> Result<Input> {
        self.tokens.expect("input", "")?;
        let name = self.tokens.take_ident("as input name")?;
        let type_name = if self.tokens.skip_token(":")? {
            Some(self.tokens.take_ident("as input type")?)
        } else {
            None
        };
        self.tokens.expect("as", "after input")?;
        let mode = match self.tokens.current_text() {
            "source" => InputMode::Source,
            "target" => InputMode::Target,
            _ => return Err(self.tokens.error("expecting `source` or `target`")),
        };
        self.tokens.take()?;
        self.tokens.skip_token(";")?;
        let documentation = self.take_doc();
        Ok(Input {
            name,
            type_name,
            mode,
            documentation,
        })
    }

    fn parse_rule(&mut self) -> Result<Rule> {
        let mut rule = Rule {
            name: self.tokens.take_dotted("as rule name")?,
            ..Default::default()
        };
        self.tokens.expect(":", "after rule name")?;
        self.tokens.expect("for", "after rule name")?;
        loop {
            rule.sources.push(self.parse_source()?);
            if !self.tokens.skip_token(",")? {
                break;
            }
        }
        if self.tokens.skip_token("make")? {
            loop {
                rule.targets.push(self.parse_target()?);
                if !self.tokens.skip_token(",")? {
                    break;
                }
            }
        }
        if self.tokens.skip_token("then")? {
            if self.tokens.skip_token("{")? {
                rule.documentation = self.take_doc();
                while !self.tokens.has_token("}") {
                    if self.tokens.done() {
                        return Err(self
                            .tokens
                            .error("premature termination expecting `}` in nested group"));
                    }
                    rule.rules.push(self.parse_rule()?);
                }
                self.tokens.expect("}", "to close nested rules")?;
                if rule.documentation.is_none() && self.tokens.has_comment() {
                    rule.documentation = self.take_doc();
                }
            } else {
                loop {
                    rule.dependents.push(self.parse_dependent()?);
                    if !self.tokens.skip_token(",")? {
                        break;
                    }
                }
                rule.documentation = self.take_doc();
            }
        } else {
            rule.documentation = self.take_doc();
        }
        self.tokens.skip_comments();
        Ok(rule)
    }

    fn parse_dependent(&mut self) -> Result<Dependent> {
        let name = self.tokens.take_ident("as group name")?;
        self.tokens.expect("(", "after dependent group name")?;
        let mut variables = vec![];
        loop {
            variables.push(self.tokens.take_ident("as dependent argument")?);
            if !self.tokens.skip_token(",")? {
                break;
            }
        }
        self.tokens.expect(")", "to close dependent arguments")?;
        Ok(Dependent { name, variables })
    }

    fn parse_element_name(&mut self) -> Result<String> {
        if self.tokens.skip_token("*")? {
            if self.tokens.skip_token("*")? {
                return Ok("**".to_string());
            }
            return Ok("*".to_string());
        }
        self.tokens.take_ident("as element name")
    }

    fn parse_source(&mut self) -> Result<Source> {
        let mut source = Source {
            required: !self.tokens.skip_token("optional")?,
            ..Default::default()
        };
        source.context = self.tokens.take_ident("as source context")?;
        if self.tokens.skip_token(".")? {
            source.element = Some(self.parse_element_name()?);
        }
        if self.tokens.skip_token(":")? {
            source.type_name = Some(self.tokens.take_dotted("as source type")?);
            if self.tokens.current().0 == TokenKind::Number {
                source.min = Some(self.tokens.take_text()?);
                self.tokens.expect("..", "in cardinality")?;
                let max = match self.tokens.current().0 {
                    TokenKind::Number => self.tokens.take_text()?,
                    _ => {
                        self.tokens.expect("*", "as maximum cardinality")?;
                        "*".to_string()
                    }
                };
                source.max = Some(max);
            }
        }
        if self.tokens.has_tokens(&["first", "last", "only_one"]) {
            source.list_mode = match self.tokens.take_text()?.as_str() {
                "first" => Some(SourceListMode::First),
                "last" => Some(SourceListMode::Last),
                _ => Some(SourceListMode::OnlyOne),
            };
        }
        if self.tokens.skip_token("as")? {
            source.variable = Some(self.tokens.take_ident("as source variable")?);
        }
        if self.tokens.skip_token("where")? {
            source.condition = Some(fhirpath::parse_tokens(&mut self.tokens)?.to_string());
        }
        if self.tokens.skip_token("check")? {
            source.check = Some(fhirpath::parse_tokens(&mut self.tokens)?.to_string());
        }
        Ok(source)
    }

    fn parse_literal(&mut self) -> Result<Parameter> {
        if self.tokens.is_string_constant() {
            return Ok(Parameter::String(self.tokens.read_constant("string")?));
        }
        let tok = self.tokens.current().clone();
        match (tok.0, tok.1.text()) {
            (TokenKind::Ident, "true") => {
                self.tokens.take()?;
                Ok(Parameter::Boolean(true))
            }
            (TokenKind::Ident, "false") => {
                self.tokens.take()?;
                Ok(Parameter::Boolean(false))
            }
            (TokenKind::Symbol, "-") => {
                self.tokens.take()?;
                if self.tokens.current().0 != TokenKind::Number {
                    return Err(self.tokens.error("expecting number after `-`"));
                }
                let n = self.tokens.take_text()?;
                number_parameter(&format!("-{n}"))
            }
            (TokenKind::Number, _) => number_parameter(&self.tokens.take_text()?),
            _ => Err(tok.1.error("expecting literal")),
        }
    }

    fn parse_parameter(&mut self) -> Result<Parameter> {
        if self.tokens.is_constant(true) {
            self.parse_literal()
        } else {
            Ok(Parameter::Id(self.tokens.take_dotted("as parameter")?))
        }
    }

    fn parse_transform(&mut self, target: &mut Target, name: &str) -> Result<()> {
        let tok = self.tokens.current().clone();
        let kind = TransformKind::from_str(name).map_err(|e| tok.1.error(&e.to_string()))?;
        target.transform = Some(kind);
        self.tokens.expect("(", "after transform name")?;
        if kind == TransformKind::Evaluate {
            target.parameters.push(self.parse_parameter()?);
            self.tokens.expect(",", "after evaluate focus")?;
            let expr = fhirpath::parse_tokens(&mut self.tokens)?;
            target.parameters.push(Parameter::String(expr.to_string()));
        } else {
            while !self.tokens.has_token(")") {
                target.parameters.push(self.parse_parameter()?);
                if !self.tokens.has_token(")") {
                    self.tokens.expect(",", "between transform parameters")?;
                }
            }
        }
        self.tokens.expect(")", "to close transform parameters")
    }

    // Right hand side of `=`, or a target without context.
    fn parse_value(&mut self, target: &mut Target) -> Result<()> {
        if self.tokens.current().0 == TokenKind::Symbol && self.tokens.has_token("(") {
            self.tokens.take()?;
            let expr = fhirpath::parse_tokens(&mut self.tokens)?;
            self.tokens.expect(")", "to close inline expression")?;
            target.transform = Some(TransformKind::Evaluate);
            target.parameters.push(Parameter::String(expr.to_string()));
        } else if self.tokens.is_constant(true) {
            target.transform = Some(TransformKind::Copy);
            target.parameters.push(self.parse_literal()?);
        } else {
            let name = self.tokens.take_ident("as target value")?;
            if self.tokens.has_token("(") {
                self.parse_transform(target, &name)?;
            } else {
                let mut id = name;
                while self.tokens.skip_token(".")? {
                    id.push('.');
                    id.push_str(&self.tokens.take_ident("after `.`")?);
                }
                target.transform = Some(TransformKind::Copy);
                target.parameters.push(Parameter::Id(id));
            }
        }
        Ok(())
    }

    fn parse_target(&mut self) -> Result<Target> {
        let mut target = Target::default();
        if self.tokens.has_token("(") || self.tokens.is_constant(true) {
            self.parse_value(&mut target)?;
        } else {
            let name = self.tokens.take_ident("as target")?;
            if self.tokens.skip_token(".")? {
                target.context = Some(name);
                target.element = Some(self.tokens.take_ident("as target element")?);
                if self.tokens.skip_token("=")? {
                    self.parse_value(&mut target)?;
                }
            } else if self.tokens.skip_token("=")? {
                target.context = Some(name);
                self.parse_value(&mut target)?;
            } else if self.tokens.has_token("(") {
                self.parse_transform(&mut target, &name)?;
            } else {
                target.transform = Some(TransformKind::Copy);
                target.parameters.push(Parameter::Id(name));
            }
        }

        if self.tokens.skip_token("as")? {
            target.variable = Some(self.tokens.take_ident("as target variable")?);
        }
        while self.tokens.has_tokens(&["first", "last", "only_one", "share"]) {
            match self.tokens.take_text()?.as_str() {
                "first" => target.list_modes.push(TargetListMode::First),
                "share" => {
                    target.list_modes.push(TargetListMode::Share);
                    target.list_rule_id = Some(self.tokens.take_ident("after share")?);
                }
                _ => target.list_modes.push(TargetListMode::Last),
            }
        }
        Ok(target)
    }
}

fn number_parameter(text: &str) -> Result<Parameter> {
    Ok(match text.parse::<i64>() {
        Ok(i) => Parameter::Integer(i),
        Err(_) => Parameter::Decimal(text.to_string()),
    })
}

// Entries sharing a source code within a group become one element. Unmatched entries
// carry no target system and join the first group for their source.
fn add_concept(
    map: &mut ConceptMap,
    source: String,
    target: Option<String>,
    code: String,
    entry: ConceptMapTarget,
) {
    let pos = map.groups.iter().position(|g| {
        g.source == source && (target.is_none() || g.target == target)
    });
    let group = match pos {
        Some(i) => &mut map.groups[i],
        None => {
            map.groups.push(ConceptMapGroup {
                source,
                target,
                elements: vec![],
            });
            let last = map.groups.len() - 1;
            &mut map.groups[last]
        }
    };
    match group.elements.iter_mut().find(|e| e.code == code) {
        Some(element) => element.targets.push(entry),
        None => group.elements.push(ConceptMapElement {
            code,
            targets: vec![entry],
        }),
    }
}
