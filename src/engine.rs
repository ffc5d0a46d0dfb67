// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::analyzer::{Analysis, AnalysisRun};
use crate::ast::*;
use crate::context::{MemoryContext, TransformContext, TransformerServices, WorkerContext};
use crate::generator;
use crate::interpreter::Interpreter;
use crate::lexer::Source;
use crate::model::BaseRef;
use crate::parser::*;
use crate::render::{render_with, RenderOptions};
use crate::schema::StructureDefinition;
use crate::translator::Translator;
use crate::Rc;

use std::collections::BTreeMap;
use std::convert::AsRef;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Engine settings that can be loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default)]
    pub render: RenderOptions,

    /// Attach profiles recorded by [`Engine::analyse`] to instances created by later
    /// transforms.
    #[serde(default)]
    pub use_target_profiles: bool,
}

/// The mapping engine.
#[derive(Clone)]
pub struct Engine {
    context: Rc<dyn WorkerContext>,
    services: Option<Rc<dyn TransformerServices>>,
    library: BTreeMap<String, Rc<Mapping>>,
    options: EngineOptions,
    target_profiles: BTreeMap<String, String>,
}

/// Create a default engine.
impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine over an empty [`MemoryContext`].
    pub fn new() -> Self {
        Self::with_context(Rc::new(MemoryContext::new()))
    }

    pub fn with_context(context: Rc<dyn WorkerContext>) -> Self {
        Self {
            context,
            services: None,
            library: BTreeMap::new(),
            options: EngineOptions::default(),
            target_profiles: BTreeMap::new(),
        }
    }

    pub fn set_context(&mut self, context: Rc<dyn WorkerContext>) {
        self.context = context;
    }

    pub fn set_services(&mut self, services: Option<Rc<dyn TransformerServices>>) {
        self.services = services;
    }

    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    pub fn set_render_options(&mut self, options: RenderOptions) {
        self.options.render = options;
    }

    /// Profile urls keyed by target, usually [`Analysis::target_profiles`].
    pub fn set_target_profiles(&mut self, profiles: BTreeMap<String, String>) {
        self.target_profiles = profiles;
    }

    /// Make `mapping` available to `imports` of other mappings, keyed by its url.
    pub fn add_mapping(&mut self, mapping: Mapping) {
        self.library.insert(mapping.url.clone(), Rc::new(mapping));
    }

    pub fn get_mapping(&self, url: &str) -> Option<&Mapping> {
        self.library.get(url).map(|m| m.as_ref())
    }

    /// Parse mapping text. `path` is used in error messages.
    pub fn parse(&self, path: String, text: String) -> Result<Mapping> {
        let source = Source::from_contents(path, text)?;
        Parser::new(&source)?.parse()
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Mapping> {
        let source = Source::from_file(path)?;
        Parser::new(&source)?.parse()
    }

    /// Canonical text of `mapping` using the engine's render options.
    pub fn render(&self, mapping: &Mapping) -> String {
        render_with(mapping, &self.options.render)
    }

    /// Run `mapping` with `source` as input, writing into `target`.
    pub fn transform(
        &self,
        context: &TransformContext,
        source: BaseRef,
        mapping: &Mapping,
        target: BaseRef,
    ) -> Result<()> {
        let mut interpreter = Interpreter::new(
            self.context.as_ref(),
            self.services.as_deref(),
            &self.library,
            context,
            Rc::new(mapping.clone()),
        );
        if self.options.use_target_profiles {
            interpreter = interpreter.with_target_profiles(&self.target_profiles);
        }
        interpreter.run(source, target)
    }

    /// Derive the profiles the targets of `mapping` conform to.
    pub fn analyse(&self, context: &TransformContext, mapping: &Mapping) -> Result<Analysis> {
        AnalysisRun::new(
            self.context.as_ref(),
            self.services.as_deref(),
            context,
            mapping,
        )
        .run()
    }

    /// Translate `source` with the concept map at `url`, looking in `mapping` first for
    /// local (`#id`) maps.
    pub fn translate(
        &self,
        context: &TransformContext,
        mapping: &Mapping,
        source: &BaseRef,
        url: &str,
        field: Option<&str>,
    ) -> Result<Option<BaseRef>> {
        Translator {
            ctx: self.context.as_ref(),
            services: self.services.as_deref(),
            context,
            map: mapping,
        }
        .translate(source, url, field)
    }

    pub fn generate_map_from_mappings(&self, sd: &StructureDefinition) -> Result<Option<Mapping>> {
        generator::generate_map_from_mappings(sd)
    }
}
