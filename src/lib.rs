// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod analyzer;
mod ast;
mod context;
mod element;
mod engine;
mod error;
pub mod fhirpath;
mod generator;
mod interpreter;
mod lexer;
mod model;
mod parser;
mod render;
mod schema;
mod translator;
mod typing;
mod variables;
mod walker;

pub(crate) use std::rc::Rc;

pub use analyzer::{Analysis, RowKind, SummaryRow, SummaryTable};
pub use ast::*;
pub use context::{MemoryContext, TransformContext, TransformerServices, WorkerContext};
pub use element::Element;
pub use engine::{Engine, EngineOptions};
pub use error::MapError;
pub use model::{Base, BaseRef};
pub use render::RenderOptions;
pub use schema::*;
pub use translator::Coding;
pub use typing::{ProfiledType, TypeDetails};

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::lexer::*;
    pub use crate::parser::*;
    pub use crate::render::*;
    pub use crate::variables::*;
    pub use crate::walker::*;
}

#[cfg(test)]
mod tests;
