// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Errors raised while parsing, executing or analysing a mapping.
///
/// Public entry points return `anyhow::Result`. The root cause of a failure is one of
/// these variants and can be recovered with `err.downcast_ref::<MapError>()`; outer
/// layers of the error chain name the rule and construct that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// Malformed mapping text.
    #[error("{rendered}")]
    Parse {
        file: String,
        line: u32,
        col: u32,
        message: String,
        rendered: String,
    },

    #[error("variable `{name}` not found ({summary})")]
    UnknownVariable { name: String, summary: String },

    #[error("no matches found for group `{0}`")]
    UnknownGroup(String),

    #[error("multiple possible matches for group `{0}`")]
    AmbiguousGroup(String),

    #[error("group `{group}` has {expected} inputs but the invocation has {found} variables")]
    ArityMismatch {
        group: String,
        expected: usize,
        found: usize,
    },

    /// A transform the grammar accepts but the engine does not execute.
    #[error("transform `{0}` not supported yet")]
    UnsupportedTransform(String),

    #[error("unknown transform `{0}`")]
    UnknownTransform(String),

    /// A construct outside what the engine handles (multiple sources, group extension...).
    #[error("{0} not supported")]
    Unsupported(String),

    #[error("check condition `{0}` failed")]
    CheckFailed(String),

    #[error("{0}")]
    Translation(String),

    #[error("the type {found} is not compatible with the allowed types for {path}")]
    TypeIncompatibility { found: String, path: String },

    #[error("{0}")]
    Evaluation(String),

    #[error("{0}")]
    Definition(String),
}
