// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A small FHIRPath subset used for `where`, `check` and `evaluate` clauses.

mod ast;
mod check;
mod eval;
mod parser;

pub use ast::{BinaryOp, Expr, Literal};
pub use check::check;
pub use eval::{evaluate, evaluate_bool, HostServices, NoVariables};
pub use parser::{parse, parse_tokens};
