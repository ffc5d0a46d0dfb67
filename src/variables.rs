// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::InputMode;

/// Something that can appear in a variable summary.
pub trait Describe {
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
struct Variable<T> {
    mode: InputMode,
    name: String,
    value: T,
}

/// Variables bound while walking a mapping, keyed by name and direction.
///
/// A source and a target variable may share a name. Branches work on a clone, so
/// bindings added inside a branch are not seen by the parent or by sibling branches.
#[derive(Debug, Clone)]
pub struct Variables<T> {
    list: Vec<Variable<T>>,
}

impl<T> Default for Variables<T> {
    fn default() -> Self {
        Self { list: vec![] }
    }
}

impl<T: Clone> Variables<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing an existing binding with the same direction.
    pub fn add(&mut self, mode: InputMode, name: &str, value: T) {
        self.list.retain(|v| !(v.mode == mode && v.name == name));
        self.list.push(Variable {
            mode,
            name: name.to_string(),
            value,
        });
    }

    pub fn get(&self, mode: InputMode, name: &str) -> Option<&T> {
        self.list
            .iter()
            .find(|v| v.mode == mode && v.name == name)
            .map(|v| &v.value)
    }

    /// Source direction first, then target.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.get(InputMode::Source, name)
            .or_else(|| self.get(InputMode::Target, name))
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputMode, &str, &T)> {
        self.list
            .iter()
            .map(|v| (v.mode, v.name.as_str(), &v.value))
    }
}

impl<T: Clone + Describe> Variables<T> {
    pub fn summary(&self) -> String {
        let describe = |mode: InputMode| {
            self.list
                .iter()
                .filter(|v| v.mode == mode)
                .map(|v| format!("{}: {}", v.name, v.value.describe()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "source variables [{}], target variables [{}]",
            describe(InputMode::Source),
            describe(InputMode::Target)
        )
    }
}
