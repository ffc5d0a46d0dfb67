// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Rc;

use core::fmt::Debug;

use anyhow::Result;

/// Shared handle to a node of a data tree.
pub type BaseRef = Rc<dyn Base>;

/// The capabilities the transform engine needs from a hierarchical data model.
///
/// Nodes are shared and mutated in place through `&self`, so implementations use
/// interior mutability. [`crate::Element`] is the bundled implementation.
pub trait Base: Debug {
    /// Runtime type name, e.g. `Patient`, `HumanName` or `string`.
    fn type_name(&self) -> String;

    /// Children matching `name`, which is an element name, `*` (all direct children),
    /// `**` (all descendants) or a choice pattern such as `value[x]`.
    fn children_by_name(&self, name: &str) -> Vec<BaseRef>;

    /// Values of the property `name`.
    fn property(&self, name: &str) -> Vec<BaseRef>;

    /// Assign `value` to the property `name`. Repeating properties get the value appended.
    fn set_property(&self, name: &str, value: BaseRef) -> Result<()>;

    /// Create an empty child at `name` and return it.
    fn make_property(&self, name: &str) -> Result<BaseRef>;

    /// Direct children with the property names they sit under.
    fn children(&self) -> Vec<(String, BaseRef)>;

    fn id(&self) -> Option<String>;

    fn set_id(&self, id: &str) -> Result<()>;

    fn primitive_value(&self) -> Option<String>;

    fn is_resource(&self) -> bool;

    fn is_primitive(&self) -> bool;

    /// Profile the node is expected to conform to, recorded by a transform.
    fn intended_profile(&self) -> Option<String>;

    fn set_intended_profile(&self, url: &str);

    fn to_json(&self) -> serde_json::Value;
}

/// Whether `pattern` selects the property `key`.
pub fn name_matches(pattern: &str, key: &str) -> bool {
    if pattern == key {
        return true;
    }
    match pattern.strip_suffix("[x]") {
        Some(base) => key
            .strip_prefix(base)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase()),
        None => false,
    }
}

/// Depth-first descendants of `node`, excluding `node` itself.
pub fn descendants(node: &BaseRef) -> Vec<BaseRef> {
    let mut result = vec![];
    for (_, child) in node.children() {
        result.push(child.clone());
        result.extend(descendants(&child));
    }
    result
}
