// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::context::WorkerContext;
use crate::model::{descendants, name_matches, Base, BaseRef};
use crate::schema::Property;
use crate::Rc;

use core::cell::RefCell;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
struct Slot {
    list: bool,
    values: Vec<BaseRef>,
}

/// In-memory data node.
///
/// Complex nodes hold their properties in declaration order; primitive nodes hold a
/// textual value. When created from a structure definition, property types and
/// cardinalities come from that definition.
#[derive(Debug)]
pub struct Element {
    type_name: String,
    resource: bool,
    value: RefCell<Option<String>>,
    properties: RefCell<IndexMap<String, Slot>>,
    profile: RefCell<Option<String>>,
    definition: Option<Property>,
}

const PRIMITIVES: &[&str] = &[
    "base64Binary",
    "boolean",
    "code",
    "date",
    "dateTime",
    "decimal",
    "id",
    "instant",
    "integer",
    "markdown",
    "oid",
    "positiveInt",
    "string",
    "time",
    "unsignedInt",
    "uri",
    "uuid",
    "xhtml",
];

pub fn is_primitive_type(name: &str) -> bool {
    PRIMITIVES.contains(&name)
}

impl Element {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            resource: false,
            value: RefCell::new(None),
            properties: RefCell::new(IndexMap::new()),
            profile: RefCell::new(None),
            definition: None,
        }
    }

    pub fn resource(type_name: &str) -> Self {
        Self {
            resource: true,
            ..Self::new(type_name)
        }
    }

    pub fn primitive(type_name: &str, value: &str) -> Self {
        let e = Self::new(type_name);
        *e.value.borrow_mut() = Some(value.to_string());
        e
    }

    /// A node typed by `definition`; nested properties take their types from it.
    pub fn with_definition(type_name: &str, resource: bool, definition: Property) -> Self {
        Self {
            resource,
            definition: Some(definition),
            ..Self::new(type_name)
        }
    }

    pub fn into_ref(self) -> BaseRef {
        Rc::new(self)
    }

    fn child_definition(&self, name: &str) -> Option<(String, Option<Property>, bool)> {
        let def = self.definition.as_ref()?;
        let child = def
            .structure()
            .children_of(def.path())
            .find(|e| name_matches(e.name(), name))?
            .clone();
        let type_name = Property::new(def.structure().clone(), child.clone())
            .choice_type(name)
            .or_else(|| child.types.first().map(|t| t.code.clone()))
            .unwrap_or_else(|| "BackboneElement".to_string());
        let repeating = child.is_repeating();
        Some((
            type_name,
            Some(Property::new(def.structure().clone(), child)),
            repeating,
        ))
    }

    fn insert(&self, name: &str, value: BaseRef, replace: bool) {
        let repeating = self.child_definition(name).map(|(_, _, r)| r);
        let mut props = self.properties.borrow_mut();
        let slot = props.entry(name.to_string()).or_default();
        if repeating == Some(true) {
            slot.list = true;
        }
        if replace || repeating == Some(false) {
            slot.values.clear();
        }
        slot.values.push(value);
        if slot.values.len() > 1 {
            slot.list = true;
        }
    }

    /// Build an untyped tree from JSON. Objects with a `resourceType` become resources.
    pub fn from_json(json: &Value) -> Result<BaseRef> {
        Self::import(json, None, None, "")
    }

    /// Build a tree from JSON with node types taken from the structure definitions
    /// known to `ctx`.
    pub fn from_json_typed(json: &Value, ctx: &dyn WorkerContext) -> Result<BaseRef> {
        Self::import(json, Some(ctx), None, "")
    }

    fn import(
        json: &Value,
        ctx: Option<&dyn WorkerContext>,
        prop: Option<(String, Option<Property>)>,
        path: &str,
    ) -> Result<BaseRef> {
        let (type_name, definition) = match prop {
            Some((t, d)) => (Some(t), d),
            None => (None, None),
        };
        match json {
            Value::Object(fields) => {
                let resource_type = fields.get("resourceType").and_then(Value::as_str);
                let type_name = match (resource_type, type_name) {
                    (Some(r), _) => r.to_string(),
                    (None, Some(t)) => t,
                    (None, None) => "Element".to_string(),
                };
                let definition = match (definition, ctx) {
                    (Some(d), _) if resource_type.is_none() => Some(d),
                    (_, Some(ctx)) => ctx.fetch_structure(&type_name).and_then(Property::root),
                    _ => None,
                };
                let node = Element {
                    resource: resource_type.is_some(),
                    definition: definition.clone(),
                    ..Element::new(&type_name)
                };
                for (key, value) in fields {
                    if key == "resourceType" {
                        continue;
                    }
                    let child = match (&definition, ctx) {
                        (Some(d), Some(ctx)) => d.child(ctx, key),
                        _ => None,
                    };
                    let child_type = child.as_ref().map(|c| {
                        c.choice_type(key)
                            .or_else(|| c.type_code())
                            .unwrap_or_else(|| "BackboneElement".to_string())
                    });
                    let child_path = format!("{path}.{key}");
                    let mut props = node.properties.borrow_mut();
                    let slot = props.entry(key.clone()).or_default();
                    match value {
                        Value::Array(items) => {
                            slot.list = true;
                            for item in items {
                                slot.values.push(Self::import(
                                    item,
                                    ctx,
                                    child_type.clone().map(|t| (t, child.clone())),
                                    &child_path,
                                )?);
                            }
                        }
                        _ => slot.values.push(Self::import(
                            value,
                            ctx,
                            child_type.map(|t| (t, child.clone())),
                            &child_path,
                        )?),
                    }
                }
                Ok(node.into_ref())
            }
            Value::String(s) => Ok(Element::primitive(
                type_name.as_deref().unwrap_or("string"),
                s,
            )
            .into_ref()),
            Value::Bool(b) => Ok(Element::primitive(
                type_name.as_deref().unwrap_or("boolean"),
                &b.to_string(),
            )
            .into_ref()),
            Value::Number(n) => {
                let default = if n.is_i64() || n.is_u64() {
                    "integer"
                } else {
                    "decimal"
                };
                Ok(
                    Element::primitive(type_name.as_deref().unwrap_or(default), &n.to_string())
                        .into_ref(),
                )
            }
            Value::Null | Value::Array(_) => bail!("unsupported json value at `{path}`"),
        }
    }

    fn primitive_json(&self, value: &str) -> Value {
        match self.type_name.as_str() {
            "boolean" => match value {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(value.to_string()),
            },
            "integer" | "positiveInt" | "unsignedInt" | "decimal" => {
                match serde_json::from_str::<serde_json::Number>(value) {
                    Ok(n) => Value::Number(n),
                    Err(_) => Value::String(value.to_string()),
                }
            }
            _ => Value::String(value.to_string()),
        }
    }
}

impl Base for Element {
    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn children_by_name(&self, name: &str) -> Vec<BaseRef> {
        match name {
            "*" => self.children().into_iter().map(|(_, v)| v).collect(),
            "**" => {
                let mut result = vec![];
                for (_, child) in self.children() {
                    result.push(child.clone());
                    result.extend(descendants(&child));
                }
                result
            }
            _ => self
                .properties
                .borrow()
                .iter()
                .filter(|(k, _)| name_matches(name, k))
                .flat_map(|(_, slot)| slot.values.iter().cloned())
                .collect(),
        }
    }

    fn property(&self, name: &str) -> Vec<BaseRef> {
        self.properties
            .borrow()
            .get(name)
            .map(|slot| slot.values.clone())
            .unwrap_or_default()
    }

    fn set_property(&self, name: &str, value: BaseRef) -> Result<()> {
        if self.is_primitive() {
            bail!("cannot set property `{name}` on primitive {}", self.type_name);
        }
        self.insert(name, value, false);
        Ok(())
    }

    fn make_property(&self, name: &str) -> Result<BaseRef> {
        if self.is_primitive() {
            bail!("cannot create property `{name}` on primitive {}", self.type_name);
        }
        let child = match self.child_definition(name) {
            Some((type_name, Some(def), _)) => {
                let has_children = def.structure().children_of(def.path()).next().is_some();
                if has_children {
                    Element::with_definition(&type_name, false, def)
                } else {
                    Element::new(&type_name)
                }
            }
            _ => Element::new("Element"),
        };
        let child = child.into_ref();
        self.insert(name, child.clone(), false);
        Ok(child)
    }

    fn children(&self) -> Vec<(String, BaseRef)> {
        self.properties
            .borrow()
            .iter()
            .flat_map(|(k, slot)| slot.values.iter().map(move |v| (k.clone(), v.clone())))
            .collect()
    }

    fn id(&self) -> Option<String> {
        self.property("id").first().and_then(|v| v.primitive_value())
    }

    fn set_id(&self, id: &str) -> Result<()> {
        self.insert("id", Element::primitive("id", id).into_ref(), true);
        Ok(())
    }

    fn primitive_value(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    fn is_resource(&self) -> bool {
        self.resource
    }

    fn is_primitive(&self) -> bool {
        self.value.borrow().is_some() || is_primitive_type(&self.type_name)
    }

    fn intended_profile(&self) -> Option<String> {
        self.profile.borrow().clone()
    }

    fn set_intended_profile(&self, url: &str) {
        *self.profile.borrow_mut() = Some(url.to_string());
    }

    fn to_json(&self) -> Value {
        if let Some(v) = self.value.borrow().as_deref() {
            return self.primitive_json(v);
        }
        let mut obj = Map::new();
        if self.resource {
            obj.insert(
                "resourceType".to_string(),
                Value::String(self.type_name.clone()),
            );
        }
        for (key, slot) in self.properties.borrow().iter() {
            let values: Vec<Value> = slot.values.iter().map(|v| v.to_json()).collect();
            let value = match (slot.list, values.len()) {
                (false, 1) => values.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Array(values),
            };
            obj.insert(key.clone(), value);
        }
        Value::Object(obj)
    }
}
