// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{ConceptMap, Mapping};
use crate::element::Element;
use crate::error::MapError;
use crate::model::BaseRef;
use crate::schema::*;
use crate::translator::Coding;
use crate::typing::type_url;
use crate::Rc;

use core::any::Any;
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

/// Definitions and terminology the engine looks up while running.
pub trait WorkerContext {
    /// Structure definition by url, id or bare type name.
    fn fetch_structure(&self, key: &str) -> Option<Rc<StructureDefinition>>;

    fn fetch_value_set(&self, url: &str) -> Option<Rc<ValueSet>>;

    fn expand_value_set(&self, vs: &ValueSet) -> Result<Vec<ExpansionContains>>;

    /// Display text for a known code.
    fn validate_code(&self, system: &str, code: &str) -> Option<String>;

    /// Names of the resource types.
    fn resource_names(&self) -> Vec<String>;

    fn is_resource(&self, name: &str) -> bool {
        self.resource_names().iter().any(|n| n == name)
    }

    fn oid_to_uri(&self, oid: &str) -> Option<String>;

    fn fetch_concept_map(&self, url: &str) -> Option<Rc<ConceptMap>>;

    /// A mapping stored outside the one being executed, used to resolve imports.
    fn fetch_mapping(&self, url: &str) -> Option<Rc<Mapping>>;

    /// A new, empty instance of `type_name`.
    fn create_instance(&self, type_name: &str) -> Result<BaseRef> {
        let definition = self.fetch_structure(type_name).and_then(Property::root);
        let resource = self.is_resource(type_name);
        Ok(match definition {
            Some(d) => Element::with_definition(type_name, resource, d),
            None if resource => Element::resource(type_name),
            None => Element::new(type_name),
        }
        .into_ref())
    }

    fn create_primitive(&self, type_name: &str, value: &str) -> BaseRef {
        Element::primitive(type_name, value).into_ref()
    }
}

/// Caller supplied data passed through to the hooks.
#[derive(Clone, Default)]
pub struct TransformContext {
    app_info: Option<Rc<dyn Any>>,
}

impl TransformContext {
    pub fn new(app_info: Rc<dyn Any>) -> Self {
        Self {
            app_info: Some(app_info),
        }
    }

    pub fn app_info(&self) -> Option<&Rc<dyn Any>> {
        self.app_info.as_ref()
    }
}

/// Optional hooks invoked during transformation and analysis.
pub trait TransformerServices {
    /// Progress messages at group and rule entry.
    fn log(&self, _message: &str) {}

    /// Further initialise a freshly created instance.
    fn create_resource(&self, _context: &TransformContext, res: BaseRef) -> Result<BaseRef> {
        Ok(res)
    }

    /// Translate a code when the concept map cannot be found.
    fn translate(
        &self,
        _context: &TransformContext,
        _source: &Coding,
        url: &str,
    ) -> Result<Option<Coding>> {
        Err(anyhow!(MapError::Translation(format!(
            "No map found for {url}"
        ))))
    }
}

lazy_static::lazy_static! {
    static ref WELL_KNOWN_OIDS: BTreeMap<&'static str, &'static str> = {
        let mut m = BTreeMap::new();
        m.insert("2.16.840.1.113883.6.96", "http://snomed.info/sct");
        m.insert("2.16.840.1.113883.6.1", "http://loinc.org");
        m.insert("2.16.840.1.113883.6.8", "http://unitsofmeasure.org");
        m.insert("2.16.840.1.113883.6.88", "http://www.nlm.nih.gov/research/umls/rxnorm");
        m.insert("2.16.840.1.113883.6.3", "http://hl7.org/fhir/sid/icd-10");
        m.insert("2.16.840.1.113883.6.103", "http://hl7.org/fhir/sid/icd-9-cm");
        m.insert("2.16.840.1.113883.6.90", "http://hl7.org/fhir/sid/icd-10-cm");
        m.insert("2.16.840.1.113883.6.12", "http://www.ama-assn.org/go/cpt");
        m.insert("2.16.840.1.113883.12.292", "http://hl7.org/fhir/sid/cvx");
        m.insert("2.16.840.1.113883.5.1", "http://hl7.org/fhir/v3/AdministrativeGender");
        m.insert("2.16.840.1.113883.4.1", "http://hl7.org/fhir/sid/us-ssn");
        m
    };
}

/// A [`WorkerContext`] over definitions held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    structures: BTreeMap<String, Rc<StructureDefinition>>,
    value_sets: BTreeMap<String, Rc<ValueSet>>,
    code_systems: BTreeMap<String, Rc<CodeSystem>>,
    concept_maps: BTreeMap<String, Rc<ConceptMap>>,
    mappings: BTreeMap<String, Rc<Mapping>>,
    oids: BTreeMap<String, String>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_structure(&mut self, sd: StructureDefinition) {
        self.structures.insert(sd.url.clone(), Rc::new(sd));
    }

    pub fn add_value_set(&mut self, vs: ValueSet) {
        self.value_sets.insert(vs.url.clone(), Rc::new(vs));
    }

    pub fn add_code_system(&mut self, cs: CodeSystem) {
        self.code_systems.insert(cs.url.clone(), Rc::new(cs));
    }

    /// Register a concept map under `url`.
    pub fn add_concept_map(&mut self, url: &str, map: ConceptMap) {
        self.concept_maps.insert(url.to_string(), Rc::new(map));
    }

    pub fn add_mapping(&mut self, mapping: Mapping) {
        self.mappings.insert(mapping.url.clone(), Rc::new(mapping));
    }

    pub fn add_oid(&mut self, oid: &str, uri: &str) {
        self.oids.insert(oid.to_string(), uri.to_string());
    }

    pub fn structures(&self) -> impl Iterator<Item = &Rc<StructureDefinition>> {
        self.structures.values()
    }

    /// Add one resource, or every entry of a bundle, given as JSON.
    pub fn add_json(&mut self, json: Value) -> Result<()> {
        let kind = json
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match kind.as_str() {
            "StructureDefinition" => self.add_structure(serde_json::from_value(json)?),
            "ValueSet" => self.add_value_set(serde_json::from_value(json)?),
            "CodeSystem" => self.add_code_system(serde_json::from_value(json)?),
            "ConceptMap" => {
                let url = json
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("concept map without url"))?
                    .to_string();
                self.add_concept_map(&url, serde_json::from_value(json)?);
            }
            "Bundle" => {
                let entries = json
                    .get("entry")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for entry in entries {
                    if let Some(resource) = entry.get("resource") {
                        self.add_json(resource.clone())?;
                    }
                }
            }
            "" => bail!("resource has no resourceType"),
            other => bail!("unsupported resource type `{other}`"),
        }
        Ok(())
    }

    pub fn add_json_str(&mut self, json: &str) -> Result<()> {
        self.add_json(serde_json::from_str(json)?)
    }

    #[cfg(feature = "yaml")]
    pub fn add_yaml_str(&mut self, yaml: &str) -> Result<()> {
        self.add_json(serde_yaml::from_str(yaml)?)
    }

    /// Load a `.json` (or, with the `yaml` feature, `.yaml`) file.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.add_json_str(&contents),
            #[cfg(feature = "yaml")]
            Some("yaml") | Some("yml") => self.add_yaml_str(&contents),
            _ => bail!("unsupported definition file {}", path.display()),
        }
        .with_context(|| format!("Failed to load {}", path.display()))
    }
}

impl WorkerContext for MemoryContext {
    fn fetch_structure(&self, key: &str) -> Option<Rc<StructureDefinition>> {
        if let Some(sd) = self.structures.get(key) {
            return Some(sd.clone());
        }
        if let Some(sd) = self.structures.get(&type_url(key)) {
            return Some(sd.clone());
        }
        self.structures.values().find(|sd| sd.id == key).cloned()
    }

    fn fetch_value_set(&self, url: &str) -> Option<Rc<ValueSet>> {
        self.value_sets.get(url).cloned()
    }

    fn expand_value_set(&self, vs: &ValueSet) -> Result<Vec<ExpansionContains>> {
        if let Some(expansion) = &vs.expansion {
            return Ok(expansion.contains.clone());
        }
        let compose = match &vs.compose {
            Some(c) => c,
            None => bail!("value set {} has neither expansion nor compose", vs.url),
        };
        let mut contains = vec![];
        for include in &compose.include {
            let concepts = match (include.concept.is_empty(), self.code_systems.get(&include.system)) {
                (false, _) => include.concept.clone(),
                (true, Some(cs)) => cs.concept.clone(),
                (true, None) => bail!(
                    "unable to expand value set {}: code system {} is not known",
                    vs.url,
                    include.system
                ),
            };
            for c in concepts {
                let display = c
                    .display
                    .or_else(|| self.validate_code(&include.system, &c.code));
                contains.push(ExpansionContains {
                    system: Some(include.system.clone()),
                    code: Some(c.code),
                    display,
                });
            }
        }
        Ok(contains)
    }

    fn validate_code(&self, system: &str, code: &str) -> Option<String> {
        self.code_systems
            .get(system)?
            .concept
            .iter()
            .find(|c| c.code == code)
            .and_then(|c| c.display.clone())
    }

    fn resource_names(&self) -> Vec<String> {
        self.structures
            .values()
            .filter(|sd| {
                sd.kind == StructureKind::Resource && sd.derivation != Some(Derivation::Constraint)
            })
            .map(|sd| sd.type_name.clone())
            .collect()
    }

    fn oid_to_uri(&self, oid: &str) -> Option<String> {
        let oid = oid.strip_prefix("urn:oid:").unwrap_or(oid);
        self.oids
            .get(oid)
            .cloned()
            .or_else(|| WELL_KNOWN_OIDS.get(oid).map(|s| s.to_string()))
    }

    fn fetch_concept_map(&self, url: &str) -> Option<Rc<ConceptMap>> {
        self.concept_maps.get(url).cloned()
    }

    fn fetch_mapping(&self, url: &str) -> Option<Rc<Mapping>> {
        self.mappings.get(url).cloned()
    }
}
