// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use serde_json::{json, Value};
use structmap::*;

const PREFIX: &str = r#"map "http://example.org/StructureMap/Simple" = "Simple"

uses "http://example.org/StructureDefinition/Simple" as source
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group Simple
  input src : Simple as source
  input tgt : Patient as target
"#;

fn element(path: &str, map: Option<&str>) -> Value {
    match map {
        Some(m) => json!({ "path": path, "mapping": [{ "identity": "fhir", "map": m }] }),
        None => json!({ "path": path }),
    }
}

fn logical_model(extensions: bool) -> Result<StructureDefinition> {
    let mut sd = json!({
        "resourceType": "StructureDefinition",
        "id": "Simple",
        "url": "http://example.org/StructureDefinition/Simple",
        "name": "Simple",
        "kind": "logical",
        "type": "Simple",
        "mapping": [{ "identity": "fhir", "uri": "http://hl7.org/fhir/logical" }],
        "snapshot": { "element": [
            element("Simple", None),
            element("Simple.name", Some("for src.name as s make tgt.name as n")),
            element("Simple.name.family", Some("for s.family as f make n.family = f")),
            element("Simple.name.note", None),
            element("Simple.dob", Some("for src.dob as d make tgt.birthDate = d")),
            element("Simple.note", None),
        ]},
    });
    if extensions {
        sd["extension"] = json!([
            { "url": EXT_MAPPING_PREFIX, "valueString": PREFIX },
            { "url": EXT_MAPPING_SUFFIX, "valueString": "endgroup" },
        ]);
    }
    Ok(serde_json::from_value(sd)?)
}

#[test]
fn generates_nested_rules() -> Result<()> {
    let sd = logical_model(true)?;
    let map = Engine::new()
        .generate_map_from_mappings(&sd)?
        .expect("a generated mapping");

    assert_eq!(map.url, "http://example.org/StructureMap/Simple");
    assert_eq!(map.id.as_deref(), Some("Simple"));
    assert_eq!(map.status, Some(PublicationStatus::Draft));

    let group = &map.groups[0];
    let names: Vec<_> = group.rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Simple.name", "Simple.dob"]);
    assert_eq!(group.rules[0].rules.len(), 1);
    assert_eq!(group.rules[0].rules[0].name, "Simple.name.family");
    assert!(group.rules[1].rules.is_empty());

    let text = map.text.as_ref().expect("narrative");
    assert_eq!(text.status, "generated");
    assert!(text
        .div
        .starts_with("<div><pre>map &quot;http://example.org/StructureMap/Simple&quot;"));
    assert!(text.div.ends_with("endgroup\n</pre></div>"));
    Ok(())
}

#[test]
fn generated_mapping_runs() -> Result<()> {
    let sd = logical_model(true)?;
    let engine = Engine::new();
    let map = engine
        .generate_map_from_mappings(&sd)?
        .expect("a generated mapping");

    let source = Element::from_json(&json!({
        "name": { "family": "Smith" },
        "dob": "1970-01-01",
    }))?;
    let target = Element::from_json(&json!({}))?;
    engine.transform(&TransformContext::default(), source, &map, target.clone())?;

    assert_eq!(
        target.property("birthDate")[0].primitive_value().as_deref(),
        Some("1970-01-01")
    );
    assert_eq!(
        target.property("name")[0].property("family")[0]
            .primitive_value()
            .as_deref(),
        Some("Smith")
    );
    Ok(())
}

#[test]
fn nothing_without_extensions() -> Result<()> {
    let sd = logical_model(false)?;
    assert!(Engine::new().generate_map_from_mappings(&sd)?.is_none());
    Ok(())
}

#[test]
fn nothing_without_logical_mapping() -> Result<()> {
    let mut sd = logical_model(true)?;
    sd.mapping.clear();
    assert!(Engine::new().generate_map_from_mappings(&sd)?.is_none());
    Ok(())
}

#[test]
fn invalid_fragment_names_the_model() -> Result<()> {
    let mut sd = logical_model(true)?;
    if let Some(snapshot) = sd.snapshot.as_mut() {
        snapshot.element[4].mapping[0].map = "for src.dob as d make tgt.birthDate = ,".to_string();
    }
    let err = Engine::new().generate_map_from_mappings(&sd).unwrap_err();
    assert!(format!("{err:#}").contains(
        "mapping generated from http://example.org/StructureDefinition/Simple does not parse"
    ));
    assert!(matches!(
        err.downcast_ref::<MapError>(),
        Some(MapError::Parse { .. })
    ));
    Ok(())
}
