// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use anyhow::Result;
use serde_json::json;
use structmap::*;

const SHARED: &str = r#"map "http://example.org/StructureMap/shared" = "shared"

group names
  input s as source
  input p as target

  family: for s.surname as v make p.name as n, n.family = v
endgroup
"#;

const MAIN: &str = r#"map "http://example.org/StructureMap/main" = "main"

imports "http://example.org/StructureMap/shared"

group main
  input src as source
  input bundle : Bundle as target

  entry: for src make bundle.entry as e, e.resource = create('Patient') as p then names(src, p)
endgroup
"#;

fn context() -> Result<Rc<MemoryContext>> {
    let mut ctx = MemoryContext::new();
    ctx.add_file("tests/definitions/core.json")?;
    Ok(Rc::new(ctx))
}

#[test]
fn options_from_config() -> Result<()> {
    let options: EngineOptions = serde_json::from_value(json!({
        "render": { "multiple_targets_one_line": true },
        "use_target_profiles": true,
    }))?;
    assert!(options.render.multiple_targets_one_line);
    assert!(options.use_target_profiles);

    let options: EngineOptions = serde_yaml::from_str("use_target_profiles: true\n")?;
    assert_eq!(options.render, RenderOptions::default());
    assert!(options.use_target_profiles);

    let options: EngineOptions = serde_json::from_str("{}")?;
    assert_eq!(options, EngineOptions::default());
    Ok(())
}

#[test]
fn library_mappings_resolve_imports() -> Result<()> {
    let ctx = context()?;
    let mut engine = Engine::with_context(ctx.clone());
    let shared = engine.parse("shared.map".to_string(), SHARED.to_string())?;
    engine.add_mapping(shared);
    assert!(engine
        .get_mapping("http://example.org/StructureMap/shared")
        .is_some());
    assert!(engine.get_mapping("http://example.org/StructureMap/main").is_none());

    let main = engine.parse("main.map".to_string(), MAIN.to_string())?;
    let source = Element::from_json(&json!({ "surname": "Smith" }))?;
    let bundle = ctx.create_instance("Bundle")?;
    engine.transform(&TransformContext::default(), source, &main, bundle.clone())?;

    let patient = &bundle.property("entry")[0].property("resource")[0];
    assert_eq!(patient.type_name(), "Patient");
    assert_eq!(
        patient.property("name")[0].property("family")[0]
            .primitive_value()
            .as_deref(),
        Some("Smith")
    );
    Ok(())
}

#[test]
fn context_mappings_resolve_imports() -> Result<()> {
    let mut engine = Engine::new();
    let mut ctx = MemoryContext::new();
    ctx.add_file("tests/definitions/core.json")?;
    ctx.add_mapping(engine.parse("shared.map".to_string(), SHARED.to_string())?);
    let ctx = Rc::new(ctx);

    let main = engine.parse("main.map".to_string(), MAIN.to_string())?;
    let source = Element::from_json(&json!({ "surname": "Smith" }))?;

    // The default context knows neither the import nor the types.
    let err = engine
        .transform(
            &TransformContext::default(),
            source.clone(),
            &main,
            ctx.create_instance("Bundle")?,
        )
        .unwrap_err();
    assert!(format!("{err:#}").contains("unable to find map http://example.org/StructureMap/shared"));

    engine.set_context(ctx.clone());
    engine.transform(
        &TransformContext::default(),
        source,
        &main,
        ctx.create_instance("Bundle")?,
    )?;
    Ok(())
}

/// Names created resources after the caller's tag.
struct Tagging;

impl TransformerServices for Tagging {
    fn create_resource(&self, context: &TransformContext, res: BaseRef) -> Result<BaseRef> {
        if let Some(tag) = context.app_info().and_then(|a| a.downcast_ref::<String>()) {
            res.set_id(tag)?;
        }
        Ok(res)
    }
}

#[test]
fn app_info_reaches_services() -> Result<()> {
    let ctx = context()?;
    let mut engine = Engine::with_context(ctx.clone());
    engine.set_services(Some(Rc::new(Tagging)));
    let shared = engine.parse("shared.map".to_string(), SHARED.to_string())?;
    engine.add_mapping(shared);
    let main = engine.parse("main.map".to_string(), MAIN.to_string())?;

    let app = TransformContext::new(Rc::new("tagged".to_string()));
    let bundle = ctx.create_instance("Bundle")?;
    let source = Element::from_json(&json!({ "surname": "Smith" }))?;
    engine.transform(&app, source, &main, bundle.clone())?;

    let patient = &bundle.property("entry")[0].property("resource")[0];
    assert_eq!(patient.id().as_deref(), Some("tagged"));
    Ok(())
}

#[test]
fn engines_are_independent() -> Result<()> {
    let mut engine = Engine::new();
    let shared = engine.parse("shared.map".to_string(), SHARED.to_string())?;
    engine.add_mapping(shared);
    let copy = engine.clone();

    engine.set_render_options(RenderOptions {
        multiple_targets_one_line: true,
    });
    let mapping = copy
        .get_mapping("http://example.org/StructureMap/shared")
        .expect("cloned library")
        .clone();
    assert_ne!(engine.render(&mapping), copy.render(&mapping));
    Ok(())
}

#[test]
fn analysis_serializes() -> Result<()> {
    let engine = Engine::with_context(context()?);
    let map = engine.parse(
        "legacy.map".to_string(),
        r#"map "http://example.org/StructureMap/legacy" = "legacy"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group main
  input src : Legacy as source
  input tgt : Patient as target

  active: for src make tgt.active = true
endgroup
"#
        .to_string(),
    )?;
    let analysis = engine.analyse(&TransformContext::default(), &map)?;
    let json = serde_json::to_value(&analysis)?;
    assert_eq!(
        json["profiles"][0]["differential"]["element"][1],
        json!({ "path": "Patient.active", "fixed": { "boolean": true } })
    );
    assert_eq!(
        json["summary"]["rows"][0],
        json!({ "kind": "header", "source": "Source", "target": "Target" })
    );
    Ok(())
}
