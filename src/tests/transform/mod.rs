// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::semicolon_if_nothing_returned,
    clippy::pattern_type_mismatch,
    clippy::print_stderr
)] // test harness asserts and unwraps to validate transform behavior

use std::env;

use super::common::{context, match_values, RecordingServices};
use crate::*;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use test_generator::test_resources;

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct TestCase {
    note: String,
    map: String,
    #[serde(default)]
    imports: Vec<String>,
    source: Value,
    target: String,
    want_result: Option<Value>,
    want_logs: Option<Vec<String>>,
    skip: Option<bool>,
    error: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

struct Outcome {
    result: Value,
    logs: Vec<String>,
}

fn transform_case(case: &TestCase) -> Result<Outcome> {
    let ctx = Rc::new(context()?);
    let mut engine = Engine::with_context(ctx.clone());
    let services = Rc::new(RecordingServices::default());
    engine.set_services(Some(services.clone() as Rc<dyn TransformerServices>));

    for (idx, text) in case.imports.iter().enumerate() {
        let imported = engine.parse(format!("import_{idx}.map"), text.clone())?;
        engine.add_mapping(imported);
    }
    let map = engine.parse("case.map".to_string(), case.map.clone())?;
    let app = TransformContext::default();

    let source = Element::from_json_typed(&case.source, ctx.as_ref())?;
    let target = ctx.create_instance(&case.target)?;
    engine.transform(&app, source, &map, target.clone())?;

    Ok(Outcome {
        result: target.to_json(),
        logs: services.take_logs(),
    })
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    std::println!("running {file}");

    for case in test.cases {
        std::print!("case {} ", case.note);
        if case.skip == Some(true) {
            std::println!("skipped");
            continue;
        }

        match (&case.want_result, &case.error) {
            (Some(_), None) | (None, Some(_)) => (),
            _ => panic!("either want_result or error must be specified in test case."),
        }

        match transform_case(&case) {
            Ok(outcome) => match &case.want_result {
                Some(want_result) => {
                    match_values(&outcome.result, want_result)?;
                    if let Some(want_logs) = &case.want_logs {
                        if *want_logs != outcome.logs {
                            std::println!(
                                "log mismatch :\n{}",
                                prettydiff::diff_chars(&want_logs.join("\n"), &outcome.logs.join("\n"))
                            );
                            panic!("exiting");
                        }
                    }
                }
                _ => bail!("transform succeeded and did not produce any errors"),
            },
            Err(actual) => match &case.error {
                Some(expected) => {
                    // Include the whole context chain: the rule name sits on the outer layers.
                    let actual = format!("{actual:#}");
                    if !actual.contains(expected) {
                        bail!(
                            "Error message\n`{}\n`\ndoes not contain `{}`",
                            actual,
                            expected
                        );
                    }
                    std::println!("{actual}");
                }
                _ => return Err(actual),
            },
        }

        std::println!("passed");
    }

    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{e}");
        }
    }
}

#[test]
fn yaml_test_basic() -> Result<()> {
    yaml_test("tests/transform/cases/copy.yaml")
}

#[test]
#[ignore = "intended for running a single yaml file"]
fn one_yaml() -> Result<()> {
    let mut file = String::default();

    for a in env::args() {
        if a.ends_with(".yaml") {
            file = a;
        }
    }

    if file.is_empty() {
        bail!("missing <yaml-file>");
    }

    yaml_test(file.as_str())
}

#[test_resources("tests/transform/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn error_root_cause_is_map_error() -> Result<()> {
    let ctx = Rc::new(context()?);
    let engine = Engine::with_context(ctx.clone());
    let map = engine.parse(
        "unknown.map".to_string(),
        r#"map "http://example.org/StructureMap/unknown" = "unknown"
group main
  input src : Legacy as source
  input tgt : Patient as target
  r: for src.surname as s make tgt.name = missing
endgroup
"#
        .to_string(),
    )?;
    let source = Element::from_json(&serde_json::json!({ "surname": "Smith" }))?;
    let target = ctx.create_instance("Patient")?;
    let err = engine
        .transform(&TransformContext::default(), source, &map, target)
        .unwrap_err();

    match err.downcast_ref::<MapError>() {
        Some(MapError::UnknownVariable { name, .. }) => assert_eq!(name, "missing"),
        other => panic!("unexpected root cause {other:?}"),
    }
    assert!(format!("{err:#}").contains("rule `r`"));
    Ok(())
}

#[test]
fn created_resources_get_fresh_ids() -> Result<()> {
    let ctx = Rc::new(context()?);
    let engine = Engine::with_context(ctx.clone());
    let map = engine.parse(
        "ids.map".to_string(),
        r#"map "http://example.org/StructureMap/ids" = "ids"
group main
  input src : Legacy as source
  input bundle : Bundle as target
  a: for src make bundle.entry as e then {
    b: for src make e.resource = create('Patient') as p
  }
  c: for src make bundle.entry as e then {
    d: for src make e.resource = create('Patient') as p
  }
endgroup
"#
        .to_string(),
    )?;
    let source = Element::from_json(&serde_json::json!({ "surname": "Smith" }))?;
    let bundle = ctx.create_instance("Bundle")?;
    engine.transform(&TransformContext::default(), source, &map, bundle.clone())?;

    let ids: Vec<String> = bundle
        .property("entry")
        .iter()
        .flat_map(|e| e.property("resource"))
        .filter_map(|r| r.id())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| uuid::Uuid::parse_str(id).is_ok()));
    Ok(())
}

#[test]
fn references_to_one_resource_agree() -> Result<()> {
    let ctx = Rc::new(context()?);
    let engine = Engine::with_context(ctx.clone());
    let map = engine.parse(
        "refs.map".to_string(),
        r#"map "http://example.org/StructureMap/refs" = "refs"
group main
  input src : Legacy as source
  input bundle : Bundle as target
  all: for src make bundle.entry as pe, pe.resource = create('Patient') as p,
      bundle.entry as e1, e1.resource = create('Observation') as o1, o1.subject = reference(p),
      bundle.entry as e2, e2.resource = create('Observation') as o2, o2.subject = reference(p)
endgroup
"#
        .to_string(),
    )?;
    let source = Element::from_json(&serde_json::json!({}))?;
    let bundle = ctx.create_instance("Bundle")?;
    engine.transform(&TransformContext::default(), source, &map, bundle.clone())?;

    let resources: Vec<BaseRef> = bundle
        .property("entry")
        .iter()
        .flat_map(|e| e.property("resource"))
        .collect();
    assert_eq!(resources.len(), 3);

    let id = resources[0].id().expect("patient id");
    assert!(uuid::Uuid::parse_str(&id).is_ok());
    let references: Vec<Option<String>> = resources[1..]
        .iter()
        .map(|o| {
            o.property("subject")
                .first()
                .and_then(|s| s.property("reference").first().cloned())
                .and_then(|r| r.primitive_value())
        })
        .collect();
    assert_eq!(
        references,
        vec![Some(format!("Patient/{id}")), Some(format!("Patient/{id}"))]
    );
    Ok(())
}
