// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)] // tests index into known results

use super::common::context;
use crate::*;

use core::cell::RefCell;

use anyhow::Result;

const PATIENT_MAP: &str = r#"map "http://example.org/StructureMap/legacy" = "legacy"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group main
  input src : Legacy as source
  input tgt : Patient as target

  dob: for src.dob as d make tgt.birthDate = d
  sex: for src.sex as s make tgt.gender = s
  active: for src make tgt.active = true
endgroup
"#;

const OBSERVATION_MAP: &str = r#"map "http://example.org/StructureMap/obs" = "obs"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Bundle" as target

group main
  input src : Legacy as source
  input bundle : Bundle as target

  test: for src.flag as f make create('Observation') as o,
      o.code = cc('http://loinc.org', '29463-7'),
      o.value = f
endgroup
"#;

fn engine() -> Result<(Rc<MemoryContext>, Engine)> {
    let ctx = Rc::new(context()?);
    Ok((ctx.clone(), Engine::with_context(ctx)))
}

fn analyse(text: &str) -> Result<Analysis> {
    let (_, engine) = engine()?;
    let map = engine.parse("analysis.map".to_string(), text.to_string())?;
    engine.analyse(&TransformContext::default(), &map)
}

fn paths(sd: &StructureDefinition) -> Vec<&str> {
    sd.differential_elements()
        .iter()
        .map(|e| e.path.as_str())
        .collect()
}

fn row(kind: RowKind, source: &str, target: &str) -> SummaryRow {
    SummaryRow {
        kind,
        source: source.to_string(),
        target: target.to_string(),
    }
}

#[test]
fn profile_for_target_input() -> Result<()> {
    let analysis = analyse(PATIENT_MAP)?;
    assert_eq!(analysis.profiles.len(), 1);

    let profile = &analysis.profiles[0];
    assert_eq!(
        profile.url,
        "http://example.org/StructureDefinition/legacy-Patient"
    );
    assert_eq!(profile.id, "legacy-Patient");
    assert_eq!(profile.name, "Profile for Patient for main");
    assert_eq!(profile.derivation, Some(Derivation::Constraint));
    assert_eq!(
        profile.base_definition.as_deref(),
        Some("http://hl7.org/fhir/StructureDefinition/Patient")
    );
    assert_eq!(profile.fhir_version.as_deref(), Some(FHIR_VERSION));
    assert_eq!(
        paths(profile),
        ["Patient", "Patient.birthDate", "Patient.gender", "Patient.active"]
    );

    // Only the literal assignment pins a value; matching types are not repeated.
    let active = &profile.differential_elements()[3];
    assert_eq!(active.fixed, Some(FixedValue::Boolean(true)));
    assert!(profile.differential_elements()[1].fixed.is_none());
    assert!(profile
        .differential_elements()
        .iter()
        .all(|e| e.types.is_empty()));

    assert!(analysis.target_profiles.is_empty());
    Ok(())
}

#[test]
fn summary_rows() -> Result<()> {
    let analysis = analyse(PATIENT_MAP)?;
    assert_eq!(
        analysis.summary.rows,
        vec![
            row(RowKind::Header, "Source", "Target"),
            row(RowKind::Group, "Input: Legacy", "Input: Patient"),
            row(RowKind::Rule, "Legacy.dob", "Patient.birthDate"),
            row(RowKind::Rule, "Legacy.sex", "Patient.gender"),
            row(RowKind::Rule, "Legacy", ""),
        ]
    );
    Ok(())
}

#[test]
fn summary_html_is_escaped() {
    let table = SummaryTable {
        rows: vec![
            row(RowKind::Header, "Source", "Target"),
            row(RowKind::Group, "Input: A", "Input: B"),
            row(RowKind::Rule, "A.x", "B.y <truncated> & \"quoted\""),
        ],
    };
    assert_eq!(
        table.to_html(),
        "<table class=\"grid\">\
         <tr><td><b>Source</b></td><td><b>Target</b></td></tr>\
         <tr class=\"diff-title\"><td>Input: A</td><td>Input: B</td></tr>\
         <tr><td>A.x</td><td>B.y &lt;truncated&gt; &amp; &quot;quoted&quot;</td></tr>\
         </table>"
    );
}

#[test]
fn created_resource_gets_its_own_profile() -> Result<()> {
    let analysis = analyse(OBSERVATION_MAP)?;
    let urls: Vec<_> = analysis.profiles.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "http://example.org/StructureDefinition/obs-Bundle",
            "http://example.org/StructureDefinition/obs-Observation",
        ]
    );

    let observation = &analysis.profiles[1];
    assert_eq!(observation.name, "Profile for Observation for test");
    assert_eq!(
        paths(observation),
        ["Observation", "Observation.code", "Observation.value[x]"]
    );

    let code = &observation.differential_elements()[1];
    assert_eq!(
        code.fixed,
        Some(FixedValue::CodeableConcept(vec![Coding::new(
            Some("http://loinc.org"),
            "29463-7"
        )]))
    );

    // The choice element records which of its types is used.
    let value = &observation.differential_elements()[2];
    let types: Vec<_> = value.types.iter().map(|t| t.code.as_str()).collect();
    assert_eq!(types, ["string"]);

    assert_eq!(
        analysis
            .target_profiles
            .get(r#"test|create("Observation") as o"#)
            .map(String::as_str),
        Some("http://example.org/StructureDefinition/obs-Observation")
    );
    Ok(())
}

#[test]
fn new_resource_summary_names_the_key() -> Result<()> {
    let analysis = analyse(OBSERVATION_MAP)?;
    assert_eq!(
        analysis.summary.rows.last(),
        Some(&row(
            RowKind::Rule,
            "Legacy.flag",
            "new Observation.value (code = LOINC#29463-7(Body weight))"
        ))
    );
    Ok(())
}

#[test]
fn repeated_types_get_numbered_profiles() -> Result<()> {
    let analysis = analyse(
        r#"map "http://example.org/StructureMap/obs" = "obs"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Bundle" as target

group main
  input src : Legacy as source
  input bundle : Bundle as target

  first: for src make create('Observation') as o
  second: for src make create('Observation') as o
  third: for src make create('Observation') as o
endgroup
"#,
    )?;
    let ids: Vec<_> = analysis.profiles.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(
        ids,
        [
            "obs-Bundle",
            "obs-Observation",
            "obs-Observation-1",
            "obs-Observation-2"
        ]
    );

    // Numbering starts over for each analysis.
    let again = analyse(OBSERVATION_MAP)?;
    assert_eq!(again.profiles[1].id, "obs-Observation");
    Ok(())
}

#[test]
fn repeated_paths_are_sliced() -> Result<()> {
    let analysis = analyse(
        r#"map "http://example.org/StructureMap/legacy" = "legacy"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group main
  input src : Legacy as source
  input tgt : Patient as target

  official: for src.surname as s make tgt.name as n
  alias: for src.forenames as f make tgt.name as n
  dob: for src.dob as d make tgt.birthDate = d
endgroup
"#,
    )?;
    let profile = &analysis.profiles[0];
    assert_eq!(
        paths(profile),
        [
            "Patient",
            "Patient.name",
            "Patient.name",
            "Patient.name",
            "Patient.birthDate"
        ]
    );

    let elements = profile.differential_elements();
    let slicing = elements[1].slicing.as_ref().expect("slicing entry");
    assert_eq!(slicing.rules, "open");
    assert!(elements[1].slice_name.is_none());
    assert_eq!(elements[2].slice_name.as_deref(), Some("official"));
    assert_eq!(elements[3].slice_name.as_deref(), Some("alias"));
    assert!(elements[4].slice_name.is_none());
    Ok(())
}

#[test]
fn string_is_compatible_with_its_subtypes() -> Result<()> {
    // Legacy.sex is a string and Patient.gender a code.
    let analysis = analyse(PATIENT_MAP)?;
    let gender = &analysis.profiles[0].differential_elements()[2];
    assert_eq!(gender.path, "Patient.gender");
    assert!(gender.types.is_empty());
    Ok(())
}

#[test]
fn incompatible_type_is_fatal() -> Result<()> {
    let err = analyse(
        r#"map "http://example.org/StructureMap/obs" = "obs"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Bundle" as target

group main
  input src : Legacy as source
  input bundle : Bundle as target

  weight: for src.weight as w make create('Observation') as o, o.value = w
endgroup
"#,
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<MapError>(),
        Some(&MapError::TypeIncompatibility {
            found: "decimal".to_string(),
            path: "Observation.value[x]".to_string(),
        })
    );
    Ok(())
}

#[test]
fn inputs_must_be_declared_by_uses() {
    let err = analyse(
        r#"map "http://example.org/StructureMap/legacy" = "legacy"

uses "http://example.org/StructureDefinition/Legacy" as source

group main
  input src : Legacy as source
  input tgt : Patient as target
endgroup
"#,
    )
    .unwrap_err();
    assert!(err
        .to_string()
        .contains("Unable to find structure definition for Patient in imports"));
}

#[test]
fn unsupported_transform_in_analysis() {
    let err = analyse(
        r#"map "http://example.org/StructureMap/legacy" = "legacy"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group main
  input src : Legacy as source
  input tgt : Patient as target

  dob: for src.dob as d make tgt.birthDate = dateOp(d, 'add', '1')
endgroup
"#,
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<MapError>(),
        Some(&MapError::UnsupportedTransform("dateOp".to_string()))
    );
}

/// Keeps every resource the transform creates.
#[derive(Default)]
struct CapturingServices {
    created: RefCell<Vec<BaseRef>>,
}

impl TransformerServices for CapturingServices {
    fn create_resource(&self, _context: &TransformContext, res: BaseRef) -> Result<BaseRef> {
        self.created.borrow_mut().push(res.clone());
        Ok(res)
    }
}

#[test]
fn transform_attaches_analysed_profiles() -> Result<()> {
    let (ctx, mut engine) = engine()?;
    let services = Rc::new(CapturingServices::default());
    engine.set_services(Some(services.clone() as Rc<dyn TransformerServices>));

    let map = engine.parse("obs.map".to_string(), OBSERVATION_MAP.to_string())?;
    let app = TransformContext::default();
    let analysis = engine.analyse(&app, &map)?;
    engine.set_target_profiles(analysis.target_profiles);
    engine.set_options(EngineOptions {
        use_target_profiles: true,
        ..EngineOptions::default()
    });

    let source = Element::from_json(&serde_json::json!({ "flag": "H" }))?;
    let bundle = ctx.create_instance("Bundle")?;
    engine.transform(&app, source, &map, bundle)?;

    let created = services.created.borrow();
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].intended_profile().as_deref(),
        Some("http://example.org/StructureDefinition/obs-Observation")
    );
    Ok(())
}

#[test]
fn profiles_are_not_attached_by_default() -> Result<()> {
    let (ctx, mut engine) = engine()?;
    let services = Rc::new(CapturingServices::default());
    engine.set_services(Some(services.clone() as Rc<dyn TransformerServices>));

    let map = engine.parse("obs.map".to_string(), OBSERVATION_MAP.to_string())?;
    let app = TransformContext::default();
    let analysis = engine.analyse(&app, &map)?;
    engine.set_target_profiles(analysis.target_profiles);

    let source = Element::from_json(&serde_json::json!({ "flag": "H" }))?;
    engine.transform(&app, source, &map, ctx.create_instance("Bundle")?)?;

    assert!(services.created.borrow()[0].intended_profile().is_none());
    Ok(())
}

#[test]
fn codings_are_fixed_only_when_literal() -> Result<()> {
    let analysis = analyse(
        r#"map "http://example.org/StructureMap/obs" = "obs"

uses "http://example.org/StructureDefinition/Legacy" as source
uses "http://hl7.org/fhir/StructureDefinition/Bundle" as target

group main
  input src : Legacy as source
  input bundle : Bundle as target

  test: for src.flag as f make create('Observation') as o,
      o.code = cc('http://loinc.org', f),
      o.interpretation as i,
      i.coding = c('http://loinc.org', '29463-7')
endgroup
"#,
    )?;
    let observation = &analysis.profiles[1];
    assert_eq!(
        paths(observation),
        [
            "Observation",
            "Observation.code",
            "Observation.interpretation",
            "Observation.interpretation.coding"
        ]
    );
    let elements = observation.differential_elements();

    let code = &elements[1];
    assert_eq!(code.fixed, None);

    assert_eq!(elements[2].fixed, None);
    assert_eq!(
        elements[3].fixed,
        Some(FixedValue::Coding(Coding::new(
            Some("http://loinc.org"),
            "29463-7"
        )))
    );
    Ok(())
}
