// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Result};
use structmap::*;
use test_generator::test_resources;

fn parse(text: &str) -> Result<Mapping> {
    Engine::new().parse("case.map".to_string(), text.to_string())
}

fn render_round_trip(file: &str) -> Result<()> {
    let engine = Engine::new();
    let mapping = engine.parse_file(file)?;
    let first = engine.render(&mapping);
    let reparsed = engine.parse(format!("{file} (rendered)"), first.clone())?;
    let second = engine.render(&reparsed);
    if first != second {
        bail!(
            "rendering is not stable\n{}",
            prettydiff::diff_lines(&first, &second)
        );
    }
    if reparsed != mapping {
        bail!("rendered text parses to a different mapping:\n{first}");
    }
    Ok(())
}

#[test_resources("tests/parser/cases/*.map")]
fn round_trip(file: &str) {
    if let Err(e) = render_round_trip(file) {
        panic!("{file}: {e}");
    }
}

#[test]
fn canonical_text() -> Result<()> {
    let engine = Engine::new();
    let mapping = engine.parse_file("tests/parser/cases/tutorial.map")?;
    assert_eq!(
        engine.render(&mapping),
        r##"map "http://example.org/StructureMap/tutorial" = "tutorial"

uses "http://example.org/StructureDefinition/Legacy" as source // legacy record
uses "http://hl7.org/fhir/StructureDefinition/Patient" as target

group tutorial // entry point
  input src : Legacy as source;
  input tgt : Patient as target;

  dob: for src.dob as d make tgt.birthDate = d
  name: for src.surname as s make
      tgt.name as n,
      n.family = s
  gender: for src.sex as x make tgt.gender = translate(x, "#sex", "code")
  tests: for src.test as t then {
    code: for t.code as c make tgt.active = true
  }

endgroup
"##
    );
    Ok(())
}

#[test]
fn targets_on_one_line() -> Result<()> {
    let mut engine = Engine::new();
    engine.set_render_options(RenderOptions {
        multiple_targets_one_line: true,
    });
    let mapping = engine.parse_file("tests/parser/cases/tutorial.map")?;
    assert!(engine
        .render(&mapping)
        .contains("  name: for src.surname as s make tgt.name as n, n.family = s\n"));
    Ok(())
}

#[test]
fn structure() -> Result<()> {
    let mapping = Engine::new().parse_file("tests/parser/cases/transforms.map")?;
    assert_eq!(mapping.url, "http://example.org/StructureMap/transforms");
    assert_eq!(mapping.imports.len(), 2);
    assert_eq!(mapping.structures[2].mode, ModelMode::Produced);
    assert_eq!(mapping.groups.len(), 2);

    let shared = mapping.group("shared").expect("group shared");
    assert_eq!(shared.extends.as_deref(), Some("base"));
    assert_eq!(shared.inputs[1].type_name, None);

    let main = &mapping.groups[0];
    let entry = &main.rules[1];
    let source = &entry.sources[0];
    assert_eq!(source.type_name.as_deref(), Some("BackboneElement"));
    assert_eq!(
        (source.min.as_deref(), source.max.as_deref()),
        (Some("0"), Some("*"))
    );
    assert_eq!(source.list_mode, Some(SourceListMode::First));
    assert_eq!(source.condition.as_deref(), Some("code.exists()"));
    assert_eq!(source.check.as_deref(), Some("status != 'x'"));
    assert_eq!(entry.targets.len(), 3);
    assert_eq!(entry.documentation.as_deref(), Some("nested rules"));
    assert_eq!(entry.rules.len(), 6);

    let result = &entry.rules[1];
    assert!(!result.sources[0].required);
    assert_eq!(result.sources[0].list_mode, Some(SourceListMode::OnlyOne));
    assert_eq!(result.targets[0].transform, Some(TransformKind::Evaluate));

    let flag = &entry.rules[5].targets[0];
    assert_eq!(flag.list_modes, vec![TargetListMode::Share]);
    assert_eq!(flag.list_rule_id.as_deref(), Some("flags"));

    let names = &main.rules[2];
    let literals: Vec<_> = names.targets[2..]
        .iter()
        .map(|t| t.parameters[0].clone())
        .collect();
    assert_eq!(
        literals,
        vec![
            Parameter::Integer(12),
            Parameter::Decimal("-3.5".to_string()),
            Parameter::Boolean(false),
        ]
    );
    assert_eq!(names.targets[1].context, None);
    assert_eq!(names.targets[1].variable.as_deref(), Some("id"));

    let deps = &main.rules[3];
    let groups: Vec<_> = deps.dependents.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(groups, ["shared", "other"]);
    assert_eq!(deps.documentation.as_deref(), Some("two groups"));

    assert_eq!(main.rules[4].sources[0].element.as_deref(), Some("*"));
    Ok(())
}

#[test]
fn concept_map_groups() -> Result<()> {
    let mapping = Engine::new().parse_file("tests/parser/cases/conceptmap.map")?;
    let cm = mapping.concept_map("#sex").expect("concept map");
    assert_eq!(cm.id, "sex");
    assert_eq!(cm.groups.len(), 2);

    let gender = &cm.groups[0];
    assert_eq!(
        gender.target.as_deref(),
        Some("http://hl7.org/fhir/administrative-gender")
    );
    let codes: Vec<_> = gender.elements.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, ["M", "F", "U", "X"]);
    assert_eq!(gender.elements[1].targets[0].comment.as_deref(), Some("exact"));
    assert_eq!(gender.elements[2].targets[0].code, None);
    assert_eq!(
        gender.elements[2].targets[0].equivalence,
        Equivalence::Unmatched
    );

    let other = &cm.groups[1];
    let codes: Vec<_> = other.elements.iter().map(|e| e.code.as_str()).collect();
    assert_eq!(codes, ["X", "9.5"]);
    assert_eq!(
        other.elements[0].targets[0].code.as_deref(),
        Some("x-ray")
    );
    Ok(())
}

#[test]
fn equivalence_operators() -> Result<()> {
    for eq in Equivalence::ALL {
        let entry = match eq {
            Equivalence::Unmatched => "s:a --".to_string(),
            _ => format!("s:a {} t:b", eq.operator()),
        };
        let text = format!(
            "map \"u\" = \"n\"\n\nconceptmap \"#m\" {{\n  prefix s = \"http://s\"\n  prefix t = \"http://t\"\n\n  {entry}\n}}\n\ngroup g\nendgroup\n"
        );
        let mapping = parse(&text)?;
        let target = &mapping.concept_maps[0].groups[0].elements[0].targets[0];
        assert_eq!(target.equivalence, eq, "{entry}");
        assert!(
            Engine::new().render(&mapping).contains(&format!("  {entry}\n")),
            "{entry}"
        );
    }
    Ok(())
}

fn parse_error(text: &str) -> Result<MapError> {
    match parse(text) {
        Ok(_) => bail!("parsed without error:\n{text}"),
        Err(e) => match e.downcast_ref::<MapError>() {
            Some(m) => Ok(m.clone()),
            None => bail!("not a mapping error: {e}"),
        },
    }
}

#[test]
fn error_location() -> Result<()> {
    let err = parse_error("map \"u\" = \"n\"\n\ngroup g\n  input src as sauce\nendgroup\n")?;
    let MapError::Parse {
        file,
        line,
        col,
        message,
        rendered,
    } = err
    else {
        bail!("expected a parse error, got {err:?}");
    };
    assert_eq!((file.as_str(), line, col), ("case.map", 4, 16));
    assert_eq!(message, "expecting `source` or `target`");
    assert_eq!(
        rendered,
        "\n--> case.map:4:16\n  |\n4 |   input src as sauce\n  |                ^\nerror: expecting `source` or `target`"
    );
    Ok(())
}

#[test]
fn parse_errors() -> Result<()> {
    let header = "map \"u\" = \"n\"\n\n";
    for (text, msg) in [
        (String::new(), "map input cannot be empty"),
        ("// nothing\n".to_string(), "map input cannot be empty"),
        ("group g\nendgroup\n".to_string(), "expecting `map` at start of mapping"),
        ("map u = \"n\"".to_string(), "expecting quoted url, found `u`"),
        (format!("{header}group g\n"), "premature termination expecting `endgroup`"),
        (
            format!("{header}conceptmap \"m\" {{\n}}\ngroup g\nendgroup\n"),
            "concept map identifier must start with #",
        ),
        (
            format!("{header}conceptmap \"#m\" {{\n  x:a == y:b\n}}\ngroup g\nendgroup\n"),
            "unknown prefix `x`",
        ),
        (
            format!("{header}conceptmap \"#m\" {{\n  prefix s = \"http://s\"\n  s:a <> s:b\n}}\ngroup g\nendgroup\n"),
            "unknown equivalence token `<`",
        ),
        (
            format!("{header}uses \"http://x\" as input\ngroup g\nendgroup\n"),
            "expecting one of source, queried, target, produced",
        ),
        (
            format!("{header}group g\n  r: for src make t.x = shift(s)\nendgroup\n"),
            "unknown transform `shift`",
        ),
        (
            format!("{header}group g\n  r: for src then {{\n"),
            "premature termination expecting `}` in nested group",
        ),
        (
            format!("{header}group g\n  r: for src.x : string 1.. as v\nendgroup\n"),
            "expecting `*` as maximum cardinality",
        ),
    ] {
        let err = parse_error(&text)?;
        assert!(err.to_string().contains(msg), "`{err}` does not contain `{msg}`");
    }
    Ok(())
}

#[test]
fn documentation_survives_rendering() -> Result<()> {
    let mapping = parse(
        "map \"u\" = \"n\" // ignored\n\ngroup g // the group\n  input s as source // input\n  r: for s.a as a // rule\nendgroup\n",
    )?;
    let group = &mapping.groups[0];
    assert_eq!(group.documentation.as_deref(), Some("the group"));
    assert_eq!(group.inputs[0].documentation.as_deref(), Some("input"));
    assert_eq!(group.rules[0].documentation.as_deref(), Some("rule"));
    assert_eq!(
        unstable::render_rule(&group.rules[0]),
        "r: for s.a as a // rule\n"
    );
    Ok(())
}

#[test]
fn nested_rule_documentation_after_closing_brace() -> Result<()> {
    let text = "map \"u\" = \"n\"\n\ngroup g\n  input s as source\n  input t as target\n  r: for s.a as a then {\n    x: for a.b as b make t.b = b\n  } // closing\nendgroup\n";
    let mapping = parse(text)?;
    let rule = &mapping.groups[0].rules[0];
    assert_eq!(rule.documentation.as_deref(), Some("closing"));
    assert_eq!(rule.rules.len(), 1);

    // Rendered on the opening line, the comment still belongs to the rule.
    let reparsed = parse(&unstable::render(&mapping))?;
    assert_eq!(reparsed, mapping);
    Ok(())
}
