// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Mapping, Narrative, PublicationStatus};
use crate::lexer::Source;
use crate::parser::Parser;
use crate::render::{escape_html, render};
use crate::schema::*;

use anyhow::{Context, Result};
use tracing::debug;

/// Uri identifying the mapping declaration that holds mapping-language fragments.
pub const LOGICAL_MAPPING_URI: &str = "http://hl7.org/fhir/logical";

fn logical_mapping_identity(sd: &StructureDefinition) -> Option<&str> {
    sd.mapping
        .iter()
        .find(|m| m.uri.as_deref() == Some(LOGICAL_MAPPING_URI))
        .map(|m| m.identity.as_str())
}

fn has_mapped_children(sd: &StructureDefinition, ed: &ElementDefinition, identity: &str) -> bool {
    sd.children_of(&ed.path)
        .any(|c| c.mapping_for(identity).is_some())
}

fn add_child_mappings(
    out: &mut String,
    identity: &str,
    indent: &str,
    sd: &StructureDefinition,
    ed: &ElementDefinition,
) {
    for child in sd.children_of(&ed.path) {
        let Some(map) = child.mapping_for(identity) else {
            continue;
        };
        out.push_str(&format!("{indent}  {}: {map}", child.path));
        if has_mapped_children(sd, child, identity) {
            out.push_str(" then {\n");
            add_child_mappings(out, identity, &format!("{indent}  "), sd, child);
            out.push_str(&format!("{indent}  }}"));
        }
        out.push('\n');
    }
}

/// Build a mapping from the mapping-language fragments a logical model carries on its
/// elements. `None` when the model has no such fragments or lacks the header and
/// footer extensions.
pub fn generate_map_from_mappings(sd: &StructureDefinition) -> Result<Option<Mapping>> {
    let Some(identity) = logical_mapping_identity(sd) else {
        return Ok(None);
    };
    let (Some(prefix), Some(suffix)) = (
        sd.extension_string(EXT_MAPPING_PREFIX),
        sd.extension_string(EXT_MAPPING_SUFFIX),
    ) else {
        return Ok(None);
    };

    let mut text = String::from(prefix);
    if let Some(root) = sd.snapshot_elements().first() {
        if let Some(m) = root.mapping_for(identity) {
            text.push_str(m);
            text.push('\n');
        }
        add_child_mappings(&mut text, identity, "", sd, root);
    }
    text.push('\n');
    text.push_str(suffix);
    text.push('\n');
    debug!(structure = %sd.url, "generated mapping text");

    let source = Source::from_contents(format!("{}.map", sd.id), text)?;
    let mut map = Parser::new(&source)?
        .parse()
        .with_context(|| format!("mapping generated from {} does not parse", sd.url))?;

    map.id = Some(map.url.rsplit('/').next().unwrap_or_default().to_string());
    if map.status.is_none() {
        map.status = Some(PublicationStatus::Draft);
    }
    map.text = Some(Narrative {
        status: "generated".to_string(),
        div: format!("<div><pre>{}</pre></div>", escape_html(&render(&map))),
    });
    Ok(Some(map))
}
