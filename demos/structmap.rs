// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use structmap::unstable::{Lexer, Source, TokenKind};
use structmap::*;
use tracing_subscriber::EnvFilter;

fn read_file(file: &str) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {file}"))
}

fn read_value(file: &str) -> Result<serde_json::Value> {
    let contents = read_file(file)?;
    if file.ends_with(".json") {
        Ok(serde_json::from_str(&contents)?)
    } else if file.ends_with(".yaml") || file.ends_with(".yml") {
        Ok(serde_yaml::from_str(&contents)?)
    } else {
        bail!("Unsupported data file `{file}`. Must be json or yaml.")
    }
}

fn load_context(definitions: &[String]) -> Result<Rc<MemoryContext>> {
    let mut ctx = MemoryContext::new();
    for file in definitions {
        ctx.add_file(file)?;
    }
    Ok(Rc::new(ctx))
}

fn load_engine(
    ctx: Rc<MemoryContext>,
    imports: &[String],
    config: Option<String>,
) -> Result<Engine> {
    let mut engine = Engine::with_context(ctx);
    if let Some(config) = config {
        let options: EngineOptions = serde_json::from_value(read_value(&config)?)
            .with_context(|| format!("Invalid engine options in {config}"))?;
        engine.set_options(options);
    }
    for file in imports {
        let mapping = engine.parse_file(file)?;
        engine.add_mapping(mapping);
    }
    Ok(engine)
}

/// Prints progress messages from the engine.
struct ConsoleServices;

impl TransformerServices for ConsoleServices {
    fn log(&self, message: &str) {
        eprintln!("{message}");
    }
}

fn map_lex(file: String, verbose: bool) -> Result<()> {
    let source = Source::from_file(file)?;
    let mut lexer = Lexer::new(&source);

    // Read tokens until EOF.
    loop {
        let token = lexer.next_token()?;
        if token.0 == TokenKind::Eof {
            break;
        }

        if verbose {
            // Print each token's line and mark with with ^.
            println!("{}", token.1.message("", ""));
        }

        println!("{token:?}");
    }
    Ok(())
}

fn map_parse(file: String, render: bool) -> Result<()> {
    let engine = Engine::new();
    let mapping = engine.parse_file(file)?;
    if render {
        print!("{}", engine.render(&mapping));
    } else {
        println!("{mapping:#?}");
    }
    Ok(())
}

fn map_transform(
    definitions: &[String],
    imports: &[String],
    config: Option<String>,
    map: String,
    source: String,
    target: String,
    log: bool,
) -> Result<()> {
    let ctx = load_context(definitions)?;
    let mut engine = load_engine(ctx.clone(), imports, config)?;
    if log {
        engine.set_services(Some(Rc::new(ConsoleServices)));
    }
    let mapping = engine.parse_file(&map)?;

    let source = Element::from_json_typed(&read_value(&source)?, ctx.as_ref())?;
    let target = ctx.create_instance(&target)?;
    engine.transform(&TransformContext::default(), source, &mapping, target.clone())?;

    println!("{}", serde_json::to_string_pretty(&target.to_json())?);
    Ok(())
}

fn map_analyse(definitions: &[String], map: String, html: bool) -> Result<()> {
    let ctx = load_context(definitions)?;
    let engine = Engine::with_context(ctx);
    let mapping = engine.parse_file(&map)?;
    let analysis = engine.analyse(&TransformContext::default(), &mapping)?;

    if html {
        println!("{}", analysis.summary.to_html());
    } else {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    }
    Ok(())
}

fn map_generate(file: String) -> Result<()> {
    let sd: StructureDefinition = serde_json::from_value(read_value(&file)?)
        .with_context(|| format!("{file} is not a structure definition"))?;
    let engine = Engine::new();
    match engine.generate_map_from_mappings(&sd)? {
        Some(mapping) => print!("{}", engine.render(&mapping)),
        None => bail!("{} carries no mapping fragments", sd.url),
    }
    Ok(())
}

#[derive(Subcommand)]
enum MapCommand {
    /// Tokenize a mapping.
    Lex {
        /// Mapping file. With `--verbose` each token's line is shown too.
        file: String,
    },

    /// Parse a mapping.
    Parse {
        /// Mapping file.
        file: String,

        /// Print canonical text instead of the syntax tree.
        #[arg(long, short)]
        render: bool,
    },

    /// Run a mapping against a source instance.
    Transform {
        /// Definitions: structure definitions, value sets, code systems, concept maps or
        /// bundles of them. json or yaml.
        #[arg(long, short, value_name = "definitions.json")]
        definitions: Vec<String>,

        /// Mappings available to `imports`.
        #[arg(long, short, value_name = "library.map")]
        imports: Vec<String>,

        /// Engine options. json or yaml.
        #[arg(long, short, value_name = "options.yaml")]
        config: Option<String>,

        /// Print group and rule progress.
        #[arg(long, short)]
        log: bool,

        /// Mapping to run.
        map: String,

        /// Source instance. json or yaml.
        source: String,

        /// Type of the target instance.
        target: String,
    },

    /// Derive the profiles a mapping produces.
    Analyse {
        #[arg(long, short, value_name = "definitions.json")]
        definitions: Vec<String>,

        /// Print the summary table as html.
        #[arg(long)]
        html: bool,

        map: String,
    },

    /// Build a mapping from the fragments in a logical model.
    Generate {
        /// Structure definition. json or yaml.
        file: String,
    },
}

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Show debug logging. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: MapCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "structmap=debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        MapCommand::Lex { file } => map_lex(file, cli.verbose),
        MapCommand::Parse { file, render } => map_parse(file, render),
        MapCommand::Transform {
            definitions,
            imports,
            config,
            log,
            map,
            source,
            target,
        } => map_transform(&definitions, &imports, config, map, source, target, log),
        MapCommand::Analyse {
            definitions,
            html,
            map,
        } => map_analyse(&definitions, map, html),
        MapCommand::Generate { file } => map_generate(file),
    }
}
