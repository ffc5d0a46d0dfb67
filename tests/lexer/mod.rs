// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::{bail, Result};
use std::env;
use structmap::unstable::*;
use test_generator::test_resources;

fn get_tokens(source: &Source) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut lex = Lexer::new(source);
    loop {
        let tok = lex.next_token()?;
        tokens.push(tok.clone());
        if tok.0 == TokenKind::Eof {
            break;
        }
    }

    Ok(tokens)
}

fn check_loc(tok: &Token) -> Result<()> {
    let msg = tok.1.source.message(tok.1.line, tok.1.col, "", "");
    let lines: Vec<&str> = msg.split('\n').collect();
    let source_line = lines[3];
    let caret_line = lines[4];
    let mut idx = 0usize;
    let mut source_idx = idx;
    loop {
        match source_idx < source_line.len() && idx < caret_line.len() {
            true => (),
            // Handle Eof
            false if tok.0 == TokenKind::Eof && source_idx >= source_line.len() => return Ok(()),
            _ => bail!("could not find caret for {tok:#?} {msg}"),
        }
        match &caret_line[idx..idx + 1] {
            "^" => {
                let span_str = tok.1.text();
                let source_str = &source_line[source_idx..];
                assert!(
                    source_str.starts_with(span_str) || span_str.starts_with(source_str),
                    "location mismatch for {tok:#?} {msg}\n{span_str}\n{source_str}"
                );
                return Ok(());
            }
            _ if &source_line[source_idx..source_idx + 1] == "\t" => idx += 4,
            _ => idx += 1,
        }
        source_idx += 1;
    }
}

fn lex_file(file: &str, verbose: bool) -> Result<()> {
    let source = Source::from_file(file)?;
    for tok in get_tokens(&source)? {
        if verbose {
            println!("{tok:?}");
        }
        check_loc(&tok)?;
    }
    Ok(())
}

#[test]
#[ignore = "intended for lexing a single file"]
fn one_file() -> Result<()> {
    let mut file = String::default();
    let mut verbose = false;
    for a in env::args() {
        if a.ends_with(".map") {
            file = a.clone();
        }
        if matches!(a.as_str(), "verbose") {
            verbose = true;
        }
    }

    if file.is_empty() {
        bail!("missing <file.map>")
    }
    lex_file(&file, verbose)
}

#[test_resources("tests/parser/cases/*.map")]
fn lex(file: &str) {
    if let Err(e) = lex_file(file, false) {
        panic!("{file}: {e}");
    }
}

fn kinds(text: &str) -> Result<Vec<(TokenKind, String)>> {
    let source = Source::from_contents("test.map".to_string(), text.to_string())?;
    Ok(get_tokens(&source)?
        .iter()
        .map(|t| (t.0, t.1.text().to_string()))
        .collect())
}

#[test]
fn two_character_symbols() -> Result<()> {
    let tokens = kinds("== != <= >= <- >- -- .. = ~ < >")?;
    let texts: Vec<_> = tokens.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(
        texts,
        ["==", "!=", "<=", ">=", "<-", ">-", "--", "..", "=", "~", "<", ">", ""]
    );
    assert!(tokens[..12].iter().all(|(k, _)| *k == TokenKind::Symbol));
    Ok(())
}

#[test]
fn cardinality_is_not_a_decimal() -> Result<()> {
    let tokens = kinds("0..1 2.5")?;
    let expected = [
        (TokenKind::Number, "0"),
        (TokenKind::Symbol, ".."),
        (TokenKind::Number, "1"),
        (TokenKind::Number, "2.5"),
        (TokenKind::Eof, ""),
    ];
    assert_eq!(tokens.len(), expected.len());
    for ((k, t), (ek, et)) in tokens.iter().zip(expected) {
        assert_eq!((*k, t.as_str()), (ek, et));
    }
    Ok(())
}

#[test]
fn strings_exclude_quotes() -> Result<()> {
    let source = Source::from_contents(
        "test.map".to_string(),
        r#"'single' "dou\"ble""#.to_string(),
    )?;
    let tokens = get_tokens(&source)?;
    assert_eq!(tokens[0].0, TokenKind::String);
    assert_eq!(tokens[0].1.text(), "single");
    assert_eq!(tokens[0].1.col, 2);
    assert_eq!(tokens[1].1.text(), r#"dou\"ble"#);
    assert_eq!(unescape(tokens[1].1.text()), "dou\"ble");
    Ok(())
}

#[test]
fn comments() -> Result<()> {
    let tokens = kinds("a // trailing\n/* block\n comment */ b")?;
    assert_eq!(tokens[1], (TokenKind::Comment, "// trailing".to_string()));
    assert_eq!(tokens[2], (TokenKind::Ident, "b".to_string()));

    let source = Source::from_contents("test.map".to_string(), "/* a\nb */ c".to_string())?;
    let tok = &get_tokens(&source)?[0];
    assert_eq!((tok.1.line, tok.1.col), (2, 6));
    Ok(())
}

#[test]
fn lexer_errors() -> Result<()> {
    for (text, msg) in [
        ("'open", "unmatched '"),
        ("\"open\nclose\"", "unmatched \""),
        ("/* never closed", "unterminated comment"),
        ("a ? b", "invalid character"),
        ("'\\q'", "invalid escape sequence"),
        ("a\rb", "\\r must be followed by \\n"),
    ] {
        let source = Source::from_contents("test.map".to_string(), text.to_string())?;
        match get_tokens(&source) {
            Ok(_) => bail!("`{text}` lexed without error"),
            Err(e) => assert!(
                e.to_string().contains(msg),
                "`{text}`: `{e}` does not contain `{msg}`"
            ),
        }
    }
    Ok(())
}

#[test]
fn escape_round_trip() {
    for s in ["plain", "it's", "say \"hi\"", "back\\slash", "line\nbreak\ttab"] {
        assert_eq!(unescape(&escape(s, '"')), s);
        assert_eq!(unescape(&escape(s, '\'')), s);
    }
}

#[test]
fn debug_truncates_on_char_boundary() -> Result<()> {
    let source = Source::from_contents(
        "test.map".to_string(),
        "\"Ærøskøbing Ærøskøbing Ærøskøbing Ærøskøbing\"".to_string(),
    )?;
    let tokens = get_tokens(&source)?;
    assert_eq!(tokens[0].0, TokenKind::String);
    let debug = format!("{:?}", tokens[0].1);
    assert!(
        debug.ends_with("\"Ærøskøbing Ærøskøbing Ærøskøbing...\""),
        "{debug}"
    );
    Ok(())
}
