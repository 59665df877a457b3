//! Debian control-paragraph parser.
//!
//! Builds on the teacher's `nom`-based single-line `key: value` parser
//! (`parser.rs` in the original crate), extended with continuation-line
//! folding: a line beginning with whitespace continues the previous
//! field's value, joined by `\n`, matching `python-debian`'s `deb822`
//! paragraph parsing that `importpkg.py` relies on.

use std::collections::HashMap;

use nom::{
    bytes::complete::{tag, take_until},
    character::complete::{char, space0},
    combinator::{map, verify},
    multi::many1,
    sequence::{separated_pair, terminated},
    IResult, Parser,
};

use crate::error::ImportError;

#[inline]
fn key_name(input: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(take_until(":"), |input: &[u8]| {
        !input.is_empty() && input[0] != b'\n'
    })
    .parse(input)
}

#[inline]
fn separator(input: &[u8]) -> IResult<&[u8], ()> {
    map((char(':'), space0), |_| ()).parse(input)
}

#[inline]
fn single_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_until("\n")(input)
}

#[inline]
fn continuation_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, _) = nom::character::complete::one_of(" \t")(input)?;
    single_line(rest)
}

#[inline]
fn key_value(input: &[u8]) -> IResult<&[u8], (&[u8], Vec<&[u8]>)> {
    let (input, (key, first)) = separated_pair(key_name, separator, single_line).parse(input)?;
    let (input, _) = tag("\n")(input)?;
    let (input, continuations) = many1(terminated(continuation_line, tag("\n")))
        .parse(input)
        .unwrap_or((input, Vec::new()));
    let mut lines = vec![first];
    lines.extend(continuations);
    Ok((input, (key, lines)))
}

/// One `Field: value` paragraph, continuation lines folded in and joined
/// by `\n`. Keys are matched case-sensitively, as Debian control fields
/// conventionally appear (`Package`, `Version`, ...).
pub struct ControlParagraph {
    fields: HashMap<String, String>,
}

impl ControlParagraph {
    /// Parse the first paragraph found in `input`, terminated by a blank
    /// line or end of input.
    pub fn parse(input: &[u8]) -> Result<Self, ImportError> {
        let (_, pairs) = many1(key_value)
            .parse(input)
            .map_err(|e| ImportError::BadControl(format!("{e:?}")))?;
        let mut fields = HashMap::new();
        for (key, lines) in pairs {
            let key = std::str::from_utf8(key)
                .map_err(|e| ImportError::BadControl(e.to_string()))?
                .to_string();
            let value = lines
                .iter()
                .map(|line| std::str::from_utf8(line).map_err(|e| ImportError::BadControl(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?
                .join("\n");
            fields.insert(key, value);
        }
        Ok(ControlParagraph { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    pub fn require(&self, key: &str) -> Result<String, ImportError> {
        self.get(key)
            .map(|s| s.to_string())
            .ok_or_else(|| ImportError::MissingField(key.to_string()))
    }
}

/// Splits a `Packages`-style listing into its constituent paragraphs on
/// blank-line boundaries, so each can be handed to `ControlParagraph::parse`
/// on its own — `parse` itself only ever looks at the first paragraph it
/// finds, matching `deb822.Packages.iter_paragraphs`'s one-stanza-at-a-time
/// iteration in `importpkg.py`/`autoimport.py`.
pub fn split_paragraphs(input: &[u8]) -> Vec<Vec<u8>> {
    let lines: Vec<&[u8]> = input.split(|&b| b == b'\n').collect();
    lines
        .split(|line| line.is_empty())
        .filter(|group| !group.is_empty())
        .map(|group| {
            let mut paragraph = group.join(&b'\n');
            paragraph.push(b'\n');
            paragraph
        })
        .collect()
}

/// Extract the single-alternative dependency names out of a `Depends:`
/// style field. Per §4.6, an alternative group (`a | b`) contributes
/// nothing unless it names exactly one package; version constraints in
/// parentheses and architecture qualifiers in brackets are stripped.
pub fn single_alternative_depends(field_value: &str) -> Vec<String> {
    field_value
        .split(',')
        .filter_map(|group| {
            let alternatives: Vec<&str> = group.split('|').map(|s| s.trim()).collect();
            if alternatives.len() != 1 || alternatives[0].is_empty() {
                return None;
            }
            Some(dependency_name(alternatives[0]))
        })
        .collect()
}

fn dependency_name(token: &str) -> String {
    token
        .split(['(', '['])
        .next()
        .unwrap_or(token)
        .trim()
        .to_string()
}
