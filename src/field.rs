use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::space0;
use nom::combinator::{opt, rest};
use nom::sequence::preceded;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::bytes::trim;
use crate::types::{parse_modifiers, Modifier};

/// Struct representing a Java field
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmaliField {
    /// Name of the field
    pub name: String,
    /// Any modifiers
    pub modifiers: Vec<Modifier>,
    /// JNI type descriptor, e.g. `Ljava/lang/String;`
    pub field_type: String,
    /// If an initialiser is included
    pub initial_value: Option<String>,
    /// 1-based line of the `.field` directive
    pub line_nr: usize,
}

impl SmaliField {
    /// Parses a `.field` line, e.g.
    ///   .field private static final TAG:Ljava/lang/String; = "Main"
    /// Returns `None` for anything that is not a field declaration.
    pub fn parse(line: &[u8], line_nr: usize) -> Option<SmaliField> {
        parse_field(trim(line)).ok().map(|(_, (modifiers, name, field_type, initial_value))| SmaliField {
            name: String::from_utf8_lossy(name).to_string(),
            modifiers,
            field_type: String::from_utf8_lossy(field_type).to_string(),
            initial_value: initial_value.map(|v| String::from_utf8_lossy(v).to_string()),
            line_nr,
        })
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(&Modifier::Static)
    }

    pub fn is_final(&self) -> bool {
        self.modifiers.contains(&Modifier::Final)
    }
}

type FieldParts<'a> = (Vec<Modifier>, &'a [u8], &'a [u8], Option<&'a [u8]>);

fn parse_field(input: &[u8]) -> IResult<&[u8], FieldParts<'_>> {
    let (input, _) = tag(".field")(input)?;
    let (input, modifiers) = parse_modifiers(input)?;
    let (input, _) = space0(input)?;
    let (input, name) = take_while1(|c: u8| c != b':' && c > 0x20)(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, field_type) = take_while1(|c: u8| c > 0x20 && c != b'=')(input)?;
    let (input, initial_value) = opt(preceded(space0, preceded(tag("="), rest)))(input)?;
    Ok((input, (modifiers, name, field_type, initial_value.map(trim))))
}
