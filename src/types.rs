use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::space0;
use nom::multi::many0;
use nom::sequence::{delimited, terminated};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Simple enum to represent Java method, field and class modifiers
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Static,
    Final,
    Synchronized,
    Volatile,
    Bridge,
    Transient,
    Varargs,
    Native,
    Interface,
    Abstract,
    Strict,
    Synthetic,
    Annotation,
    Enum,
    Constructor,
    DeclaredSynchronized,
}

impl FromStr for Modifier {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "public" => Self::Public,
            "protected" => Self::Protected,
            "private" => Self::Private,
            "static" => Self::Static,
            "final" => Self::Final,
            "abstract" => Self::Abstract,
            "interface" => Self::Interface,
            "synthetic" => Self::Synthetic,
            "transient" => Self::Transient,
            "volatile" => Self::Volatile,
            "synchronized" => Self::Synchronized,
            "declared-synchronized" => Self::DeclaredSynchronized,
            "native" => Self::Native,
            "varargs" => Self::Varargs,
            "annotation" => Self::Annotation,
            "enum" => Self::Enum,
            "strict" => Self::Strict,
            "bridge" => Self::Bridge,
            "constructor" => Self::Constructor,
            _ => return Err(()),
        })
    }
}

/// Parses the access flags following `.class`, `.field` or `.method`. The
/// `constructor` keyword is consumed like any other modifier.
pub(crate) fn parse_modifiers(input: &[u8]) -> IResult<&[u8], Vec<Modifier>> {
    let (input, mods) = many0(delimited(
        space0,
        terminated(
            alt((
                alt((
                    tag("public"),
                    tag("protected"),
                    tag("private"),
                    tag("static"),
                    tag("final"),
                    tag("abstract"),
                    tag("interface"),
                    tag("synthetic"),
                    tag("transient"),
                    tag("volatile"),
                )),
                alt((
                    tag("declared-synchronized"),
                    tag("synchronized"),
                    tag("native"),
                    tag("varargs"),
                    tag("annotation"),
                    tag("enum"),
                    tag("strict"),
                    tag("bridge"),
                    tag("constructor"),
                )),
            )),
            tag(" "),
        ),
        space0,
    ))(input)?;
    let modifiers = mods
        .into_iter()
        .filter_map(|m| std::str::from_utf8(m).ok().and_then(|m| Modifier::from_str(m).ok()))
        .collect();
    Ok((input, modifiers))
}
