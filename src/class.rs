use log::{debug, warn};
use nom::bytes::complete::{tag, take_until};
use nom::character::complete::{char, space0};
use nom::combinator::rest;
use nom::sequence::delimited;
use nom::IResult;
use once_cell::unsync::OnceCell;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::basic_block::BasicBlock;
use crate::bytes::{contains, slashes_to_dots, split_lines, trim};
use crate::code_line::CodeLine;
use crate::config::Config;
use crate::dfs;
use crate::error::{CfgError, SmaliError};
use crate::field::SmaliField;
use crate::instruction::InstructionType;
use crate::method::Method;
use crate::types::{parse_modifiers, Modifier};

/// Struct representing a parsed smali class: its lines, methods with their
/// control flow graphs, fields and class level metadata.
///
/// All lines of the file are kept in one arena; methods and basic blocks refer
/// to them by index.
///
/// # Examples
///
/// ```
///  use smali_cfg::class::SmaliClass;
///
///  let c = SmaliClass::from_smali(".class public Lcom/example/Main;\n.super Ljava/lang/Object;\n").unwrap();
///  assert_eq!(c.class_name(), "com.example.Main");
///  assert_eq!(c.package(), "com.example");
/// ```
#[derive(Debug)]
pub struct SmaliClass {
    file_path: PathBuf,
    label: usize,
    lines: Vec<CodeLine>,
    methods: Vec<Method>,
    fields: Vec<SmaliField>,
    modifiers: Vec<Modifier>,
    class_name: String,
    package: String,
    super_class: Option<String>,
    interfaces: Vec<String>,
    source_file: Option<String>,
    is_ad_framework: bool,
    obfuscated: bool,
    entropy: OnceCell<f64>,
}

/// Which kind of body the next line belongs to. Lines inside annotations,
/// array payloads and switch tables are never instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Body,
    Annotation(usize),
    ArrayData,
    SwitchTable,
}

impl Region {
    /// Forced classification of `line`, if any, and the region of the following line.
    fn step(self, line: &[u8]) -> (Option<InstructionType>, Region) {
        match self {
            Region::Body => {
                let next = if line.starts_with(b".annotation") || line.starts_with(b".subannotation") {
                    Region::Annotation(1)
                } else if line.starts_with(b".array-data") {
                    Region::ArrayData
                } else if line.starts_with(b".packed-switch") || line.starts_with(b".sparse-switch") {
                    Region::SwitchTable
                } else {
                    Region::Body
                };
                (None, next)
            }
            Region::Annotation(depth) => {
                let depth = if line.starts_with(b".end annotation") || line.starts_with(b".end subannotation") {
                    depth - 1
                } else if line.starts_with(b".annotation") || contains(line, b".subannotation") {
                    depth + 1
                } else {
                    depth
                };
                let next = if depth == 0 { Region::Body } else { Region::Annotation(depth) };
                (Some(InstructionType::Annotation), next)
            }
            Region::ArrayData => {
                let next = if line.starts_with(b".end array-data") { Region::Body } else { Region::ArrayData };
                (Some(InstructionType::Data), next)
            }
            Region::SwitchTable => {
                let next = if line.starts_with(b".end packed-switch") || line.starts_with(b".end sparse-switch") {
                    Region::Body
                } else {
                    Region::SwitchTable
                };
                (Some(InstructionType::Data), next)
            }
        }
    }
}

impl SmaliClass {
    /// Reads and parses a smali file. The file is read at most once and never
    /// beyond `config.max_file_size` bytes.
    pub fn parse(path: &Path, config: &Config, label: usize) -> Result<SmaliClass, SmaliError> {
        let bytes = read_bounded(path, config.max_file_size)?;
        SmaliClass::from_bytes(&bytes, path, config, label)
    }

    /// Creates a SmaliClass from a string holding a smali document, with the default configuration
    pub fn from_smali(s: &str) -> Result<SmaliClass, SmaliError> {
        SmaliClass::from_bytes(s.as_bytes(), Path::new(""), &Config::default(), 0)
    }

    /// Parses an in-memory smali document. `path` is only recorded and used for
    /// the ad framework check.
    pub fn from_bytes(bytes: &[u8], path: &Path, config: &Config, label: usize) -> Result<SmaliClass, SmaliError> {
        let mut lines = read_lines(bytes, path, config)?;
        let (groups, other) = group_methods(&lines)?;

        let mut methods = Vec::with_capacity(groups.len());
        for (method_label, group) in groups.into_iter().enumerate() {
            let mut method = Method::new(method_label, &lines, group);
            if let Err(e) = method.generate_bbs(&lines) {
                warn!("{}: no control flow for method: {}", path.display(), e);
            }
            dfs::label(&mut method);
            for ix in method.lines() {
                lines[*ix].set_method(method_label);
            }
            methods.push(method);
        }

        let mut class = SmaliClass {
            file_path: path.to_path_buf(),
            label,
            lines,
            methods,
            fields: vec![],
            modifiers: vec![],
            class_name: String::new(),
            package: String::new(),
            super_class: None,
            interfaces: vec![],
            source_file: None,
            is_ad_framework: false,
            obfuscated: false,
            entropy: OnceCell::new(),
        };
        let descriptor = class.parse_other_lines(&other)?;
        class.is_ad_framework = config.is_ad_framework_package(path)
            || config.is_ad_framework_package(Path::new(&*String::from_utf8_lossy(class_path(&descriptor))));

        debug!(
            "Parsed {} ({} lines, {} methods, {} without blocks)",
            class.class_name,
            class.lines.len(),
            class.methods.len(),
            class.empty_methods().count()
        );
        Ok(class)
    }

    /// Splits the lines outside of methods into fields and class directives.
    /// Returns the raw class descriptor.
    fn parse_other_lines(&mut self, other: &[usize]) -> Result<Vec<u8>, SmaliError> {
        let mut descriptor = None;
        for ix in other {
            let line = &self.lines[*ix];
            if line.peek_type() != InstructionType::NotYetParsed {
                continue;
            }
            let bytes = line.bytes();
            if bytes.starts_with(b".field") {
                if let Some(field) = SmaliField::parse(bytes, line.line_nr()) {
                    self.fields.push(field);
                }
            } else if let Ok((_, (modifiers, name))) = parse_class_line(bytes) {
                self.modifiers = modifiers;
                descriptor = Some(name.to_vec());
            } else if let Ok((_, name)) = parse_directive(".super", bytes) {
                self.super_class = Some(slashes_to_dots(name));
            } else if let Ok((_, name)) = parse_directive(".implements", bytes) {
                self.interfaces.push(slashes_to_dots(name));
            } else if let Ok((_, name)) = parse_source_line(bytes) {
                self.source_file = Some(String::from_utf8_lossy(name).to_string());
            }
        }

        let descriptor = descriptor.ok_or_else(|| SmaliError::Class(err!("Missing .class directive")))?;
        self.class_name = slashes_to_dots(&descriptor);
        self.package = match self.class_name.rsplit_once('.') {
            Some((package, _)) => package.to_string(),
            None => String::new(),
        };
        Ok(descriptor)
    }

    /// Position of this class within its application.
    pub fn label(&self) -> usize {
        self.label
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Every line of the file, `.line` directives and metadata included.
    pub fn lines(&self) -> &[CodeLine] {
        &self.lines
    }

    pub fn line(&self, id: usize) -> Option<&CodeLine> {
        self.lines.get(id)
    }

    /// Methods that have basic blocks.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|m| !m.is_empty())
    }

    /// Native and abstract methods, and methods whose control flow could not be built.
    pub fn empty_methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|m| m.is_empty())
    }

    /// All methods in declaration order; a method's label is its index here.
    pub fn all_methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method(&self, label: usize) -> Option<&Method> {
        self.methods.get(label)
    }

    /// First method with the given name.
    pub fn find_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name() == name)
    }

    pub fn method_lines<'a>(&'a self, method: &'a Method) -> impl Iterator<Item = &'a CodeLine> + 'a {
        method.lines().iter().filter_map(move |ix| self.lines.get(*ix))
    }

    pub fn block_lines<'a>(&'a self, block: &'a BasicBlock) -> impl Iterator<Item = &'a CodeLine> + 'a {
        block.lines().iter().filter_map(move |ix| self.lines.get(*ix))
    }

    /// Last executable line of a block, skipping labels, directives and comments.
    pub fn last_instruction(&self, method: usize, block: usize) -> Option<&CodeLine> {
        let block = self.methods.get(method)?.block(block)?;
        block
            .lines()
            .iter()
            .rev()
            .filter_map(|ix| self.lines.get(*ix))
            .find(|line| line.is_code())
    }

    /// Identifier of a block that is unique across the application, `<class>-<method>-<block>`.
    pub fn unique_block_id(&self, method: usize, block: usize) -> String {
        format!("{}-{}-{}", self.label, method, block)
    }

    pub fn fields(&self) -> &[SmaliField] {
        &self.fields
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Fully qualified name, e.g. `com.example.Main`
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn simple_name(&self) -> &str {
        self.class_name.rsplit('.').next().unwrap_or(&self.class_name)
    }

    /// Package in dotted form, empty for the default package.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn super_class(&self) -> Option<&str> {
        self.super_class.as_deref()
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn is_ad_framework(&self) -> bool {
        self.is_ad_framework
    }

    pub fn is_obfuscated(&self) -> bool {
        self.obfuscated
    }

    pub fn set_obfuscated(&mut self, obfuscated: bool) {
        self.obfuscated = obfuscated;
    }

    /// Shannon entropy of the line bytes in bits per byte, computed on first use.
    pub fn entropy(&self) -> f64 {
        *self.entropy.get_or_init(|| {
            let mut counts = [0usize; 256];
            let mut total = 0usize;
            for line in &self.lines {
                for b in line.bytes() {
                    counts[*b as usize] += 1;
                }
                total += line.bytes().len();
            }
            if total == 0 {
                return 0.0;
            }
            counts
                .iter()
                .filter(|c| **c > 0)
                .map(|c| {
                    let p = *c as f64 / total as f64;
                    -p * p.log2()
                })
                .sum()
        })
    }

    /// Replaces the computed entropy with an externally derived value.
    pub fn set_entropy(&mut self, entropy: f64) {
        let cell = OnceCell::new();
        let _ = cell.set(entropy);
        self.entropy = cell;
    }
}

fn read_bounded(path: &Path, limit: u64) -> Result<Vec<u8>, SmaliError> {
    let io = |source| SmaliError::Io { path: path.to_path_buf(), source };
    let file = File::open(path).map_err(io)?;
    let mut bytes = vec![];
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(io)?;
    if bytes.len() as u64 > limit {
        return Err(SmaliError::SizeExceeded { path: path.to_path_buf(), limit });
    }
    Ok(bytes)
}

fn read_lines(bytes: &[u8], path: &Path, config: &Config) -> Result<Vec<CodeLine>, SmaliError> {
    let mut lines = vec![];
    let mut size: u64 = 0;
    let mut region = Region::Body;
    for (i, raw) in split_lines(bytes).into_iter().enumerate() {
        let line_nr = i + 1;
        if raw.len() > config.max_line_length {
            return Err(SmaliError::LineTooLong {
                path: path.to_path_buf(),
                line: line_nr,
                limit: config.max_line_length,
            });
        }
        size += raw.len() as u64;
        if size > config.max_file_size {
            return Err(SmaliError::SizeExceeded { path: path.to_path_buf(), limit: config.max_file_size });
        }

        let (seeded, next) = region.step(trim(raw));
        region = next;
        lines.push(match seeded {
            Some(kind) => CodeLine::with_type(raw, line_nr, kind),
            None => CodeLine::new(raw, line_nr),
        });
    }
    Ok(lines)
}

/// Collects the line ids of each `.method` .. `.end method` group, dropping
/// `.line` directives, and the ids of every line outside a method.
fn group_methods(lines: &[CodeLine]) -> Result<(Vec<Vec<usize>>, Vec<usize>), SmaliError> {
    let mut groups = vec![];
    let mut other = vec![];
    let mut current: Option<Vec<usize>> = None;

    for (ix, line) in lines.iter().enumerate() {
        let seeded = line.peek_type() != InstructionType::NotYetParsed;
        if !seeded && line.starts_with(b".method") {
            if let Some(open) = current.as_ref() {
                let start = open.first().map_or(0, |s| lines[*s].line_nr());
                return Err(SmaliError::Class(err!(
                    "Method starting at line {} is not closed before line {}",
                    start,
                    line.line_nr()
                )));
            }
            current = Some(vec![ix]);
        } else if let Some(group) = current.as_mut() {
            if !seeded && line.starts_with(b".line") {
                continue;
            }
            group.push(ix);
            if !seeded && line.starts_with(b".end method") {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
            }
        } else {
            other.push(ix);
        }
    }

    if let Some(open) = current {
        let start = open.first().map_or(0, |s| lines[*s].line_nr());
        return Err(SmaliError::Class(err!("Method starting at line {} has no .end method", start)));
    }
    Ok((groups, other))
}

/// `Lcom/foo/Bar;` -> `com/foo/Bar`
fn class_path(descriptor: &[u8]) -> &[u8] {
    match descriptor {
        [b'L', inner @ .., b';'] => inner,
        _ => descriptor,
    }
}

fn parse_class_line(input: &[u8]) -> IResult<&[u8], (Vec<Modifier>, &[u8])> {
    let (input, _) = tag(".class")(input)?;
    let (input, modifiers) = parse_modifiers(input)?;
    let (input, _) = space0(input)?;
    let (input, name) = rest(input)?;
    Ok((input, (modifiers, trim(name))))
}

fn parse_directive<'a>(directive: &'static str, input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    let (input, _) = tag(directive)(input)?;
    let (input, _) = char(' ')(input)?;
    let (input, name) = rest(input)?;
    Ok((input, trim(name)))
}

fn parse_source_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, _) = tag(".source")(input)?;
    let (input, _) = space0(input)?;
    delimited(char('"'), take_until("\""), char('"'))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS: &str = r#".class public final Lcom/example/Main;
.super Landroid/app/Activity;
.source "Main.java"

# interfaces
.implements Ljava/lang/Runnable;

# static fields
.field private static final TAG:Ljava/lang/String; = "Main"

# instance fields
.field count:I
    .annotation runtime Lcom/example/Keep;
        value = {
            "x"
        }
    .end annotation
.end field

# direct methods
.method public constructor <init>()V
    .registers 1

    .line 10
    invoke-direct {p0}, Landroid/app/Activity;-><init>()V

    return-void
.end method

.method public native check()Z
.end method
"#;

    #[test]
    fn class_metadata() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        assert_eq!(c.class_name(), "com.example.Main");
        assert_eq!(c.simple_name(), "Main");
        assert_eq!(c.package(), "com.example");
        assert_eq!(c.modifiers(), &[Modifier::Public, Modifier::Final]);
        assert_eq!(c.super_class(), Some("android.app.Activity"));
        assert_eq!(c.interfaces(), &["java.lang.Runnable".to_string()]);
        assert_eq!(c.source_file(), Some("Main.java"));
        assert!(!c.is_ad_framework());
        assert_eq!(c.label(), 0);
    }

    #[test]
    fn fields_are_collected() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        let names: Vec<&str> = c.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["TAG", "count"]);
        assert_eq!(c.fields()[1].line_nr, 12);
    }

    #[test]
    fn annotation_bodies_are_not_code() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        let body = c.lines().iter().find(|l| l.bytes() == b"\"x\"").unwrap();
        assert_eq!(body.instruction().kind(), InstructionType::Annotation);
        assert!(!body.is_code());
    }

    #[test]
    fn methods_are_split_by_blocks() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        assert_eq!(c.all_methods().len(), 2);
        assert_eq!(c.methods().map(|m| m.name()).collect::<Vec<_>>(), vec!["<init>"]);
        assert_eq!(c.empty_methods().map(|m| m.name()).collect::<Vec<_>>(), vec!["check"]);
        assert_eq!(c.find_method("check").map(|m| m.label()), Some(1));
    }

    #[test]
    fn line_directives_are_dropped_from_methods() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        let init = c.method(0).unwrap();
        assert!(c.method_lines(init).all(|l| !l.starts_with(b".line")));
        assert!(c.lines().iter().any(|l| l.starts_with(b".line 10")));
        let first = c.method_lines(init).next().unwrap();
        assert!(first.starts_with(b".method"));
        assert_eq!(first.method(), Some(0));
        assert_eq!(c.lines()[0].method(), None);
    }

    #[test]
    fn last_instruction_skips_metadata() {
        let c = SmaliClass::from_smali(CLASS).unwrap();
        let last = c.last_instruction(0, 0).unwrap();
        assert_eq!(last.bytes(), b"return-void");
        assert!(c.last_instruction(1, 0).is_none());
        assert!(c.last_instruction(7, 0).is_none());
    }

    #[test]
    fn unique_block_ids() {
        let c = SmaliClass::from_bytes(CLASS.as_bytes(), Path::new("Main.smali"), &Config::default(), 7).unwrap();
        assert_eq!(c.unique_block_id(0, 2), "7-0-2");
        assert_eq!(c.file_path(), Path::new("Main.smali"));
    }

    #[test]
    fn missing_class_directive() {
        let e = SmaliClass::from_smali(".super Ljava/lang/Object;\n").unwrap_err();
        assert!(matches!(e, SmaliError::Class(_)));
    }

    #[test]
    fn unterminated_method() {
        let e = SmaliClass::from_smali(".class LA;\n.method public a()V\nreturn-void\n").unwrap_err();
        assert_eq!(e.to_string(), "Class parse error: Method starting at line 2 has no .end method");
    }

    #[test]
    fn nested_method() {
        let e = SmaliClass::from_smali(".class LA;\n.method public a()V\n.method public b()V\n.end method\n")
            .unwrap_err();
        assert!(e.to_string().contains("not closed before line 3"));
    }

    #[test]
    fn line_length_limit() {
        let config = Config { max_line_length: 16, ..Config::default() };
        let e = SmaliClass::from_bytes(
            b".class LA;\n.field public veryLongFieldName:I\n",
            Path::new("A.smali"),
            &config,
            0,
        )
        .unwrap_err();
        assert!(matches!(e, SmaliError::LineTooLong { line: 2, limit: 16, .. }));
    }

    #[test]
    fn cumulative_size_limit() {
        let config = Config { max_file_size: 20, ..Config::default() };
        let e = SmaliClass::from_bytes(CLASS.as_bytes(), Path::new("A.smali"), &config, 0).unwrap_err();
        assert!(matches!(e, SmaliError::SizeExceeded { limit: 20, .. }));
    }

    #[test]
    fn ad_framework_from_descriptor() {
        let c = SmaliClass::from_smali(".class public Lcom/mopub/mobileads/Banner;\n").unwrap();
        assert!(c.is_ad_framework());
        assert_eq!(c.package(), "com.mopub.mobileads");
    }

    #[test]
    fn default_package() {
        let c = SmaliClass::from_smali(".class LA;\n").unwrap();
        assert_eq!(c.class_name(), "A");
        assert_eq!(c.package(), "");
        assert_eq!(c.super_class(), None);
    }

    #[test]
    fn entropy_is_memoized_and_overridable() {
        let mut c = SmaliClass::from_smali(".class LA;\n").unwrap();
        // ".class LA;" has 9 distinct bytes out of 10
        let expected = -(8.0 * 0.1 * 0.1f64.log2()) - 0.2 * 0.2f64.log2();
        assert!((c.entropy() - expected).abs() < 1e-9);
        c.set_entropy(1.5);
        assert_eq!(c.entropy(), 1.5);
        assert!(!c.is_obfuscated());
        c.set_obfuscated(true);
        assert!(c.is_obfuscated());
    }
}
