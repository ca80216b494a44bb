use std::fmt;
use std::path::PathBuf;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        CfgError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        CfgError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        CfgError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        CfgError::new(&format!($fmtstr, $($args)*))
    };
}

macro_rules! fail {
    ($msg:literal) => {
        return Err(CfgError::new($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(CfgError::new(&format!($fmtstr, $($args)*)))
    };
}

/// Raised when the control flow of a single method cannot be reconstructed,
/// typically because a branch, switch or catch target names a label that does
/// not exist inside the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgError
{
    msg: String,
    contexts: Vec<String>,
}

impl CfgError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        CfgError {
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: CfgError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        CfgError { msg: base.msg, contexts }
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }
}

impl fmt::Display for CfgError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for CfgError {}

/// Errors that abort the parsing of a whole smali file.
#[derive(Debug)]
pub enum SmaliError {
    /// The file could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// The file holds more bytes than the configured ceiling
    SizeExceeded { path: PathBuf, limit: u64 },
    /// A single line is longer than the configured ceiling
    LineTooLong { path: PathBuf, line: usize, limit: usize },
    /// Class level structure is broken, e.g. a `.method` without `.end method`
    Class(CfgError),
}

impl fmt::Display for SmaliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SmaliError::Io { path, source } => {
                write!(f, "Error loading file {}: {}", path.display(), source)
            }
            SmaliError::SizeExceeded { path, limit } => {
                write!(f, "File {} exceeds the maximum size of {} bytes", path.display(), limit)
            }
            SmaliError::LineTooLong { path, line, limit } => {
                write!(f, "Line {} of {} exceeds the maximum length of {} bytes", line, path.display(), limit)
            }
            SmaliError::Class(e) => write!(f, "Class parse error: {}", e),
        }
    }
}

impl std::error::Error for SmaliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SmaliError::Io { source, .. } => Some(source),
            SmaliError::Class(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CfgError> for SmaliError {
    fn from(e: CfgError) -> Self {
        SmaliError::Class(e)
    }
}
