//! # Smali CFG
//!
//! A library for reconstructing the control flow of Android smali files and
//! flagging methods whose bytecode looks patched.
//!
//! Each `.smali` file becomes a [`SmaliClass`] holding every line of the file.
//! Methods are split into basic blocks linked by branch, switch and exception
//! edges, then labelled depth-first from the method entry. Unreachable blocks
//! and code after a `return` inside a block are reported through
//! [`Method::is_probably_patched`].
//!
//! ```
//!  use smali_cfg::SmaliClass;
//!
//!  let smali = ".class public LFoo;\n\
//!               .super Ljava/lang/Object;\n\
//!               .method public check(I)V\n\
//!               if-eqz p1, :cond_0\n\
//!               const/4 v0, 0x0\n\
//!               :cond_0\n\
//!               return-void\n\
//!               .end method\n";
//!  let c = SmaliClass::from_smali(smali).unwrap();
//!  let m = c.find_method("check").unwrap();
//!  assert_eq!(m.blocks().len(), 2);
//!  assert!(!m.is_probably_patched());
//! ```

#[macro_use]
mod error;

pub mod application;
pub mod basic_block;
pub mod bytes;
pub mod cfg;
pub mod class;
pub mod code_line;
pub mod config;
pub mod dfs;
pub mod field;
pub mod instruction;
pub mod method;
mod tests;
pub mod types;

pub use crate::application::Application;
pub use crate::basic_block::{BasicBlock, BlockFlags};
pub use crate::class::SmaliClass;
pub use crate::code_line::CodeLine;
pub use crate::config::Config;
pub use crate::error::{CfgError, SmaliError};
pub use crate::method::{Method, MethodKind};
