//! Inline command protocol for AI-directed map control.
//!
//! A directive is a bracketed span embedded in otherwise free-form AI
//! text: `[zoom_to 51.5007 -0.1246 15]`. This crate extracts directives
//! and binds them into typed [`Command`] values. The extractor is
//! deliberately lenient: anything that does not bind to one of the seven
//! recognized commands is skipped silently, so a malformed directive
//! degrades to "no command" rather than a pipeline failure.

mod command;
mod parser;

pub use command::{Command, MeasureKind};
pub use parser::{extract_directives, parse_commands, Directive};
