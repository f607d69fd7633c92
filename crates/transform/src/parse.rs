//! oxc parser wrapper.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::error::{Error, Result};

/// Parse a JavaScript/TypeScript source into an oxc AST.
///
/// The source type is derived from the file extension; unknown extensions
/// parse as plain modules.
pub fn parse<'a>(allocator: &'a Allocator, source: &'a str, path: &Path) -> Result<Program<'a>> {
    let source_type = SourceType::from_path(path).unwrap_or_default();
    let ret = Parser::new(allocator, source, source_type).parse();

    if ret.errors.is_empty() {
        Ok(ret.program)
    } else {
        let message = ret
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::Parse {
            path: path.to_string_lossy().into_owned(),
            message,
        })
    }
}
