//! Parsed SQL with byte-offset positions.
//!
//! [`ParsedSql`] wraps the `sqlparser` statement list together with a line
//! index of the (masked) source text, so any node position reported by the
//! parser as line/column can be turned into a byte offset into the original
//! SQL string.
//!
//! # Example
//!
//! ```
//! use chmacro::ast::ParsedSql;
//!
//! let parsed = ParsedSql::parse("SELECT * FROM logs WHERE $__timeFilter()").unwrap();
//! assert_eq!(parsed.statements().len(), 1);
//! ```

mod resolve;
mod walk;

pub use resolve::{CteRecord, MacroId, find_cte_at, macro_ctes};
use sqlparser::{
    ast::Statement,
    dialect::ClickHouseDialect,
    parser::Parser,
    tokenizer::Location
};
pub use walk::{AstNode, walk};

use crate::{
    error::{AppResult, query_parse_error},
    preprocessor::{mask_macros, unmask_macros}
};

/// Statement list parsed from one SQL snapshot.
#[derive(Debug)]
pub struct ParsedSql {
    statements: Vec<Statement>,
    lines:      LineIndex
}

impl ParsedSql {
    /// Parse SQL that may contain `$__` macro calls.
    pub fn parse(sql: &str) -> AppResult<Self> {
        let masked = mask_macros(sql);
        let statements = Parser::parse_sql(&ClickHouseDialect {}, &masked)
            .map_err(|e| query_parse_error(e.to_string()))?;
        Ok(Self {
            statements,
            lines: LineIndex::new(&masked)
        })
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Byte offset of a parser location
    pub fn offset(&self, location: Location) -> Option<usize> {
        self.lines.offset(location)
    }

    /// Render a node back to SQL with macro sigils restored
    pub fn render(&self, node: &impl ToString) -> String {
        unmask_macros(&node.to_string()).into_owned()
    }
}

/// Render every statement of `sql` in canonical form, one per line.
///
/// Rendering is idempotent: formatting the output again yields the same text.
pub fn format_sql(sql: &str) -> AppResult<String> {
    let parsed = ParsedSql::parse(sql)?;
    Ok(parsed
        .statements()
        .iter()
        .map(|statement| parsed.render(statement))
        .collect::<Vec<_>>()
        .join(";\n"))
}

/// Maps parser line/column locations to byte offsets.
///
/// Lines and columns are 1-based; columns count characters, not bytes.
#[derive(Debug)]
struct LineIndex {
    text:        String,
    line_starts: Vec<usize>
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            text: text.to_string(),
            line_starts
        }
    }

    fn offset(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(line)?;
        let rest = &self.text[start..];
        match rest.char_indices().nth(column) {
            Some((i, _)) => Some(start + i),
            None if rest.chars().count() == column => Some(self.text.len()),
            None => None
        }
    }
}
