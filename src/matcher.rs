//! Macro call discovery in raw SQL text.
//!
//! A macro call is the token `$__<name>` as a whole word, optionally followed
//! directly by a parenthesised argument list. Arguments are split on commas
//! at nesting depth one only, so `$__timeFilter(toDateTime(a, 'UTC'))` has a
//! single argument.
//!
//! # Example
//!
//! ```
//! use chmacro::matcher::MacroMatcher;
//!
//! let matcher = MacroMatcher::new("dt").unwrap();
//! let matches = matcher.find("SELECT 1 WHERE $__dt(d, t) AND $__dt2").unwrap();
//!
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].full, "$__dt(d, t)");
//! assert_eq!(matches[0].args.as_slice(), ["d", "t"]);
//! assert_eq!(matches[0].position, 15);
//! ```

use compact_str::CompactString;
use regex::Regex;
use smallvec::SmallVec;

use crate::error::{AppError, AppResult, macro_args_error};

/// Raw, whitespace-trimmed macro arguments.
pub type MacroArgs = SmallVec<[String; 2]>;

/// One macro call found in SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroMatch {
    /// Name token plus argument list, exactly as written
    pub full:     String,
    pub name:     CompactString,
    pub args:     MacroArgs,
    /// Byte offset of the `$__` sigil
    pub position: usize
}

/// Whole-word matcher for one macro name.
#[derive(Debug, Clone)]
pub struct MacroMatcher {
    name:    CompactString,
    pattern: Regex
}

impl MacroMatcher {
    pub fn new(name: &str) -> AppResult<Self> {
        let pattern = Regex::new(&format!(r"\$__{}\b", regex::escape(name)))
            .map_err(|e| AppError::internal(format!("Invalid macro name '{}': {}", name, e)))?;
        Ok(Self {
            name: name.into(),
            pattern
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every call of this macro in `sql`, in text order.
    ///
    /// # Errors
    ///
    /// Fails when an argument list is opened but never closed.
    pub fn find(&self, sql: &str) -> AppResult<Vec<MacroMatch>> {
        self.pattern
            .find_iter(sql)
            .map(|token| {
                let (args, length) =
                    parse_args(&sql[token.end()..]).ok_or_else(|| macro_args_error(&self.name))?;
                Ok(MacroMatch {
                    full: sql[token.start()..token.end() + length].to_string(),
                    name: self.name.clone(),
                    args,
                    position: token.start()
                })
            })
            .collect()
    }
}

/// Find every call of macro `name` in `sql`.
pub fn find_macro_matches(sql: &str, name: &str) -> AppResult<Vec<MacroMatch>> {
    MacroMatcher::new(name)?.find(sql)
}

/// Parse an argument list at the very start of `text`.
///
/// Returns the arguments and the byte length of the list including both
/// parentheses. Text not starting with `(` has no arguments and length 0.
/// `None` means the list is never closed.
pub fn parse_args(text: &str) -> Option<(MacroArgs, usize)> {
    if !text.starts_with('(') {
        return Some((MacroArgs::new(), 0));
    }
    let mut args = MacroArgs::new();
    let mut depth = 0usize;
    let mut arg_start = 1;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    args.push(text[arg_start..i].trim().to_string());
                    return Some((args, i + 1));
                }
            }
            ',' if depth == 1 => {
                args.push(text[arg_start..i].trim().to_string());
                arg_start = i + 1;
            }
            _ => {}
        }
    }
    None
}
