//! SQL preprocessing ahead of parsing.
//!
//! Macro calls such as `$__timeFilter(ts)` are not valid SQL: the tokenizer
//! reads `$__timeFilter` as a placeholder and then rejects the argument list.
//! Before parsing, every `$__` sigil that starts an identifier is masked as
//! `___`, which turns the macro into an ordinary function call.
//!
//! Dollar-quoted strings (`$$...$$`, `$tag$...$tag$`) are left untouched in
//! both directions: ad-hoc filter values are written as `$$value$$`, and a
//! value starting with `__` must still close its own quote.
//!
//! # Invariants
//!
//! Masking never changes the byte length of the input, so every byte offset
//! reported for the masked text is a valid offset into the original text.
//!
//! # Example
//!
//! ```
//! use chmacro::preprocessor::{mask_macros, unmask_macros};
//!
//! let sql = "SELECT * FROM t WHERE $__timeFilter(ts) AND a = $$__x$$";
//! let masked = mask_macros(sql);
//!
//! assert_eq!(masked, "SELECT * FROM t WHERE ___timeFilter(ts) AND a = $$__x$$");
//! assert_eq!(masked.len(), sql.len());
//! assert_eq!(unmask_macros(&masked), sql);
//! ```

use std::{borrow::Cow, ops::Range, sync::LazyLock};

use regex::Regex;

/// Macro sigil as written by query authors.
pub const MACRO_SIGIL: &str = "$__";

/// Identifier prefix the sigil is masked to. Same length as [`MACRO_SIGIL`].
pub const MASKED_SIGIL: &str = "___";

static SIGIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$__([A-Za-z_])").expect("valid regex"));

/// Masked sigil at the start of an identifier.
static MASKED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^A-Za-z0-9_$])___([A-Za-z_])").expect("valid regex"));

/// Replace macro sigils with a parser-friendly identifier prefix.
pub fn mask_macros(sql: &str) -> Cow<'_, str> {
    replace_unquoted(sql, &SIGIL_REGEX, "___$1")
}

/// Undo [`mask_macros`] on SQL rendered from a parsed tree.
pub fn unmask_macros(sql: &str) -> Cow<'_, str> {
    replace_unquoted(sql, &MASKED_REGEX, "$1$$__$2")
}

/// Macro name of a masked function name, if it is one.
pub fn macro_name(identifier: &str) -> Option<&str> {
    identifier
        .strip_prefix(MASKED_SIGIL)
        .or_else(|| identifier.strip_prefix(MACRO_SIGIL))
        .filter(|name| name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_'))
}

/// `Regex::replace_all` that skips matches starting inside a dollar-quoted
/// string.
fn replace_unquoted<'a>(sql: &'a str, regex: &Regex, replacement: &str) -> Cow<'a, str> {
    let quoted = dollar_quoted_spans(sql);
    if quoted.is_empty() {
        return regex.replace_all(sql, replacement);
    }

    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for caps in regex.captures_iter(sql) {
        let Some(found) = caps.get(0) else {
            continue;
        };
        if quoted.iter().any(|span| span.contains(&found.start())) {
            continue;
        }
        out.push_str(&sql[last..found.start()]);
        caps.expand(replacement, &mut out);
        last = found.end();
    }
    if last == 0 {
        return Cow::Borrowed(sql);
    }
    out.push_str(&sql[last..]);
    Cow::Owned(out)
}

/// Byte ranges of terminated dollar-quoted strings, delimiters included.
///
/// Single-quoted strings are skipped so a `$$` inside them opens nothing.
fn dollar_quoted_spans(sql: &str) -> Vec<Range<usize>> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = single_quoted_end(bytes, i + 1),
            b'$' => {
                let closed = dollar_tag_end(bytes, i).and_then(|body| {
                    let delimiter = &sql[i..body];
                    sql[body..]
                        .find(delimiter)
                        .map(|offset| body + offset + delimiter.len())
                });
                match closed {
                    Some(end) => {
                        spans.push(i..end);
                        i = end;
                    }
                    None => i += 1
                }
            }
            _ => i += 1
        }
    }
    spans
}

/// Offset just past a `$tag$` opening delimiter that starts at `start`.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let tag = &bytes[start + 1..];
    if tag.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag_len = tag
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    let close = start + 1 + tag_len;
    (bytes.get(close) == Some(&b'$')).then_some(close + 1)
}

/// Offset just past the quote closing a single-quoted string.
fn single_quoted_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_preserves_length() {
        let sql = "SELECT $__timeInterval(ts), count() FROM t WHERE $__timeFilter() AND $__adHocFilter()";
        let masked = mask_macros(sql);
        assert_eq!(masked.len(), sql.len());
        assert!(!masked.contains('$'));
    }

    #[test]
    fn test_mask_keeps_dollar_quoted_strings() {
        let sql = "SELECT * FROM t WHERE a = $$x$$";
        assert_eq!(mask_macros(sql), sql);
    }

    #[test]
    fn test_mask_skips_sigil_inside_dollar_quotes() {
        let sql = "SELECT $__timeInterval() FROM t WHERE (a = $$__name__$$) AND b = $q$ $__x $q$";
        assert_eq!(
            mask_macros(sql),
            "SELECT ___timeInterval() FROM t WHERE (a = $$__name__$$) AND b = $q$ $__x $q$"
        );
    }

    #[test]
    fn test_mask_unterminated_dollar_quote() {
        assert_eq!(mask_macros("$$ $__fromTime"), "$$ ___fromTime");
    }

    #[test]
    fn test_dollars_inside_single_quotes_open_nothing() {
        let sql = "SELECT '$$' AS d, $__fromTime, '$$'";
        assert_eq!(mask_macros(sql), "SELECT '$$' AS d, ___fromTime, '$$'");
    }

    #[test]
    fn test_unmask_skips_dollar_quotes() {
        let sql = "SELECT ___fromTime WHERE a = $$ ___x$$";
        assert_eq!(unmask_macros(sql), "SELECT $__fromTime WHERE a = $$ ___x$$");
    }

    #[test]
    fn test_numeric_placeholder_is_not_a_quote() {
        assert_eq!(mask_macros("$1 $__fromTime $1$"), "$1 ___fromTime $1$");
    }

    #[test]
    fn test_mask_ignores_bare_sigil() {
        let sql = "SELECT '$__' FROM t";
        assert_eq!(mask_macros(sql), sql);
    }

    #[test]
    fn test_unmask_leaves_inner_underscores() {
        let sql = "SELECT a___b FROM t WHERE ___fromTime > 0";
        assert_eq!(unmask_macros(sql), "SELECT a___b FROM t WHERE $__fromTime > 0");
    }

    #[test]
    fn test_unmask_at_start() {
        assert_eq!(unmask_macros("___interval_s"), "$__interval_s");
    }

    #[test]
    fn test_macro_name() {
        assert_eq!(macro_name("___timeFilter"), Some("timeFilter"));
        assert_eq!(macro_name("$__dt"), Some("dt"));
        assert_eq!(macro_name("count"), None);
        assert_eq!(macro_name("___"), None);
    }
}
