use std::collections::HashMap;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use sqlparser::{
    ast::{ObjectName, ObjectNamePart, Select, Spanned, TableFactor},
    tokenizer::Location
};

use super::{AstNode, ParsedSql, walk};
use crate::{
    error::{AppError, AppResult},
    preprocessor::macro_name
};

/// One macro call site: sigil-prefixed name and byte offset of the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacroId {
    pub name:  CompactString,
    pub index: usize
}

/// Source a macro call site belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CteRecord {
    #[serde(rename = "macro")]
    pub macro_name: CompactString,
    pub macro_pos:  usize,
    /// FROM clause of the owning SELECT rendered as SQL
    pub cte:        String,
    pub table:      String,
    pub database:   String,
    /// Byte offset of the owning SELECT keyword
    pub pos:        usize
}

/// Resolve the owning FROM source of every macro call in `parsed`.
///
/// A call nested in several SELECTs belongs to the one that starts last in
/// the text. SELECTs without a FROM clause own nothing.
///
/// # Example
///
/// ```
/// use chmacro::ast::{ParsedSql, macro_ctes};
///
/// let parsed = ParsedSql::parse("SELECT * FROM db.logs AS l WHERE $__timeFilter()").unwrap();
/// let ctes = macro_ctes(&parsed).unwrap();
/// let record = ctes.values().next().unwrap();
///
/// assert_eq!(record.cte, "db.logs AS l");
/// assert_eq!(record.table, "logs");
/// assert_eq!(record.database, "db");
/// ```
pub fn macro_ctes(parsed: &ParsedSql) -> AppResult<HashMap<MacroId, CteRecord>> {
    let mut records = HashMap::new();
    for statement in parsed.statements() {
        walk(statement, |node| match node {
            AstNode::Select(select) => resolve_select(parsed, select, &mut records),
            _ => Ok(())
        })?;
    }
    Ok(records)
}

/// Record owning the macro call that starts at byte offset `pos`.
pub fn find_cte_at(records: &HashMap<MacroId, CteRecord>, pos: usize) -> Option<&CteRecord> {
    records.values().find(|record| record.macro_pos == pos)
}

fn resolve_select(
    parsed: &ParsedSql,
    select: &Select,
    records: &mut HashMap<MacroId, CteRecord>
) -> AppResult<()> {
    let Some(first) = select.from.first() else {
        return Ok(());
    };
    let pos = position(parsed, select.select_token.0.span.start)?;
    let cte = select
        .from
        .iter()
        .map(|item| parsed.render(item))
        .collect::<Vec<_>>()
        .join(", ");
    let (database, table) = table_at(&first.relation, first.relation.span().start)?;

    let mut macros = Vec::new();
    walk(select, |node| {
        if let AstNode::Function(function) = node
            && let Some(name) = object_tail(&function.name)
            && macro_name(name).is_some()
        {
            macros.push(MacroId {
                name:  parsed.render(&function.name).into(),
                index: position(parsed, function.name.span().start)?
            });
        }
        Ok(())
    })?;

    for id in macros {
        let replace = records.get(&id).is_none_or(|existing| existing.pos < pos);
        if replace {
            let record = CteRecord {
                macro_name: id.name.clone(),
                macro_pos: id.index,
                cte: cte.clone(),
                table: table.clone(),
                database: database.clone(),
                pos
            };
            records.insert(id, record);
        }
    }
    Ok(())
}

/// Database and table of the plain table reference starting at `start`.
///
/// Sub-selects, table functions and joins yield empty names.
fn table_at(relation: &TableFactor, start: Location) -> AppResult<(String, String)> {
    let mut found = (String::new(), String::new());
    walk(relation, |node| {
        if let AstNode::Table(factor) = node
            && factor.span().start == start
            && let TableFactor::Table {
                name, ..
            } = factor
        {
            let parts = identifiers(name);
            if let Some((table, rest)) = parts.split_last() {
                found = (rest.last().cloned().unwrap_or_default(), table.clone());
            }
        }
        Ok(())
    })?;
    Ok(found)
}

fn identifiers(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .filter_map(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.value.clone()),
            _ => None
        })
        .collect()
}

fn object_tail(name: &ObjectName) -> Option<&str> {
    match name.0.last()? {
        ObjectNamePart::Identifier(ident) => Some(ident.value.as_str()),
        _ => None
    }
}

fn position(parsed: &ParsedSql, location: Location) -> AppResult<usize> {
    parsed.offset(location).ok_or_else(|| {
        AppError::internal(format!(
            "node position {}:{} is outside of the query text",
            location.line, location.column
        ))
    })
}
