use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Function, Query, Select, SetExpr, TableFactor, Visit, Visitor};

use crate::error::{AppError, AppResult};

/// Node kinds the resolver cares about.
#[derive(Debug, Clone, Copy)]
pub enum AstNode<'a> {
    Select(&'a Select),
    Function(&'a Function),
    Table(&'a TableFactor)
}

/// Walk `root` depth-first, handing every node of interest to `handler`.
///
/// The first error returned by the handler stops the walk and is returned.
pub fn walk<N, F>(root: &N, handler: F) -> AppResult<()>
where
    N: Visit + ?Sized,
    F: FnMut(AstNode<'_>) -> AppResult<()>
{
    let mut dispatch = Dispatch {
        handler
    };
    match root.visit(&mut dispatch) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err)
    }
}

struct Dispatch<F> {
    handler: F
}

impl<F> Dispatch<F>
where
    F: FnMut(AstNode<'_>) -> AppResult<()>
{
    fn emit(&mut self, node: AstNode<'_>) -> ControlFlow<AppError> {
        match (self.handler)(node) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err)
        }
    }
}

impl<F> Visitor for Dispatch<F>
where
    F: FnMut(AstNode<'_>) -> AppResult<()>
{
    type Break = AppError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let mut selects = Vec::new();
        collect_selects(&query.body, &mut selects);
        for select in selects {
            self.emit(AstNode::Select(select))?;
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        self.emit(AstNode::Table(table_factor))
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Function(function) = expr {
            self.emit(AstNode::Function(function))?;
        }
        ControlFlow::Continue(())
    }
}

/// SELECT blocks directly owned by a query body.
///
/// Nested `SetExpr::Query` bodies are queries of their own and are reported
/// when the visitor reaches them.
fn collect_selects<'a>(body: &'a SetExpr, selects: &mut Vec<&'a Select>) {
    match body {
        SetExpr::Select(select) => selects.push(select),
        SetExpr::SetOperation {
            left,
            right,
            ..
        } => {
            collect_selects(left, selects);
            collect_selects(right, selects);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use sqlparser::{dialect::ClickHouseDialect, parser::Parser};

    use super::*;

    fn parse(sql: &str) -> Vec<sqlparser::ast::Statement> {
        Parser::parse_sql(&ClickHouseDialect {}, sql).unwrap()
    }

    #[test]
    fn test_walk_counts_node_kinds() {
        let statements =
            parse("SELECT count() FROM a WHERE x IN (SELECT x FROM b UNION ALL SELECT x FROM c)");
        let (mut selects, mut functions, mut tables) = (0, 0, 0);
        for statement in &statements {
            walk(statement, |node| {
                match node {
                    AstNode::Select(_) => selects += 1,
                    AstNode::Function(_) => functions += 1,
                    AstNode::Table(_) => tables += 1
                }
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(selects, 3);
        assert_eq!(functions, 1);
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_walk_stops_on_error() {
        let statements = parse("SELECT f(1), g(2) FROM t");
        let mut seen = 0;
        let result = walk(&statements[0], |node| {
            if let AstNode::Function(_) = node {
                seen += 1;
                return Err(AppError::internal("stop"));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
