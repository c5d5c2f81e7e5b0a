//! Source validation — parses a strategy into an AST and rejects anything
//! outside the sandbox capability surface before a single bar is simulated.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::sandbox::ast::{Expr, Function, Program, Stmt};
use crate::sandbox::builtins;
use crate::sandbox::parser;
use crate::sandbox::token;

/// Identifiers that always fail validation, regardless of whether they would
/// resolve to anything. The grammar has no IO or import constructs, so these
/// exist to reject scripts by intent and report a line number.
const DENYLIST: &[&str] = &[
    "import", "include", "require", "eval", "exec", "compile", "open", "read",
    "write", "file", "spawn", "system", "shell", "env", "getattr", "setattr",
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },

    #[error("forbidden name '{name}' at line {line}")]
    ForbiddenName { name: String, line: u32 },

    #[error("unknown function '{name}' at line {line}")]
    UnknownFunction { name: String, line: u32 },

    #[error("function '{name}' at line {line} shadows a builtin")]
    ShadowsBuiltin { name: String, line: u32 },

    #[error("duplicate function '{name}' at line {line}")]
    DuplicateFunction { name: String, line: u32 },

    #[error("strategy must define a function named 'decide'")]
    MissingDecide,

    #[error("'decide' must take exactly two parameters (window, state), found {found}")]
    DecideArity { found: usize },
}

/// A validated strategy program, shareable across workers without re-parsing.
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    program: Arc<Program>,
}

impl CompiledStrategy {
    pub(crate) fn program(&self) -> &Program {
        &self.program
    }
}

/// Parse and validate strategy source into a [`CompiledStrategy`].
pub fn validate(source: &str) -> Result<CompiledStrategy, ValidationError> {
    let tokens = token::tokenize(source)?;
    let program = parser::parse(&tokens)?;

    let mut user_fns: HashSet<&str> = HashSet::new();
    for f in &program.functions {
        check_name(&f.name, f.line)?;
        if builtins::is_builtin(&f.name) {
            return Err(ValidationError::ShadowsBuiltin { name: f.name.clone(), line: f.line });
        }
        if !user_fns.insert(&f.name) {
            return Err(ValidationError::DuplicateFunction { name: f.name.clone(), line: f.line });
        }
    }

    match program.function("decide") {
        None => return Err(ValidationError::MissingDecide),
        Some(f) if f.params.len() != 2 => {
            return Err(ValidationError::DecideArity { found: f.params.len() });
        }
        Some(_) => {}
    }

    for f in &program.functions {
        check_function(f, &user_fns)?;
    }

    Ok(CompiledStrategy { program: Arc::new(program) })
}

fn check_function(f: &Function, user_fns: &HashSet<&str>) -> Result<(), ValidationError> {
    for p in &f.params {
        check_name(p, f.line)?;
    }
    check_stmts(&f.body, user_fns)
}

fn check_stmts(stmts: &[Stmt], user_fns: &HashSet<&str>) -> Result<(), ValidationError> {
    for stmt in stmts {
        match stmt {
            Stmt::Let { name, expr, line } | Stmt::Assign { name, expr, line } => {
                check_name(name, *line)?;
                check_expr(expr, user_fns)?;
            }
            Stmt::IndexAssign { target, index, expr, line } => {
                check_name(target, *line)?;
                check_expr(index, user_fns)?;
                check_expr(expr, user_fns)?;
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                check_expr(cond, user_fns)?;
                check_stmts(then_body, user_fns)?;
                check_stmts(else_body, user_fns)?;
            }
            Stmt::While { cond, body, .. } => {
                check_expr(cond, user_fns)?;
                check_stmts(body, user_fns)?;
            }
            Stmt::Return { expr, .. } => {
                if let Some(e) = expr {
                    check_expr(e, user_fns)?;
                }
            }
            Stmt::Expr(e) => check_expr(e, user_fns)?,
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, user_fns: &HashSet<&str>) -> Result<(), ValidationError> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Nil => Ok(()),
        Expr::Ident { name, line } => check_name(name, *line),
        Expr::Unary { expr, .. } => check_expr(expr, user_fns),
        Expr::Binary { lhs, rhs, .. } => {
            check_expr(lhs, user_fns)?;
            check_expr(rhs, user_fns)
        }
        Expr::Call { name, args, line } => {
            check_name(name, *line)?;
            if !builtins::is_builtin(name) && !user_fns.contains(name.as_str()) {
                return Err(ValidationError::UnknownFunction { name: name.clone(), line: *line });
            }
            for arg in args {
                check_expr(arg, user_fns)?;
            }
            Ok(())
        }
        Expr::Index { target, index, .. } => {
            check_expr(target, user_fns)?;
            check_expr(index, user_fns)
        }
        Expr::Field { target, name, line } => {
            check_name(name, *line)?;
            check_expr(target, user_fns)
        }
        Expr::MapLit { entries, .. } => {
            for (_, v) in entries {
                check_expr(v, user_fns)?;
            }
            Ok(())
        }
    }
}

fn check_name(name: &str, line: u32) -> Result<(), ValidationError> {
    if DENYLIST.contains(&name) || name.contains("__") {
        return Err(ValidationError::ForbiddenName { name: name.to_string(), line });
    }
    Ok(())
}
