//! Code emitter: accumulates a validator body as structured statement
//! fragments, manages named local bindings and externally supplied opaque
//! values, and materializes the result into one runnable program.
//!
//! Fragments are deliberately flat: type handlers append openers, closers
//! and straight-line ops without any per-fragment bookkeeping. Structure is
//! recovered once, at materialization; a fragment sequence that does not
//! fold into a well-formed block tree is a fatal `CodeGenerationFailure`
//! carrying the assembled listing.

use std::collections::HashMap;

use crate::error::EmitError;
use crate::ops::{Cond, ExternId, ExternVal, Op, SlotId};

// ————————————————————————————————————————————————————————————————————————————
// DECLARATIONS AND FRAGMENTS
// ————————————————————————————————————————————————————————————————————————————

/// Initializer for a named local binding. Compared on redeclaration: same
/// name + same initializer is idempotent, anything else is a conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Init {
    /// Starts as the missing marker.
    Empty,
    /// Starts as the integer counter `0`.
    Zero,
}

#[derive(Clone, Debug)]
pub struct LocalDecl {
    pub name: String,
    pub init: Init,
}

/// Block-opening fragment kinds.
#[derive(Clone, Debug)]
pub enum BlockKind {
    If(Cond),
    ElseIf(Cond),
    Else,
    /// Element loop over an input array; `index` and `item` are rebound on
    /// every iteration.
    Each { arr: SlotId, index: SlotId, item: SlotId },
}

#[derive(Clone, Debug)]
enum Stmt {
    Open(BlockKind),
    Close,
    Op(Op),
}

// ————————————————————————————————————————————————————————————————————————————
// MATERIALIZED PROGRAM
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug)]
pub enum Step {
    Op(Op),
    /// A folded `if` / `else if` / `else` chain; at most one arm runs.
    Branch {
        arms: Vec<(Cond, Block)>,
        fallback: Option<Block>,
    },
    Each {
        arr: SlotId,
        index: SlotId,
        item: SlotId,
        body: Block,
    },
}

/// The assembled result of one compilation pass.
#[derive(Clone, Debug)]
pub struct Program {
    pub block: Block,
    pub locals: Vec<LocalDecl>,
    pub externs: Vec<ExternVal>,
    /// Rendered listing of the fragment sequence, for diagnostics.
    pub source: String,
}

// ————————————————————————————————————————————————————————————————————————————
// EMITTER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Default)]
pub struct Emitter {
    locals: Vec<LocalDecl>,
    names: HashMap<String, SlotId>,
    externs: Vec<ExternVal>,
    extern_names: HashMap<String, ExternId>,
    stmts: Vec<Stmt>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a named local binding. Redeclaring with the same initializer
    /// returns the original slot; a different initializer is a conflict.
    pub fn declare(&mut self, name: &str, init: Init) -> Result<SlotId, EmitError> {
        if let Some(&id) = self.names.get(name) {
            if self.locals[id].init == init {
                return Ok(id);
            }
            return Err(EmitError::ConflictingDeclaration { name: name.to_string() });
        }
        let id = self.locals.len();
        self.locals.push(LocalDecl { name: name.to_string(), init });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register an opaque host value under an explicitly requested name.
    /// Re-supplying the same name returns the same stable token; the
    /// constructor only runs for a fresh name.
    pub fn extern_value(
        &mut self,
        name: &str,
        make: impl FnOnce() -> ExternVal,
    ) -> ExternId {
        if let Some(&id) = self.extern_names.get(name) {
            return id;
        }
        let id = self.externs.len();
        self.externs.push(make());
        self.extern_names.insert(name.to_string(), id);
        id
    }

    pub fn op(&mut self, op: Op) {
        self.stmts.push(Stmt::Op(op));
    }

    pub fn open(&mut self, kind: BlockKind) {
        self.stmts.push(Stmt::Open(kind));
    }

    pub fn close(&mut self) {
        self.stmts.push(Stmt::Close);
    }

    /// Render the fragment sequence as an indented listing. An opening
    /// fragment indents the lines after it; a closing fragment dedents
    /// itself first.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for decl in &self.locals {
            match decl.init {
                Init::Empty => out.push_str(&format!("let {}\n", decl.name)),
                Init::Zero => out.push_str(&format!("let {} = 0\n", decl.name)),
            }
        }
        let mut externs: Vec<_> = self.extern_names.iter().collect();
        externs.sort_by_key(|(_, &id)| id);
        for (name, &id) in externs {
            out.push_str(&format!("extern e{id} = {name}\n"));
        }
        let mut depth: usize = 0;
        for stmt in &self.stmts {
            if matches!(stmt, Stmt::Close) {
                depth = depth.saturating_sub(1);
            }
            let pad = "  ".repeat(depth);
            match stmt {
                Stmt::Open(BlockKind::If(c)) => out.push_str(&format!("{pad}if {c:?} {{\n")),
                Stmt::Open(BlockKind::ElseIf(c)) => {
                    out.push_str(&format!("{pad}else if {c:?} {{\n"))
                }
                Stmt::Open(BlockKind::Else) => out.push_str(&format!("{pad}else {{\n")),
                Stmt::Open(BlockKind::Each { arr, index, item }) => out.push_str(&format!(
                    "{pad}each v{item} at v{index} in v{arr} {{\n"
                )),
                Stmt::Close => out.push_str(&format!("{pad}}}\n")),
                Stmt::Op(op) => out.push_str(&format!("{pad}{op:?}\n")),
            }
            if matches!(stmt, Stmt::Open(_)) {
                depth += 1;
            }
        }
        out
    }

    /// Assemble all declarations and fragments into one runnable program.
    pub fn materialize(self) -> Result<Program, EmitError> {
        let source = self.listing();
        let mut pos = 0usize;
        let block = fold_block(&self.stmts, &mut pos, 0)
            .map_err(|reason| EmitError::codegen(reason, source.clone()))?;
        debug_assert_eq!(pos, self.stmts.len());
        Ok(Program {
            block,
            locals: self.locals,
            externs: self.externs,
            source,
        })
    }
}

fn expect_close(stmts: &[Stmt], pos: &mut usize) -> Result<(), String> {
    match stmts.get(*pos) {
        Some(Stmt::Close) => {
            *pos += 1;
            Ok(())
        }
        _ => Err("unclosed block at end of program".to_string()),
    }
}

fn fold_block(stmts: &[Stmt], pos: &mut usize, depth: usize) -> Result<Block, String> {
    let mut steps = Vec::new();
    while let Some(stmt) = stmts.get(*pos) {
        match stmt {
            Stmt::Op(op) => {
                steps.push(Step::Op(op.clone()));
                *pos += 1;
            }
            Stmt::Close => {
                if depth == 0 {
                    return Err("unbalanced block close".to_string());
                }
                // Caller consumes the close.
                return Ok(Block { steps });
            }
            Stmt::Open(BlockKind::If(cond)) => {
                *pos += 1;
                let arm = fold_block(stmts, pos, depth + 1)?;
                expect_close(stmts, pos)?;
                let mut arms = vec![(cond.clone(), arm)];
                let mut fallback = None;
                loop {
                    match stmts.get(*pos) {
                        Some(Stmt::Open(BlockKind::ElseIf(c))) => {
                            if fallback.is_some() {
                                return Err("`else if` after `else`".to_string());
                            }
                            *pos += 1;
                            let b = fold_block(stmts, pos, depth + 1)?;
                            expect_close(stmts, pos)?;
                            arms.push((c.clone(), b));
                        }
                        Some(Stmt::Open(BlockKind::Else)) => {
                            if fallback.is_some() {
                                return Err("duplicate `else`".to_string());
                            }
                            *pos += 1;
                            let b = fold_block(stmts, pos, depth + 1)?;
                            expect_close(stmts, pos)?;
                            fallback = Some(b);
                        }
                        _ => break,
                    }
                }
                steps.push(Step::Branch { arms, fallback });
            }
            Stmt::Open(BlockKind::ElseIf(_)) => {
                return Err("`else if` with no preceding `if`".to_string());
            }
            Stmt::Open(BlockKind::Else) => {
                return Err("`else` with no preceding `if`".to_string());
            }
            Stmt::Open(BlockKind::Each { arr, index, item }) => {
                let (arr, index, item) = (*arr, *index, *item);
                *pos += 1;
                let body = fold_block(stmts, pos, depth + 1)?;
                expect_close(stmts, pos)?;
                steps.push(Step::Each { arr, index, item, body });
            }
        }
    }
    if depth != 0 {
        return Err("unclosed block at end of program".to_string());
    }
    Ok(Block { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Kind;

    #[test]
    fn redeclaration_same_initializer_is_idempotent() {
        let mut em = Emitter::new();
        let a = em.declare("v0", Init::Empty).unwrap();
        let b = em.declare("v0", Init::Empty).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn redeclaration_with_different_initializer_conflicts() {
        let mut em = Emitter::new();
        em.declare("count", Init::Zero).unwrap();
        let err = em.declare("count", Init::Empty).unwrap_err();
        assert!(matches!(err, EmitError::ConflictingDeclaration { name } if name == "count"));
    }

    #[test]
    fn extern_dedup_returns_same_token() {
        let mut em = Emitter::new();
        let mut built = 0;
        let a = em.extern_value("regex:^a$", || {
            built += 1;
            ExternVal::Regex(std::sync::Arc::new(regex::Regex::new("^a$").unwrap()))
        });
        let b = em.extern_value("regex:^a$", || {
            built += 1;
            ExternVal::Regex(std::sync::Arc::new(regex::Regex::new("^a$").unwrap()))
        });
        assert_eq!(a, b);
        assert_eq!(built, 1, "constructor must not rerun for a known name");
    }

    #[test]
    fn if_else_chain_folds_into_one_branch() {
        let mut em = Emitter::new();
        let v = em.declare("v0", Init::Empty).unwrap();
        em.open(BlockKind::If(Cond::IsNull(v)));
        em.close();
        em.open(BlockKind::ElseIf(Cond::KindNot(v, Kind::Num)));
        em.close();
        em.open(BlockKind::Else);
        em.op(Op::Return { from: v });
        em.close();
        let program = em.materialize().unwrap();
        assert_eq!(program.block.steps.len(), 1);
        match &program.block.steps[0] {
            Step::Branch { arms, fallback } => {
                assert_eq!(arms.len(), 2);
                assert!(fallback.is_some());
            }
            other => panic!("expected a folded branch, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_close_is_fatal_and_carries_the_listing() {
        let mut em = Emitter::new();
        let v = em.declare("v0", Init::Empty).unwrap();
        em.op(Op::Return { from: v });
        em.close();
        match em.materialize().unwrap_err() {
            EmitError::CodeGenerationFailure { reason, listing } => {
                assert!(reason.contains("unbalanced"));
                assert!(listing.contains("let v0"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn dangling_open_is_fatal() {
        let mut em = Emitter::new();
        let v = em.declare("v0", Init::Empty).unwrap();
        em.open(BlockKind::If(Cond::IsNull(v)));
        assert!(em.materialize().is_err());
    }

    #[test]
    fn orphan_else_is_fatal() {
        let mut em = Emitter::new();
        em.open(BlockKind::Else);
        em.close();
        match em.materialize().unwrap_err() {
            EmitError::CodeGenerationFailure { reason, .. } => {
                assert!(reason.contains("no preceding `if`"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
