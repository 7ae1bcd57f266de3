//! Portable expressions
//!
//! A unit of work is encoded as a language-independent AST of operations,
//! constants and type/member references, rooted at a lambda with exactly one
//! free parameter (the remote context). The driver builds and serializes
//! trees; the responder deserializes and evaluates them against its live
//! object graph through a [`MemberResolver`].
//!
//! Values captured from the caller's scope have no portable identity, so the
//! builder folds them into constant nodes at build time. A capture that
//! cannot be serialized, or a shape that would synchronously block on an
//! async computation, is rejected before any I/O happens.

pub mod ast;
pub mod build;
pub mod eval;

pub use ast::{BinaryOp, Expr, MemberDesc, TypeDesc, UnaryOp};
pub use build::ExprBuilder;
pub use eval::{Evaluator, MemberFn, MemberResolver, MemberTable};

use crate::common::Result;

/// Serialize an expression tree to its wire form
pub fn serialize(expr: &Expr) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(expr)?)
}

/// Deserialize an expression tree from its wire form
pub fn deserialize(bytes: &[u8]) -> Result<Expr> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_round_trips() {
        let ctx = TypeDesc::new("app", "App");
        let expr = ExprBuilder::new("ctx", ctx)
            .body(|p| p.member(MemberDesc::getter(TypeDesc::new("app", "App"), "Title"), TypeDesc::string()))
            .build()
            .unwrap();
        let bytes = serialize(&expr).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert_eq!(expr, back);
    }
}
