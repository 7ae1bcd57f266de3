//! Expression builder with build-time validation
//!
//! Captures are folded into constant nodes here, while the caller still has
//! them in hand: closure cells have no portable identity, so the value the
//! variable holds *now* is what crosses the wire. Later mutation of the
//! original variable cannot affect execution.
//!
//! Validation also happens here, before any I/O exists to perform:
//! unserializable captures, free parameters, and shapes that would
//! synchronously block the responder's single execution thread on an async
//! computation are all build-time errors.

use serde::Serialize;

use crate::common::{Error, Result};

use super::ast::{BinaryOp, Expr, MemberDesc, TypeDesc, UnaryOp};

/// Builds a validated lambda expression around a single context parameter.
///
/// ```no_run
/// # use objpilot::expr::{ExprBuilder, MemberDesc, TypeDesc};
/// let app = TypeDesc::new("app", "App");
/// let expr = ExprBuilder::new("app", app.clone())
///     .body(|ctx| ctx.member(MemberDesc::getter(app, "Title"), TypeDesc::string()))
///     .build()
///     .unwrap();
/// ```
pub struct ExprBuilder {
    param_name: String,
    param_ty: TypeDesc,
    body: Option<Result<Expr>>,
}

impl ExprBuilder {
    pub fn new(param_name: impl Into<String>, param_ty: TypeDesc) -> Self {
        Self {
            param_name: param_name.into(),
            param_ty,
            body: None,
        }
    }

    /// Provide the lambda body. The closure receives the parameter node.
    pub fn body(mut self, f: impl FnOnce(Expr) -> Expr) -> Self {
        let param = Expr::Parameter {
            ty: self.param_ty.clone(),
            name: self.param_name.clone(),
        };
        self.body = Some(Ok(f(param)));
        self
    }

    /// Provide a lambda body whose construction can itself fail, e.g. when
    /// it folds captures with [`Expr::capture`].
    pub fn try_body(mut self, f: impl FnOnce(Expr) -> Result<Expr>) -> Self {
        let param = Expr::Parameter {
            ty: self.param_ty.clone(),
            name: self.param_name.clone(),
        };
        self.body = Some(f(param));
        self
    }

    /// Validate and produce the final lambda
    pub fn build(self) -> Result<Expr> {
        let body = self
            .body
            .ok_or_else(|| Error::MalformedExpression("lambda has no body".into()))??;

        let lambda = Expr::Lambda {
            ty: body.ty().clone(),
            param_name: self.param_name,
            param_ty: self.param_ty,
            body: Box::new(body),
        };
        validate(&lambda)?;
        Ok(lambda)
    }
}

impl Expr {
    /// Fold a captured value into a constant node, naming the variable in
    /// the error when the value cannot be represented on the wire.
    pub fn capture<T: Serialize>(name: &str, value: &T, ty: TypeDesc) -> Result<Expr> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::unserializable_capture(name, &ty.canonical(), e))?;
        Ok(Expr::Constant { ty, value })
    }

    /// An inline literal constant
    pub fn literal<T: Serialize>(value: T, ty: TypeDesc) -> Result<Expr> {
        Expr::capture("<literal>", &value, ty)
    }

    pub fn string_lit(s: impl Into<String>) -> Expr {
        Expr::Constant {
            ty: TypeDesc::string(),
            value: serde_json::Value::String(s.into()),
        }
    }

    pub fn int_lit(v: i64) -> Expr {
        Expr::Constant {
            ty: TypeDesc::int64(),
            value: serde_json::json!(v),
        }
    }

    pub fn bool_lit(v: bool) -> Expr {
        Expr::Constant {
            ty: TypeDesc::boolean(),
            value: serde_json::Value::Bool(v),
        }
    }

    /// Property access on this expression
    pub fn member(self, member: MemberDesc, result_ty: TypeDesc) -> Expr {
        Expr::MemberAccess {
            ty: result_ty,
            target: Box::new(self),
            member,
        }
    }

    /// Instance method call on this expression
    pub fn call(self, method: MemberDesc, args: Vec<Expr>, result_ty: TypeDesc) -> Expr {
        Expr::MethodCall {
            ty: result_ty,
            target: Some(Box::new(self)),
            method,
            args,
            awaited: false,
        }
    }

    /// Instance method call whose async result the responder awaits.
    /// Only legal as the lambda body root.
    pub fn call_awaited(self, method: MemberDesc, args: Vec<Expr>, result_ty: TypeDesc) -> Expr {
        Expr::MethodCall {
            ty: result_ty,
            target: Some(Box::new(self)),
            method,
            args,
            awaited: true,
        }
    }

    /// Static method call
    pub fn call_static(method: MemberDesc, args: Vec<Expr>, result_ty: TypeDesc) -> Expr {
        Expr::MethodCall {
            ty: result_ty,
            target: None,
            method,
            args,
            awaited: false,
        }
    }

    /// Constructor call
    pub fn construct(ctor: MemberDesc, args: Vec<Expr>) -> Expr {
        Expr::ConstructorCall {
            ty: ctor.declaring.clone(),
            ctor,
            args,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr, result_ty: TypeDesc) -> Expr {
        Expr::Unary {
            ty: result_ty,
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, result_ty: TypeDesc) -> Expr {
        Expr::Binary {
            ty: result_ty,
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Expr {
        Expr::Conditional {
            ty: if_true.ty().clone(),
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn new_array(element_ty: TypeDesc, items: Vec<Expr>) -> Expr {
        Expr::NewArray {
            ty: element_ty,
            items,
        }
    }
}

/// Check the structural invariants of a finished lambda
fn validate(lambda: &Expr) -> Result<()> {
    let (param_name, body) = match lambda {
        Expr::Lambda {
            param_name, body, ..
        } => (param_name, body.as_ref()),
        _ => {
            return Err(Error::MalformedExpression(
                "expression must be rooted at a lambda".into(),
            ))
        }
    };

    let mut error: Option<Error> = None;
    lambda.walk(&mut |node| {
        if error.is_some() {
            return;
        }
        match node {
            // Nested lambdas would mean more than one free parameter.
            Expr::Lambda { .. } if !std::ptr::eq(node, lambda) => {
                error = Some(Error::MalformedExpression(
                    "nested lambdas are not supported".into(),
                ));
            }
            Expr::Parameter { name, .. } if name != param_name => {
                error = Some(Error::MalformedExpression(format!(
                    "free parameter '{name}' is not the lambda parameter"
                )));
            }
            // Touching an awaitable value synchronously would deadlock the
            // responder's one execution thread.
            Expr::MemberAccess { target, member, .. } if target.ty().awaitable => {
                error = Some(Error::WouldBlockOnAsync(format!(
                    "member '{}' is accessed on an awaitable value",
                    member.name
                )));
            }
            Expr::MethodCall {
                target: Some(target),
                method,
                ..
            } if target.ty().awaitable => {
                error = Some(Error::WouldBlockOnAsync(format!(
                    "method '{}' is called on an awaitable value",
                    method.name
                )));
            }
            Expr::MethodCall {
                method, awaited, ..
            } if *awaited && !std::ptr::eq(node, body) => {
                error = Some(Error::WouldBlockOnAsync(format!(
                    "awaited call '{}' is only allowed at the lambda root",
                    method.name
                )));
            }
            // A non-awaited body of awaitable type is fine: the value is
            // returned as-is and never blocked on.
            _ => {}
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn app_ty() -> TypeDesc {
        TypeDesc::new("app", "App")
    }

    #[test]
    fn capture_folds_current_value() {
        let mut count = 7;
        let folded = Expr::capture("count", &count, TypeDesc::int32()).unwrap();
        count += 1;
        let _ = count;
        match folded {
            Expr::Constant { value, .. } => assert_eq!(value, serde_json::json!(7)),
            other => panic!("expected constant, got {other:?}"),
        }
    }

    #[test]
    fn unserializable_capture_names_the_variable() {
        // Maps with non-string keys cannot be represented in JSON.
        let bad: HashMap<Vec<u8>, i32> = HashMap::from([(vec![1u8], 1)]);
        let err = Expr::capture("lookup", &bad, TypeDesc::new("app", "Lookup")).unwrap_err();
        match err {
            Error::UnserializableCapture {
                name, type_name, ..
            } => {
                assert_eq!(name, "lookup");
                assert_eq!(type_name, "app:Lookup");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn free_parameter_is_rejected() {
        let err = ExprBuilder::new("app", app_ty())
            .body(|_| Expr::Parameter {
                ty: TypeDesc::object(),
                name: "other".into(),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MalformedExpression(_)));
    }

    #[test]
    fn member_access_on_awaitable_is_rejected() {
        let fut = TypeDesc::awaitable_of("rt", TypeDesc::int32());
        let pending = MemberDesc::method(app_ty(), "LoadAsync", vec![], &fut);
        let result_getter = MemberDesc::getter(fut.clone(), "Result");
        let err = ExprBuilder::new("app", app_ty())
            .body(|ctx| {
                ctx.call(pending, vec![], fut)
                    .member(result_getter, TypeDesc::int32())
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::WouldBlockOnAsync(_)));
    }

    #[test]
    fn awaited_call_at_root_is_allowed() {
        let fut = TypeDesc::awaitable_of("rt", TypeDesc::int32());
        let load = MemberDesc::method(app_ty(), "LoadAsync", vec![], &fut);
        let expr = ExprBuilder::new("app", app_ty())
            .body(|ctx| ctx.call_awaited(load, vec![], TypeDesc::int32()))
            .build();
        assert!(expr.is_ok());
    }

    #[test]
    fn awaited_call_below_root_is_rejected() {
        let fut = TypeDesc::awaitable_of("rt", TypeDesc::int32());
        let load = MemberDesc::method(app_ty(), "LoadAsync", vec![], &fut);
        let err = ExprBuilder::new("app", app_ty())
            .body(|ctx| {
                let inner = ctx.call_awaited(load, vec![], TypeDesc::int32());
                Expr::binary(
                    BinaryOp::Add,
                    inner,
                    Expr::int_lit(1),
                    TypeDesc::int64(),
                )
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::WouldBlockOnAsync(_)));
    }
}
