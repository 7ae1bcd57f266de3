//! Responder-side expression evaluation
//!
//! A deserialized lambda is interpreted against a dynamic context value.
//! Member and type descriptors resolve through a [`MemberResolver`];
//! resolutions are memoized per evaluator under `(assembly, type)` and
//! `(type, name, signature)` keys. An unresolved descriptor is a permanent
//! error: the usual cause is a version mismatch between the two sides.
//!
//! Overload selection never invokes-and-catches: candidates are ranked by a
//! pure type-compatibility predicate before anything runs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::common::{Error, Result};

use super::ast::{BinaryOp, Expr, MemberDesc, TypeDesc, UnaryOp};

/// A resolved member implementation: `(target, args) -> value`.
///
/// `target` is `None` for static members and constructors.
pub type MemberFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value> + Send + Sync>;

/// Resolves descriptors to live implementations on the responder
pub trait MemberResolver: Send + Sync {
    /// Whether the type exists on this side
    fn lookup_type(&self, ty: &TypeDesc) -> bool;

    /// Find the implementation for a member descriptor, or `None` when no
    /// registered member is compatible
    fn lookup_member(&self, member: &MemberDesc) -> Option<MemberFn>;
}

struct Overload {
    signature: String,
    params: Vec<TypeDesc>,
    f: MemberFn,
}

/// A registry of member implementations keyed by declaring type and name.
///
/// Resolution prefers an exact signature match; otherwise remaining
/// candidates are filtered by [`param_compatible`] and ranked, highest score
/// first, ties broken by smallest signature string.
#[derive(Default)]
pub struct MemberTable {
    types: HashSet<String>,
    members: HashMap<(String, String), Vec<Overload>>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, ty: &TypeDesc) -> &mut Self {
        self.types.insert(ty.canonical());
        self
    }

    /// Register a member implementation under its descriptor
    pub fn register(&mut self, member: &MemberDesc, f: MemberFn) -> &mut Self {
        self.register_type(&member.declaring);
        let key = (member.declaring.canonical(), member.name.clone());
        self.members.entry(key).or_default().push(Overload {
            signature: member.signature.clone(),
            params: member.params.clone(),
            f,
        });
        self
    }

    /// Convenience for registering a getter backed by a JSON field lookup
    pub fn register_field_getter(&mut self, declaring: TypeDesc, field: &str) -> &mut Self {
        let desc = MemberDesc::getter(declaring, field);
        let field = field.to_string();
        self.register(
            &desc,
            Arc::new(move |target, _args| {
                let target = target
                    .ok_or_else(|| Error::Internal(format!("getter '{field}' without target")))?;
                Ok(target.get(&field).cloned().unwrap_or(Value::Null))
            }),
        )
    }
}

impl MemberResolver for MemberTable {
    fn lookup_type(&self, ty: &TypeDesc) -> bool {
        ty.is_primitive() || self.types.contains(&ty.canonical())
    }

    fn lookup_member(&self, member: &MemberDesc) -> Option<MemberFn> {
        let key = (member.declaring.canonical(), member.name.clone());
        let candidates = self.members.get(&key)?;

        // Exact signature match is authoritative.
        if let Some(exact) = candidates.iter().find(|c| c.signature == member.signature) {
            return Some(exact.f.clone());
        }

        // Otherwise rank compatible candidates without invoking anything.
        let mut ranked: Vec<(u32, &Overload)> = candidates
            .iter()
            .filter_map(|c| compatibility_score(&member.params, &c.params).map(|s| (s, c)))
            .collect();
        ranked.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.signature.cmp(&b.signature)));
        ranked.first().map(|(_, c)| c.f.clone())
    }
}

/// Pure compatibility predicate: score how well declared argument types fit
/// a candidate's parameter list. `None` means incompatible.
fn compatibility_score(args: &[TypeDesc], params: &[TypeDesc]) -> Option<u32> {
    if args.len() != params.len() {
        return None;
    }
    let mut score = 0;
    for (arg, param) in args.iter().zip(params) {
        if arg == param {
            score += 2;
        } else if param_compatible(arg, param) {
            score += 1;
        } else {
            return None;
        }
    }
    Some(score)
}

/// Whether a value of type `arg` can be passed where `param` is declared
fn param_compatible(arg: &TypeDesc, param: &TypeDesc) -> bool {
    if param.name == "Object" && param.is_primitive() {
        return true;
    }
    // Numeric widening between primitives.
    let numeric = ["Int32", "Int64", "Double"];
    arg.is_primitive()
        && param.is_primitive()
        && numeric.contains(&arg.name.as_str())
        && numeric.contains(&param.name.as_str())
}

/// Interprets expression trees against a context value, memoizing all
/// descriptor resolutions
pub struct Evaluator<'r> {
    resolver: &'r dyn MemberResolver,
    type_cache: RefCell<HashMap<String, bool>>,
    member_cache: RefCell<HashMap<String, MemberFn>>,
}

impl<'r> Evaluator<'r> {
    pub fn new(resolver: &'r dyn MemberResolver) -> Self {
        Self {
            resolver,
            type_cache: RefCell::new(HashMap::new()),
            member_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Evaluate a lambda against the context bound to its parameter
    pub fn eval_lambda(&self, lambda: &Expr, context: &Value) -> Result<Value> {
        match lambda {
            Expr::Lambda {
                param_name, body, ..
            } => self.eval(body, param_name, context),
            _ => Err(Error::MalformedExpression(
                "evaluation requires a lambda root".into(),
            )),
        }
    }

    fn eval(&self, expr: &Expr, param_name: &str, context: &Value) -> Result<Value> {
        match expr {
            Expr::Constant { value, .. } => Ok(value.clone()),

            Expr::Parameter { name, .. } => {
                if name == param_name {
                    Ok(context.clone())
                } else {
                    Err(Error::MalformedExpression(format!(
                        "unbound parameter '{name}'"
                    )))
                }
            }

            Expr::MemberAccess { target, member, .. } => {
                let target = self.eval(target, param_name, context)?;
                let f = self.resolve_member(member)?;
                f(Some(&target), &[])
            }

            Expr::MethodCall {
                target,
                method,
                args,
                ..
            } => {
                let target = target
                    .as_ref()
                    .map(|t| self.eval(t, param_name, context))
                    .transpose()?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, param_name, context))
                    .collect::<Result<Vec<_>>>()?;
                let f = self.resolve_member(method)?;
                f(target.as_ref(), &args)
            }

            Expr::ConstructorCall { ctor, args, .. } => {
                self.resolve_type(&ctor.declaring)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, param_name, context))
                    .collect::<Result<Vec<_>>>()?;
                let f = self.resolve_member(ctor)?;
                f(None, &args)
            }

            Expr::Unary { op, operand, .. } => {
                let v = self.eval(operand, param_name, context)?;
                eval_unary(*op, &v)
            }

            Expr::Binary {
                op, left, right, ..
            } => {
                // Short-circuit before evaluating the right side.
                if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    let l = as_bool(&self.eval(left, param_name, context)?)?;
                    return Ok(Value::Bool(match op {
                        BinaryOp::And => l && as_bool(&self.eval(right, param_name, context)?)?,
                        BinaryOp::Or => l || as_bool(&self.eval(right, param_name, context)?)?,
                        _ => unreachable!(),
                    }));
                }
                let l = self.eval(left, param_name, context)?;
                let r = self.eval(right, param_name, context)?;
                eval_binary(*op, &l, &r)
            }

            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                let t = as_bool(&self.eval(test, param_name, context)?)?;
                if t {
                    self.eval(if_true, param_name, context)
                } else {
                    self.eval(if_false, param_name, context)
                }
            }

            Expr::NewArray { items, .. } => {
                let items = items
                    .iter()
                    .map(|i| self.eval(i, param_name, context))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(items))
            }

            Expr::Lambda { .. } => Err(Error::MalformedExpression(
                "nested lambdas are not supported".into(),
            )),
        }
    }

    fn resolve_type(&self, ty: &TypeDesc) -> Result<()> {
        let key = ty.canonical();
        let known = {
            let mut cache = self.type_cache.borrow_mut();
            match cache.get(&key) {
                Some(known) => *known,
                None => {
                    let known = self.resolver.lookup_type(ty);
                    cache.insert(key, known);
                    known
                }
            }
        };
        if known {
            Ok(())
        } else {
            Err(Error::UnresolvedType {
                assembly: ty.assembly.clone(),
                type_name: ty.name.clone(),
            })
        }
    }

    fn resolve_member(&self, member: &MemberDesc) -> Result<MemberFn> {
        let key = member.cache_key();
        if let Some(f) = self.member_cache.borrow().get(&key) {
            return Ok(f.clone());
        }
        self.resolve_type(&member.declaring)?;
        let f = self.resolver.lookup_member(member).ok_or_else(|| {
            Error::unresolved_member(
                &member.declaring.canonical(),
                &member.name,
                &member.signature,
            )
        })?;
        self.member_cache.borrow_mut().insert(key, f.clone());
        Ok(f)
    }
}

fn as_bool(v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| Error::MalformedExpression(format!("expected a boolean, got {v}")))
}

fn eval_unary(op: UnaryOp, v: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!as_bool(v)?)),
        UnaryOp::Neg => {
            if let Some(i) = v.as_i64() {
                Ok(serde_json::json!(-i))
            } else if let Some(f) = v.as_f64() {
                Ok(serde_json::json!(-f))
            } else {
                Err(Error::MalformedExpression(format!(
                    "cannot negate non-numeric value {v}"
                )))
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(l == r)),
        Ne => Ok(Value::Bool(l != r)),
        Add if l.is_string() || r.is_string() => {
            let l = l.as_str().map(str::to_string).unwrap_or_else(|| l.to_string());
            let r = r.as_str().map(str::to_string).unwrap_or_else(|| r.to_string());
            Ok(Value::String(l + &r))
        }
        Add | Sub | Mul | Div | Rem => numeric_op(op, l, r),
        Lt | Le | Gt | Ge => {
            let (a, b) = both_f64(l, r)?;
            Ok(Value::Bool(match op {
                Lt => a < b,
                Le => a <= b,
                Gt => a > b,
                Ge => a >= b,
                _ => unreachable!(),
            }))
        }
        And | Or => unreachable!("short-circuited by the evaluator"),
    }
}

fn numeric_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use BinaryOp::*;
    // Integer arithmetic stays integral; anything else goes through f64.
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let out = match op {
            Add => a.checked_add(b),
            Sub => a.checked_sub(b),
            Mul => a.checked_mul(b),
            Div => a.checked_div(b),
            Rem => a.checked_rem(b),
            _ => unreachable!(),
        };
        return out
            .map(|v| serde_json::json!(v))
            .ok_or_else(|| Error::MalformedExpression("integer arithmetic overflow".into()));
    }
    let (a, b) = both_f64(l, r)?;
    let out = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        Rem => a % b,
        _ => unreachable!(),
    };
    Ok(serde_json::json!(out))
}

fn both_f64(l: &Value, r: &Value) -> Result<(f64, f64)> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Error::MalformedExpression(format!(
            "expected numeric operands, got {l} and {r}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, ExprBuilder};
    use serde_json::json;

    fn widget_ty() -> TypeDesc {
        TypeDesc::new("widgets", "Widget")
    }

    fn table() -> MemberTable {
        let mut t = MemberTable::new();
        t.register_field_getter(widget_ty(), "Name");
        t.register_field_getter(widget_ty(), "Width");
        t.register(
            &MemberDesc::method(
                widget_ty(),
                "Resize",
                vec![TypeDesc::int64()],
                &TypeDesc::int64(),
            ),
            Arc::new(|target, args| {
                let w = target
                    .and_then(|t| t.get("Width"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let delta = args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(w + delta))
            }),
        );
        t.register(
            &MemberDesc::method(
                TypeDesc::new("widgets", "Factory"),
                "Version",
                vec![],
                &TypeDesc::string(),
            ),
            Arc::new(|_, _| Ok(json!("1.2.3"))),
        );
        t.register(
            &MemberDesc::constructor(TypeDesc::new("widgets", "Size"), vec![
                TypeDesc::int64(),
                TypeDesc::int64(),
            ]),
            Arc::new(|_, args| Ok(json!({ "w": args[0], "h": args[1] }))),
        );
        t
    }

    fn ctx() -> Value {
        json!({ "Name": "login", "Width": 50 })
    }

    /// Evaluate both the original tree and its wire round-trip; they must
    /// agree, per node shape.
    fn eval_both(expr: &Expr) -> Value {
        let t = table();
        let local = Evaluator::new(&t).eval_lambda(expr, &ctx()).unwrap();
        let wire = expr::deserialize(&expr::serialize(expr).unwrap()).unwrap();
        let remote = Evaluator::new(&t).eval_lambda(&wire, &ctx()).unwrap();
        assert_eq!(local, remote, "round-trip changed the result");
        local
    }

    #[test]
    fn constant_and_parameter_round_trip() {
        let e = ExprBuilder::new("w", widget_ty())
            .body(|_| Expr::int_lit(42))
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!(42));

        let e = ExprBuilder::new("w", widget_ty()).body(|p| p).build().unwrap();
        assert_eq!(eval_both(&e), ctx());
    }

    #[test]
    fn member_access_round_trip() {
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| p.member(MemberDesc::getter(widget_ty(), "Name"), TypeDesc::string()))
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!("login"));
    }

    #[test]
    fn method_call_round_trip() {
        let resize = MemberDesc::method(
            widget_ty(),
            "Resize",
            vec![TypeDesc::int64()],
            &TypeDesc::int64(),
        );
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| p.call(resize, vec![Expr::int_lit(8)], TypeDesc::int64()))
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!(58));
    }

    #[test]
    fn static_call_round_trip() {
        let version = MemberDesc::method(
            TypeDesc::new("widgets", "Factory"),
            "Version",
            vec![],
            &TypeDesc::string(),
        );
        let e = ExprBuilder::new("w", widget_ty())
            .body(|_| Expr::call_static(version, vec![], TypeDesc::string()))
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!("1.2.3"));
    }

    #[test]
    fn constructor_round_trip() {
        let ctor = MemberDesc::constructor(
            TypeDesc::new("widgets", "Size"),
            vec![TypeDesc::int64(), TypeDesc::int64()],
        );
        let e = ExprBuilder::new("w", widget_ty())
            .body(|_| Expr::construct(ctor, vec![Expr::int_lit(3), Expr::int_lit(4)]))
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!({ "w": 3, "h": 4 }));
    }

    #[test]
    fn operators_and_conditional_round_trip() {
        let width = MemberDesc::getter(widget_ty(), "Width");
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| {
                let wide = Expr::binary(
                    BinaryOp::Gt,
                    p.member(width, TypeDesc::int64()),
                    Expr::int_lit(40),
                    TypeDesc::boolean(),
                );
                Expr::conditional(
                    Expr::unary(UnaryOp::Not, wide, TypeDesc::boolean()),
                    Expr::string_lit("narrow"),
                    Expr::string_lit("wide"),
                )
            })
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!("wide"));
    }

    #[test]
    fn new_array_round_trip() {
        let e = ExprBuilder::new("w", widget_ty())
            .body(|_| {
                Expr::new_array(
                    TypeDesc::int64(),
                    vec![Expr::int_lit(1), Expr::int_lit(2), Expr::int_lit(3)],
                )
            })
            .build()
            .unwrap();
        assert_eq!(eval_both(&e), json!([1, 2, 3]));
    }

    #[test]
    fn unresolved_member_is_permanent() {
        let missing = MemberDesc::getter(widget_ty(), "NoSuchProp");
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| p.member(missing, TypeDesc::string()))
            .build()
            .unwrap();
        let t = table();
        let err = Evaluator::new(&t).eval_lambda(&e, &ctx()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedMember { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn unresolved_type_is_permanent() {
        let alien = TypeDesc::new("elsewhere", "Ghost");
        let getter = MemberDesc::getter(alien, "X");
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| p.member(getter, TypeDesc::string()))
            .build()
            .unwrap();
        let t = table();
        let err = Evaluator::new(&t).eval_lambda(&e, &ctx()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedType { .. }));
    }

    #[test]
    fn overload_resolution_prefers_exact_signature() {
        let mut t = MemberTable::new();
        let exact = MemberDesc::method(
            widget_ty(),
            "Pad",
            vec![TypeDesc::int64()],
            &TypeDesc::string(),
        );
        let wider = MemberDesc::method(
            widget_ty(),
            "Pad",
            vec![TypeDesc::float64()],
            &TypeDesc::string(),
        );
        t.register(&exact, Arc::new(|_, _| Ok(json!("int"))));
        t.register(&wider, Arc::new(|_, _| Ok(json!("double"))));

        let f = t.lookup_member(&exact).unwrap();
        assert_eq!(f(None, &[]).unwrap(), json!("int"));

        // A descriptor declaring Int32 has no exact match; ranking picks a
        // numeric-compatible overload deterministically.
        let declared = MemberDesc::method(
            widget_ty(),
            "Pad",
            vec![TypeDesc::int32()],
            &TypeDesc::string(),
        );
        assert!(t.lookup_member(&declared).is_some());

        // Wrong arity never resolves.
        let two_args = MemberDesc::method(
            widget_ty(),
            "Pad",
            vec![TypeDesc::int64(), TypeDesc::int64()],
            &TypeDesc::string(),
        );
        assert!(t.lookup_member(&two_args).is_none());
    }

    #[test]
    fn short_circuit_skips_right_side() {
        // Right side would fail to resolve; And must not evaluate it.
        let missing = MemberDesc::getter(widget_ty(), "Missing");
        let e = ExprBuilder::new("w", widget_ty())
            .body(|p| {
                Expr::binary(
                    BinaryOp::And,
                    Expr::bool_lit(false),
                    p.member(missing, TypeDesc::boolean()),
                    TypeDesc::boolean(),
                )
            })
            .build()
            .unwrap();
        let t = table();
        assert_eq!(
            Evaluator::new(&t).eval_lambda(&e, &ctx()).unwrap(),
            json!(false)
        );
    }
}
