//! Expression AST node and descriptor types
//!
//! The node set is small and closed: each variant corresponds to one
//! operation shape the protocol supports, and every match over [`Expr`] is
//! exhaustive so a new variant is a compile error at each consumer.

use serde::{Deserialize, Serialize};

/// A type descriptor: assembly + fully-qualified name + generic arguments.
///
/// Descriptors are structural; two descriptors are the same type exactly
/// when their canonical strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDesc {
    /// Assembly (module/package) the type lives in
    pub assembly: String,
    /// Fully-qualified type name
    pub name: String,
    /// Recursive generic arguments, empty for non-generic types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generics: Vec<TypeDesc>,
    /// Whether values of this type are asynchronous computations.
    ///
    /// The builder refuses shapes that would synchronously block on one.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub awaitable: bool,
}

impl TypeDesc {
    pub fn new(assembly: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            assembly: assembly.into(),
            name: name.into(),
            generics: Vec::new(),
            awaitable: false,
        }
    }

    pub fn with_generics(mut self, generics: Vec<TypeDesc>) -> Self {
        self.generics = generics;
        self
    }

    /// Mark this type as an asynchronous computation producing its first
    /// generic argument
    pub fn awaitable_of(assembly: impl Into<String>, inner: TypeDesc) -> Self {
        Self {
            assembly: assembly.into(),
            name: "Future".to_string(),
            generics: vec![inner],
            awaitable: true,
        }
    }

    /// The value type an awaitable produces, or the type itself otherwise
    pub fn awaited(&self) -> &TypeDesc {
        if self.awaitable {
            self.generics.first().unwrap_or(self)
        } else {
            self
        }
    }

    /// Canonical string form, used in signatures and cache keys
    pub fn canonical(&self) -> String {
        if self.generics.is_empty() {
            format!("{}:{}", self.assembly, self.name)
        } else {
            let args: Vec<String> = self.generics.iter().map(|g| g.canonical()).collect();
            format!("{}:{}<{}>", self.assembly, self.name, args.join(","))
        }
    }

    // Well-known primitive descriptors. Primitives live in the empty
    // assembly so both sides agree on them without registration.
    pub fn string() -> Self {
        Self::new("", "String")
    }
    pub fn boolean() -> Self {
        Self::new("", "Boolean")
    }
    pub fn int32() -> Self {
        Self::new("", "Int32")
    }
    pub fn int64() -> Self {
        Self::new("", "Int64")
    }
    pub fn float64() -> Self {
        Self::new("", "Double")
    }
    pub fn object() -> Self {
        Self::new("", "Object")
    }
    pub fn unit() -> Self {
        Self::new("", "Void")
    }

    pub fn is_primitive(&self) -> bool {
        self.assembly.is_empty()
    }
}

impl std::fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A callable or property reference: declaring type, name, and the
/// canonical signature string that disambiguates overloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberDesc {
    /// Type the member is declared on
    pub declaring: TypeDesc,
    /// Member name
    pub name: String,
    /// Canonical signature: `name(param,param,...)->ret`
    pub signature: String,
    /// Declared parameter types, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TypeDesc>,
}

impl MemberDesc {
    /// A method descriptor with an explicit parameter list and return type
    pub fn method(
        declaring: TypeDesc,
        name: impl Into<String>,
        params: Vec<TypeDesc>,
        ret: &TypeDesc,
    ) -> Self {
        let name = name.into();
        let signature = Self::canonical_signature(&name, &params, ret);
        Self {
            declaring,
            name,
            signature,
            params,
        }
    }

    /// A parameterless property getter descriptor
    pub fn getter(declaring: TypeDesc, name: impl Into<String>) -> Self {
        // Getters are keyed by name alone; properties cannot be overloaded.
        let name = name.into();
        Self {
            signature: format!("{name}()"),
            declaring,
            name,
            params: Vec::new(),
        }
    }

    /// A constructor descriptor for `declaring`
    pub fn constructor(declaring: TypeDesc, params: Vec<TypeDesc>) -> Self {
        let ret = declaring.clone();
        Self::method(declaring, ".ctor", params, &ret)
    }

    pub fn canonical_signature(name: &str, params: &[TypeDesc], ret: &TypeDesc) -> String {
        let params: Vec<String> = params.iter().map(|p| p.canonical()).collect();
        format!("{}({})->{}", name, params.join(","), ret.canonical())
    }

    /// Cache key: `(declaring type, name, signature)`
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.declaring.canonical(), self.name, self.signature)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// One expression node.
///
/// Every variant carries the static result type so numeric width and
/// null-vs-absent survive serialization and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// A literal or folded capture
    Constant {
        ty: TypeDesc,
        value: serde_json::Value,
    },

    /// Reference to the lambda parameter
    Parameter { ty: TypeDesc, name: String },

    /// Property / field access on a target expression
    MemberAccess {
        ty: TypeDesc,
        target: Box<Expr>,
        member: MemberDesc,
    },

    /// Instance (`target: Some`) or static (`target: None`) call
    MethodCall {
        ty: TypeDesc,
        target: Option<Box<Expr>>,
        method: MemberDesc,
        args: Vec<Expr>,
        /// The responder awaits the call's result before replying. Only
        /// legal at the lambda body root.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        awaited: bool,
    },

    /// Constructor invocation
    ConstructorCall {
        ty: TypeDesc,
        ctor: MemberDesc,
        args: Vec<Expr>,
    },

    Unary {
        ty: TypeDesc,
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Binary {
        ty: TypeDesc,
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Conditional {
        ty: TypeDesc,
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },

    /// Array literal; `ty` is the element type
    NewArray { ty: TypeDesc, items: Vec<Expr> },

    /// The tree root: one free parameter, one body
    Lambda {
        ty: TypeDesc,
        param_name: String,
        param_ty: TypeDesc,
        body: Box<Expr>,
    },
}

impl Expr {
    /// Static result type of this node
    pub fn ty(&self) -> &TypeDesc {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Parameter { ty, .. }
            | Expr::MemberAccess { ty, .. }
            | Expr::MethodCall { ty, .. }
            | Expr::ConstructorCall { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::NewArray { ty, .. }
            | Expr::Lambda { ty, .. } => ty,
        }
    }

    /// Depth-first walk over this node and all children
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Constant { .. } | Expr::Parameter { .. } => {}
            Expr::MemberAccess { target, .. } => target.walk(visit),
            Expr::MethodCall { target, args, .. } => {
                if let Some(target) = target {
                    target.walk(visit);
                }
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::ConstructorCall { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                test.walk(visit);
                if_true.walk(visit);
                if_false.walk(visit);
            }
            Expr::NewArray { items, .. } => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Lambda { body, .. } => body.walk(visit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_signature_disambiguates_overloads() {
        let t = TypeDesc::new("widgets", "Button");
        let a = MemberDesc::method(t.clone(), "Resize", vec![TypeDesc::int32()], &TypeDesc::unit());
        let b = MemberDesc::method(
            t,
            "Resize",
            vec![TypeDesc::float64()],
            &TypeDesc::unit(),
        );
        assert_ne!(a.signature, b.signature);
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn generic_types_canonicalize_recursively() {
        let inner = TypeDesc::new("", "String");
        let list = TypeDesc::new("collections", "List").with_generics(vec![inner]);
        assert_eq!(list.canonical(), "collections:List<:String>");
    }

    #[test]
    fn awaited_unwraps_one_level() {
        let fut = TypeDesc::awaitable_of("rt", TypeDesc::int32());
        assert!(fut.awaitable);
        assert_eq!(fut.awaited(), &TypeDesc::int32());
        assert_eq!(TypeDesc::string().awaited(), &TypeDesc::string());
    }

    #[test]
    fn expr_serde_is_tagged_by_kind() {
        let e = Expr::Constant {
            ty: TypeDesc::int32(),
            value: serde_json::json!(42),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "constant");
        assert_eq!(json["value"], 42);
    }
}
