//! Command protocol: the closed set of request kinds and response shapes
//!
//! The kind set is a tagged union matched exhaustively everywhere; adding a
//! kind is a new variant and the compiler finds every dispatch site. The
//! exceptional outcomes that are not errors (pending, unserializable, stale)
//! travel in-band as sentinel values and are translated at the driver edge.

pub mod host;
pub mod responder;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::wire::WrappedValue;

pub use host::CommandHost;
pub use responder::{install_crash_hook, Responder, ResponseSlot};

/// Responder is mid-execution, blocked behind a nested modal state
pub const PENDING_RESULT: &str = "PendingResult";
/// The real result exists but cannot cross the wire
pub const UNSERIALIZABLE_RESULT: &str = "UnserializableResult";
/// The target handle no longer resolves to a live object
pub const STALE_ELEMENT: &str = "StaleElement";

/// Mouse button for synthesized clicks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
}

/// Encoding for captured images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// One request frame. Exactly one request is outstanding per channel, so
/// correlation is implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Kind", rename_all_fields = "PascalCase")]
pub enum Request {
    /// Full snapshot of the remote object tree with the named properties
    TreeDump { prop_names: BTreeSet<String> },

    /// Evaluate an expression against the object behind `target_id`
    InvokeInstance {
        target_id: u64,
        code: Expr,
        timeout_ms: u64,
    },

    /// Evaluate an expression with no instance context
    InvokeStatic { code: Expr },

    /// Assign a property on the object behind `target_id`
    SetProperty {
        target_id: u64,
        property_name: String,
        property_value: WrappedValue,
    },

    /// Raise an event on the target; `get_event_args` builds the payload
    /// on the responder side
    RaiseEvent { target_id: u64, get_event_args: Expr },

    /// Synthesize a pointer click on the target
    SynthesizeClick { target_id: u64, button: MouseButton },

    /// Capture the target (or the whole surface when absent) as an image
    CaptureImage {
        target_id: Option<u64>,
        format: ImageFormat,
    },
}

impl Request {
    /// Kind name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Request::TreeDump { .. } => "TreeDump",
            Request::InvokeInstance { .. } => "InvokeInstance",
            Request::InvokeStatic { .. } => "InvokeStatic",
            Request::SetProperty { .. } => "SetProperty",
            Request::RaiseEvent { .. } => "RaiseEvent",
            Request::SynthesizeClick { .. } => "SynthesizeClick",
            Request::CaptureImage { .. } => "CaptureImage",
        }
    }

    /// Whether an indefinite hang is unacceptable for this kind.
    ///
    /// These kinds race a nested-modal watchdog and reply with a pending
    /// sentinel rather than block the channel. Tree dumps and captures read
    /// passively and are allowed to wait.
    pub fn must_not_hang(&self) -> bool {
        !matches!(
            self,
            Request::TreeDump { .. } | Request::CaptureImage { .. }
        )
    }
}

/// One remote object in a tree dump.
///
/// `target_id` is only meaningful within the dump that produced it;
/// `parent_id` and `child_ids` always reference ids in the same dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteNode {
    pub target_id: u64,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<u64>,
    #[serde(default)]
    pub properties: HashMap<String, WrappedValue>,
}

impl RemoteNode {
    /// A property's inner value, if present
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name).map(|w| &w.value)
    }

    /// A property as a string, if present and string-valued
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(|v| v.as_str())
    }
}

/// One response frame. The shapes are disjoint by field name, so the
/// representation is untagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error {
        #[serde(rename = "Error")]
        error: String,
    },
    Value {
        #[serde(rename = "Value")]
        value: WrappedValue,
    },
    Success {
        #[serde(rename = "Success")]
        success: bool,
    },
    Image {
        #[serde(rename = "Base64Image")]
        base64_image: String,
    },
    Tree(Vec<RemoteNode>),
}

impl Response {
    pub fn error(e: impl std::fmt::Display) -> Self {
        Response::Error {
            error: e.to_string(),
        }
    }

    pub fn value(value: WrappedValue) -> Self {
        Response::Value { value }
    }

    pub fn success() -> Self {
        Response::Success { success: true }
    }

    pub fn image(base64_image: impl Into<String>) -> Self {
        Response::Image {
            base64_image: base64_image.into(),
        }
    }

    pub fn tree(nodes: Vec<RemoteNode>) -> Self {
        Response::Tree(nodes)
    }

    pub fn pending() -> Self {
        Self::sentinel(PENDING_RESULT)
    }

    pub fn unserializable() -> Self {
        Self::sentinel(UNSERIALIZABLE_RESULT)
    }

    pub fn stale() -> Self {
        Self::sentinel(STALE_ELEMENT)
    }

    fn sentinel(s: &str) -> Self {
        Response::Value {
            value: WrappedValue::wrap("", serde_json::Value::String(s.to_string())),
        }
    }

    fn is_sentinel(&self, s: &str) -> bool {
        matches!(self, Response::Value { value } if value.as_sentinel() == Some(s))
    }

    pub fn is_pending(&self) -> bool {
        self.is_sentinel(PENDING_RESULT)
    }

    pub fn is_unserializable(&self) -> bool {
        self.is_sentinel(UNSERIALIZABLE_RESULT)
    }

    pub fn is_stale(&self) -> bool {
        self.is_sentinel(STALE_ELEMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_kind() {
        let r = Request::SynthesizeClick {
            target_id: 7,
            button: MouseButton::Left,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["Kind"], "SynthesizeClick");
        assert_eq!(v["TargetId"], 7);
        assert_eq!(v["Button"], "Left");
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let v = json!({"Kind": "SelfDestruct"});
        assert!(serde_json::from_value::<Request>(v).is_err());
    }

    #[test]
    fn hang_tolerance_per_kind() {
        let dump = Request::TreeDump {
            prop_names: BTreeSet::new(),
        };
        let capture = Request::CaptureImage {
            target_id: None,
            format: ImageFormat::Png,
        };
        let click = Request::SynthesizeClick {
            target_id: 1,
            button: MouseButton::Left,
        };
        assert!(!dump.must_not_hang());
        assert!(!capture.must_not_hang());
        assert!(click.must_not_hang());
    }

    #[test]
    fn response_shapes_parse_untagged() {
        let err: Response = serde_json::from_value(json!({"Error": "boom"})).unwrap();
        assert!(matches!(err, Response::Error { .. }));

        let ok: Response = serde_json::from_value(json!({"Success": true})).unwrap();
        assert!(matches!(ok, Response::Success { success: true }));

        let tree: Response =
            serde_json::from_value(json!([{"TargetId": 1, "TypeName": "w.Window"}])).unwrap();
        match tree {
            Response::Tree(nodes) => assert_eq!(nodes[0].target_id, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sentinels_are_recognized() {
        assert!(Response::pending().is_pending());
        assert!(Response::stale().is_stale());
        assert!(Response::unserializable().is_unserializable());
        // A genuine string value is not mistaken for a sentinel.
        let real = Response::value(WrappedValue::wrap("String", json!("PendingInvoice")));
        assert!(!real.is_pending());
    }
}
