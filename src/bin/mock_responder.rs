//! Mock responder binary for integration testing
//!
//! Hosts a small fixed widget tree behind the real dispatch loop so driver
//! behavior can be tested end to end without a foreign process. A few
//! widgets have special behavior: clicking the "reshuffle" button reassigns
//! every target id (exercising reconciliation), and setting `ModalMs` on
//! any widget simulates a nested modal state for that long (exercising
//! pending replies).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use serde_json::{json, Value};

use objpilot::common::{logging, Result};
use objpilot::expr::{Evaluator, Expr, MemberDesc, MemberTable, TypeDesc};
use objpilot::protocol::{
    install_crash_hook, CommandHost, RemoteNode, Request, Responder, Response,
};
use objpilot::wire::WrappedValue;

/// Members accessed through this name reply with the unserializable
/// sentinel, standing in for results that cannot cross the wire.
const OPAQUE_MEMBER: &str = "NativeHandle";

#[derive(Parser)]
#[command(name = "mock_responder", about = "Fixed widget tree behind the responder loop")]
struct Args {
    /// Channel id to listen on
    #[arg(long)]
    channel_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = logging::init_responder();
    install_crash_hook(&args.channel_id);

    let host = Arc::new(MockHost::new());
    let responder = Responder::new(args.channel_id, host);
    responder.serve().await
}

fn widget_ty() -> TypeDesc {
    TypeDesc::new("mock", "Widget")
}

fn member_table() -> MemberTable {
    let mut table = MemberTable::new();
    for prop in ["Name", "Title", "Text", "Count", "Width", "Height"] {
        table.register_field_getter(widget_ty(), prop);
    }
    table.register(
        &MemberDesc::method(
            widget_ty(),
            "Describe",
            vec![],
            &TypeDesc::string(),
        ),
        Arc::new(|target, _args| {
            let name = target
                .and_then(|t| t.get("Name"))
                .and_then(Value::as_str)
                .unwrap_or("?");
            let count = target
                .and_then(|t| t.get("Count"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Ok(json!(format!("{name}:{count}")))
        }),
    );
    table.register(
        &MemberDesc::method(
            TypeDesc::new("mock", "Env"),
            "Ping",
            vec![],
            &TypeDesc::string(),
        ),
        Arc::new(|_, _| Ok(json!("pong"))),
    );
    table
}

fn prop(value: Value) -> WrappedValue {
    WrappedValue::wrap("", value)
}

fn initial_tree() -> HashMap<u64, RemoteNode> {
    let mut nodes = HashMap::new();
    nodes.insert(
        1,
        RemoteNode {
            target_id: 1,
            type_name: "mock.Window".into(),
            parent_id: None,
            child_ids: vec![2, 3, 4],
            properties: HashMap::from([
                ("Title".into(), prop(json!("Main Window"))),
                ("Name".into(), prop(json!("root"))),
                ("Width".into(), prop(json!(800))),
                ("Height".into(), prop(json!(600))),
            ]),
        },
    );
    nodes.insert(
        2,
        RemoteNode {
            target_id: 2,
            type_name: "mock.Button".into(),
            parent_id: Some(1),
            child_ids: vec![],
            properties: HashMap::from([
                ("AutomationId".into(), prop(json!("submit"))),
                ("Name".into(), prop(json!("Submit"))),
                ("Width".into(), prop(json!(80))),
                ("Height".into(), prop(json!(24))),
                ("Count".into(), prop(json!(0))),
            ]),
        },
    );
    nodes.insert(
        3,
        RemoteNode {
            target_id: 3,
            type_name: "mock.TextBox".into(),
            parent_id: Some(1),
            child_ids: vec![],
            properties: HashMap::from([
                ("Name".into(), prop(json!("input"))),
                ("Text".into(), prop(json!(""))),
                ("Width".into(), prop(json!(200))),
                ("Height".into(), prop(json!(24))),
            ]),
        },
    );
    nodes.insert(
        4,
        RemoteNode {
            target_id: 4,
            type_name: "mock.Button".into(),
            parent_id: Some(1),
            child_ids: vec![],
            properties: HashMap::from([
                ("AutomationId".into(), prop(json!("reshuffle"))),
                ("Name".into(), prop(json!("Reshuffle"))),
                ("Width".into(), prop(json!(80))),
                ("Height".into(), prop(json!(24))),
                ("Count".into(), prop(json!(0))),
            ]),
        },
    );
    nodes
}

pub struct MockHost {
    nodes: Mutex<HashMap<u64, RemoteNode>>,
    table: MemberTable,
    modal_until: Mutex<Option<Instant>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(initial_tree()),
            table: member_table(),
            modal_until: Mutex::new(None),
        }
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, HashMap<u64, RemoteNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_modal(&self, ms: u64) {
        *self.modal_until.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Instant::now() + Duration::from_millis(ms));
    }

    async fn wait_modal_clear(&self) {
        while self.in_modal_state() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// The node's properties flattened into one object, the evaluation
    /// context for expressions targeting it
    fn eval_context(node: &RemoteNode) -> Value {
        let mut ctx = serde_json::Map::new();
        ctx.insert("TargetId".into(), json!(node.target_id));
        ctx.insert("TypeName".into(), json!(node.type_name));
        for (name, value) in &node.properties {
            ctx.insert(name.clone(), value.value.clone());
        }
        Value::Object(ctx)
    }

    fn evaluate(&self, code: &Expr, context: &Value) -> Response {
        let mut opaque = false;
        code.walk(&mut |node| {
            if let Expr::MemberAccess { member, .. } = node {
                if member.name == OPAQUE_MEMBER {
                    opaque = true;
                }
            }
        });
        if opaque {
            return Response::unserializable();
        }

        let evaluator = Evaluator::new(&self.table);
        match evaluator.eval_lambda(code, context) {
            Ok(value) => Response::value(WrappedValue::wrap(code.ty().canonical(), value)),
            Err(e) => Response::error(e),
        }
    }

    /// Reassign every target id, as a remote side with unstable identity
    /// would across two observations
    fn reshuffle_ids(&self) {
        let mut nodes = self.lock_nodes();
        let remapped: HashMap<u64, RemoteNode> = nodes
            .drain()
            .map(|(id, mut node)| {
                node.target_id = id + 100;
                node.parent_id = node.parent_id.map(|p| p + 100);
                node.child_ids = node.child_ids.iter().map(|c| c + 100).collect();
                (id + 100, node)
            })
            .collect();
        *nodes = remapped;
        tracing::info!("target ids reshuffled");
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandHost for MockHost {
    async fn execute(&self, request: &Request) -> Result<Response> {
        // The modal control plane itself must never block behind the modal.
        if let Request::SetProperty {
            property_name,
            property_value,
            ..
        } = request
        {
            if property_name == "ModalMs" {
                self.set_modal(property_value.value.as_u64().unwrap_or(0));
                return Ok(Response::success());
            }
        }

        // A nested modal state blocks real execution until it clears.
        if request.must_not_hang() {
            self.wait_modal_clear().await;
        }

        let response = match request {
            Request::TreeDump { prop_names } => {
                let nodes = self.lock_nodes();
                let mut dump: Vec<RemoteNode> = nodes
                    .values()
                    .map(|n| {
                        let mut node = n.clone();
                        if !prop_names.is_empty() {
                            node.properties.retain(|k, _| prop_names.contains(k));
                        }
                        node
                    })
                    .collect();
                dump.sort_by_key(|n| n.target_id);
                Response::tree(dump)
            }

            Request::InvokeInstance {
                target_id, code, ..
            } => match self.lock_nodes().get(target_id) {
                Some(node) => self.evaluate(code, &Self::eval_context(node)),
                None => Response::stale(),
            },

            Request::InvokeStatic { code } => self.evaluate(code, &Value::Null),

            Request::SetProperty {
                target_id,
                property_name,
                property_value,
            } => {
                let mut nodes = self.lock_nodes();
                match nodes.get_mut(target_id) {
                    Some(node) => {
                        node.properties
                            .insert(property_name.clone(), property_value.clone());
                        Response::success()
                    }
                    None => Response::stale(),
                }
            }

            Request::RaiseEvent {
                target_id,
                get_event_args,
            } => {
                let context = match self.lock_nodes().get(target_id) {
                    Some(node) => Self::eval_context(node),
                    None => return Ok(Response::stale()),
                };
                match self.evaluate(get_event_args, &context) {
                    Response::Value { value } => {
                        tracing::info!(target_id, args = %value.value, "event raised");
                        Response::success()
                    }
                    other => other,
                }
            }

            Request::SynthesizeClick { target_id, button } => {
                let reshuffle = {
                    let mut nodes = self.lock_nodes();
                    let node = match nodes.get_mut(target_id) {
                        Some(n) => n,
                        None => return Ok(Response::stale()),
                    };
                    let count = node
                        .property("Count")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    node.properties
                        .insert("Count".into(), prop(json!(count + 1)));
                    tracing::debug!(target_id, ?button, clicks = count + 1, "click synthesized");
                    node.property_str("AutomationId") == Some("reshuffle")
                };
                if reshuffle {
                    self.reshuffle_ids();
                }
                Response::success()
            }

            Request::CaptureImage { target_id, format } => {
                let nodes = self.lock_nodes();
                let subject: Value = match target_id {
                    Some(id) => match nodes.get(id) {
                        Some(node) => serde_json::to_value(node)?,
                        None => return Ok(Response::stale()),
                    },
                    None => {
                        let mut all: Vec<&RemoteNode> = nodes.values().collect();
                        all.sort_by_key(|n| n.target_id);
                        serde_json::to_value(&all)?
                    }
                };
                // A deterministic stand-in for pixels: the serialized
                // subject, tagged with the requested format.
                let fake_pixels = format!("{format:?}:{subject}");
                Response::image(BASE64.encode(fake_pixels.as_bytes()))
            }
        };

        Ok(response)
    }

    fn in_modal_state(&self) -> bool {
        self.modal_until
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some_and(|until| Instant::now() < until)
    }
}
