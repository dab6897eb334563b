use serde_json::{Value, json};

use engram_engine::{ReconstructRequest, ReconstructScope};

use crate::store::{ForgetRequest, MemoryStore, QueryOptions};
use crate::{Error, Result};

/// A retrieval capability: name, JSON schema for its arguments, and the
/// handler that serves it. The CLI and any tool host dispatch through the
/// same registry, so the surface cannot drift between front-ends.
pub struct Capability {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
    pub handler: fn(&MemoryStore, &Value) -> Result<Value>,
}

pub struct Registry {
    capabilities: Vec<Capability>,
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn arg_usize(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn required_str(args: &Value, key: &str) -> Result<String> {
    arg_str(args, key).ok_or_else(|| Error::InvalidInput(format!("missing argument: {}", key)))
}

fn query_options(args: &Value) -> QueryOptions {
    QueryOptions {
        project: arg_str(args, "project"),
        max_tokens: arg_usize(args, "max_tokens"),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::InvalidInput(e.to_string()))
}

fn handle_search(store: &MemoryStore, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?;
    to_value(&store.search(&query, &query_options(args))?)
}

fn handle_recall(store: &MemoryStore, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?;
    to_value(&store.recall(&query, &query_options(args))?)
}

fn handle_predict(store: &MemoryStore, args: &Value) -> Result<Value> {
    let context = required_str(args, "context")?;
    to_value(&store.predict(&context, &query_options(args))?)
}

fn handle_reconstruct(store: &MemoryStore, args: &Value) -> Result<Value> {
    let project = required_str(args, "project")?;
    let scope = if let Some(session_id) = arg_str(args, "session_id") {
        ReconstructScope::Session(session_id)
    } else if let Some(days) = args.get("days_back").and_then(|v| v.as_f64()) {
        ReconstructScope::DaysBack(days)
    } else if args.get("previous_session").and_then(|v| v.as_bool()) == Some(true) {
        ReconstructScope::PreviousSession
    } else {
        ReconstructScope::Window {
            from: arg_str(args, "from"),
            to: arg_str(args, "to"),
        }
    };

    let req = ReconstructRequest {
        project,
        scope,
        max_tokens: arg_usize(args, "max_tokens").unwrap_or(2000),
        keep_newest: args
            .get("keep_newest")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    };
    to_value(&store.reconstruct(&req)?)
}

fn handle_list_projects(store: &MemoryStore, _args: &Value) -> Result<Value> {
    to_value(&store.list_projects()?)
}

fn handle_list_sessions(store: &MemoryStore, args: &Value) -> Result<Value> {
    let project = required_str(args, "project")?;
    let from = arg_str(args, "from");
    let to = arg_str(args, "to");
    to_value(&store.list_sessions(&project, from.as_deref(), to.as_deref())?)
}

fn handle_forget(store: &MemoryStore, args: &Value) -> Result<Value> {
    let req = ForgetRequest {
        project: required_str(args, "project")?,
        before: arg_str(args, "before"),
        after: arg_str(args, "after"),
        session_id: arg_str(args, "session_id"),
        query: arg_str(args, "query"),
        threshold: args.get("threshold").and_then(|v| v.as_f64()),
        dry_run: args
            .get("dry_run")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    };
    to_value(&store.forget(&req)?)
}

fn handle_stats(store: &MemoryStore, _args: &Value) -> Result<Value> {
    to_value(&store.stats()?)
}

impl Registry {
    /// The standard capability set exposed to tool hosts.
    pub fn standard() -> Self {
        let capabilities = vec![
            Capability {
                name: "search",
                description: "Semantic search over stored session memory",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "project": {"type": "string"},
                        "max_tokens": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
                handler: handle_search,
            },
            Capability {
                name: "recall",
                description: "Narrative chain of what led to the queried moment",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "project": {"type": "string"},
                        "max_tokens": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
                handler: handle_recall,
            },
            Capability {
                name: "predict",
                description: "Narrative chain of what tends to follow the given context",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "context": {"type": "string"},
                        "project": {"type": "string"},
                        "max_tokens": {"type": "integer"}
                    },
                    "required": ["context"]
                }),
                handler: handle_predict,
            },
            Capability {
                name: "reconstruct",
                description: "Chronological session reconstruction without semantic ranking",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "project": {"type": "string"},
                        "session_id": {"type": "string"},
                        "from": {"type": "string"},
                        "to": {"type": "string"},
                        "days_back": {"type": "number"},
                        "previous_session": {"type": "boolean"},
                        "max_tokens": {"type": "integer"},
                        "keep_newest": {"type": "boolean"}
                    },
                    "required": ["project"]
                }),
                handler: handle_reconstruct,
            },
            Capability {
                name: "list_projects",
                description: "Projects present in the store with chunk counts",
                schema: json!({"type": "object", "properties": {}}),
                handler: handle_list_projects,
            },
            Capability {
                name: "list_sessions",
                description: "Sessions of a project with time bounds and sizes",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "project": {"type": "string"},
                        "from": {"type": "string"},
                        "to": {"type": "string"}
                    },
                    "required": ["project"]
                }),
                handler: handle_list_sessions,
            },
            Capability {
                name: "forget",
                description: "Delete chunks by time, session or semantic filters",
                schema: json!({
                    "type": "object",
                    "properties": {
                        "project": {"type": "string"},
                        "before": {"type": "string"},
                        "after": {"type": "string"},
                        "session_id": {"type": "string"},
                        "query": {"type": "string"},
                        "threshold": {"type": "number"},
                        "dry_run": {"type": "boolean"}
                    },
                    "required": ["project"]
                }),
                handler: handle_forget,
            },
            Capability {
                name: "stats",
                description: "Store-wide chunk, edge and cluster counts",
                schema: json!({"type": "object", "properties": {}}),
                handler: handle_stats,
            },
        ];
        Self { capabilities }
    }

    pub fn list(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn dispatch(&self, store: &MemoryStore, name: &str, args: &Value) -> Result<Value> {
        let capability = self
            .capabilities
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown capability: {}", name)))?;
        (capability.handler)(store, args)
    }
}
