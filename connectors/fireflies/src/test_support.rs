use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::client::GraphQLTransport;
use crate::error::FirefliesError;

type Responder = Box<dyn Fn(usize, &Value) -> Result<Value, FirefliesError> + Send + Sync>;

/// In-memory transport that answers each call through a closure and records
/// the variables it was called with.
pub struct ScriptedTransport {
    responder: Responder,
    calls: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &Value) -> Result<Value, FirefliesError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Serves the given pages in order, then empty pages.
    pub fn pages(field: &'static str, pages: Vec<Vec<Value>>) -> Self {
        Self::new(move |call, _| {
            let page = pages.get(call).cloned().unwrap_or_default();
            let mut data = serde_json::Map::new();
            data.insert(field.to_string(), Value::Array(page));
            Ok(json!({ "data": data }))
        })
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphQLTransport for ScriptedTransport {
    async fn execute(&self, _query: &str, variables: Value) -> Result<Value, FirefliesError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(variables.clone());
            calls.len() - 1
        };
        (self.responder)(call, &variables)
    }
}

pub fn transcript(id: &str, date: i64) -> Value {
    json!({ "id": id, "date": date, "title": format!("Meeting {}", id) })
}
