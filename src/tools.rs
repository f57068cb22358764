use std::sync::{Arc, RwLock};

use gemini_live_types::tools::{FunctionDeclaration, Tool};

/// The only tool the assistant exposes.
pub const GET_LIVE_DATA: &str = "get_live_data";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: serde_json::Value,
}

/// Health stats and fridge contents at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LiveSnapshot {
    pub steps: u64,
    pub calories_burned: u64,
    #[serde(rename = "inventory")]
    pub inventory_item_names: Vec<String>,
}

impl LiveSnapshot {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "steps": self.steps,
            "calories_burned": self.calories_burned,
            "inventory": self.inventory_item_names,
        })
    }
}

/// Source of live data, read once per tool call. Implementations must
/// return the current values, not a copy taken when the session opened.
#[cfg_attr(test, mockall::automock)]
pub trait LiveSnapshotProvider: Send + Sync {
    fn read(&self) -> LiveSnapshot;
}

impl<F> LiveSnapshotProvider for F
where
    F: Fn() -> LiveSnapshot + Send + Sync,
{
    fn read(&self) -> LiveSnapshot {
        self()
    }
}

/// A snapshot the surrounding application updates in place.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<LiveSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(snapshot: LiveSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut LiveSnapshot)) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl LiveSnapshotProvider for SharedSnapshot {
    fn read(&self) -> LiveSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Answers tool calls from the engine with a fresh snapshot.
pub struct ToolCallDispatcher {
    provider: Arc<dyn LiveSnapshotProvider>,
}

impl ToolCallDispatcher {
    pub fn new(provider: Arc<dyn LiveSnapshotProvider>) -> Self {
        Self { provider }
    }

    /// Declarations to advertise in the session setup.
    pub fn tools() -> Vec<Tool> {
        vec![Tool::new(vec![FunctionDeclaration::new(GET_LIVE_DATA)
            .with_description("Fetch the most up-to-date health statistics and fridge inventory.")
            .with_parameters(serde_json::json!({"type": "OBJECT", "properties": {}}))])]
    }

    /// Unknown tools get no response at all.
    pub fn dispatch(&self, request: &ToolCallRequest) -> Option<ToolCallResponse> {
        if request.name != GET_LIVE_DATA {
            tracing::warn!(id = %request.id, name = %request.name, "ignoring unsupported tool call");
            return None;
        }

        let snapshot = self.provider.read();
        tracing::debug!(id = %request.id, ?snapshot, "answering tool call");
        Some(ToolCallResponse {
            id: request.id.clone(),
            name: request.name.clone(),
            result: snapshot.to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn response_carries_request_id_and_snapshot() {
        let mut provider = MockLiveSnapshotProvider::new();
        provider.expect_read().times(1).returning(|| LiveSnapshot {
            steps: 4200,
            calories_burned: 310,
            inventory_item_names: vec!["Eggs".to_string(), "Spinach".to_string()],
        });
        let dispatcher = ToolCallDispatcher::new(Arc::new(provider));

        let response = dispatcher.dispatch(&request("call-42", GET_LIVE_DATA)).unwrap();
        assert_eq!(response.id, "call-42");
        assert_eq!(response.name, GET_LIVE_DATA);
        assert_eq!(
            response.result,
            serde_json::json!({"steps": 4200, "calories_burned": 310, "inventory": ["Eggs", "Spinach"]})
        );
    }

    #[test]
    fn unknown_tools_are_ignored_without_reading() {
        let mut provider = MockLiveSnapshotProvider::new();
        provider.expect_read().never();
        let dispatcher = ToolCallDispatcher::new(Arc::new(provider));
        assert!(dispatcher.dispatch(&request("call-1", "order_pizza")).is_none());
    }

    #[test]
    fn every_dispatch_reads_fresh_values() {
        let snapshot = SharedSnapshot::new(LiveSnapshot {
            steps: 100,
            ..Default::default()
        });
        let dispatcher = ToolCallDispatcher::new(Arc::new(snapshot.clone()));

        let before = dispatcher.dispatch(&request("a", GET_LIVE_DATA)).unwrap();
        snapshot.update(|s| {
            s.steps = 250;
            s.inventory_item_names.push("Milk".to_string());
        });
        let after = dispatcher.dispatch(&request("b", GET_LIVE_DATA)).unwrap();

        assert_ne!(before.result, after.result);
        assert_eq!(after.result["steps"], 250);
        assert_eq!(after.result["inventory"], serde_json::json!(["Milk"]));
    }

    #[test]
    fn closures_can_provide_snapshots() {
        let dispatcher = ToolCallDispatcher::new(Arc::new(|| LiveSnapshot {
            steps: 7,
            ..Default::default()
        }));
        let response = dispatcher.dispatch(&request("x", GET_LIVE_DATA)).unwrap();
        assert_eq!(response.result["steps"], 7);
    }

    #[test]
    fn declaration_advertises_get_live_data() {
        let tools = ToolCallDispatcher::tools();
        let declaration = &tools[0].function_declarations()[0];
        assert_eq!(declaration.name(), GET_LIVE_DATA);
        assert!(declaration.description().is_some());
    }
}
