//! Workflow spec model
//!
//! Specs arrive already loaded from their surface format (the loader is
//! external); this module only gives them a typed shape and answers graph
//! questions about them. Tasks keep their declaration order, which is the
//! order inspection errors are reported in.
//!
//! Both task layouts are accepted:
//!
//! ```json
//! {"tasks": {"task1": {"action": "core.noop"}}}
//! {"tasks": [{"name": "task1", "action": "core.noop"}]}
//! ```

pub mod inspector;
mod items;

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::utils::serde::{null_as_default, one_or_many};

pub use inspector::{InspectionCategory, InspectionError, InspectionReport, Inspector};
pub use items::{ItemsClause, ITEMS_PATTERN};

/* ===================== Workflow ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input: Vec<InputDecl>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: Vec<Binding>,
    #[serde(default, deserialize_with = "tasks_in_order")]
    pub tasks: Vec<TaskSpec>,
}

/// A transition into `target` declared by `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inbound<'a> {
    pub source: &'a str,
    /// Index of the transition within the source's `next`
    pub transition: usize,
}

impl WorkflowSpec {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn from_value(value: JsonValue) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Run every inspection rule over this spec
    pub fn inspect(&self) -> InspectionReport {
        Inspector::new().inspect(self)
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| task.name == name)
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.task(name).is_some()
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.input.iter().map(|decl| decl.name.as_str())
    }

    /// Every transition entering each task, in declaration order of the sources.
    ///
    /// A transition listing a task twice counts once.
    pub fn inbound(&self) -> HashMap<&str, Vec<Inbound<'_>>> {
        let mut inbound: HashMap<&str, Vec<Inbound<'_>>> = HashMap::new();

        for task in &self.tasks {
            for (index, transition) in task.next.iter().enumerate() {
                let mut seen: Vec<&str> = Vec::new();
                for target in &transition.targets {
                    if seen.contains(&target.as_str()) {
                        continue;
                    }
                    seen.push(target);
                    inbound.entry(target.as_str()).or_default().push(Inbound {
                        source: &task.name,
                        transition: index,
                    });
                }
            }
        }

        inbound
    }

    /// Number of transitions entering `name`
    pub fn inbound_count(&self, name: &str) -> usize {
        self.inbound().get(name).map_or(0, Vec::len)
    }

    /// Distinct tasks with a transition into `name`, in declaration order.
    ///
    /// A source with several transitions into `name` (a `succeeded()` and a
    /// `failed()` branch, say) is listed once.
    pub fn inbound_sources(&self, name: &str) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for arrival in self.inbound().get(name).into_iter().flatten() {
            if !sources.contains(&arrival.source) {
                sources.push(arrival.source);
            }
        }
        sources
    }

    /// Tasks no transition leads into, in declaration order
    pub fn start_tasks(&self) -> Vec<&TaskSpec> {
        let inbound = self.inbound();
        self.tasks
            .iter()
            .filter(|task| !inbound.contains_key(task.name.as_str()))
            .collect()
    }

    /// A task without a join that several transitions lead into.
    ///
    /// Every arrival at a split task runs it on a route of its own.
    pub fn is_split(&self, name: &str) -> bool {
        match self.task(name) {
            Some(task) => task.join.is_none() && self.inbound_count(name) > 1,
            None => false,
        }
    }
}

fn tasks_in_order<'de, D>(deserializer: D) -> Result<Vec<TaskSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TasksVisitor;

    impl<'de> Visitor<'de> for TasksVisitor {
        type Value = Vec<TaskSpec>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of named tasks or a map of task name to task")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut tasks = Vec::new();
            while let Some(task) = seq.next_element::<TaskSpec>()? {
                tasks.push(task);
            }
            Ok(tasks)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut tasks = Vec::new();
            while let Some((name, mut task)) = map.next_entry::<String, TaskSpec>()? {
                task.name = name;
                tasks.push(task);
            }
            Ok(tasks)
        }
    }

    deserializer.deserialize_any(TasksVisitor)
}

/* ===================== Declarations ===================== */

/// A declared workflow input: `"name"` or `{"name": default}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct InputDecl {
    pub name: String,
    pub default: Option<JsonValue>,
}

impl InputDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: JsonValue) -> Self {
        Self {
            name: name.into(),
            default: Some(default),
        }
    }
}

impl TryFrom<JsonValue> for InputDecl {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::String(name) => Ok(Self::new(name)),
            JsonValue::Object(map) => {
                let (name, default) = single_entry(map)?;
                Ok(Self::with_default(name, default))
            }
            other => Err(format!("Invalid input declaration: {other}")),
        }
    }
}

impl From<InputDecl> for JsonValue {
    fn from(decl: InputDecl) -> Self {
        match decl.default {
            None => JsonValue::String(decl.name),
            Some(default) => {
                let mut map = Map::new();
                map.insert(decl.name, default);
                JsonValue::Object(map)
            }
        }
    }
}

/// A `{"name": value}` pair, used for outputs and publishes.
///
/// The value may embed expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct Binding {
    pub name: String,
    pub value: JsonValue,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl TryFrom<JsonValue> for Binding {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(map) => {
                let (name, value) = single_entry(map)?;
                Ok(Self::new(name, value))
            }
            other => Err(format!("Expected a single-key object, got {other}")),
        }
    }
}

impl From<Binding> for JsonValue {
    fn from(binding: Binding) -> Self {
        let mut map = Map::new();
        map.insert(binding.name, binding.value);
        JsonValue::Object(map)
    }
}

fn single_entry(map: Map<String, JsonValue>) -> Result<(String, JsonValue), String> {
    if map.len() != 1 {
        return Err(format!("Expected a single-key object, got {} keys", map.len()));
    }
    map.into_iter()
        .next()
        .ok_or_else(|| "Expected a single-key object".to_string())
}

/* ===================== Tasks ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Filled from the map key when tasks are given as a map
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Map::is_empty")]
    pub input: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<WithItems>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
    /// Seconds to hold the task in `Delayed` before it runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: Vec<TransitionSpec>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The raw item clause, verbatim
    pub fn items(&self) -> Option<&str> {
        self.with.as_ref().map(|with| with.items.as_str())
    }
}

/// Item iteration: `with: "<clause>"` or `with: {items, concurrency}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawWith")]
pub struct WithItems {
    /// The item clause exactly as written, `in`-prefix and blanks included
    pub items: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<Concurrency>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWith {
    Inline(String),
    Full {
        items: String,
        #[serde(default)]
        concurrency: Option<Concurrency>,
    },
}

impl From<RawWith> for WithItems {
    fn from(raw: RawWith) -> Self {
        match raw {
            RawWith::Inline(items) => Self {
                items,
                concurrency: None,
            },
            RawWith::Full { items, concurrency } => Self { items, concurrency },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Concurrency {
    Fixed(u64),
    Expression(String),
}

/// `join: all` waits for every inbound transition, `join: n` for the first n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum JoinSpec {
    All,
    Count(usize),
}

impl TryFrom<JsonValue> for JoinSpec {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match &value {
            JsonValue::String(s) if s == "all" => Ok(Self::All),
            JsonValue::Number(n) => match n.as_u64() {
                Some(count) if count > 0 => Ok(Self::Count(count as usize)),
                _ => Err(format!("Join count must be a positive integer, got {n}")),
            },
            _ => Err(format!("Join must be \"all\" or a positive integer, got {value}")),
        }
    }
}

impl From<JoinSpec> for JsonValue {
    fn from(join: JoinSpec) -> Self {
        match join {
            JoinSpec::All => JsonValue::String("all".to_string()),
            JoinSpec::Count(count) => JsonValue::from(count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySpec {
    pub count: u32,
    /// Seconds between attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

/// One entry of a task's `next`.
///
/// A transition without `when` fires only when the task succeeded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub publish: Vec<Binding>,
    #[serde(rename = "do", default, deserialize_with = "one_or_many")]
    pub targets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    #[test]
    fn test_map_layout_keeps_declaration_order() {
        let spec = WorkflowSpec::from_json(
            r#"{
                "tasks": {
                    "zeta": {"action": "core.noop", "next": [{"do": "alpha"}]},
                    "alpha": {"action": "core.noop"},
                    "mid": {}
                }
            }"#,
        )
        .unwrap();

        let names: Vec<_> = spec.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(spec.tasks[0].next[0].targets, vec!["alpha"]);
    }

    #[test]
    fn test_value_map_layout_keeps_declaration_order() {
        let spec = WorkflowSpec::from_value(json!({
            "tasks": {
                "zeta": {"input": {"b": "<% ctx(b) %>", "a": "<% ctx(a) %>"}},
                "alpha": {"input": {"c": "<% ctx(c) %>"}}
            }
        }))
        .unwrap();

        let names: Vec<_> = spec.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let keys: Vec<_> = spec.tasks[0].input.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a"]);

        let report = spec.inspect();
        let paths: Vec<_> = report
            .get(InspectionCategory::Context)
            .iter()
            .map(|e| e.spec_path.as_str())
            .collect();
        assert_eq!(paths, vec!["tasks.zeta.input", "tasks.zeta.input", "tasks.alpha.input"]);

        let unbound: Vec<_> = report
            .get(InspectionCategory::Context)
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            unbound,
            vec![
                "Variable \"b\" is referenced before assignment.",
                "Variable \"a\" is referenced before assignment.",
                "Variable \"c\" is referenced before assignment.",
            ]
        );
    }

    #[test]
    fn test_list_layout() {
        let spec = WorkflowSpec::from_value(json!({
            "tasks": [{"name": "t1"}, {"name": "t2"}]
        }))
        .unwrap();
        assert!(spec.has_task("t2"));
        assert!(!spec.has_task("t3"));
    }

    #[test]
    fn test_declarations() {
        let spec = WorkflowSpec::from_value(json!({
            "input": ["xs", {"batch_size": 1}],
            "output": [{"total": "<% ctx(total) %>"}],
            "tasks": {
                "t1": {
                    "with": {"items": "x in <% ctx(xs) %>", "concurrency": "<% ctx(batch_size) %>"},
                    "join": "all",
                    "retry": {"count": 2},
                    "next": [{"when": "<% succeeded() %>", "publish": [{"total": 1}], "do": ["t2", "t3"]}]
                },
                "t2": {"with": "<% ctx(xs) %>", "join": 2}
            }
        }))
        .unwrap();

        assert_eq!(spec.input, vec![InputDecl::new("xs"), InputDecl::with_default("batch_size", json!(1))]);
        assert_eq!(spec.output, vec![Binding::new("total", json!("<% ctx(total) %>"))]);

        let t1 = spec.task("t1").unwrap();
        let with = t1.with.as_ref().unwrap();
        assert_eq!(with.items, "x in <% ctx(xs) %>");
        assert_eq!(with.concurrency, Some(Concurrency::Expression("<% ctx(batch_size) %>".to_string())));
        assert_eq!(t1.join, Some(JoinSpec::All));
        assert_eq!(t1.retry, Some(RetrySpec { count: 2, delay: None }));
        assert_eq!(t1.next[0].publish[0].name, "total");

        let t2 = spec.task("t2").unwrap();
        assert_eq!(t2.items(), Some("<% ctx(xs) %>"));
        assert_eq!(t2.join, Some(JoinSpec::Count(2)));
    }

    #[test]
    fn test_bad_declarations_are_rejected() {
        assert!(WorkflowSpec::from_value(json!({"input": [{"a": 1, "b": 2}]})).is_err());
        assert!(WorkflowSpec::from_value(json!({"tasks": {"t1": {"join": "some"}}})).is_err());
        assert!(WorkflowSpec::from_value(json!({"tasks": {"t1": {"join": 0}}})).is_err());
    }

    #[test]
    fn test_serialization_round_trips_shorthands() {
        let spec = WorkflowSpec::from_value(json!({
            "input": ["xs", {"n": 1}],
            "tasks": [{"name": "t1", "with": "<% ctx(xs) %>", "join": "all"}]
        }))
        .unwrap();

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["input"], json!(["xs", {"n": 1}]));
        assert_eq!(value["tasks"][0]["with"], json!({"items": "<% ctx(xs) %>"}));
        assert_eq!(value["tasks"][0]["join"], json!("all"));
        assert_eq!(WorkflowSpec::from_value(value).unwrap(), spec);
    }

    #[test]
    fn test_graph_queries() {
        let spec = WorkflowSpec::from_value(json!({
            "tasks": {
                "t1": {"next": [{"do": ["t2", "t3"]}]},
                "t2": {"next": [{"do": "t4"}]},
                "t3": {"next": [{"do": "t4"}, {"when": "<% failed() %>", "do": "t5"}]},
                "t4": {},
                "t5": {"join": "all"}
            }
        }))
        .unwrap();

        let starts: Vec<_> = spec.start_tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(starts, vec!["t1"]);

        assert_eq!(spec.inbound_count("t4"), 2);
        assert_eq!(
            spec.inbound()["t4"],
            vec![
                Inbound { source: "t2", transition: 0 },
                Inbound { source: "t3", transition: 0 }
            ]
        );
        assert_eq!(spec.inbound_sources("t4"), vec!["t2", "t3"]);
        assert_eq!(spec.inbound_sources("t1"), Vec::<&str>::new());
        assert!(spec.is_split("t4"));
        assert!(!spec.is_split("t2"));
        assert!(!spec.is_split("t5"));

        let counts: HashMap<&str, usize> = spec
            .tasks
            .iter()
            .map(|t| (t.name.as_str(), spec.inbound_count(&t.name)))
            .collect();
        assert_eq!(
            counts,
            hashmap! {"t1" => 0, "t2" => 1, "t3" => 1, "t4" => 2, "t5" => 1}
        );
    }
}
