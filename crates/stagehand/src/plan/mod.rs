//! Staged execution plans.
//!
//! A [`Plan`] is an ordered list of [`Stage`]s separated by hard barriers, plus
//! lifecycle [`Hooks`] at plan and stage level. Plans are either compiled from
//! a [`GraphResult`](crate::graph::GraphResult) with [`compile`] or written by
//! hand and validated with [`check_plan`].

pub mod check;
pub mod compiler;

pub use check::check_plan;
pub use compiler::{PlanCompiler, compile, stage_name};

use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Stage mode for manifests dispatched one after another, failing fast.
pub const MODE_STRICT: &str = "strict";
/// Stage mode for manifests dispatched concurrently.
pub const MODE_PARALLEL: &str = "parallel";

/// Closed set of hook action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Log,
    Save,
    Skip,
    Fail,
    Exec,
    Notify,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::Log => "log",
            ActionType::Save => "save",
            ActionType::Skip => "skip",
            ActionType::Fail => "fail",
            ActionType::Exec => "exec",
            ActionType::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// One hook action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, JsonValue>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: Map::new(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ActionType::Log).with_param("message", message.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(ActionType::Fail).with_param("message", message.into())
    }

    pub fn save(key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(ActionType::Save)
            .with_param("key", key.into())
            .with_param("value", value)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Returns a string parameter.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(JsonValue::as_str)
    }
}

/// Lifecycle events hooks attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    BeforeRun,
    AfterRun,
    OnSuccess,
    OnFailure,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookEvent::BeforeRun => "beforeRun",
            HookEvent::AfterRun => "afterRun",
            HookEvent::OnSuccess => "onSuccess",
            HookEvent::OnFailure => "onFailure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_run: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_run: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl Hooks {
    pub fn actions(&self, event: HookEvent) -> &[Action] {
        match event {
            HookEvent::BeforeRun => &self.before_run,
            HookEvent::AfterRun => &self.after_run,
            HookEvent::OnSuccess => &self.on_success,
            HookEvent::OnFailure => &self.on_failure,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_run.is_empty()
            && self.after_run.is_empty()
            && self.on_success.is_empty()
            && self.on_failure.is_empty()
    }

    pub fn on(mut self, event: HookEvent, action: Action) -> Self {
        match event {
            HookEvent::BeforeRun => self.before_run.push(action),
            HookEvent::AfterRun => self.after_run.push(action),
            HookEvent::OnSuccess => self.on_success.push(action),
            HookEvent::OnFailure => self.on_failure.push(action),
        }
        self
    }
}

/// A barrier-separated group of manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub manifests: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
}

impl Stage {
    pub fn new(name: impl Into<String>, manifests: Vec<String>) -> Self {
        Self {
            name: name.into(),
            manifests,
            mode: MODE_STRICT.to_string(),
            ..Default::default()
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self.mode = MODE_PARALLEL.to_string();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
}

impl Plan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            hooks: Hooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Number of manifests across every stage.
    pub fn manifest_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.manifests.len()).sum()
    }

    /// Stage index of a manifest, if it is scheduled.
    pub fn stage_of(&self, id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.manifests.iter().any(|m| m == id))
    }
}

pub const PLAN_KIND: &str = "Plan";
pub const PLAN_API_VERSION: &str = "stagehand/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Wire shape of a plan: `{apiVersion, kind: "Plan", metadata, spec}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: PlanMetadata,
    pub spec: Plan,
}

fn default_api_version() -> String {
    PLAN_API_VERSION.to_string()
}

impl PlanDocument {
    pub fn new(name: impl Into<String>, plan: Plan) -> Self {
        Self {
            api_version: default_api_version(),
            kind: PLAN_KIND.to_string(),
            metadata: PlanMetadata {
                name: name.into(),
                namespace: None,
            },
            spec: plan,
        }
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a plan document, rejecting any other kind.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let document: Self = serde_json::from_str(json)?;
        if document.kind != PLAN_KIND {
            return Err(PlanError::InvalidDocument(format!(
                "expected kind '{PLAN_KIND}', found '{}'",
                document.kind
            )));
        }
        Ok(document)
    }

    pub fn into_plan(self) -> Plan {
        self.spec
    }
}
