//! Tool/model rotation
//!
//! Decides which (tool, model) pair runs after a failed fix attempt. The
//! walk is a round-robin over tools: a tool gets up to
//! `models_per_tool_round` consecutive models before the next tool with
//! untried models takes over. When every model of every tool has been tried
//! the indices reset and a fresh round begins.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Rotation position and statistics for one tool
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolModelState {
    pub name: String,
    pub models: Vec<String>,
    pub current_model_index: usize,
    /// Failed at least once during the current round
    #[serde(default)]
    pub tried_this_round: bool,
    #[serde(default)]
    pub fixes: u32,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub no_changes: u32,
    #[serde(default)]
    pub errors: u32,
}

impl ToolModelState {
    pub fn new(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            name: name.into(),
            models,
            ..Default::default()
        }
    }

    /// `None` when the tool has no model list and runs its own default
    pub fn current_model(&self) -> Option<&str> {
        self.models.get(self.current_model_index).map(|s| s.as_str())
    }

    /// A tool without models still has one slot: its default model
    fn slots(&self) -> usize {
        self.models.len().max(1)
    }

    fn has_next_model(&self) -> bool {
        self.current_model_index + 1 < self.slots()
    }

    /// Something left to try on this tool this round
    fn has_room(&self) -> bool {
        !self.tried_this_round || self.has_next_model()
    }
}

/// What a rotation step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    /// Same tool, next model
    NextModel,
    /// Switched to another tool
    NextTool,
    /// Jumped to an oracle-recommended model
    Recommended,
    /// Every tool was exhausted; indices reset for a new round
    FreshRound,
    /// The only tool ran out of models and restarted from its first
    SingleToolReset,
    /// No tools at all
    Exhausted,
}

impl RotationStep {
    /// True when this step closed a full round over all combinations
    pub fn completes_round(&self) -> bool {
        matches!(self, RotationStep::FreshRound | RotationStep::SingleToolReset)
    }
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationStep::NextModel => "next-model",
            RotationStep::NextTool => "next-tool",
            RotationStep::Recommended => "recommended",
            RotationStep::FreshRound => "fresh-round",
            RotationStep::SingleToolReset => "single-tool-reset",
            RotationStep::Exhausted => "exhausted",
        };
        write!(f, "{}", s)
    }
}

/// Durable rotation position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub tools: Vec<ToolModelState>,
    pub current_tool: usize,
    /// Models tried on the current tool since it was switched to
    pub models_tried_this_tool_round: u32,
    /// Oracle-recommended models still to walk, best first
    #[serde(default)]
    pub recommended: Vec<String>,
    #[serde(default)]
    pub recommendation_asked_this_round: bool,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            tools: vec![],
            current_tool: 0,
            models_tried_this_tool_round: 1,
            recommended: vec![],
            recommendation_asked_this_round: false,
        }
    }
}

impl RotationState {
    pub fn new(tools: Vec<ToolModelState>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    /// Current tool name and model
    pub fn current(&self) -> Option<(&str, Option<&str>)> {
        self.tools
            .get(self.current_tool)
            .map(|t| (t.name.as_str(), t.current_model()))
    }

    pub fn current_tool_mut(&mut self) -> Option<&mut ToolModelState> {
        self.tools.get_mut(self.current_tool)
    }

    /// Point the current tool at `model` if it offers it
    pub fn select_model(&mut self, model: &str) -> bool {
        debug!(%model, "RotationState::select_model: called");
        if let Some(tool) = self.tools.get_mut(self.current_tool)
            && let Some(idx) = tool.models.iter().position(|m| m == model)
        {
            tool.current_model_index = idx;
            return true;
        }
        false
    }

    /// Reconcile persisted state with the agents available now
    ///
    /// Known tools keep their position and statistics; new tools are
    /// appended; tools no longer available are dropped.
    pub fn sync_tools(&mut self, available: &[(String, Vec<String>)]) {
        debug!(count = available.len(), "RotationState::sync_tools: called");
        let current_name = self.current().map(|(name, _)| name.to_string());
        let mut synced = Vec::with_capacity(available.len());

        for (name, models) in available {
            let mut state = self
                .tools
                .iter()
                .find(|t| &t.name == name)
                .cloned()
                .unwrap_or_else(|| ToolModelState::new(name.clone(), vec![]));
            if state.models != *models {
                let keep = state.current_model().map(|m| m.to_string());
                state.models = models.clone();
                state.current_model_index = keep.and_then(|m| models.iter().position(|x| *x == m)).unwrap_or(0);
            }
            synced.push(state);
        }

        self.tools = synced;
        self.current_tool = current_name
            .and_then(|name| self.tools.iter().position(|t| t.name == name))
            .unwrap_or(0);
    }

    /// Whether the loop should ask the oracle for a model ranking now
    pub fn wants_recommendation(&self) -> bool {
        self.recommended.is_empty() && !self.recommendation_asked_this_round
    }

    /// `tool:model` labels for every combination, in rotation order
    pub fn candidates(&self) -> Vec<String> {
        self.tools
            .iter()
            .flat_map(|t| {
                if t.models.is_empty() {
                    vec![format!("{}:default", t.name)]
                } else {
                    t.models.iter().map(|m| format!("{}:{}", t.name, m)).collect()
                }
            })
            .collect()
    }

    /// Resolve a `tool:model` label to tool and model indices
    fn locate(&self, label: &str) -> Option<(usize, usize)> {
        let (tool, model) = label.split_once(':')?;
        let t = self.tools.iter().position(|x| x.name == tool)?;
        let models = &self.tools[t].models;
        if models.is_empty() {
            return (model == "default").then_some((t, 0));
        }
        models.iter().position(|m| m == model).map(|m| (t, m))
    }

    /// Store a `tool:model` ranking; unknown combinations are dropped
    pub fn set_recommendations(&mut self, ranked: Vec<String>) {
        self.recommendation_asked_this_round = true;
        self.recommended = ranked.into_iter().filter(|r| self.locate(r).is_some()).collect();
        debug!(recommended = ?self.recommended, "RotationState::set_recommendations: called");
    }

    /// Change what runs next; `false` only when there is nothing to run
    pub fn try_rotation(&mut self, cap: u32) -> bool {
        self.advance(cap) != RotationStep::Exhausted
    }

    /// Advance after a failed attempt
    pub fn advance(&mut self, cap: u32) -> RotationStep {
        debug!(current_tool = self.current_tool, tried = self.models_tried_this_tool_round, "RotationState::advance: called");
        if self.tools.is_empty() {
            return RotationStep::Exhausted;
        }
        if self.current_tool >= self.tools.len() {
            self.current_tool = 0;
        }
        self.tools[self.current_tool].tried_this_round = true;

        if self.take_recommendation() {
            return RotationStep::Recommended;
        }

        let current = &self.tools[self.current_tool];
        if self.models_tried_this_tool_round < cap && current.has_next_model() {
            return self.next_model();
        }

        let count = self.tools.len();
        for offset in 1..count {
            let idx = (self.current_tool + offset) % count;
            if self.tools[idx].has_room() {
                let tool = &mut self.tools[idx];
                if tool.tried_this_round {
                    tool.current_model_index += 1;
                }
                self.current_tool = idx;
                self.models_tried_this_tool_round = 1;
                info!(tool = %tool.name, model = tool.current_model().unwrap_or("default"), "Rotating to next tool");
                return RotationStep::NextTool;
            }
        }

        if self.tools[self.current_tool].has_next_model() {
            return self.next_model();
        }

        for tool in &mut self.tools {
            tool.current_model_index = 0;
            tool.tried_this_round = false;
        }
        self.models_tried_this_tool_round = 1;
        self.recommendation_asked_this_round = false;

        if count == 1 {
            info!("Single tool exhausted its models, restarting from the first");
            RotationStep::SingleToolReset
        } else {
            info!("All tools exhausted, starting a fresh round");
            RotationStep::FreshRound
        }
    }

    fn next_model(&mut self) -> RotationStep {
        let tool = &mut self.tools[self.current_tool];
        tool.current_model_index += 1;
        self.models_tried_this_tool_round += 1;
        info!(tool = %tool.name, model = tool.current_model().unwrap_or("default"), "Rotating to next model");
        RotationStep::NextModel
    }

    /// Jump to the next recommended combination that differs from the current one
    fn take_recommendation(&mut self) -> bool {
        while !self.recommended.is_empty() {
            let label = self.recommended.remove(0);
            let Some((t, m)) = self.locate(&label) else {
                continue;
            };
            if t == self.current_tool && self.tools[t].current_model_index == m {
                continue;
            }
            if t != self.current_tool {
                self.models_tried_this_tool_round = 0;
            }
            self.current_tool = t;
            self.tools[t].current_model_index = m;
            self.tools[t].tried_this_round = true;
            self.models_tried_this_tool_round += 1;
            info!(recommendation = %label, "Trying recommended model");
            return true;
        }
        false
    }

    /// Statistics for a tool by name
    pub fn tool(&self, name: &str) -> Option<&ToolModelState> {
        self.tools.iter().find(|t| t.name == name)
    }
}
