//! Planner (C5).
//!
//! Turns either a user-authored [`ManualPlan`] or an analyzer
//! [`ExecutionPlan`] into one totally-ordered list of [`Step`]s the
//! orchestrator executes in sequence (§4.5). Kept as a pure, no-I/O mapping,
//! separating "decide what to do" from "do it".

use crate::loom::analyzer::{ExecutionPlan, ResourceKind};
use crate::loom::session::{ManualPlan, ToolBinding};

/// One unit of work in the turn's execution sequence.
#[derive(Debug, Clone)]
pub enum Step {
    ToolStep {
        tool_id: String,
        option: Option<String>,
        for_agent: String,
    },
    AgentStep {
        agent_id: String,
        tools_context: Vec<String>,
        prior_agent_output: bool,
        /// Whether this step came from a user-authored manual plan rather
        /// than the supervisor's analyzer output. Manual-plan agent ids are
        /// validated against the registry at send time and skipped with a
        /// warning if unknown; supervisor-plan ids fall back to the
        /// configured default agent instead (§3, §4.7).
        manual: bool,
    },
    DelegationStep {
        message: String,
        target_agent: String,
    },
}

/// Flatten a manual pipeline into steps (§4.5: manual mode). Each enabled
/// entry becomes its bound tool steps (in declared order) followed by one
/// agent step that consumes them.
pub fn plan_manual(plan: &ManualPlan) -> Vec<Step> {
    let mut steps = Vec::new();
    for entry in plan.enabled_entries() {
        let mut tools_context = Vec::new();
        for binding in &entry.tools {
            steps.push(Step::ToolStep {
                tool_id: binding.tool_id().to_string(),
                option: binding.option().map(|s| s.to_string()),
                for_agent: entry.agent_id.clone(),
            });
            tools_context.push(binding.tool_id().to_string());
        }
        steps.push(Step::AgentStep {
            agent_id: entry.agent_id.clone(),
            tools_context,
            prior_agent_output: false,
            manual: true,
        });
    }
    steps
}

/// Flatten an analyzer-produced execution plan into steps (§4.5: supervisor
/// mode). Tool and knowledge components run first — fan-in for whichever
/// agent step follows — then each agent component runs in turn, preceded by
/// a `DelegationStep` announcing the handoff and receiving
/// `prior_agent_output = true` whenever a prior agent step already ran ahead
/// of it in this turn (the multi-agent-sequential case). The orchestrator
/// appends one final supervisor acknowledgement after the last step,
/// outside this function's ordering (§4.7 step 5).
pub fn plan_supervised(plan: &ExecutionPlan) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut tools_context = Vec::new();

    for component in &plan.components {
        match component.resource_kind {
            ResourceKind::Tool => {
                steps.push(Step::ToolStep {
                    tool_id: component.resource_id.clone(),
                    option: None,
                    for_agent: plan.primary_agent.clone(),
                });
                tools_context.push(component.resource_id.clone());
            }
            ResourceKind::Knowledge => {
                steps.push(Step::ToolStep {
                    tool_id: "knowledgebase".to_string(),
                    option: Some(component.resource_id.clone()),
                    for_agent: plan.primary_agent.clone(),
                });
                tools_context.push("knowledgebase".to_string());
            }
            ResourceKind::Agent => {}
        }
    }

    let mut seen_agent = false;
    for component in &plan.components {
        if component.resource_kind != ResourceKind::Agent {
            continue;
        }
        steps.push(Step::DelegationStep {
            message: format!("Handing off to {}.", component.resource_id),
            target_agent: component.resource_id.clone(),
        });
        steps.push(Step::AgentStep {
            agent_id: component.resource_id.clone(),
            tools_context: tools_context.clone(),
            prior_agent_output: seen_agent,
            manual: false,
        });
        seen_agent = true;
    }

    steps
}
