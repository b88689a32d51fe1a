//! Supervisor/worker agent pipeline.
//!
//! One supervisor model talks to the user and delegates to the research
//! agent through a hand-off tool. The research agent runs a tool loop over
//! the case-file tools and hands its final answer back. Only the worker's
//! final answer (plus the hand-off bookkeeping) is added to the shared
//! state; its tool exchanges stay in a private scratch history.
//!
//! ```text
//!   ┌────────────┐  transfer_to_…   ┌──────────────┐  tool calls  ┌──────────────┐
//!   │ supervisor │ ───────────────▶ │ worker agent │ ───────────▶ │ worker tools │
//!   └────────────┘ ◀─────────────── └──────────────┘ ◀─────────── └──────────────┘
//!         │ answer     hand-back          ▲
//!         ▼
//!       done
//! ```
//!
//! Every node execution counts as one step. A turn that needs more than
//! `recursion_limit` steps fails with [`PipelineError::RecursionLimit`].

use std::sync::Arc;

use futures::stream::{self, Stream};
use serde_json::json;
use tracing::{debug, info};

use crate::agents::{
    handback_tool_name, handoff_ack, AgentSpec, HANDBACK_ACK, HANDBACK_NOTICE, SUPERVISOR,
    SUPERVISOR_PROMPT,
};
use crate::config::Config;
use crate::llm::{create_model, ensure_ollama_model, ChatModel, CompletionRequest, ToolSpec};
use crate::locator::LookupError;
use crate::messages::{Message, ToolCall};
use crate::traits::{ToolCallError, ToolContext, ToolRegistry};

/// Step budget when the caller does not choose one.
pub const DEFAULT_RECURSION_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    RecursionLimit { limit: usize },

    #[error("{0:#}")]
    Model(anyhow::Error),
}

impl PipelineError {
    /// Stable code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::RecursionLimit { .. } => "recursion_limit",
            PipelineError::Model(_) => "model_error",
        }
    }
}

pub struct MultiAgentPipeline {
    supervisor: Arc<dyn ChatModel>,
    worker: Arc<dyn ChatModel>,
    agent: AgentSpec,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    handoff_specs: Vec<ToolSpec>,
    worker_specs: Vec<ToolSpec>,
    settings: Option<crate::config::ModelsConfig>,
}

impl MultiAgentPipeline {
    pub fn new(
        supervisor: Arc<dyn ChatModel>,
        worker: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
    ) -> Self {
        let agent = AgentSpec::research();
        let handoff_specs = vec![agent.handoff_tool()];
        let worker_specs = tools
            .tools()
            .iter()
            .filter(|t| agent.has_tool(t.name()))
            .map(|t| t.spec())
            .collect();
        Self {
            supervisor,
            worker,
            agent,
            tools,
            ctx,
            handoff_specs,
            worker_specs,
            settings: None,
        }
    }

    /// Build both model clients from `[models]`.
    pub fn from_config(
        config: &Config,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
    ) -> anyhow::Result<Self> {
        let supervisor = create_model(&config.models.supervisor)?;
        let worker = create_model(&config.models.agent)?;
        let mut pipeline = Self::new(supervisor, worker, tools, ctx);
        pipeline.settings = Some(config.models.clone());
        Ok(pipeline)
    }

    /// Pull local Ollama models, if any are configured.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        if let Some(models) = &self.settings {
            ensure_ollama_model(&models.supervisor).await?;
            if models.agent.model != models.supervisor.model
                || models.agent.provider != models.supervisor.provider
            {
                ensure_ollama_model(&models.agent).await?;
            }
        }
        Ok(())
    }

    pub fn tool_context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Run to completion and return the final state.
    pub async fn invoke(
        &self,
        history: Vec<Message>,
        recursion_limit: usize,
    ) -> Result<Vec<Message>, PipelineError> {
        let mut exec = Execution::new(self, history, recursion_limit);
        while !exec.is_done() {
            exec.step().await?;
        }
        Ok(exec.state)
    }

    /// Stream full-state snapshots: the input state, then one snapshot per
    /// change of the shared state. Ends after the final state, or with an
    /// error.
    pub fn stream(
        &self,
        history: Vec<Message>,
        recursion_limit: usize,
    ) -> impl Stream<Item = Result<Vec<Message>, PipelineError>> + Send + '_ {
        let exec = Execution::new(self, history, recursion_limit);
        stream::try_unfold((exec, true), |(mut exec, first)| async move {
            if first {
                let snapshot = exec.state.clone();
                return Ok(Some((snapshot, (exec, false))));
            }
            while !exec.is_done() {
                if exec.step().await? {
                    let snapshot = exec.state.clone();
                    return Ok(Some((snapshot, (exec, false))));
                }
            }
            Ok(None)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Supervisor,
    WorkerAgent,
    WorkerTools,
    Done,
}

/// State of one pipeline run.
struct Execution<'p> {
    pipeline: &'p MultiAgentPipeline,
    state: Vec<Message>,
    scratch: Vec<Message>,
    node: Node,
    steps: usize,
    limit: usize,
}

impl<'p> Execution<'p> {
    fn new(pipeline: &'p MultiAgentPipeline, state: Vec<Message>, limit: usize) -> Self {
        Self {
            pipeline,
            state,
            scratch: Vec::new(),
            node: Node::Supervisor,
            steps: 0,
            limit,
        }
    }

    fn is_done(&self) -> bool {
        self.node == Node::Done
    }

    /// Run the current node. Returns `true` if the shared state changed.
    async fn step(&mut self) -> Result<bool, PipelineError> {
        if self.steps >= self.limit {
            info!(limit = self.limit, "recursion limit reached");
            return Err(PipelineError::RecursionLimit { limit: self.limit });
        }
        self.steps += 1;
        debug!(step = self.steps, node = ?self.node, "pipeline step");

        match self.node {
            Node::Supervisor => self.supervisor().await,
            Node::WorkerAgent => self.worker_agent().await,
            Node::WorkerTools => {
                self.worker_tools().await;
                Ok(false)
            }
            Node::Done => Ok(false),
        }
    }

    async fn supervisor(&mut self) -> Result<bool, PipelineError> {
        let p = self.pipeline;
        let reply = p
            .supervisor
            .complete(CompletionRequest {
                system: SUPERVISOR_PROMPT,
                messages: &self.state,
                tools: &p.handoff_specs,
            })
            .await
            .map_err(PipelineError::Model)?
            .with_name(SUPERVISOR);

        if !reply.has_tool_calls() {
            self.state.push(reply);
            self.node = Node::Done;
            return Ok(true);
        }

        let handoff = p.agent.handoff_tool_name();
        let mut transferred = false;
        let mut acks = Vec::with_capacity(reply.tool_calls.len());
        for call in &reply.tool_calls {
            if call.name == handoff && !transferred {
                transferred = true;
                acks.push(Message::tool(&call.id, &call.name, handoff_ack(p.agent.name)));
            } else {
                acks.push(Message::tool(
                    &call.id,
                    &call.name,
                    format!("Error: {} is not a valid tool here", call.name),
                ));
            }
        }
        self.state.push(reply);
        self.state.extend(acks);

        if transferred {
            debug!(agent = p.agent.name, "handing off");
            self.scratch = self.state.clone();
            self.node = Node::WorkerAgent;
        }
        Ok(true)
    }

    async fn worker_agent(&mut self) -> Result<bool, PipelineError> {
        let p = self.pipeline;
        let reply = p
            .worker
            .complete(CompletionRequest {
                system: p.agent.prompt,
                messages: &self.scratch,
                tools: &p.worker_specs,
            })
            .await
            .map_err(PipelineError::Model)?
            .with_name(p.agent.name);

        if reply.has_tool_calls() {
            self.scratch.push(reply);
            self.node = Node::WorkerTools;
            return Ok(false);
        }

        let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        let handback = handback_tool_name();
        self.state.push(reply);
        self.state.push(
            Message::assistant(HANDBACK_NOTICE)
                .with_name(p.agent.name)
                .with_tool_calls(vec![ToolCall {
                    id: call_id.clone(),
                    name: handback.clone(),
                    arguments: json!({}),
                }]),
        );
        self.state.push(Message::tool(call_id, handback, HANDBACK_ACK));
        self.scratch.clear();
        self.node = Node::Supervisor;
        Ok(true)
    }

    async fn worker_tools(&mut self) {
        let p = self.pipeline;
        let calls = self
            .scratch
            .last()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            let content = if p.agent.has_tool(&call.name) {
                match p.tools.call(&call.name, call.arguments.clone(), &p.ctx).await {
                    Ok(value) => value.to_string(),
                    Err(ToolCallError::InvalidParams(e)) => p
                        .ctx
                        .error_value(&LookupError::InvalidInput(e.to_string()))
                        .to_string(),
                    Err(e) => format!("Error: {}", e),
                }
            } else {
                format!("Error: {} is not a valid tool", call.name)
            };
            debug!(tool = %call.name, "tool executed");
            self.scratch.push(Message::tool(call.id, call.name, content));
        }
        self.node = Node::WorkerAgent;
    }
}
