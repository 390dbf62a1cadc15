//! SQL agent: a bounded tool-calling loop over a [`ChatModel`].
//!
//! The agent seeds the conversation with a system prompt describing the
//! database dialect and the rules for querying it, then alternates between
//! asking the model for its next step and running the tools it calls.
//! A reply with no tool calls is the final answer.
//!
//! Tool problems never abort a run: malformed arguments, unknown tool
//! names and tool failures go back to the model as an `Error: ...` tool
//! result so it can correct itself. Only a failing chat model ends
//! [`SqlAgent::run`] with an error.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel, ToolCall};
use crate::relational::RelationalStore;
use crate::tools::{ToolContext, ToolRegistry};

/// Returned when the model is still calling tools after the last iteration.
pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Answers a prompt, querying the database as needed.
#[async_trait]
pub trait SqlAgent: Send + Sync {
    async fn run(&self, prompt: &str) -> Result<String>;
}

pub struct ToolCallingSqlAgent {
    tools: ToolRegistry,
    ctx: ToolContext,
    max_iterations: usize,
    top_k: usize,
}

impl ToolCallingSqlAgent {
    pub fn new(
        db: Arc<dyn RelationalStore>,
        llm: Arc<dyn ChatModel>,
        max_iterations: usize,
        top_k: usize,
    ) -> Self {
        Self {
            tools: ToolRegistry::sql_toolkit(),
            ctx: ToolContext::new(db, llm),
            max_iterations,
            top_k,
        }
    }

    fn system_prompt(&self) -> String {
        let dialect = self.ctx.db.dialect();
        format!(
            "You are an agent designed to interact with a SQL database.\n\
             Given an input question, create a syntactically correct {dialect} query to run, \
             then look at the results of the query and return the answer.\n\
             Unless the user specifies a specific number of examples they wish to obtain, \
             always limit your query to at most {top_k} results.\n\
             You can order the results by a relevant column to return the most interesting examples in the database.\n\
             Never query for all the columns from a specific table, only ask for the relevant columns given the question.\n\
             Only use the tools below and only the information they return to construct your final answer.\n\
             Start by listing the tables with sql_db_list_tables, then look at the schema of the most relevant tables \
             with sql_db_schema.\n\
             Double check every query with sql_db_query_checker before running it with sql_db_query. \
             If you get an error while executing a query, rewrite the query and try again.\n\
             DO NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.) to the database.\n\
             If the question does not seem related to the database, just return \"I don't know\" as the answer.",
            top_k = self.top_k,
        )
    }

    /// Run one tool call and render its outcome as tool-message text.
    async fn dispatch(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.find(&call.name) else {
            let names: Vec<&str> = self.tools.tools().iter().map(|t| t.name()).collect();
            tracing::debug!(tool = %call.name, "model called an unknown tool");
            return format!(
                "Error: {} is not a valid tool, try one of [{}].",
                call.name,
                names.join(", ")
            );
        };

        let params = match parse_arguments(&call.arguments) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "malformed tool arguments");
                return format!("Error: could not parse tool arguments: {}", e);
            }
        };

        match tool.execute(params, &self.ctx).await {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %format!("{:#}", e), "tool failed");
                format!("Error: {:#}", e)
            }
        }
    }
}

/// Tool arguments must be a JSON object; empty input means no arguments.
fn parse_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        anyhow::bail!("expected a JSON object, got {}", value);
    }
    Ok(value)
}

#[async_trait]
impl SqlAgent for ToolCallingSqlAgent {
    async fn run(&self, prompt: &str) -> Result<String> {
        let definitions = self.tools.definitions();
        let mut messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(prompt),
        ];

        for iteration in 0..self.max_iterations {
            let completion = self.ctx.llm.complete(&messages, &definitions).await?;

            if completion.tool_calls.is_empty() {
                tracing::debug!(iterations = iteration + 1, "agent finished");
                return Ok(completion.content.unwrap_or_default());
            }

            let calls = completion.tool_calls.clone();
            messages.push(completion.into_message());
            for call in &calls {
                tracing::debug!(iteration, tool = %call.name, "tool call");
                let output = self.dispatch(call).await;
                messages.push(ChatMessage::tool(call.id.clone(), output));
            }
        }

        tracing::warn!(max_iterations = self.max_iterations, "agent hit iteration limit");
        Ok(ITERATION_LIMIT_MESSAGE.to_string())
    }
}
