//! SQL toolkit exposed to the agent.
//!
//! Each [`Tool`] has a name, a one-line description and an OpenAI
//! function-calling parameter schema. The agent advertises every tool in
//! the [`ToolRegistry`] to the chat model and dispatches the model's calls
//! back through [`ToolRegistry::find`].
//!
//! | Tool | Arguments | Result |
//! |------|-----------|--------|
//! | `sql_db_list_tables` | none | comma-separated table names |
//! | `sql_db_schema` | `table_names` | `CREATE TABLE` + sample rows per table |
//! | `sql_db_query` | `query` | tab-separated rows |
//! | `sql_db_query_checker` | `query` | the query, corrected by the model if needed |

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::llm::{ChatMessage, ChatModel};
use crate::relational::{render_rows, RelationalStore, DEFAULT_SAMPLE_ROWS};

/// A tool the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name advertised to the model.
    fn name(&self) -> &str;

    /// Tells the model when to use the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Run with parsed arguments (always a JSON object).
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;

    /// The `tools[]` entry for a chat-completions request.
    fn definition(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// What tools can reach while running: the database and the chat model.
#[derive(Clone)]
pub struct ToolContext {
    pub db: Arc<dyn RelationalStore>,
    pub llm: Arc<dyn ChatModel>,
}

impl ToolContext {
    pub fn new(db: Arc<dyn RelationalStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { db, llm }
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => anyhow::bail!("{} must not be empty", key),
    }
}

pub struct ListTablesTool;

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "sql_db_list_tables"
    }

    fn description(&self) -> &str {
        "Input is an empty object, output is a comma-separated list of tables in the database."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let tables = ctx.db.list_tables().await?;
        Ok(Value::String(tables.join(", ")))
    }
}

pub struct SchemaTool;

/// Accepts `"a, b"` or `["a", "b"]`.
fn table_names(params: &Value) -> Result<Vec<String>> {
    let names: Vec<String> = match params.get("table_names") {
        Some(Value::String(s)) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if names.is_empty() {
        anyhow::bail!("table_names must not be empty");
    }
    Ok(names)
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        "sql_db_schema"
    }

    fn description(&self) -> &str {
        "Input is a comma-separated list of tables, output is the schema and sample rows for those tables. \
         Be sure the tables exist by calling sql_db_list_tables first."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "table_names": {
                    "type": "string",
                    "description": "Comma-separated table names, e.g. \"orders, products\""
                }
            },
            "required": ["table_names"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let names = table_names(&params)?;
        let known = ctx.db.list_tables().await?;
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !known.contains(n))
            .map(|n| n.as_str())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("table_names {:?} not found in database", missing);
        }

        let mut sections = Vec::with_capacity(names.len());
        for name in &names {
            sections.push(ctx.db.describe_table(name, DEFAULT_SAMPLE_ROWS).await?);
        }
        Ok(Value::String(sections.join("\n\n")))
    }
}

pub struct QueryTool;

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "sql_db_query"
    }

    fn description(&self) -> &str {
        "Input is a detailed and correct SQL query, output is a result from the database. \
         If the query is not correct, an error message will be returned; rewrite the query and try again."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL query to run" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        tracing::debug!(query, "agent query");
        let rows = ctx.db.query_rows(query).await?;
        Ok(Value::String(render_rows(&rows)))
    }
}

pub struct QueryCheckerTool;

pub(crate) fn checker_prompt(dialect: &str, query: &str) -> String {
    format!(
        "{query}\n\
         Double check the {dialect} query above for common mistakes, including:\n\
         - Using NOT IN with NULL values\n\
         - Using UNION when UNION ALL should have been used\n\
         - Using BETWEEN for exclusive ranges\n\
         - Data type mismatch in predicates\n\
         - Properly quoting identifiers\n\
         - Using the correct number of arguments for functions\n\
         - Casting to the correct data type\n\
         - Using the proper columns for joins\n\n\
         If there are any of the above mistakes, rewrite the query. \
         If there are no mistakes, just reproduce the original query.\n\n\
         Output the final SQL query only."
    )
}

#[async_trait]
impl Tool for QueryCheckerTool {
    fn name(&self) -> &str {
        "sql_db_query_checker"
    }

    fn description(&self) -> &str {
        "Use this tool to double check if your query is correct before executing it. \
         Always use this tool before executing a query with sql_db_query."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL query to check" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let prompt = checker_prompt(ctx.db.dialect(), query);
        let reply = ctx.llm.complete(&[ChatMessage::user(prompt)], &[]).await?;
        Ok(Value::String(reply.content.unwrap_or_default()))
    }
}

/// Registry of the tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The four SQL tools.
    pub fn sql_toolkit() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(QueryTool));
        registry.register(Box::new(SchemaTool));
        registry.register(Box::new(ListTablesTool));
        registry.register(Box::new(QueryCheckerTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// `tools[]` for a chat-completions request.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.definition()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
