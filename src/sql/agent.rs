//! Bounded ReAct loop that answers questions from the relational database.
//!
//! Each step asks the generator for one JSON decision:
//!
//! ```text
//! {"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT ..."}}
//! {"type":"final","content":"..."}
//! ```
//!
//! Tool results and tool failures are appended to a scratchpad that is sent
//! back as context on the next step, so a malformed query costs one step
//! and the model can correct it. A reply that is not a recognizable
//! decision is taken as the final answer. An empty answer is never
//! accepted; it is fed back as an observation like a failed tool call.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::executor::QueryExecutor;
use super::schema::SchemaDescriptor;
use crate::error::{Backend, RagError, RagResult};
use crate::generation::Generator;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Generator calls allowed before giving up.
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_iterations: 8 }
    }
}

/// Answers a natural-language question from structured data.
#[async_trait]
pub trait StructuredQuery: Send + Sync {
    async fn answer(&self, question: &str) -> RagResult<String>;
}

pub struct SqlAgent {
    generator: Arc<dyn Generator>,
    executor: Arc<dyn QueryExecutor>,
    schema: SchemaDescriptor,
    config: AgentConfig,
}

impl SqlAgent {
    pub fn new(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn QueryExecutor>,
        schema: SchemaDescriptor,
        config: AgentConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            schema,
            config,
        }
    }

    fn instructions(&self) -> String {
        format!(
            r#"You answer questions about the company by querying its SQLite database.
Tools:
- list_tables: names of all tables. Args: {{}}
- describe_table: CREATE TABLE statement of one table. Args: {{"table":"<name>"}}
- query: run one read-only SQL statement. Args: {{"sql":"<statement>"}}
When you need a tool, respond ONLY with JSON in this format:
{{"type":"tool_call","tool_name":"<tool>","tool_args":{{...}}}}
When you have the final answer, respond ONLY with JSON in this format:
{{"type":"final","content":"..."}}
If a query fails, read the error and try a corrected query.
Do not include any extra text outside the JSON.

Schema:
{}"#,
            self.schema.render()
        )
    }

    async fn run_tool(&self, name: &str, args: &Value) -> Result<String> {
        match name {
            "list_tables" => Ok(self.schema.table_names().join(", ")),
            "describe_table" => {
                let table = string_arg(args, &["table", "table_name", "name"])
                    .ok_or_else(|| anyhow!("describe_table requires a \"table\" argument"))?;
                match self.schema.table(table) {
                    Some(t) => Ok(t.ddl()),
                    None => bail!(
                        "unknown table '{}'. Tables: {}",
                        table,
                        self.schema.table_names().join(", ")
                    ),
                }
            }
            "query" => {
                let sql = string_arg(args, &["sql", "query"])
                    .ok_or_else(|| anyhow!("query requires a \"sql\" argument"))?;
                Ok(self.executor.execute(sql).await?.render())
            }
            other => bail!(
                "unknown tool '{}'. Tools: list_tables, describe_table, query",
                other
            ),
        }
    }
}

#[async_trait]
impl StructuredQuery for SqlAgent {
    async fn answer(&self, question: &str) -> RagResult<String> {
        let system = self.instructions();
        let mut scratchpad = String::new();
        let mut last_observation = None;

        for step in 0..self.config.max_iterations {
            let reply = self
                .generator
                .complete(&system, question, &scratchpad)
                .await
                .map_err(|e| RagError::retrieval(Backend::Structured, format!("{:#}", e)))?
                .into_text();

            match parse_agent_decision(&reply) {
                AgentDecision::Final(answer) if answer.trim().is_empty() => {
                    warn!(step = step + 1, "sql agent gave an empty final answer");
                    let observation =
                        "Final answer was empty. Put the answer text in \"content\".".to_string();
                    scratchpad.push_str(&format!(
                        "Step {}: {}\nObservation: {}\n\n",
                        step + 1,
                        reply.trim(),
                        observation
                    ));
                    last_observation = Some(observation);
                }
                AgentDecision::Final(answer) => {
                    info!(steps = step + 1, "sql agent answered");
                    return Ok(answer);
                }
                AgentDecision::ToolCall { name, args } => {
                    debug!(step = step + 1, tool = %name, "sql agent tool call");
                    let observation = match self.run_tool(&name, &args).await {
                        Ok(output) => format!("Tool `{}` result:\n{}", name, output),
                        Err(e) => {
                            warn!(tool = %name, error = %e, "sql agent tool failed");
                            format!("Tool `{}` failed: {:#}", name, e)
                        }
                    };
                    scratchpad.push_str(&format!(
                        "Step {}: {}\nObservation: {}\n\n",
                        step + 1,
                        reply.trim(),
                        observation
                    ));
                    last_observation = Some(observation);
                }
            }
        }

        warn!(
            iterations = self.config.max_iterations,
            "sql agent reached its iteration cap without a final answer"
        );
        Err(RagError::AgentExhausted {
            iterations: self.config.max_iterations,
            last_observation,
        })
    }
}

fn string_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .or_else(|| args.as_str())
}

#[derive(Debug, PartialEq)]
enum AgentDecision {
    Final(String),
    ToolCall { name: String, args: Value },
}

fn parse_agent_decision(text: &str) -> AgentDecision {
    if let Some(json_value) = parse_json_from_text(text) {
        if let Some(decision) = parse_decision_from_value(&json_value) {
            return decision;
        }
    }
    AgentDecision::Final(text.trim().to_string())
}

fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

fn parse_decision_from_value(value: &Value) -> Option<AgentDecision> {
    let action_type = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let final_content = |v: &Value| {
        v.get("content")
            .or_else(|| v.get("answer"))
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    match action_type {
        "tool_call" => {
            let name = value
                .get("tool_name")
                .or_else(|| value.get("name"))
                .or_else(|| value.get("tool"))
                .and_then(Value::as_str)?;
            let args = value
                .get("tool_args")
                .or_else(|| value.get("args"))
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            if name == "final" {
                return Some(AgentDecision::Final(final_content(&args)));
            }
            Some(AgentDecision::ToolCall {
                name: name.to_string(),
                args,
            })
        }
        "final" => Some(AgentDecision::Final(final_content(value))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Completion;
    use crate::sql::executor::QueryOutcome;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<String>>,
        contexts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                contexts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, _user: &str, context: &str) -> Result<Completion> {
            self.contexts.lock().unwrap().push(context.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))?;
            Ok(Completion::text(reply))
        }
    }

    struct CountingExecutor;

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
            if sql.contains("EMPLOYEES") {
                bail!("no such table: EMPLOYEES");
            }
            Ok(QueryOutcome::Rows {
                columns: vec!["COUNT(*)".to_string()],
                rows: vec![vec![json!(12)]],
                truncated: false,
            })
        }
    }

    fn agent(generator: Arc<Scripted>, max_iterations: usize) -> SqlAgent {
        SqlAgent::new(
            generator,
            Arc::new(CountingExecutor),
            SchemaDescriptor::company(),
            AgentConfig { max_iterations },
        )
    }

    #[test]
    fn test_parse_tool_call_and_final() {
        assert_eq!(
            parse_agent_decision(r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT 1"}}"#),
            AgentDecision::ToolCall {
                name: "query".to_string(),
                args: json!({"sql": "SELECT 1"})
            }
        );
        assert_eq!(
            parse_agent_decision("Sure! {\"type\":\"final\",\"content\":\"42\"} done"),
            AgentDecision::Final("42".to_string())
        );
        assert_eq!(
            parse_agent_decision(r#"{"type":"tool_call","tool_name":"final","tool_args":{"answer":"7"}}"#),
            AgentDecision::Final("7".to_string())
        );
        assert_eq!(
            parse_agent_decision("There are 12 employees."),
            AgentDecision::Final("There are 12 employees.".to_string())
        );
    }

    #[tokio::test]
    async fn test_recovers_from_failed_query() {
        let generator = Scripted::new(&[
            r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT COUNT(*) FROM EMPLOYEES"}}"#,
            r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT COUNT(*) FROM EMPLOYEE"}}"#,
            r#"{"type":"final","content":"The company has 12 employees."}"#,
        ]);
        let answer = agent(generator.clone(), 8)
            .answer("How many employees are there?")
            .await
            .unwrap();
        assert_eq!(answer, "The company has 12 employees.");

        let contexts = generator.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 3);
        assert!(contexts[0].is_empty());
        assert!(contexts[1].contains("no such table: EMPLOYEES"));
        assert!(contexts[2].contains("COUNT(*)\n12"));
    }

    #[tokio::test]
    async fn test_introspection_uses_static_schema() {
        let generator = Scripted::new(&[
            r#"{"type":"tool_call","tool_name":"list_tables","tool_args":{}}"#,
            r#"{"type":"tool_call","tool_name":"describe_table","tool_args":{"table":"client"}}"#,
            r#"{"type":"final","content":"done"}"#,
        ]);
        agent(generator.clone(), 8).answer("clients?").await.unwrap();
        let contexts = generator.contexts.lock().unwrap();
        assert!(contexts[1].contains("CEO, DEPARTMENT, MANAGER"));
        assert!(contexts[2].contains("CREATE TABLE CLIENT"));
    }

    #[tokio::test]
    async fn test_iteration_cap_is_agent_exhausted() {
        let call = r#"{"type":"tool_call","tool_name":"list_tables","tool_args":{}}"#;
        let generator = Scripted::new(&[call, call, call, call]);
        let err = agent(generator.clone(), 3).answer("loop").await.unwrap_err();
        match err {
            RagError::AgentExhausted {
                iterations,
                last_observation,
            } => {
                assert_eq!(iterations, 3);
                assert!(last_observation.unwrap().contains("EMPLOYEE"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(generator.contexts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_final_answer_is_not_accepted() {
        let generator = Scripted::new(&[
            r#"{"type":"final"}"#,
            r#"{"type":"final","content":"   "}"#,
            r#"{"type":"final","content":"Twelve."}"#,
        ]);
        let answer = agent(generator.clone(), 8).answer("headcount?").await.unwrap();
        assert_eq!(answer, "Twelve.");
        let contexts = generator.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 3);
        assert!(contexts[1].contains("Final answer was empty"));
    }

    #[tokio::test]
    async fn test_only_empty_final_answers_exhaust_the_agent() {
        let generator = Scripted::new(&[r#"{"type":"final"}"#, r#"{"type":"final"}"#]);
        let err = agent(generator, 2).answer("headcount?").await.unwrap_err();
        assert!(matches!(err, RagError::AgentExhausted { iterations: 2, .. }));
    }

    #[tokio::test]
    async fn test_generator_failure_is_structured_retrieval_error() {
        let generator = Scripted::new(&[]);
        let err = agent(generator, 3).answer("anything").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Retrieval {
                backend: Backend::Structured,
                ..
            }
        ));
    }
}
