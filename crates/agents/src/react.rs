//! ReAct code agent: explores the repository through whitelisted tools in a
//! bounded action loop. Models without tool calling get a single-shot
//! fallback over a directory tree and key files.

use crate::agent::{Agent, AgentBase, Extraction};
use crate::error::Result;
use crate::prompts;
use crate::tools::ToolBox;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use taskwing_llm::{parse_typed, ChainOutcome, ChatMessage, ChatModel, LlmError};
use taskwing_protocol::{AgentInput, AgentOutput};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_STEPS: usize = 20;
const MAX_STEPS_CEILING: usize = 80;

pub struct ReactAgent {
    base: AgentBase,
    max_steps: usize,
}

impl ReactAgent {
    pub const ID: &'static str = "react";

    pub fn new(model: Arc<dyn ChatModel>, config: taskwing_llm::ChainConfig, max_steps: usize) -> Self {
        Self {
            base: AgentBase::new(
                Self::ID,
                "Explores the repository with read and search tools before reporting findings",
                model,
                config,
            ),
            max_steps: if max_steps == 0 {
                DEFAULT_MAX_STEPS
            } else {
                max_steps.min(MAX_STEPS_CEILING)
            },
        }
    }

    async fn tool_loop(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> Result<Option<Extraction>> {
        let Some(model) = self.base.model.as_tool_calling() else {
            return Ok(None);
        };
        let tools = ToolBox::new(&input.base_path);
        let specs = ToolBox::specs();
        let system = prompts::render(
            prompts::REACT_SYSTEM,
            &[("project_name", input.project_name.as_str())],
        );
        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user("Start by listing the repository root, then investigate."),
        ];

        for step in 0..self.max_steps {
            let reply = model.generate_with_tools(ctx, &messages, &specs).await?;
            if reply.tool_calls.is_empty() {
                output.raw_output = reply.content.clone();
                match parse_typed::<Extraction>(&reply.content) {
                    Ok(extraction) => return Ok(Some(extraction.claim(self.base.name))),
                    Err(e) => {
                        log::debug!("react agent: step {step} reply was not valid JSON: {e}");
                        messages.push(ChatMessage::assistant(reply.content));
                        messages
                            .push(ChatMessage::user("Respond with ONLY the JSON object described."));
                        continue;
                    }
                }
            }
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                let result = match tools.dispatch(ctx, &call.name, &call.arguments).await {
                    Ok(text) => text,
                    // The model sees the rejection and can correct course.
                    Err(e) => format!("Error: {e}"),
                };
                output.coverage.record_read(format!("tool:{}", call.name), result.len(), 0, false);
                messages.push(ChatMessage::tool_result(call.id, result));
            }
        }
        Err(LlmError::Provider(format!("no final answer within {} steps", self.max_steps)).into())
    }

    /// Single-shot fallback: directory tree plus key files, same JSON
    /// envelope as the tool loop.
    async fn simple_fallback(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> Result<Extraction> {
        let tools = ToolBox::new(&input.base_path);
        let tree = tools
            .dispatch(ctx, "list_dir", &serde_json::json!({"max_depth": 3}))
            .await
            .unwrap_or_default();

        let budget = Arc::new(taskwing_gather::ContextBudget::for_model(
            taskwing_llm::max_input_tokens(self.base.model.model_name()),
        ));
        let gatherer = taskwing_gather::ContextGatherer::new(
            &input.base_path,
            Some(budget),
            taskwing_gather::GatherConfig::default(),
        )?;
        let source = gatherer.collect_source()?;
        output.coverage.merge(source.coverage);

        let chain = self.base.chain("fallback", &prompts::render(prompts::REACT_FALLBACK, &[]));
        let vars = HashMap::from([
            ("project_name".to_string(), input.project_name.clone()),
            (
                "context".to_string(),
                format!("## Directory tree\n{tree}\n\n{}", source.text),
            ),
        ]);
        let out: ChainOutcome<Extraction> = chain.invoke(ctx, &vars).await?;
        output.raw_output = out.raw;
        Ok(out.parsed.claim(self.base.name))
    }
}

#[async_trait]
impl Agent for ReactAgent {
    fn name(&self) -> &str {
        self.base.name
    }

    fn description(&self) -> &str {
        self.base.description
    }

    async fn run(&self, ctx: &CancellationToken, input: &AgentInput) -> AgentOutput {
        let started = Instant::now();
        let mut output = AgentOutput::named(self.base.name);

        let result = match self.tool_loop(ctx, input, &mut output).await {
            Ok(Some(extraction)) => Ok(extraction),
            Ok(None) => {
                log::info!("react agent: model lacks tool calling, using simple fallback");
                self.simple_fallback(ctx, input, &mut output).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(extraction) => {
                output.findings = extraction.findings;
                output.relationships = extraction.relationships;
            }
            Err(e) => output.error = Some(e.to_string()),
        }
        output.duration = started.elapsed();
        output
    }

    async fn close(&self) {
        self.base.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use taskwing_llm::testing::{ScriptedModel, ScriptedToolModel};
    use taskwing_llm::{ChainConfig, ToolCall};
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn run() {}\n").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        dir
    }

    fn final_answer() -> ChatMessage {
        ChatMessage::assistant(
            r#"{"findings": [{"kind": "feature", "title": "Run fn", "description": "d",
                "evidence": [{"file_path": "src/lib.rs", "start_line": 1, "end_line": 1, "snippet": "pub fn run"}]}]}"#,
        )
    }

    fn tool_call_reply(name: &str, arguments: serde_json::Value) -> ChatMessage {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls.push(ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        });
        msg
    }

    fn fast_config() -> ChainConfig {
        ChainConfig {
            max_retries: 1,
            retry_base_delay_ms: 1,
            ..ChainConfig::default()
        }
    }

    #[tokio::test]
    async fn tool_loop_runs_tools_then_parses_final_answer() {
        let dir = repo();
        let model = Arc::new(ScriptedToolModel::replying(vec![
            Ok(tool_call_reply("read_file", serde_json::json!({"path": "src/lib.rs"}))),
            Ok(final_answer()),
        ]));
        let agent = ReactAgent::new(model.clone(), fast_config(), 0);
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].source_agent, "react");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn rejected_tool_call_is_reported_back_not_fatal() {
        let dir = repo();
        let model = Arc::new(ScriptedToolModel::replying(vec![
            Ok(tool_call_reply("read_file", serde_json::json!({"path": "../etc/passwd"}))),
            Ok(final_answer()),
        ]));
        let agent = ReactAgent::new(model, fast_config(), 0);
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        assert!(out.error.is_none());
        assert_eq!(out.findings.len(), 1);
    }

    #[tokio::test]
    async fn step_limit_bounds_the_loop() {
        let dir = repo();
        let script = (0..10)
            .map(|_| Ok(tool_call_reply("list_dir", serde_json::json!({}))))
            .collect();
        let model = Arc::new(ScriptedToolModel::replying(script));
        let agent = ReactAgent::new(model.clone(), fast_config(), 3);
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        assert!(out.error.unwrap().contains("3 steps"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn base_model_takes_simple_fallback() {
        let dir = repo();
        let model = Arc::new(ScriptedModel::replying(vec![Ok(
            r#"{"findings": [{"kind": "feature", "title": "Run fn", "description": "d",
                "evidence": [{"file_path": "src/lib.rs", "start_line": 1, "end_line": 1, "snippet": "pub fn run"}]}]}"#
                .into(),
        )]));
        let agent = ReactAgent::new(model.clone(), fast_config(), 0);
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
        assert_eq!(out.findings.len(), 1);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("Directory tree"));
        assert!(prompt.contains("src/lib.rs"));
    }

    #[test]
    fn max_steps_is_clamped() {
        let model = Arc::new(ScriptedModel::replying(vec![]));
        assert_eq!(ReactAgent::new(model.clone(), fast_config(), 0).max_steps, 20);
        assert_eq!(ReactAgent::new(model.clone(), fast_config(), 500).max_steps, 80);
        assert_eq!(ReactAgent::new(model, fast_config(), 40).max_steps, 40);
    }
}
