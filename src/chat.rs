//! Interactive chat loop and one-shot questions.
//!
//! The loop reads user lines from stdin while a background task keeps the
//! download banner up to date. Each line is one turn: the pipeline is
//! streamed, displayable assistant content is printed as it arrives, and
//! only the last displayable content is kept in the history. A failed turn
//! prints `Ocorreu um erro: ...` and keeps no assistant message.
//!
//! Commands: `/sair` or `/exit` to leave, `/limpar` to clear the history,
//! `/status` to show the download status.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::download::DownloadSupervisor;
use crate::fetch::ArchiveFetcher;
use crate::messages::{extract_display, should_display, ChatTurn, DisplayRole, Message};
use crate::pipeline::MultiAgentPipeline;
use crate::progress::{BannerMode, STILL_DOWNLOADING_WARNING};
use crate::status::StatusCell;
use crate::traits::{ToolContext, ToolRegistry};

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The assistant answered; the answer was added to the history.
    Answered(String),
    /// The pipeline finished without displayable content.
    NoContent,
    /// The pipeline failed; nothing was added for the assistant.
    Failed { code: &'static str, message: String },
}

/// A conversation with its history and output sink.
pub struct ChatSession<W: Write> {
    pipeline: Arc<MultiAgentPipeline>,
    history: Vec<ChatTurn>,
    recursion_limit: usize,
    out: W,
}

impl<W: Write> ChatSession<W> {
    pub fn new(pipeline: Arc<MultiAgentPipeline>, recursion_limit: usize, out: W) -> Self {
        Self {
            pipeline,
            history: Vec::new(),
            recursion_limit,
            out,
        }
    }

    /// Continue an earlier conversation.
    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run one turn for `prompt`.
    pub async fn handle_turn(&mut self, prompt: &str, download_complete: bool) -> TurnOutcome {
        self.history.push(ChatTurn::user(prompt));
        if !download_complete {
            let _ = writeln!(self.out, "⚠️ {}", STILL_DOWNLOADING_WARNING);
        }

        let messages: Vec<Message> = self.history.iter().map(Message::from).collect();
        info!(prompt = %truncate(prompt, 30), "processing turn");

        let mut assistant_content: Option<String> = None;
        let stream = self.pipeline.stream(messages, self.recursion_limit);
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let state = match item {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "turn failed");
                    let _ = writeln!(self.out, "Ocorreu um erro: {}", e);
                    let _ = self.out.flush();
                    return TurnOutcome::Failed {
                        code: e.code(),
                        message: e.to_string(),
                    };
                }
            };
            let Some((role, content)) = extract_display(&state) else {
                continue;
            };
            if role == DisplayRole::Assistant && !content.is_empty() && should_display(content) {
                if assistant_content.as_deref() != Some(content) {
                    let _ = writeln!(self.out, "{}", content);
                    let _ = self.out.flush();
                }
                assistant_content = Some(content.to_string());
            }
        }

        match assistant_content {
            Some(content) => {
                info!(length = content.len(), "turn answered");
                self.history.push(ChatTurn::assistant(content.clone()));
                TurnOutcome::Answered(content)
            }
            None => {
                warn!("no assistant content was generated");
                TurnOutcome::NoContent
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Shared pieces of a running application: status, tools and pipeline.
pub struct Runtime {
    pub status: StatusCell,
    pub tools: Arc<ToolRegistry>,
    pub ctx: ToolContext,
    pub pipeline: Arc<MultiAgentPipeline>,
    pub download: Arc<DownloadSupervisor>,
}

impl Runtime {
    /// Build the runtime from config and pull local models if needed.
    pub async fn start(config: &Config) -> Result<Self> {
        let status = StatusCell::new();
        let tools = Arc::new(ToolRegistry::with_builtins());
        let ctx = ToolContext::from_config(config, status.clone());
        let pipeline = MultiAgentPipeline::from_config(config, Arc::clone(&tools), ctx.clone())?;
        pipeline.prepare().await?;

        let fetcher = ArchiveFetcher::from_config(&config.archive)?;
        let download = Arc::new(DownloadSupervisor::with_status(fetcher, status.clone()));
        if config.archive.auto_download || download.fetcher().archive_present() {
            download.ensure_started();
        }

        Ok(Self {
            status,
            tools,
            ctx,
            pipeline: Arc::new(pipeline),
            download,
        })
    }
}

const WELCOME: &str = "💬 Chatbot SEI TRE-RN\n\
Pergunte sobre processos do SEI, por exemplo: \"O processo XXX/XXXX existe?\", \
\"Quantos documentos tem o processo XXX/XXXX?\", \
\"Quais são os documentos do tipo xxxxxx do processo XXX/XXXX?\".\n\
Comandos: /status, /limpar, /sair";

/// Interactive loop on stdin/stdout.
pub async fn run_chat(config: &Config, banner: BannerMode) -> Result<()> {
    let runtime = Runtime::start(config).await?;

    let reporter = banner.reporter();
    let status = runtime.status.clone();
    let poll = Duration::from_millis(config.chat.poll_interval_ms);
    let banner_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        let mut tick = 0usize;
        loop {
            ticker.tick().await;
            reporter.render(&status.status(), tick);
            tick = (tick + 1) % 4;
        }
    });

    let mut session = ChatSession::new(
        Arc::clone(&runtime.pipeline),
        config.pipeline.recursion_limit,
        std::io::stdout(),
    );
    println!("{}", WELCOME);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        prompt_marker();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                match input {
                    "" => continue,
                    "/sair" | "/exit" => break,
                    "/limpar" => {
                        session.clear();
                        println!("Histórico apagado.");
                    }
                    "/status" => {
                        let current = runtime.download.status();
                        match current.error() {
                            Some(error) => println!("download: {} ({})", current.label(), error),
                            None => println!("download: {}", current.label()),
                        }
                    }
                    _ => {
                        let complete = runtime.status.status().is_complete();
                        let interrupted =
                            turn_or_interrupt(&mut session, input, complete, &mut ctrl_c)
                                .await
                                .is_none();
                        if interrupted {
                            break;
                        }
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    banner_task.abort();
    runtime.download.cancel().await;
    info!("chat session closed");
    Ok(())
}

/// Run one turn unless `interrupt` resolves first. `None` means the turn
/// was abandoned; its user line stays in the history.
async fn turn_or_interrupt<W, I>(
    session: &mut ChatSession<W>,
    prompt: &str,
    download_complete: bool,
    interrupt: &mut I,
) -> Option<TurnOutcome>
where
    W: Write,
    I: Future + Unpin,
{
    tokio::select! {
        outcome = session.handle_turn(prompt, download_complete) => Some(outcome),
        _ = interrupt => {
            info!("turn interrupted");
            None
        }
    }
}

fn prompt_marker() {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\n> ");
    let _ = out.flush();
}

/// Answer one question after the archive is available.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.download.join().await;
    if let Some(error) = runtime.status.status().error() {
        warn!(error, "archive unavailable, answering anyway");
    }

    let mut session = ChatSession::new(
        runtime.pipeline,
        config.pipeline.recursion_limit,
        std::io::stdout(),
    );
    let complete = runtime.status.status().is_complete();
    match session.handle_turn(question, complete).await {
        TurnOutcome::Failed { message, .. } => anyhow::bail!("turn failed: {}", message),
        TurnOutcome::NoContent => anyhow::bail!("no answer was generated"),
        TurnOutcome::Answered(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatModel, CompletionRequest};
    use crate::messages::{Role, ToolCall};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Message>>);

    #[async_trait]
    impl ChatModel for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn complete(&self, _request: CompletionRequest<'_>) -> anyhow::Result<Message> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn scripted(mut replies: Vec<Message>) -> Arc<dyn ChatModel> {
        replies.reverse();
        Arc::new(Scripted(Mutex::new(replies)))
    }

    fn handoff() -> Message {
        Message::assistant("").with_tool_calls(vec![ToolCall {
            id: "h".to_string(),
            name: "transfer_to_sei_research_agent".to_string(),
            arguments: json!({}),
        }])
    }

    fn session(sup: Vec<Message>, worker: Vec<Message>, limit: usize) -> ChatSession<Vec<u8>> {
        let ctx = ToolContext::new("/nonexistent/processos", StatusCell::new());
        session_with(scripted(sup), scripted(worker), ctx, limit)
    }

    fn session_with(
        sup: Arc<dyn ChatModel>,
        worker: Arc<dyn ChatModel>,
        ctx: ToolContext,
        limit: usize,
    ) -> ChatSession<Vec<u8>> {
        let pipeline =
            MultiAgentPipeline::new(sup, worker, Arc::new(ToolRegistry::with_builtins()), ctx);
        ChatSession::new(Arc::new(pipeline), limit, Vec::new())
    }

    /// Replays a script and keeps every tool result it was shown.
    struct Recording {
        replies: Mutex<Vec<Message>>,
        seen_tool_results: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for Recording {
        fn name(&self) -> String {
            "recording".to_string()
        }

        async fn complete(&self, request: CompletionRequest<'_>) -> anyhow::Result<Message> {
            let mut seen = self.seen_tool_results.lock().unwrap();
            for m in request.messages.iter().filter(|m| m.role == Role::Tool) {
                seen.push(m.content.clone());
            }
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl ChatModel for Hanging {
        fn name(&self) -> String {
            "hanging".to_string()
        }

        async fn complete(&self, _request: CompletionRequest<'_>) -> anyhow::Result<Message> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn answer_is_appended_and_chatter_hidden() {
        let mut s = session(
            vec![handoff(), Message::assistant("Existe sim.")],
            vec![Message::assistant("Pasta encontrada.")],
            25,
        );
        let outcome = s.handle_turn("O processo 1/2020 existe?", true).await;
        assert_eq!(outcome, TurnOutcome::Answered("Existe sim.".to_string()));
        assert_eq!(
            s.history(),
            &[
                ChatTurn::user("O processo 1/2020 existe?"),
                ChatTurn::assistant("Existe sim.")
            ]
        );
        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(out.contains("Existe sim."));
        assert!(!out.contains("transferred"));
        assert!(!out.contains("Transferring"));
    }

    #[tokio::test]
    async fn failed_turn_keeps_no_assistant_message() {
        let mut s = session(vec![handoff(), handoff(), handoff()], vec![], 25);
        let outcome = s.handle_turn("oi", true).await;
        assert!(matches!(outcome, TurnOutcome::Failed { code: "model_error", .. }));
        assert_eq!(s.history(), &[ChatTurn::user("oi")]);
        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(out.contains("Ocorreu um erro: "));
    }

    #[tokio::test]
    async fn recursion_limit_is_reported() {
        let mut s = session(
            vec![handoff(), handoff()],
            vec![Message::assistant("a"), Message::assistant("b")],
            2,
        );
        let outcome = s.handle_turn("oi", true).await;
        match outcome {
            TurnOutcome::Failed { code, message } => {
                assert_eq!(code, "recursion_limit");
                assert!(message.contains("Recursion limit of 2"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(s.history().len(), 1);
    }

    #[tokio::test]
    async fn warns_while_download_runs() {
        let mut s = session(vec![Message::assistant("ok")], vec![], 25);
        s.handle_turn("oi", false).await;
        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(out.starts_with("⚠️ O download dos arquivos ainda está em andamento."));
    }

    #[tokio::test]
    async fn chat_continues_after_failed_download() {
        let status = StatusCell::new();
        status.try_begin();
        status.fail("download failed with HTTP status 404");
        let ctx = ToolContext::new("/nonexistent/processos", status.clone());

        let lookup = Message::assistant("").with_tool_calls(vec![ToolCall {
            id: "c1".to_string(),
            name: "search_process".to_string(),
            arguments: json!({ "id": "123/2024" }),
        }]);
        let mut replies = vec![lookup, Message::assistant("Processo não encontrado.")];
        replies.reverse();
        let worker = Arc::new(Recording {
            replies: Mutex::new(replies),
            seen_tool_results: Mutex::new(Vec::new()),
        });
        let mut s = session_with(
            scripted(vec![handoff(), Message::assistant("O processo não existe.")]),
            Arc::clone(&worker) as Arc<dyn ChatModel>,
            ctx,
            25,
        );

        let complete = status.status().is_complete();
        let outcome = s.handle_turn("O processo 123/2024 existe?", complete).await;
        assert_eq!(
            outcome,
            TurnOutcome::Answered("O processo não existe.".to_string())
        );
        assert_eq!(s.history().len(), 2);

        let seen = worker.seen_tool_results.lock().unwrap();
        let lookup_result = seen
            .iter()
            .find(|c| c.contains("not_found"))
            .expect("worker saw the lookup result");
        assert!(!lookup_result.contains("still in progress"));
    }

    #[tokio::test]
    async fn interrupt_abandons_a_hanging_turn() {
        let ctx = ToolContext::new("/nonexistent/processos", StatusCell::new());
        let mut s = session_with(Arc::new(Hanging), Arc::new(Hanging), ctx, 25);
        let mut interrupt = Box::pin(tokio::time::sleep(Duration::from_millis(20)));

        let outcome = turn_or_interrupt(&mut s, "oi", true, &mut interrupt).await;
        assert_eq!(outcome, None);
        assert_eq!(s.history(), &[ChatTurn::user("oi")]);
    }

    #[tokio::test]
    async fn turn_finishes_before_a_later_interrupt() {
        let mut s = session(vec![Message::assistant("ok")], vec![], 25);
        let mut interrupt = Box::pin(tokio::time::sleep(Duration::from_secs(60)));
        let outcome = turn_or_interrupt(&mut s, "oi", true, &mut interrupt).await;
        assert_eq!(outcome, Some(TurnOutcome::Answered("ok".to_string())));
    }
}
