//! Interactive SQL prompt against the masked temporary cluster
//!
//! Lines accumulate into a statement buffer until a line containing `;`
//! arrives, at which point the whole buffer is sent to the executor as one
//! batch. `help`, `abort` and `exit` are handled by the prompt itself.

use crate::executor::{render_table, MaskExecutor, QueryTable, StatementOutcome};
use anyhow::{anyhow, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Display;
use std::io::{IsTerminal, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CONTINUATION_PROMPT: &str = "    -> ";

const HELP: &str = "commands:
\tabort:\tExit prompt as abnormal. Does not create a snapshot
\texit:\tExit prompt as successful, continue creating Snapshot
";

/// One read from a line source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// Ctrl-C, with whatever had been typed on the current line
    Interrupted(String),
    Eof,
}

/// Where the prompt reads its input from
#[allow(async_fn_in_trait)]
pub trait LineSource {
    async fn read_line(&mut self, prompt: &str) -> Result<LineEvent>;

    fn add_history(&mut self, _line: &str) {}
}

/// Line source over any buffered async reader (piped stdin, tests)
pub struct ReaderLineSource<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> ReaderLineSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: AsyncBufRead + Unpin> LineSource for ReaderLineSource<R> {
    async fn read_line(&mut self, _prompt: &str) -> Result<LineEvent> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read input line")?;
        if n == 0 {
            return Ok(LineEvent::Eof);
        }
        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(LineEvent::Line(line))
    }
}

/// A line reader that blocks its thread until a line is entered
pub trait BlockingLineReader {
    fn read_line(&mut self, prompt: &str) -> Result<LineEvent>;

    fn add_history(&mut self, _line: &str) {}
}

/// rustyline editor with in-memory history
pub struct Readline(DefaultEditor);

impl Readline {
    pub fn new() -> Result<Self> {
        Ok(Self(DefaultEditor::new().context("Failed to initialize line editor")?))
    }
}

impl BlockingLineReader for Readline {
    fn read_line(&mut self, prompt: &str) -> Result<LineEvent> {
        match self.0.readline(prompt) {
            Ok(line) => Ok(LineEvent::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(LineEvent::Interrupted(String::new())),
            Err(ReadlineError::Eof) => Ok(LineEvent::Eof),
            Err(e) => Err(e).context("Failed to read line"),
        }
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.0.add_history_entry(line);
    }
}

enum ReaderRequest {
    ReadLine(String),
    AddHistory(String),
}

/// Runs a [`BlockingLineReader`] on a dedicated thread.
///
/// `read_line` only awaits a channel, so dropping it (a cancelled select)
/// returns at once. The read stays outstanding on the thread and its line
/// is handed to the next `read_line` call.
pub struct ThreadedLineSource {
    requests: std_mpsc::Sender<ReaderRequest>,
    replies: mpsc::UnboundedReceiver<Result<LineEvent>>,
    outstanding: bool,
}

impl ThreadedLineSource {
    /// Spawn the reader thread. The reader is built on that thread, so it
    /// does not need to be `Send`.
    pub fn spawn<R, F>(make_reader: F) -> Result<Self>
    where
        R: BlockingLineReader,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let (request_tx, request_rx) = std_mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("line-reader".into())
            .spawn(move || serve_reader(make_reader, request_rx, reply_tx))
            .context("Failed to spawn line reader thread")?;
        Ok(Self {
            requests: request_tx,
            replies: reply_rx,
            outstanding: false,
        })
    }
}

fn serve_reader<R, F>(
    make_reader: F,
    requests: std_mpsc::Receiver<ReaderRequest>,
    replies: mpsc::UnboundedSender<Result<LineEvent>>,
) where
    R: BlockingLineReader,
    F: FnOnce() -> Result<R>,
{
    let mut reader = match make_reader() {
        Ok(reader) => reader,
        Err(e) => {
            let _ = replies.send(Err(e));
            return;
        }
    };
    while let Ok(request) = requests.recv() {
        match request {
            ReaderRequest::ReadLine(prompt) => {
                if replies.send(reader.read_line(&prompt)).is_err() {
                    break;
                }
            }
            ReaderRequest::AddHistory(line) => reader.add_history(&line),
        }
    }
}

impl LineSource for ThreadedLineSource {
    async fn read_line(&mut self, prompt: &str) -> Result<LineEvent> {
        if !self.outstanding {
            self.requests
                .send(ReaderRequest::ReadLine(prompt.to_string()))
                .map_err(|_| anyhow!("line reader thread exited"))?;
            self.outstanding = true;
        }
        let reply = self.replies.recv().await;
        self.outstanding = false;
        reply.unwrap_or_else(|| Err(anyhow!("line reader thread exited")))
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.requests.send(ReaderRequest::AddHistory(line.to_string()));
    }
}

/// Stdin as a line source: a line editor on a terminal, plain lines otherwise
pub enum ConsoleInput {
    Terminal(ThreadedLineSource),
    Piped(ReaderLineSource<BufReader<Stdin>>),
}

impl ConsoleInput {
    pub fn detect() -> Result<Self> {
        if std::io::stdin().is_terminal() {
            Ok(ConsoleInput::Terminal(ThreadedLineSource::spawn(Readline::new)?))
        } else {
            Ok(ConsoleInput::Piped(ReaderLineSource::new(BufReader::new(
                tokio::io::stdin(),
            ))))
        }
    }
}

impl LineSource for ConsoleInput {
    async fn read_line(&mut self, prompt: &str) -> Result<LineEvent> {
        match self {
            ConsoleInput::Terminal(source) => source.read_line(prompt).await,
            ConsoleInput::Piped(source) => source.read_line(prompt).await,
        }
    }

    fn add_history(&mut self, line: &str) {
        if let ConsoleInput::Terminal(source) = self {
            source.add_history(line);
        }
    }
}

/// Shared writer for prompt feedback (stderr in production)
#[derive(Clone)]
pub struct SessionOutput {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SessionOutput {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    pub fn line(&self, text: impl Display) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writeln!(writer, "{text}");
            let _ = writer.flush();
        }
    }
}

/// How a prompt session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `exit`: continue to the snapshot
    Exit,
    /// End of input or Ctrl-C on an empty prompt: continue to the snapshot
    EndOfInput,
    /// `abort`: fail the run
    Abort,
    /// The run was cancelled while the prompt was open
    Cancelled,
}

impl SessionEnd {
    /// Whether the run should go on to snapshot the cluster
    pub fn continues(self) -> bool {
        matches!(self, SessionEnd::Exit | SessionEnd::EndOfInput)
    }
}

/// Prompt state over a connected executor
pub struct MaskSession<'a, E: MaskExecutor> {
    executor: &'a mut E,
    prompt: String,
    buffer: Vec<String>,
    output: SessionOutput,
}

impl<'a, E: MaskExecutor> MaskSession<'a, E> {
    pub fn new(executor: &'a mut E, cluster_id: &str, output: SessionOutput) -> Self {
        let table_out = output.clone();
        executor.on_table_select(Box::new(move |table: &QueryTable| {
            table_out.line(format!("\n{}", render_table(table)));
        }));
        let result_out = output.clone();
        executor.on_statement_result(Box::new(move |outcome: &StatementOutcome| {
            result_out.line(format!("\n{outcome}"));
        }));

        Self {
            executor,
            prompt: format!("aurora[{cluster_id}]> "),
            buffer: Vec::new(),
            output,
        }
    }

    /// Statement text accumulated so far
    pub fn pending(&self) -> String {
        self.buffer.join("\n")
    }

    /// Read and dispatch lines until the session ends.
    ///
    /// Statement errors are printed and the prompt keeps going; only input
    /// errors are returned.
    pub async fn run<L: LineSource>(
        &mut self,
        lines: &mut L,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        info!("Use the `exit` or `abort` command to leave the prompt");
        info!("Enter `help` for more information");
        info!("Ctrl-C on an empty prompt behaves like `exit`");

        loop {
            let prompt = if self.buffer.is_empty() {
                self.prompt.as_str()
            } else {
                CONTINUATION_PROMPT
            };

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                event = lines.read_line(prompt) => event?,
            };

            let line = match event {
                LineEvent::Eof => return Ok(SessionEnd::EndOfInput),
                LineEvent::Interrupted(partial) => {
                    if partial.is_empty() && self.buffer.is_empty() {
                        self.output.line("^C");
                        return Ok(SessionEnd::EndOfInput);
                    }
                    continue;
                }
                LineEvent::Line(line) => line,
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            lines.add_history(line);

            if line.starts_with("help") {
                self.output.line(HELP);
                continue;
            }
            match line {
                "abort" => {
                    self.output.line("abort prompt.");
                    return Ok(SessionEnd::Abort);
                }
                "exit" => {
                    self.output.line("exit prompt.");
                    return Ok(SessionEnd::Exit);
                }
                _ => {}
            }

            self.buffer.push(line.to_string());
            if line.contains(';') {
                let statement = self.pending();
                self.buffer.clear();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                    result = self.executor.execute(&statement) => result,
                };
                if let Err(e) = result {
                    self.output.line(format!("{e:#}"));
                }
            }
        }
    }
}
