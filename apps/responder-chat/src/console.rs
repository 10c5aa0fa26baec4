use std::sync::Arc;

use chat_sync::{
    Attachment, ChatEvent, ChatSyncEngine, ChatSyncError, ManualActivity, Message, MessageId,
    Phase, Polling, Sender,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const HELP: &str = "\
commands:
  <text>                send a message
  /attach <url> [text]  send an already-uploaded file
  /refresh              fetch new messages now
  /delete <id>          delete a message
  /away | /back         pause or resume polling
  /bind [task-id]       switch conversation (none to close)
  /list                 print the conversation
  /quit                 exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Attach { url: String, text: String },
    Refresh,
    Delete(String),
    Away,
    Back,
    Bind(Option<String>),
    List,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match (name, arg) {
            ("refresh", _) => Command::Refresh,
            ("away", _) => Command::Away,
            ("back", _) => Command::Back,
            ("list", _) => Command::List,
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            ("bind", "") => Command::Bind(None),
            ("bind", id) => Command::Bind(Some(id.to_string())),
            ("delete", "") => Command::Invalid("usage: /delete <id>".into()),
            ("delete", id) => Command::Delete(id.to_string()),
            ("attach", "") => Command::Invalid("usage: /attach <url> [text]".into()),
            ("attach", arg) => {
                let (url, text) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
                Command::Attach {
                    url: url.to_string(),
                    text: text.trim().to_string(),
                }
            }
            (other, _) => Command::Invalid(format!("unknown command /{other}; try /help")),
        }
    }
}

pub fn format_message(message: &Message) -> String {
    let who = match message.sender {
        Sender::Own => "you",
        Sender::Other => "them",
    };
    let mut line = format!(
        "{} {who:>4}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.text
    );
    for url in &message.file_urls {
        line.push_str(&format!(" <{url}>"));
    }
    if message.id.is_temp() {
        line.push_str(" (sending)");
    } else {
        line.push_str(&format!(" [{}]", message.id));
    }
    line
}

/// Lines to print for one engine event.
pub fn render(event: &ChatEvent) -> Vec<String> {
    match event {
        ChatEvent::PhaseChanged(phase) => vec![match phase {
            Phase::Idle => "* no conversation".to_string(),
            Phase::InitialLoading => "* loading".to_string(),
            Phase::Ready(Polling::Active) => "* live".to_string(),
            Phase::Ready(Polling::Paused) => "* paused".to_string(),
        }],
        ChatEvent::Replaced(messages) => {
            let mut lines = vec![format!("* {} messages", messages.len())];
            lines.extend(messages.iter().map(format_message));
            lines
        }
        ChatEvent::Appended(messages) => messages.iter().map(format_message).collect(),
        ChatEvent::Confirmed { message, .. } => vec![format!("* sent [{}]", message.id)],
        ChatEvent::Removed(id) => vec![format!("* removed [{id}]")],
        ChatEvent::Restored(messages) => {
            vec![format!("* restored, {} messages", messages.len())]
        }
        ChatEvent::Error(text) => vec![format!("! {text}")],
    }
}

/// Forwards rendered engine events to `lines` until the engine goes away.
pub fn spawn_renderer(
    mut events: broadcast::Receiver<ChatEvent>,
    lines: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    for line in render(&event) {
                        if lines.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer fell behind; use /list to resync");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Single writer for everything the console prints.
pub fn spawn_printer<W>(mut lines: mpsc::UnboundedReceiver<String>, mut out: W) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            let written = async {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await
            }
            .await;
            if let Err(err) = written {
                warn!(error = %err, "failed to write to console");
                return;
            }
        }
    })
}

pub struct Console {
    engine: Arc<ChatSyncEngine>,
    activity: Arc<ManualActivity>,
    lines: mpsc::UnboundedSender<String>,
}

impl Console {
    pub fn new(
        engine: Arc<ChatSyncEngine>,
        activity: Arc<ManualActivity>,
        lines: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            engine,
            activity,
            lines,
        }
    }

    /// Handles commands from `input` until `/quit` or end of input.
    pub async fn run<R>(&self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut input = input.lines();
        while let Some(line) = input.next_line().await? {
            match Command::parse(&line) {
                Command::Quit => break,
                command => self.dispatch(command).await,
            }
        }
        debug!("console input finished");
        Ok(())
    }

    async fn dispatch(&self, command: Command) {
        match command {
            Command::Send(text) => self.spawn_send(text, Vec::new()),
            Command::Attach { url, text } => self.spawn_send(text, vec![Attachment::new(url)]),
            Command::Refresh => match self.engine.refresh().await {
                Ok(0) => self.print("* up to date"),
                Ok(_) => {}
                Err(err) => self.print(format!("! refresh failed: {err}")),
            },
            Command::Delete(raw) => {
                let id = self.resolve(&raw);
                if let Err(err) = self.engine.delete_message(&id).await {
                    if err.is_precondition() {
                        self.print(format!("! {err}"));
                    }
                }
            }
            Command::Away => self.activity.set_foreground(false),
            Command::Back => self.activity.set_foreground(true),
            Command::Bind(id) => {
                // Load failures are reported through the event stream.
                let _ = self.engine.bind(id.as_deref()).await;
            }
            Command::List => {
                let messages = self.engine.messages();
                if messages.is_empty() {
                    self.print("* no messages");
                }
                for message in &messages {
                    self.print(format_message(message));
                }
            }
            Command::Help => self.print(HELP),
            Command::Invalid(reason) => self.print(format!("! {reason}")),
            Command::Empty | Command::Quit => {}
        }
    }

    /// Sends run in the background so input stays responsive; a second
    /// send while one is pending is refused by the engine.
    fn spawn_send(&self, text: String, attachments: Vec<Attachment>) {
        let engine = self.engine.clone();
        let lines = self.lines.clone();
        tokio::spawn(async move {
            match engine.send_message(&text, &attachments).await {
                Err(err) if err.is_precondition() => {
                    let _ = lines.send(format!("! {err}"));
                }
                Err(ChatSyncError::Superseded) => {
                    debug!("send finished after the conversation changed");
                }
                _ => {}
            }
        });
    }

    /// Maps typed text to a known message id, so pending ids are recognized.
    fn resolve(&self, raw: &str) -> MessageId {
        self.engine
            .messages()
            .into_iter()
            .map(|m| m.id)
            .find(|id| id.as_str() == raw)
            .unwrap_or_else(|| MessageId::server(raw))
    }

    pub fn print(&self, line: impl Into<String>) {
        let _ = self.lines.send(line.into());
    }
}
