//! Slash-command dispatcher: recognizes `/`-prefixed input,
//! resolves it against a registry, and bypasses the provider entirely.
//! `compact` is the one mandatory command the dispatcher does not run
//! itself — it needs the Agent's provider/thread access, so the
//! dispatcher just recognizes it and hands control back.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The embedder-owned surface commands talk to. Kept minimal and
/// generic so the dispatcher itself never depends on Agent internals;
/// an `Agent` implements this to answer `status`/`clear`/`exit`.
pub trait CommandUi: Send + Sync {
    fn display(&self, text: &str);

    /// A human-readable status line. Used by the built-in `status` command.
    fn status_line(&self) -> String {
        String::new()
    }

    /// Clear whatever scrollback the embedder owns. Used by `clear`.
    fn clear(&self) {}

    /// Signal that the host should end the session. Used by `exit`.
    fn request_exit(&self) {}
}

/// One slash-command: name, description, optional aliases, and an
/// `execute(args, ui)` operation.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn aliases(&self) -> &[&str] {
        &[]
    }
    async fn execute(&self, args: &str, ui: &dyn CommandUi);
}

/// Outcome of dispatching one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A registered command ran to completion.
    Handled,
    /// `/compact [...]`: the caller (the Agent) must run the compact
    /// flow itself.
    Compact,
    /// `/name` didn't match any registered command or alias.
    Unknown(String),
    /// Input did not start with `/`; not a command at all.
    NotACommand,
}

struct HelpCommand {
    entries: Vec<(String, String)>,
}

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "List available commands"
    }

    async fn execute(&self, _args: &str, ui: &dyn CommandUi) {
        let mut lines = vec!["Available commands:".to_string()];
        for (name, description) in &self.entries {
            lines.push(format!("  /{name} — {description}"));
        }
        lines.push("  /compact — summarize this thread into a fresh one".to_string());
        ui.display(&lines.join("\n"));
    }
}

struct ExitCommand;

#[async_trait]
impl Command for ExitCommand {
    fn name(&self) -> &str {
        "exit"
    }

    fn description(&self) -> &str {
        "End the session"
    }

    async fn execute(&self, _args: &str, ui: &dyn CommandUi) {
        ui.request_exit();
    }
}

struct ClearCommand;

#[async_trait]
impl Command for ClearCommand {
    fn name(&self) -> &str {
        "clear"
    }

    fn description(&self) -> &str {
        "Clear the visible scrollback"
    }

    async fn execute(&self, _args: &str, ui: &dyn CommandUi) {
        ui.clear();
    }
}

struct StatusCommand;

#[async_trait]
impl Command for StatusCommand {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Show the current agent status"
    }

    async fn execute(&self, _args: &str, ui: &dyn CommandUi) {
        ui.display(&ui.status_line());
    }
}

/// Resolves `/name ...` input against a registry of [`Command`]s.
/// Unknown commands never call the provider and never append events.
pub struct CommandDispatcher {
    commands: HashMap<String, Arc<dyn Command>>,
    order: Vec<Arc<dyn Command>>,
}

impl CommandDispatcher {
    /// A dispatcher pre-loaded with the mandatory `help`/`exit`/`clear`/`status`
    /// commands. `compact` is recognized by [`Self::dispatch`] directly.
    pub fn new() -> Self {
        let mut dispatcher = CommandDispatcher {
            commands: HashMap::new(),
            order: Vec::new(),
        };
        dispatcher.register(Arc::new(ExitCommand));
        dispatcher.register(Arc::new(ClearCommand));
        dispatcher.register(Arc::new(StatusCommand));
        let entries = dispatcher
            .order
            .iter()
            .map(|c| (c.name().to_string(), c.description().to_string()))
            .collect();
        dispatcher.register(Arc::new(HelpCommand { entries }));
        dispatcher
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands
            .insert(command.name().to_string(), command.clone());
        for alias in command.aliases() {
            self.commands.insert((*alias).to_string(), command.clone());
        }
        self.order.push(command);
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.order.iter().map(|c| c.name()).collect()
    }

    /// Parse and run `input`. `NotACommand` if it doesn't start with
    /// `/`; otherwise resolves the first whitespace-delimited token.
    pub async fn dispatch(&self, input: &str, ui: &dyn CommandUi) -> Dispatch {
        let Some(rest) = input.trim_start().strip_prefix('/') else {
            return Dispatch::NotACommand;
        };
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("").to_string();
        let args = parts.next().unwrap_or("").trim();

        if name == "compact" {
            return Dispatch::Compact;
        }

        match self.commands.get(&name) {
            Some(command) => {
                command.execute(args, ui).await;
                Dispatch::Handled
            }
            None => Dispatch::Unknown(name),
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        CommandDispatcher::new()
    }
}
