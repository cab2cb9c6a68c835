use std::io::{self, BufRead};
use std::time::Duration;

use console::{Term, measure_text_width, style};
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};

use super::{ChatUi, Role, Turn};
use crate::indexer::IndexEvent;

const CURSOR: &str = "▌";

/// Chat surface on the terminal: history on stdout, progress on stderr
pub struct TerminalUi {
    term: Term,
    input_prompt: String,
    title: String,
    subtitle: String,
    spinner: Option<ProgressBar>,
    ingest_bar: Option<ProgressBar>,
    /// Terminal rows taken by the partial answer currently on screen
    partial_rows: usize,
}

impl TerminalUi {
    #[inline]
    pub fn new(input_prompt: &str) -> Self {
        Self {
            term: Term::stdout(),
            input_prompt: input_prompt.to_string(),
            title: String::new(),
            subtitle: String::new(),
            spinner: None,
            ingest_bar: None,
            partial_rows: 0,
        }
    }

    fn print(&self, line: impl std::fmt::Display) {
        let _ = self.term.write_line(&line.to_string());
    }

    fn print_header(&self) {
        self.print(style(&self.title).bold().cyan());
        self.print(&self.subtitle);
        self.print("");
    }

    fn print_turn(&self, turn: &Turn) {
        match turn.role {
            Role::User => self.print(style("🧑 You").bold().green()),
            Role::Assistant => self.print(style("🤖 Assistant").bold().magenta()),
        }
        self.print(&turn.text);
        self.print("");
    }

    /// Rows `text` occupies once wrapped to the terminal width
    fn rows(&self, text: &str) -> usize {
        let width = usize::from(self.term.size().1).max(1);
        text.split('\n')
            .map(|line| measure_text_width(line).div_ceil(width).max(1))
            .sum()
    }

    fn clear_partial(&mut self) {
        if self.partial_rows > 0 {
            let _ = self.term.clear_last_lines(self.partial_rows);
            self.partial_rows = 0;
        }
    }

    fn ingest_bar() -> ProgressBar {
        if !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }
        let style =
            ProgressStyle::with_template("{bar:40.cyan/blue} [{pos}/{len}] Embedding chunks")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(0).with_style(style)
    }

    fn read_piped_line() -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl ChatUi for TerminalUi {
    fn title(&mut self, title: &str, subtitle: &str) {
        self.title = title.to_string();
        self.subtitle = subtitle.to_string();
        self.print_header();
    }

    fn index_event(&mut self, event: &IndexEvent) {
        match event {
            IndexEvent::Connecting { name } => {
                let message = format!("Initializing RAG system (collection '{name}')...");
                self.print(style(message).dim());
            }
            IndexEvent::DocumentLoaded { pages } => {
                self.print(format!("📄 Loaded {pages} pages."));
            }
            IndexEvent::Split { chunks } => {
                self.print(format!("✂️ Split into {chunks} chunks."));
            }
            IndexEvent::CreatingCollection { name, dimension } => {
                self.print(format!(
                    "🔄 Creating and populating a new collection '{name}' ({dimension} dimensions)..."
                ));
                self.ingest_bar = Some(Self::ingest_bar());
            }
            IndexEvent::BatchEmbedded { done, total } => {
                if let Some(bar) = &self.ingest_bar {
                    bar.set_length(*total as u64);
                    bar.set_position(*done as u64);
                }
            }
            IndexEvent::Populated { chunks } => {
                if let Some(bar) = self.ingest_bar.take() {
                    bar.finish_and_clear();
                }
                let message = format!("✅ Collection populated with {chunks} chunks.");
                self.print(style(message).green());
            }
            IndexEvent::ConnectedExisting { name, points } => {
                let count = points.map(|p| format!(" ({p} chunks)")).unwrap_or_default();
                self.print(
                    style(format!(
                        "✅ Collection '{name}' already exists{count}. Connecting to it."
                    ))
                    .green(),
                );
            }
            IndexEvent::CreatedConcurrently { name } => {
                self.print(
                    style(format!(
                        "✅ Collection '{name}' was just created elsewhere. Connecting to it."
                    ))
                    .green(),
                );
            }
        }
    }

    fn fatal(&mut self, message: &str) {
        if let Some(bar) = self.ingest_bar.take() {
            bar.abandon();
        }
        eprintln!("{}", style(format!("❌ {message}")).red().bold());
    }

    fn render_history(&mut self, history: &[Turn]) {
        if self.term.is_term() {
            let _ = self.term.clear_screen();
            self.print_header();
        }
        for turn in history {
            self.print_turn(turn);
        }
    }

    fn user_message(&mut self, text: &str) {
        self.print_turn(&Turn::user(text));
        self.print(style("🤖 Assistant").bold().magenta());
    }

    fn begin_activity(&mut self, message: &str) {
        self.end_activity();
        let spinner = if console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            let spinner = ProgressBar::new_spinner().with_style(style);
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        } else {
            ProgressBar::hidden()
        };
        spinner.set_message(message.to_string());
        self.spinner = Some(spinner);
    }

    fn end_activity(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn retrieved_context(&mut self, previews: &[&str]) {
        self.print(style("📚 Retrieved Context (Debug View)").bold().yellow());
        for (i, preview) in previews.iter().enumerate() {
            self.print(style(format!("Chunk {}", i + 1)).bold());
            self.print(preview);
            self.print(style("---").dim());
        }
    }

    fn no_context(&mut self) {
        self.print(
            style("❌ No relevant chunks found from the PDF. RAG might not be working.").yellow(),
        );
    }

    fn partial_answer(&mut self, text: &str) {
        if !self.term.is_term() {
            return;
        }
        self.clear_partial();
        let shown = format!("{text}{CURSOR}");
        self.partial_rows = self.rows(&shown);
        self.print(shown);
    }

    fn final_answer(&mut self, text: &str) {
        self.clear_partial();
        self.print(text);
        self.print("");
    }

    fn turn_error(&mut self, error: &str, hint: &str) {
        self.print(style(error).red());
        self.print(style(format!("⚠ {hint}")).yellow());
        self.print("");
    }

    fn read_question(&mut self) -> anyhow::Result<Option<String>> {
        if !self.term.is_term() {
            return Self::read_piped_line();
        }

        let input = Input::<String>::new()
            .with_prompt(&self.input_prompt)
            .allow_empty(true)
            .interact_text();

        match input {
            Ok(line) => Ok(Some(line)),
            Err(dialoguer::Error::IO(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
