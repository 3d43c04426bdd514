use std::io::{self, Write};
use std::time::Instant;

use colored::{ColoredString, Colorize};
use log::debug;

use crate::core::{ChatError, OutputFormat};
use crate::protocol::{ConversationUnit, Message, ToolCall, UnitStatus};
use crate::scroll::{ScrollController, ScrollOptions, Viewport, VirtualViewport};

const LINE_HEIGHT: f64 = 20.0;
const WINDOW_LINES: f64 = 40.0;

fn status_label(status: UnitStatus) -> ColoredString {
    match status {
        UnitStatus::Loading => "loading".yellow(),
        UnitStatus::Finished => "finished".green(),
        UnitStatus::Failed => "failed".red().bold(),
        UnitStatus::Abandoned => "abandoned".dimmed(),
        UnitStatus::Cancelled => "cancelled".dimmed(),
    }
}

fn write_tool_call<W: Write>(out: &mut W, call: &ToolCall) -> io::Result<()> {
    match &call.result {
        Some(result) => writeln!(out, "  {} {call} -> {}", "tool".cyan(), result.content),
        None => writeln!(out, "  {} {call} {}", "tool".cyan(), "(pending)".dimmed()),
    }
}

fn write_message<W: Write>(out: &mut W, msg: &Message) -> io::Result<()> {
    match msg {
        Message::Human(human) => writeln!(out, "{} {}", ">".bold(), human.content.bold()),
        Message::Ai(ai) => {
            if let Some(reasoning) = ai.reasoning_content.as_deref() {
                writeln!(out, "{}", reasoning.italic().dimmed())?;
            }
            if !ai.content.is_empty() {
                writeln!(out, "{}", ai.content)?;
            }
            for call in &ai.tool_calls {
                write_tool_call(out, call)?;
            }
            Ok(())
        }
        // Tool results are shown on the call they answer.
        Message::Tool(_) => Ok(()),
    }
}

/// Writes one block per unit: a numbered status header, the prompt, then the
/// assistant messages with their tool calls.
pub fn write_transcript<W: Write>(out: &mut W, units: &[ConversationUnit]) -> io::Result<()> {
    for (index, unit) in units.iter().enumerate() {
        if index > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{} {}", format!("[{}]", index + 1).dimmed(), status_label(unit.status))?;
        for msg in &unit.messages {
            write_message(out, msg)?;
        }
    }
    Ok(())
}

pub fn write_json<W: Write>(out: &mut W, units: &[ConversationUnit]) -> Result<(), ChatError> {
    serde_json::to_writer_pretty(&mut *out, units)
        .map_err(|e| ChatError::ResponseFormat(format!("Failed to serialize transcript: {e}")))?;
    writeln!(out)?;
    Ok(())
}

/// Prints the growing content of the newest assistant message as it streams.
#[derive(Debug, Default)]
pub struct LivePrinter {
    current: Option<(usize, usize)>,
    printed: usize,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<W: Write>(&mut self, out: &mut W, units: &[ConversationUnit]) -> io::Result<()> {
        let Some((unit_index, unit)) = units.iter().enumerate().last() else {
            return Ok(());
        };
        let Some((msg_index, content)) = unit
            .messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, msg)| msg.as_ai().map(|ai| (i, ai.content.as_str())))
        else {
            return Ok(());
        };

        if self.current != Some((unit_index, msg_index)) {
            if self.current.is_some() && self.printed > 0 {
                writeln!(out)?;
            }
            self.current = Some((unit_index, msg_index));
            self.printed = 0;
        }

        // Reconciled content may differ from what was streamed; never reprint.
        if let Some(delta) = content.get(self.printed..) {
            if !delta.is_empty() {
                write!(out, "{delta}")?;
                out.flush()?;
                self.printed = content.len();
            }
        }
        Ok(())
    }

    /// Ends the live output with the tool calls and status of the last unit.
    pub fn finish<W: Write>(&mut self, out: &mut W, units: &[ConversationUnit]) -> io::Result<()> {
        if self.printed > 0 {
            writeln!(out)?;
        }
        if let Some(unit) = units.last() {
            for call in unit
                .messages
                .iter()
                .filter_map(Message::as_ai)
                .flat_map(|ai| &ai.tool_calls)
            {
                write_tool_call(out, call)?;
            }
            if unit.status != UnitStatus::Finished {
                writeln!(out, "{}", status_label(unit.status))?;
            }
        }
        Ok(())
    }
}

/// Keeps a virtual window pinned to the bottom of the transcript while the
/// reply grows, one line of text per `LINE_HEIGHT` pixels.
#[derive(Debug)]
pub struct ScrollFollower {
    viewport: VirtualViewport,
    controller: ScrollController,
}

impl ScrollFollower {
    pub fn new(options: ScrollOptions) -> Self {
        Self {
            viewport: VirtualViewport::new(WINDOW_LINES * LINE_HEIGHT),
            controller: ScrollController::new(options),
        }
    }

    pub fn content_changed(&mut self, units: &[ConversationUnit]) {
        let lines: usize = units
            .iter()
            .map(|unit| {
                1 + unit
                    .messages
                    .iter()
                    .map(|msg| msg.content().lines().count().max(1))
                    .sum::<usize>()
            })
            .sum();
        self.viewport.set_content_height(lines as f64 * LINE_HEIGHT);
    }

    pub fn follow(&mut self) {
        let now = Instant::now();
        self.controller.poll(&mut self.viewport, now);
        if self.controller.scroll_to_bottom(&mut self.viewport, false, now) {
            debug!("[Scroll] following to {}", self.viewport.scroll_top());
        }
    }

    pub fn finish(&mut self) {
        self.controller.scroll_to_bottom_static_force(&mut self.viewport);
        self.controller.dispose();
    }

    pub fn viewport(&self) -> &VirtualViewport {
        &self.viewport
    }
}

/// Receives engine updates for one command and writes its output.
pub struct Presenter<W: Write> {
    out: W,
    format: OutputFormat,
    live: Option<LivePrinter>,
    follower: ScrollFollower,
    error: Option<io::Error>,
}

impl<W: Write> Presenter<W> {
    /// `live` prints assistant text while it streams (text format only).
    pub fn new(out: W, format: OutputFormat, live: bool, scroll: ScrollOptions) -> Self {
        Self {
            out,
            format,
            live: (live && format == OutputFormat::Text).then(LivePrinter::new),
            follower: ScrollFollower::new(scroll),
            error: None,
        }
    }

    pub fn update(&mut self, units: &[ConversationUnit]) {
        self.follower.content_changed(units);
        if let Some(live) = self.live.as_mut() {
            if let Err(e) = live.update(&mut self.out, units) {
                self.error.get_or_insert(e);
            }
        }
    }

    pub fn scroll(&mut self) {
        self.follower.follow();
    }

    pub fn finish(mut self, units: &[ConversationUnit]) -> Result<W, ChatError> {
        if let Some(e) = self.error.take() {
            return Err(e.into());
        }
        self.follower.content_changed(units);
        self.follower.finish();
        match (self.format, self.live.as_mut()) {
            (OutputFormat::Json, _) => write_json(&mut self.out, units)?,
            (OutputFormat::Text, Some(live)) => live.finish(&mut self.out, units)?,
            (OutputFormat::Text, None) => write_transcript(&mut self.out, units)?,
        }
        self.out.flush()?;
        Ok(self.out)
    }
}
