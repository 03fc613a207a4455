//! Interactive terminal screen
//!
//! Terminal events are read on a blocking thread and forwarded over a
//! channel. The async loop turns keys into [`Command`]s for the controller
//! and redraws whenever the client state signals a change. Drawing is
//! a pure function of a [`Snapshot`](sr_client::Snapshot), see
//! [`crate::output::render_screen`].

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::style::Print;
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::output::{render_screen, ViewState};
use sr_client::{Command, Controller};

/// Rows moved by PageUp/PageDown
const PAGE: isize = 10;

/// What a key press in normal mode asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Dispatch(Command),
    /// Open the subscription URL prompt
    OpenPrompt,
    Ignore,
}

/// Map a key press to an action
pub fn map_key(key: &KeyEvent) -> KeyAction {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => KeyAction::Dispatch(Command::Quit),
            _ => KeyAction::Ignore,
        };
    }

    let command = match key.code {
        KeyCode::Char('q') => Command::Quit,
        KeyCode::Char('c') | KeyCode::Enter | KeyCode::Char(' ') => Command::ConnectSelected,
        KeyCode::Char('d') => Command::Disconnect,
        KeyCode::Char('r') => Command::RefreshCatalog,
        KeyCode::Char('s') => return KeyAction::OpenPrompt,
        KeyCode::Char('t') => Command::RunLatencyProbe,
        KeyCode::Char('u') => Command::ToggleRoutingMode,
        KeyCode::Char('f') => Command::RequestRedraw,
        KeyCode::Up | KeyCode::Char('k') => Command::MoveSelection(-1),
        KeyCode::Down | KeyCode::Char('j') => Command::MoveSelection(1),
        KeyCode::PageUp => Command::MoveSelection(-PAGE),
        KeyCode::PageDown => Command::MoveSelection(PAGE),
        KeyCode::Home => Command::MoveSelection(isize::MIN),
        KeyCode::End => Command::MoveSelection(isize::MAX),
        _ => return KeyAction::Ignore,
    };
    KeyAction::Dispatch(command)
}

/// Result of a key press while the prompt is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Editing,
    Submit(String),
    Cancel,
}

/// Apply a key press to the prompt buffer
pub fn edit_prompt(buffer: &mut String, key: &KeyEvent) -> PromptOutcome {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => PromptOutcome::Cancel,
            KeyCode::Char('u') => {
                buffer.clear();
                PromptOutcome::Editing
            }
            _ => PromptOutcome::Editing,
        };
    }

    match key.code {
        KeyCode::Enter => PromptOutcome::Submit(buffer.trim().to_string()),
        KeyCode::Esc => PromptOutcome::Cancel,
        KeyCode::Backspace => {
            buffer.pop();
            PromptOutcome::Editing
        }
        KeyCode::Char(c) => {
            buffer.push(c);
            PromptOutcome::Editing
        }
        _ => PromptOutcome::Editing,
    }
}

/// Raw mode and the alternate screen, restored on drop
struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut guard = Self {
            stdout: io::stdout(),
        };
        execute!(guard.stdout, EnterAlternateScreen, EnableBracketedPaste, Hide)?;
        Ok(guard)
    }

    fn draw(&mut self, lines: &[String]) -> io::Result<()> {
        queue!(self.stdout, Clear(ClearType::All))?;
        for (row, line) in lines.iter().enumerate() {
            let Ok(row) = u16::try_from(row) else {
                break;
            };
            queue!(self.stdout, MoveTo(0, row), Print(line))?;
        }
        self.stdout.flush()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, Show, DisableBracketedPaste, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

fn spawn_event_reader(
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match event::poll(Duration::from_millis(10)) {
                Ok(true) => match event::read() {
                    Ok(evt) => {
                        if tx.blocking_send(evt).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Terminal read failed: {}", e);
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Terminal poll failed: {}", e);
                    break;
                }
            }
        }
    })
}

/// Run the interactive screen until the user quits
pub async fn run(controller: Arc<Controller>) -> Result<()> {
    let cancel = controller.cancel_token();
    let state = Arc::clone(controller.state());
    let mut redraw = state.subscribe_redraw();

    let mut terminal = TerminalGuard::enter()?;
    let (width, height) = terminal::size().unwrap_or((80, 24));
    let mut view = ViewState {
        width,
        height,
        input: None,
    };

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);
    let reader_cancel = cancel.child_token();
    let reader = spawn_event_reader(event_tx, reader_cancel.clone());

    let poller = controller.start_background();
    controller.report_engine_version();
    let has_subscription = state.read().subscription_url.is_some();
    if has_subscription {
        controller.dispatch(Command::RefreshCatalog);
    } else {
        state
            .activity
            .info("No subscription URL set, press s to enter one");
    }

    terminal.draw(&render_screen(&state.snapshot(), &view))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(evt) = event_rx.recv() => match evt {
                Event::Key(key) if key.kind != KeyEventKind::Release => {
                    handle_key(&controller, &mut view, &key);
                }
                Event::Paste(text) => {
                    if let Some(input) = view.input.as_mut() {
                        input.push_str(text.trim());
                    }
                }
                Event::Resize(cols, rows) => {
                    view.width = cols;
                    view.height = rows;
                }
                _ => continue,
            },

            changed = redraw.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        terminal.draw(&render_screen(&state.snapshot(), &view))?;
    }

    reader_cancel.cancel();
    let _ = reader.await;
    let _ = poller.await;
    drop(terminal);
    Ok(())
}

fn handle_key(controller: &Arc<Controller>, view: &mut ViewState, key: &KeyEvent) {
    if let Some(buffer) = view.input.as_mut() {
        match edit_prompt(buffer, key) {
            PromptOutcome::Editing => {}
            PromptOutcome::Cancel => view.input = None,
            PromptOutcome::Submit(url) => {
                view.input = None;
                if !url.is_empty() {
                    controller.dispatch(Command::SetSubscription(url));
                }
            }
        }
        return;
    }

    match map_key(key) {
        KeyAction::Dispatch(command) => controller.dispatch(command),
        KeyAction::OpenPrompt => view.input = Some(String::new()),
        KeyAction::Ignore => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_lifecycle_keys() {
        assert_eq!(map_key(&key(KeyCode::Char('q'))), KeyAction::Dispatch(Command::Quit));
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KeyAction::Dispatch(Command::Quit)
        );
        for code in [KeyCode::Char('c'), KeyCode::Enter, KeyCode::Char(' ')] {
            assert_eq!(
                map_key(&key(code)),
                KeyAction::Dispatch(Command::ConnectSelected)
            );
        }
        assert_eq!(
            map_key(&key(KeyCode::Char('d'))),
            KeyAction::Dispatch(Command::Disconnect)
        );
        assert_eq!(
            map_key(&key(KeyCode::Char('u'))),
            KeyAction::Dispatch(Command::ToggleRoutingMode)
        );
        assert_eq!(map_key(&key(KeyCode::Char('s'))), KeyAction::OpenPrompt);
        assert_eq!(map_key(&key(KeyCode::Char('x'))), KeyAction::Ignore);
    }

    #[test]
    fn test_navigation_keys() {
        assert_eq!(
            map_key(&key(KeyCode::Char('k'))),
            KeyAction::Dispatch(Command::MoveSelection(-1))
        );
        assert_eq!(
            map_key(&key(KeyCode::Down)),
            KeyAction::Dispatch(Command::MoveSelection(1))
        );
        assert_eq!(
            map_key(&key(KeyCode::PageUp)),
            KeyAction::Dispatch(Command::MoveSelection(-10))
        );
        assert_eq!(
            map_key(&key(KeyCode::End)),
            KeyAction::Dispatch(Command::MoveSelection(isize::MAX))
        );
    }

    #[test]
    fn test_prompt_editing() {
        let mut buffer = String::new();
        for c in "https://x".chars() {
            assert_eq!(edit_prompt(&mut buffer, &key(KeyCode::Char(c))), PromptOutcome::Editing);
        }
        edit_prompt(&mut buffer, &key(KeyCode::Backspace));
        assert_eq!(buffer, "https://");

        buffer.push_str("sub.example.com  ");
        assert_eq!(
            edit_prompt(&mut buffer, &key(KeyCode::Enter)),
            PromptOutcome::Submit("https://sub.example.com".into())
        );
        assert_eq!(edit_prompt(&mut buffer, &key(KeyCode::Esc)), PromptOutcome::Cancel);

        edit_prompt(
            &mut buffer,
            &KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL),
        );
        assert!(buffer.is_empty());
    }
}
