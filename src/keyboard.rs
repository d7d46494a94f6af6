use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Interactive cancellation listener: `q` or Esc cancels the session token.
///
/// Cancellation is global: one keypress stops every camera worker, in both
/// recording and counting mode.
pub struct KeyboardListener {
    cancel: CancellationToken,
}

impl KeyboardListener {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Spawn the blocking raw-mode poll loop. The task exits when a quit key
    /// is pressed or when the token is cancelled by someone else.
    pub fn spawn(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Keyboard listener active - press 'q' to stop the session");

            loop {
                if cancel.is_cancelled() {
                    debug!("Keyboard listener stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if key_event.kind != KeyEventKind::Press {
                                continue;
                            }
                            match key_event.code {
                                KeyCode::Char('q') | KeyCode::Esc => {
                                    info!("Quit key pressed - requesting session shutdown");
                                    cancel.cancel();
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Keyboard poll failed: {}", e);
                        break;
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
        })
    }
}
