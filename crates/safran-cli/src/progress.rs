//! Bridges engine progress events onto indicatif.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use safran_core::engine::progress::{Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

#[derive(Default)]
struct BarState {
    active_bar: Option<ProgressBar>,
    base_message: String,
}

#[derive(Clone)]
pub struct CliProgressHandler {
    mp: Arc<MultiProgress>,
    state: Arc<Mutex<BarState>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        Self {
            mp: Arc::new(mp),
            state: Arc::new(Mutex::new(BarState::default())),
        }
    }

    pub fn log(&self, msg: &str) {
        self.mp.println(msg).ok();
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let mp = self.mp.clone();
        let state = self.state.clone();

        Box::new(move |progress: Progress| {
            let Ok(mut state) = state.lock() else {
                warn!("progress bar mutex was poisoned; cannot update the UI");
                return;
            };

            match progress {
                Progress::PassStart { name } => {
                    if let Some(bar) = state.active_bar.take() {
                        bar.finish_and_clear();
                        mp.println(format!("✓ {}", state.base_message)).ok();
                    }
                    let pb = mp.add(ProgressBar::new_spinner());
                    pb.enable_steady_tick(Duration::from_millis(80));
                    pb.set_style(Self::spinner_style());
                    pb.set_message(name.clone());
                    state.active_bar = Some(pb);
                    state.base_message = name;
                }
                Progress::PassFinish => {
                    if let Some(bar) = state.active_bar.take() {
                        bar.finish_and_clear();
                    }
                    mp.println(format!("✓ {}", state.base_message)).ok();
                    state.base_message.clear();
                }
                Progress::TaskStart { total_steps } => {
                    if let Some(bar) = state.active_bar.as_ref() {
                        bar.set_style(Self::bar_style());
                        bar.set_length(total_steps);
                        bar.set_position(0);
                        bar.disable_steady_tick();
                    }
                }
                Progress::TaskIncrement => {
                    if let Some(bar) = state.active_bar.as_ref() {
                        bar.inc(1);
                    }
                }
                Progress::TaskFinish => {
                    if let Some(bar) = state.active_bar.as_ref() {
                        bar.finish();
                        bar.set_style(Self::spinner_style());
                        bar.set_message(state.base_message.clone());
                        bar.enable_steady_tick(Duration::from_millis(80));
                    }
                }
                Progress::Status(text) => {
                    if let Some(bar) = state.active_bar.as_ref() {
                        bar.set_message(format!("{} ({})", state.base_message, text));
                    } else {
                        mp.println(format!("  {}", text)).ok();
                    }
                }
                Progress::Message(msg) => {
                    mp.println(format!("  {}", msg)).ok();
                }
            }
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("invalid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<40} [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("invalid template")
            .progress_chars("━╸ ")
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_active_bar(handler: &CliProgressHandler) -> Option<ProgressBar> {
        handler.state.lock().unwrap().active_bar.clone()
    }

    #[test]
    fn new_handler_initializes_in_a_clean_state() {
        let handler = CliProgressHandler::new();
        let state = handler.state.lock().unwrap();
        assert!(state.active_bar.is_none());
        assert!(state.base_message.is_empty());
    }

    #[test]
    fn pass_start_creates_a_spinner_with_the_pass_name() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();
        callback(Progress::PassStart {
            name: "Initial pass".into(),
        });

        let bar = get_active_bar(&handler).expect("bar should be active");
        assert_eq!(bar.message(), "Initial pass");
    }

    #[test]
    fn a_new_pass_replaces_the_previous_bar() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();
        callback(Progress::PassStart {
            name: "first".into(),
        });
        let first = get_active_bar(&handler).unwrap();
        callback(Progress::PassStart {
            name: "second".into(),
        });
        assert!(first.is_finished());
        assert_eq!(get_active_bar(&handler).unwrap().message(), "second");
    }

    #[test]
    fn status_updates_combine_with_the_base_message() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();
        callback(Progress::PassStart {
            name: "Reorder pass".into(),
        });
        callback(Progress::Status("accepted 3 / rejected 5".into()));
        let bar = get_active_bar(&handler).unwrap();
        assert_eq!(bar.message(), "Reorder pass (accepted 3 / rejected 5)");
    }

    #[test]
    fn task_events_drive_the_bar_position() {
        let handler = CliProgressHandler::new();
        let callback = handler.get_callback();
        callback(Progress::PassStart {
            name: "work".into(),
        });
        callback(Progress::TaskStart { total_steps: 10 });
        for _ in 0..4 {
            callback(Progress::TaskIncrement);
        }
        let bar = get_active_bar(&handler).unwrap();
        assert_eq!(bar.length(), Some(10));
        assert_eq!(bar.position(), 4);
    }
}
