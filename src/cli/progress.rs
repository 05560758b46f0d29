//! Terminal rendering of update progress events
//!
//! Progress events arrive from hashing workers and download agents on
//! arbitrary tasks. The sink handed to the core only pushes onto an
//! unbounded channel; a single render task owns the indicatif bar and
//! turns events into bar updates. Without a terminal it falls back to
//! one line per phase change on stderr.
//!
//! # Examples
//!
//! ```rust,no_run
//! use content_updater::cli::{ProgressConfig, ProgressDisplay};
//! use content_updater::app::ProgressEvent;
//!
//! # async fn example() {
//! let mut display = ProgressDisplay::new(ProgressConfig::default());
//! let sink = display.start();
//! sink(ProgressEvent::FetchingManifest);
//! display.finish().await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::{ProgressEvent, ProgressSink};

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// Enable terminal colors
    pub enable_colors: bool,
    /// Spinner tick interval
    pub tick_interval: Duration,
    /// Maximum width for file names in display
    pub max_filename_width: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            enable_colors: true,
            tick_interval: Duration::from_millis(100),
            max_filename_width: 40,
        }
    }
}

/// Phase currently shown on the bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Fetching,
    Hashing,
    Downloading,
    Applying,
    Patching,
}

/// Progress display manager
pub struct ProgressDisplay {
    config: ProgressConfig,
    is_terminal: bool,
    event_tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    render_task: Option<JoinHandle<()>>,
}

impl ProgressDisplay {
    /// Create a new progress display with the given configuration
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            is_terminal: atty::is(atty::Stream::Stderr),
            event_tx: None,
            render_task: None,
        }
    }

    /// Start rendering and return the sink to hand to the core
    pub fn start(&mut self) -> ProgressSink {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let use_bar = self.config.enable_progress_bars && self.is_terminal;
        let config = self.config.clone();

        self.render_task = Some(tokio::spawn(async move {
            if use_bar {
                render_bar(event_rx, config).await;
            } else {
                render_text(event_rx).await;
            }
        }));

        let sender = event_tx.clone();
        self.event_tx = Some(event_tx);
        Arc::new(move |event| {
            // A closed channel means the display already finished
            let _ = sender.send(event);
        })
    }

    /// Drain outstanding events and stop rendering
    ///
    /// Sinks returned by [`start`](Self::start) must be dropped first or the
    /// render task keeps waiting for more events.
    pub async fn finish(&mut self) {
        self.event_tx.take();
        if let Some(task) = self.render_task.take() {
            let _ = task.await;
        }
        debug!("Progress display finished");
    }
}

async fn render_bar(mut events: mpsc::UnboundedReceiver<ProgressEvent>, config: ProgressConfig) {
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(config.tick_interval);
    let mut phase = Phase::Idle;

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::FetchingManifest => {
                set_phase(&bar, &mut phase, Phase::Fetching, &config);
                bar.set_message("Fetching manifest...");
            }
            ProgressEvent::Hashing {
                current,
                total,
                file,
            } => {
                set_phase(&bar, &mut phase, Phase::Hashing, &config);
                bar.set_length(total as u64);
                bar.set_position(current as u64);
                bar.set_message(format!("Verifying {}", shorten(&file, config.max_filename_width)));
            }
            ProgressEvent::Downloading {
                percentage,
                speed,
                eta,
            } => {
                set_phase(&bar, &mut phase, Phase::Downloading, &config);
                bar.set_length(100);
                bar.set_position(percentage as u64);
                bar.set_message(format!("Downloading {}/s, ETA {}", speed, eta));
            }
            ProgressEvent::ApplyingUpdates => {
                set_phase(&bar, &mut phase, Phase::Applying, &config);
                bar.set_message("Applying updates...");
            }
            ProgressEvent::Patching {
                current,
                total,
                file,
            } => {
                set_phase(&bar, &mut phase, Phase::Patching, &config);
                bar.set_length(total as u64);
                bar.set_position(current as u64);
                bar.set_message(format!("Patching {}", shorten(&file, config.max_filename_width)));
            }
            ProgressEvent::Error { message } => {
                bar.println(format!("❌ {}", message));
            }
            ProgressEvent::Complete { message } => {
                bar.finish_with_message(format!("✅ {}", message));
                return;
            }
        }
    }
    bar.finish_and_clear();
}

/// Restyle the bar when the phase changes
fn set_phase(bar: &ProgressBar, current: &mut Phase, next: Phase, config: &ProgressConfig) {
    if *current == next {
        return;
    }
    *current = next;

    let template = match (next, config.enable_colors) {
        (Phase::Fetching | Phase::Applying | Phase::Idle, true) => "{spinner:.green} {msg}",
        (Phase::Fetching | Phase::Applying | Phase::Idle, false) => "{spinner} {msg}",
        (Phase::Downloading, true) => "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        (Phase::Downloading, false) => "{spinner} [{bar:40}] {pos:>3}% {msg}",
        (_, true) => "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        (_, false) => "{spinner} [{bar:40}] {pos}/{len} {msg}",
    };
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => {
            bar.set_style(style.progress_chars("##-"));
            bar.set_position(0);
        }
        Err(e) => debug!("Progress template error: {}", e),
    }
}

async fn render_text(mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut last_percentage: Option<u8> = None;

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::FetchingManifest => eprintln!("Fetching manifest..."),
            ProgressEvent::Hashing { current, total, .. } if current == total => {
                eprintln!("Verified {} files", total)
            }
            ProgressEvent::Hashing { .. } => {}
            ProgressEvent::Downloading { percentage, speed, eta } => {
                // Report every 10%
                let bucket = percentage / 10;
                if last_percentage != Some(bucket) {
                    last_percentage = Some(bucket);
                    eprintln!("Downloading: {}% ({}/s, ETA {})", percentage, speed, eta);
                }
            }
            ProgressEvent::ApplyingUpdates => eprintln!("Applying updates..."),
            ProgressEvent::Patching {
                current,
                total,
                file,
            } => eprintln!("Patching {}/{}: {}", current, total, file),
            ProgressEvent::Error { message } => eprintln!("Error: {}", message),
            ProgressEvent::Complete { message } => eprintln!("{}", message),
        }
    }
}

/// Keep the tail of long paths
fn shorten(name: &str, width: usize) -> String {
    let count = name.chars().count();
    if count <= width || width < 4 {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - (width - 3)).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_keeps_tail() {
        assert_eq!(shorten("short.txt", 40), "short.txt");
        let long = "Data/Client/VeryLongDirectoryName/ClientFullBuild0.package";
        let short = shorten(long, 20);
        assert_eq!(short.chars().count(), 20);
        assert!(short.starts_with("...") && short.ends_with("0.package"));
    }

    #[tokio::test]
    async fn test_text_display_drains_on_finish() {
        let mut display = ProgressDisplay::new(ProgressConfig {
            enable_progress_bars: false,
            ..Default::default()
        });
        let sink = display.start();
        sink(ProgressEvent::FetchingManifest);
        sink(ProgressEvent::Complete {
            message: "done".to_string(),
        });
        drop(sink);
        display.finish().await;
        assert!(display.render_task.is_none());
    }
}
