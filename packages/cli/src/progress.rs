//! `indicatif` rendering for the pipeline's progress trait, plus logger
//! setup.
//!
//! [`init_logger`] wires `pretty_env_logger` through
//! `indicatif-log-bridge` so `log::info!` lines and progress bars never
//! fight for the terminal. [`enrichment_bar`] starts as a spinner while
//! the record count is unknown and becomes a bar once the pipeline calls
//! `set_total`.

use std::sync::Arc;
use std::time::Duration;

use address_enrich_pipeline::progress::ProgressCallback;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Shown until the record count is known.
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";
/// Shown from `set_total` onward; `{msg}` carries the stage name.
const BAR_TEMPLATE: &str = "  {msg:>8} [{wide_bar:.green/dim}] {pos}/{len} ({eta})";

struct EnrichmentBar {
    bar: ProgressBar,
    /// Style to switch to once the total is known.
    bar_style: ProgressStyle,
}

/// Creates the run's progress indicator on `multi`.
#[must_use]
pub fn enrichment_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(
        ProgressStyle::with_template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());

    let bar_style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

    Arc::new(EnrichmentBar { bar, bar_style })
}

impl ProgressCallback for EnrichmentBar {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge`.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if a logger is already set (e.g., in tests)

    log::set_max_level(level);

    multi
}
