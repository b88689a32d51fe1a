//! Download banner reporting.
//!
//! The chat loop renders the archive download status on every tick. Banners
//! go to **stderr** so stdout carries only the conversation.
//!
//! - in progress: `⏳ Baixando arquivos necessários...` with 0–3 cycling dots,
//!   redrawn in place;
//! - complete: a success line, printed once;
//! - failed: a warning with the error, printed once. Chat stays available.

use std::io::Write;
use std::sync::Mutex;

use crate::status::DownloadStatus;

pub const DOWNLOADING_BANNER: &str =
    "⏳ Baixando arquivos necessários. Você já pode começar a conversar enquanto isso";
pub const COMPLETE_BANNER: &str = "✅ Arquivos necessários carregados com sucesso!";
pub const STILL_DOWNLOADING_WARNING: &str =
    "O download dos arquivos ainda está em andamento. Algumas funcionalidades podem estar limitadas.";

/// Banner text for `status` at animation tick `tick`.
pub fn banner_text(status: &DownloadStatus, tick: usize) -> Option<String> {
    match status {
        DownloadStatus::NotStarted => None,
        DownloadStatus::InProgress { .. } => {
            Some(format!("{}{}", DOWNLOADING_BANNER, ".".repeat(tick % 4)))
        }
        DownloadStatus::Complete { .. } => Some(COMPLETE_BANNER.to_string()),
        DownloadStatus::Failed { error, .. } => Some(format!(
            "⚠️ Não foi possível baixar os arquivos necessários: {}",
            error
        )),
    }
}

/// Renders the download status.
pub trait BannerReporter: Send + Sync {
    fn render(&self, status: &DownloadStatus, tick: usize);
}

/// Remembers the last state label so terminal banners print once.
#[derive(Default)]
struct Transitions {
    last: Mutex<Option<&'static str>>,
}

impl Transitions {
    /// `true` if `status` differs from the previously seen state.
    fn changed(&self, status: &DownloadStatus) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let label = status.label();
        if *last == Some(label) {
            false
        } else {
            *last = Some(label);
            true
        }
    }
}

/// Human-friendly banner on stderr.
#[derive(Default)]
pub struct StderrBanner {
    transitions: Transitions,
}

impl BannerReporter for StderrBanner {
    fn render(&self, status: &DownloadStatus, tick: usize) {
        let changed = self.transitions.changed(status);
        let Some(text) = banner_text(status, tick) else {
            return;
        };
        let mut err = std::io::stderr().lock();
        if status.is_in_progress() {
            // Pad to erase the longest dot suffix.
            let _ = write!(err, "\r{:<width$}", text, width = DOWNLOADING_BANNER.len() + 3);
        } else if changed {
            let _ = writeln!(err, "\r{}", text);
        }
        let _ = err.flush();
    }
}

/// One JSON object per state transition on stderr.
#[derive(Default)]
pub struct JsonBanner {
    transitions: Transitions,
}

impl BannerReporter for JsonBanner {
    fn render(&self, status: &DownloadStatus, _tick: usize) {
        if !self.transitions.changed(status) {
            return;
        }
        let obj = serde_json::json!({ "event": "download", "status": status });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter.
pub struct NoBanner;

impl BannerReporter for NoBanner {
    fn render(&self, _status: &DownloadStatus, _tick: usize) {}
}

/// Banner mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BannerMode {
    Off,
    Human,
    Json,
}

impl BannerMode {
    /// Human banner when stderr is a TTY, otherwise JSON events.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            BannerMode::Human
        } else {
            BannerMode::Json
        }
    }

    pub fn reporter(&self) -> Box<dyn BannerReporter> {
        match self {
            BannerMode::Off => Box::new(NoBanner),
            BannerMode::Human => Box::<StderrBanner>::default(),
            BannerMode::Json => Box::<JsonBanner>::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn dots_cycle_from_zero_to_three() {
        let status = DownloadStatus::InProgress {
            started_at: Utc::now(),
        };
        let dots: Vec<usize> = (0..6)
            .map(|tick| {
                let text = banner_text(&status, tick).unwrap();
                text.len() - DOWNLOADING_BANNER.len()
            })
            .collect();
        assert_eq!(dots, vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn terminal_banners() {
        assert_eq!(
            banner_text(&DownloadStatus::Complete { finished_at: None }, 2).as_deref(),
            Some(COMPLETE_BANNER)
        );
        let failed = DownloadStatus::Failed {
            error: "HTTP 404".to_string(),
            finished_at: Utc::now(),
        };
        assert!(banner_text(&failed, 0).unwrap().ends_with("HTTP 404"));
        assert_eq!(banner_text(&DownloadStatus::NotStarted, 0), None);
    }

    #[test]
    fn transitions_fire_once_per_state() {
        let t = Transitions::default();
        let done = DownloadStatus::Complete { finished_at: None };
        assert!(t.changed(&DownloadStatus::NotStarted));
        assert!(t.changed(&done));
        assert!(!t.changed(&done));
    }
}
