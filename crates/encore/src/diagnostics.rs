//! Diagnostic events: always written to `tracing`, and mirrored to page
//! contexts as `debug` messages when the worker is verbose.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::messages::ClientMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    verbose: bool,
    clients: broadcast::Sender<ClientMessage>,
}

impl Diagnostics {
    pub fn new(verbose: bool, clients: broadcast::Sender<ClientMessage>) -> Self {
        Self { verbose, clients }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn emit(&self, level: DiagnosticLevel, msg: impl Into<String>, url: Option<&str>) {
        let msg = msg.into();
        let url_field = url.unwrap_or("");
        match level {
            DiagnosticLevel::Debug => debug!(url = url_field, "{msg}"),
            DiagnosticLevel::Info => info!(url = url_field, "{msg}"),
            DiagnosticLevel::Warn => warn!(url = url_field, "{msg}"),
            DiagnosticLevel::Error => error!(url = url_field, "{msg}"),
        }

        if self.verbose {
            // No subscribers is not an error
            let _ = self.clients.send(ClientMessage::Debug {
                level: level.to_string(),
                msg,
                url: url.map(str::to_owned),
            });
        }
    }

    pub fn debug(&self, msg: impl Into<String>, url: Option<&str>) {
        self.emit(DiagnosticLevel::Debug, msg, url);
    }

    pub fn info(&self, msg: impl Into<String>, url: Option<&str>) {
        self.emit(DiagnosticLevel::Info, msg, url);
    }

    pub fn warn(&self, msg: impl Into<String>, url: Option<&str>) {
        self.emit(DiagnosticLevel::Warn, msg, url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verbose_mirrors_to_clients() {
        let (tx, mut rx) = broadcast::channel(8);
        let diagnostics = Diagnostics::new(true, tx);

        diagnostics.warn("fetch failed", Some("assets/media/a.mp3"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::Debug {
                level: "warn".into(),
                msg: "fetch failed".into(),
                url: Some("assets/media/a.mp3".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_quiet_sends_nothing() {
        let (tx, mut rx) = broadcast::channel(8);
        let diagnostics = Diagnostics::new(false, tx);

        diagnostics.info("hello", None);

        assert!(rx.try_recv().is_err());
    }
}
