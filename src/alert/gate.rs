use std::fmt::Write as _;
use std::path::PathBuf;

use super::sinks::NotificationSink;
use crate::scan::{Category, Digests, Verdict};

/// How many flagged engines are listed in an alert
const THREAT_SUMMARY_LIMIT: usize = 5;

/// Where a verdict came from, for the alert text
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlertContext {
    pub event_type: String,
    pub file_path: Option<PathBuf>,
    pub url: Option<String>,
    pub digests: Option<Digests>,
}

impl AlertContext {
    pub fn for_file(event_type: &str, path: PathBuf, digests: Digests) -> Self {
        Self {
            event_type: event_type.to_string(),
            file_path: Some(path),
            url: None,
            digests: Some(digests),
        }
    }

    pub fn for_url(event_type: &str, url: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            file_path: None,
            url: Some(url.to_string()),
            digests: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    pub context: AlertContext,
    pub malicious: u32,
    pub suspicious: u32,
    /// Flagged engines, sorted by name and capped
    pub threats: Vec<(String, Category)>,
    pub total_flagged: usize,
}

impl NotificationMessage {
    pub fn summary(&self) -> String {
        format!("{} malicious, {} suspicious", self.malicious, self.suspicious)
    }

    pub fn render(&self) -> String {
        let mut msg = format!("Threat detected: {}\n", self.context.event_type);

        if let Some(ref path) = self.context.file_path {
            let _ = writeln!(msg, "File: `{}`", path.display());
        }
        if let Some(ref url) = self.context.url {
            let _ = writeln!(msg, "URL: {}", url);
        }
        if let Some(ref digests) = self.context.digests {
            let _ = writeln!(msg, "SHA256: `{}`", digests.sha256);
        }

        let _ = write!(msg, "\nDetection Summary: {}", self.summary());

        if !self.threats.is_empty() {
            let listed = self
                .threats
                .iter()
                .map(|(engine, category)| format!("{} ({})", engine, category))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(msg, "\nFlagged by: {}", listed);
            if self.total_flagged > self.threats.len() {
                let _ = write!(msg, " and {} more", self.total_flagged - self.threats.len());
            }
        }

        msg
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    Send(NotificationMessage),
    Suppress,
}

/// Decides whether a verdict warrants an alert and fans it out to the sinks
pub struct NotificationGate {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl NotificationGate {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Suppress unless at least one engine reported malicious or suspicious
    pub fn evaluate(verdict: &Verdict, context: &AlertContext) -> GateDecision {
        if !verdict.is_flagged() {
            return GateDecision::Suppress;
        }

        let flagged = verdict.flagged_engines();
        GateDecision::Send(NotificationMessage {
            context: context.clone(),
            malicious: verdict.counts.malicious,
            suspicious: verdict.counts.suspicious,
            total_flagged: flagged.len(),
            threats: flagged
                .into_iter()
                .take(THREAT_SUMMARY_LIMIT)
                .map(|(engine, category)| (engine.to_string(), category))
                .collect(),
        })
    }

    /// Evaluate and deliver. Sink failures are logged and never retried.
    pub fn notify(&self, verdict: &Verdict, context: &AlertContext) -> GateDecision {
        let decision = Self::evaluate(verdict, context);

        match decision {
            GateDecision::Suppress => {
                log::debug!("No detections for {}, alert suppressed", context.event_type);
            }
            GateDecision::Send(ref message) => {
                let text = message.render();
                for sink in &self.sinks {
                    if let Err(e) = sink.send(&text) {
                        log::error!("Failed to deliver alert via {}: {}", sink.name(), e);
                    }
                }
            }
        }

        decision
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alert::sinks::SinkError;
    use crate::scan::normalizer::normalize_table;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records delivered messages, optionally failing every send
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl NotificationSink for Arc<RecordingSink> {
        fn name(&self) -> &str {
            "recording"
        }

        fn send(&self, message: &str) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Transport("unreachable".into()));
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_clean_verdict_suppressed() {
        let verdict = normalize_table(&json!({"A": {"category": "harmless"}, "B": {}}));
        assert_eq!(
            NotificationGate::evaluate(&verdict, &AlertContext::default()),
            GateDecision::Suppress
        );
        assert_eq!(
            NotificationGate::evaluate(&Verdict::empty(), &AlertContext::default()),
            GateDecision::Suppress
        );
    }

    #[test]
    fn test_single_malicious_sends() {
        let verdict = normalize_table(&json!({"A": {"category": "malicious"}}));
        let ctx = AlertContext::for_url("manual_url_scan", "http://bad.test");
        match NotificationGate::evaluate(&verdict, &ctx) {
            GateDecision::Send(message) => {
                assert_eq!(message.summary(), "1 malicious, 0 suspicious");
                let text = message.render();
                assert!(text.contains("URL: http://bad.test"));
                assert!(text.contains("Flagged by: A (malicious)"));
            }
            GateDecision::Suppress => panic!("expected an alert"),
        }
    }

    #[test]
    fn test_suspicious_alone_sends() {
        let verdict = normalize_table(&json!({"A": {"category": "suspicious"}}));
        assert!(matches!(
            NotificationGate::evaluate(&verdict, &AlertContext::default()),
            GateDecision::Send(_)
        ));
    }

    #[test]
    fn test_threat_list_capped() {
        let mut table = serde_json::Map::new();
        for i in 0..8 {
            table.insert(format!("E{}", i), json!({"category": "malicious"}));
        }
        let verdict = normalize_table(&serde_json::Value::Object(table));
        let ctx = AlertContext::for_file(
            "watchdog_file_created",
            PathBuf::from("/in/x.exe"),
            Digests {
                md5: "m".into(),
                sha256: "s".into(),
            },
        );
        let GateDecision::Send(message) = NotificationGate::evaluate(&verdict, &ctx) else {
            panic!("expected an alert");
        };
        assert_eq!(message.threats.len(), 5);
        assert_eq!(message.threats[0].0, "E0");
        let text = message.render();
        assert!(text.contains("SHA256: `s`"));
        assert!(text.contains("and 3 more"));
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        let failing = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let working = Arc::new(RecordingSink::default());
        let sinks: Vec<Box<dyn NotificationSink>> =
            vec![Box::new(failing), Box::new(working.clone())];
        let gate = NotificationGate::new(sinks);

        let verdict = normalize_table(&json!({"A": {"category": "malicious"}}));
        let decision = gate.notify(&verdict, &AlertContext::for_url("scan", "http://x.test"));

        assert!(matches!(decision, GateDecision::Send(_)));
        assert_eq!(working.sent.lock().unwrap().len(), 1);
    }
}
