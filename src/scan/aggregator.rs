use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::normalizer::normalize_table;
use super::types::Verdict;
use crate::config::Settings;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("provider API key not configured")]
    Unconfigured,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider answered with HTTP {0}")]
    Status(u16),
    #[error("subject not known to provider")]
    NotFound,
    #[error("analysis {analysis_id} not completed after {attempts} polls")]
    Timeout { analysis_id: String, attempts: u32 },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// The two lookups the resolver needs from a remote multi-engine service
pub trait RemoteAggregator: Send + Sync {
    fn resolve_url(&self, url: &str) -> Result<Verdict, AggregatorError>;
    fn resolve_file_hash(&self, sha256: &str) -> Result<Verdict, AggregatorError>;
}

/// Minimal HTTP surface used by [`AggregatorClient`]
pub trait HttpTransport: Send + Sync {
    fn post_form(
        &self,
        url: &str,
        api_key: &str,
        fields: &[(&str, &str)],
    ) -> Result<Value, AggregatorError>;

    fn get_json(&self, url: &str, api_key: &str) -> Result<Value, AggregatorError>;
}

/// Blocking transport on top of ureq
pub struct UreqTransport {
    timeout: Duration,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn read_json(response: ureq::Response) -> Result<Value, AggregatorError> {
        let body = response
            .into_string()
            .map_err(|e| AggregatorError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| AggregatorError::Malformed(e.to_string()))
    }
}

fn map_ureq_error(err: ureq::Error) -> AggregatorError {
    match err {
        ureq::Error::Status(404, _) => AggregatorError::NotFound,
        ureq::Error::Status(code, _) => AggregatorError::Status(code),
        ureq::Error::Transport(t) => AggregatorError::Transport(t.to_string()),
    }
}

impl HttpTransport for UreqTransport {
    fn post_form(
        &self,
        url: &str,
        api_key: &str,
        fields: &[(&str, &str)],
    ) -> Result<Value, AggregatorError> {
        let response = ureq::post(url)
            .set("x-apikey", api_key)
            .set("Accept", "application/json")
            .timeout(self.timeout)
            .send_form(fields)
            .map_err(map_ureq_error)?;
        Self::read_json(response)
    }

    fn get_json(&self, url: &str, api_key: &str) -> Result<Value, AggregatorError> {
        let response = ureq::get(url)
            .set("x-apikey", api_key)
            .set("Accept", "application/json")
            .timeout(self.timeout)
            .call()
            .map_err(map_ureq_error)?;
        Self::read_json(response)
    }
}

/// States of a URL analysis
#[derive(Debug)]
enum PollState {
    Submitted { analysis_id: String },
    Polling { analysis_id: String, attempt: u32 },
    Completed(Verdict),
    TimedOut { analysis_id: String, attempts: u32 },
    Failed(AggregatorError),
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    undetected: u32,
    #[serde(default)]
    harmless: u32,
}

#[derive(Debug, Default, Deserialize)]
struct FileAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
    #[serde(default)]
    last_analysis_results: Value,
}

#[derive(Debug, Deserialize)]
struct FileData {
    #[serde(default)]
    attributes: FileAttributes,
}

#[derive(Debug, Deserialize)]
struct FileReport {
    data: FileData,
}

/// Client for the remote multi-engine aggregator
pub struct AggregatorClient {
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    poll_attempts: u32,
    transport: Box<dyn HttpTransport>,
}

impl AggregatorClient {
    pub fn new(settings: &Settings) -> Self {
        let transport = UreqTransport::new(Duration::from_secs(settings.request_timeout_secs));
        Self::with_transport(settings, Box::new(transport))
    }

    pub fn with_transport(settings: &Settings, transport: Box<dyn HttpTransport>) -> Self {
        Self {
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|_| settings.has_api_key()),
            poll_interval: settings.poll_interval(),
            poll_attempts: settings.poll_attempts,
            transport,
        }
    }

    /// Check if the provider can be queried at all (has an API key)
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, AggregatorError> {
        self.api_key.as_deref().ok_or(AggregatorError::Unconfigured)
    }

    fn submit(&self, url: &str, api_key: &str) -> PollState {
        let endpoint = format!("{}/urls", self.base_url);
        let response = match self.transport.post_form(&endpoint, api_key, &[("url", url)]) {
            Ok(response) => response,
            Err(e) => return PollState::Failed(e),
        };

        match response.pointer("/data/id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => PollState::Submitted {
                analysis_id: id.to_string(),
            },
            _ => PollState::Failed(AggregatorError::Malformed(
                "submission response has no analysis id".to_string(),
            )),
        }
    }

    /// `Ok(None)` while the analysis is still queued or running
    fn poll_once(
        &self,
        analysis_id: &str,
        api_key: &str,
    ) -> Result<Option<Verdict>, AggregatorError> {
        let endpoint = format!("{}/analyses/{}", self.base_url, analysis_id);
        let response = self.transport.get_json(&endpoint, api_key)?;

        let status = response
            .pointer("/data/attributes/status")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if status != "completed" {
            return Ok(None);
        }

        let results = response
            .pointer("/data/attributes/results")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Some(normalize_table(&results)))
    }
}

impl RemoteAggregator for AggregatorClient {
    fn resolve_url(&self, url: &str) -> Result<Verdict, AggregatorError> {
        let api_key = self.api_key()?;
        let mut state = self.submit(url, api_key);

        loop {
            state = match state {
                PollState::Submitted { analysis_id } => {
                    log::debug!("Submitted {} as analysis {}", url, analysis_id);
                    PollState::Polling {
                        analysis_id,
                        attempt: 0,
                    }
                }
                PollState::Polling {
                    analysis_id,
                    attempt,
                } if attempt >= self.poll_attempts => PollState::TimedOut {
                    analysis_id,
                    attempts: attempt,
                },
                PollState::Polling {
                    analysis_id,
                    attempt,
                } => match self.poll_once(&analysis_id, api_key) {
                    Ok(Some(verdict)) => PollState::Completed(verdict),
                    Ok(None) => {
                        log::debug!("Analysis {} pending (poll {})", analysis_id, attempt + 1);
                        thread::sleep(self.poll_interval);
                        PollState::Polling {
                            analysis_id,
                            attempt: attempt + 1,
                        }
                    }
                    Err(e) => PollState::Failed(e),
                },
                PollState::Completed(verdict) => return Ok(verdict),
                PollState::TimedOut {
                    analysis_id,
                    attempts,
                } => {
                    return Err(AggregatorError::Timeout {
                        analysis_id,
                        attempts,
                    });
                }
                PollState::Failed(e) => return Err(e),
            };
        }
    }

    fn resolve_file_hash(&self, sha256: &str) -> Result<Verdict, AggregatorError> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/files/{}", self.base_url, sha256);
        let response = self.transport.get_json(&endpoint, api_key)?;

        let report: FileReport = serde_json::from_value(response)
            .map_err(|e| AggregatorError::Malformed(e.to_string()))?;
        let attributes = report.data.attributes;
        let verdict = normalize_table(&attributes.last_analysis_results);

        let stats = &attributes.last_analysis_stats;
        if stats.malicious != verdict.counts.malicious
            || stats.suspicious != verdict.counts.suspicious
            || stats.harmless != verdict.counts.harmless
            || stats.undetected > verdict.counts.clean
        {
            log::debug!(
                "Provider stats for {} differ from engine table ({:?} vs {:?})",
                sha256,
                stats,
                verdict.counts
            );
        }

        Ok(verdict)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records requested URLs
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub posts: Mutex<VecDeque<Result<Value, AggregatorError>>>,
        pub gets: Mutex<VecDeque<Result<Value, AggregatorError>>>,
        pub requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn next(
            &self,
            queue: &Mutex<VecDeque<Result<Value, AggregatorError>>>,
            url: &str,
        ) -> Result<Value, AggregatorError> {
            self.requested.lock().unwrap().push(url.to_string());
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AggregatorError::Transport("script exhausted".into())))
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn post_form(
            &self,
            url: &str,
            _api_key: &str,
            _fields: &[(&str, &str)],
        ) -> Result<Value, AggregatorError> {
            self.next(&self.posts, url)
        }

        fn get_json(&self, url: &str, _api_key: &str) -> Result<Value, AggregatorError> {
            self.next(&self.gets, url)
        }
    }

    impl HttpTransport for std::sync::Arc<ScriptedTransport> {
        fn post_form(
            &self,
            url: &str,
            api_key: &str,
            fields: &[(&str, &str)],
        ) -> Result<Value, AggregatorError> {
            self.as_ref().post_form(url, api_key, fields)
        }

        fn get_json(&self, url: &str, api_key: &str) -> Result<Value, AggregatorError> {
            self.as_ref().get_json(url, api_key)
        }
    }

    fn test_settings(api_key: Option<&str>, attempts: u32) -> Settings {
        Settings {
            api_key: api_key.map(str::to_string),
            api_base_url: "https://provider.test/api/v3/".to_string(),
            poll_interval_ms: 0,
            poll_attempts: attempts,
            ..Settings::default()
        }
    }

    fn pending() -> Value {
        json!({"data": {"attributes": {"status": "queued"}}})
    }

    fn completed(results: Value) -> Value {
        json!({"data": {"attributes": {"status": "completed", "results": results}}})
    }

    #[test]
    fn test_url_completes_after_polling() {
        let transport = ScriptedTransport::default();
        transport
            .posts
            .lock()
            .unwrap()
            .push_back(Ok(json!({"data": {"id": "an-1"}})));
        {
            let mut gets = transport.gets.lock().unwrap();
            gets.push_back(Ok(pending()));
            gets.push_back(Ok(completed(json!({
                "EngA": {"category": "malicious"},
                "EngB": {"category": "clean"},
            }))));
        }
        let transport = std::sync::Arc::new(transport);
        let client = AggregatorClient::with_transport(
            &test_settings(Some("key"), 5),
            Box::new(transport.clone()),
        );

        let verdict = client.resolve_url("http://example.test").unwrap();
        assert_eq!(verdict.counts.malicious, 1);
        assert_eq!(verdict.counts.clean, 1);

        let requested = transport.requested.lock().unwrap();
        assert_eq!(requested[0], "https://provider.test/api/v3/urls");
        assert_eq!(requested[1], "https://provider.test/api/v3/analyses/an-1");
        assert_eq!(requested.len(), 3);
    }

    #[test]
    fn test_url_times_out_after_max_attempts() {
        let transport = ScriptedTransport::default();
        transport
            .posts
            .lock()
            .unwrap()
            .push_back(Ok(json!({"data": {"id": "an-2"}})));
        for _ in 0..3 {
            transport.gets.lock().unwrap().push_back(Ok(pending()));
        }
        let client =
            AggregatorClient::with_transport(&test_settings(Some("key"), 3), Box::new(transport));

        match client.resolve_url("http://slow.test") {
            Err(AggregatorError::Timeout { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_url_fails_on_transport_error() {
        let transport = ScriptedTransport::default();
        transport
            .posts
            .lock()
            .unwrap()
            .push_back(Ok(json!({"data": {"id": "an-3"}})));
        transport
            .gets
            .lock()
            .unwrap()
            .push_back(Err(AggregatorError::Status(401)));
        let client =
            AggregatorClient::with_transport(&test_settings(Some("key"), 10), Box::new(transport));

        assert!(matches!(
            client.resolve_url("http://x.test"),
            Err(AggregatorError::Status(401))
        ));
    }

    #[test]
    fn test_missing_analysis_id_is_malformed() {
        let transport = ScriptedTransport::default();
        transport.posts.lock().unwrap().push_back(Ok(json!({"data": {}})));
        let client =
            AggregatorClient::with_transport(&test_settings(Some("key"), 10), Box::new(transport));

        assert!(matches!(
            client.resolve_url("http://x.test"),
            Err(AggregatorError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_key_skips_network() {
        let transport = std::sync::Arc::new(ScriptedTransport::default());
        let client =
            AggregatorClient::with_transport(&test_settings(None, 10), Box::new(transport.clone()));

        assert!(!client.is_available());
        assert!(matches!(
            client.resolve_url("http://x.test"),
            Err(AggregatorError::Unconfigured)
        ));
        assert!(matches!(
            client.resolve_file_hash("abc"),
            Err(AggregatorError::Unconfigured)
        ));
        assert!(transport.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let transport = std::sync::Arc::new(ScriptedTransport::default());
        let client = AggregatorClient::with_transport(
            &test_settings(Some("   "), 10),
            Box::new(transport.clone()),
        );

        assert!(!client.is_available());
        assert!(matches!(
            client.resolve_url("http://x.test"),
            Err(AggregatorError::Unconfigured)
        ));
        assert!(transport.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn test_file_hash_report() {
        let transport = ScriptedTransport::default();
        transport.gets.lock().unwrap().push_back(Ok(json!({
            "data": {"attributes": {
                "last_analysis_stats": {
                    "malicious": 1, "suspicious": 0, "undetected": 1, "harmless": 0
                },
                "last_analysis_results": {
                    "EngA": {"category": "malicious", "engine_name": "Engine A"},
                    "EngB": {"category": "undetected", "engine_name": "Engine B"},
                }
            }}
        })));
        let client =
            AggregatorClient::with_transport(&test_settings(Some("key"), 10), Box::new(transport));

        let verdict = client.resolve_file_hash("deadbeef").unwrap();
        assert_eq!(verdict.counts.malicious, 1);
        assert_eq!(verdict.counts.clean, 1);
        assert_eq!(verdict.engines["EngA"].engine_name, "Engine A");
    }

    #[test]
    fn test_file_hash_not_found() {
        let transport = ScriptedTransport::default();
        transport
            .gets
            .lock()
            .unwrap()
            .push_back(Err(AggregatorError::NotFound));
        let client =
            AggregatorClient::with_transport(&test_settings(Some("key"), 10), Box::new(transport));

        assert!(matches!(
            client.resolve_file_hash("deadbeef"),
            Err(AggregatorError::NotFound)
        ));
    }
}
