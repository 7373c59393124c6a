use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::InputResolver;
use crate::config::AiResolverConfig;
use crate::controller::LogEntry;

/// Request body for the input-solver endpoint
pub fn build_request_body(prompt: Option<&str>, logs: &[LogEntry], model: &str) -> serde_json::Value {
    serde_json::json!({
        "mode": "input_solver",
        "prompt": prompt.unwrap_or(""),
        "logs": logs,
        "model": model,
    })
}

/// The endpoint answers with the raw value as plain text
pub fn interpret_response(body: &str) -> Option<String> {
    let value = body.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Resolver backed by an HTTP endpoint
pub struct HttpInputResolver {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    max_retries: u32,
    /// Wait before retry n is `backoff * n`
    backoff: Duration,
}

impl HttpInputResolver {
    pub fn new(config: &AiResolverConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        Self {
            agent,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn attempt(&self, body: &serde_json::Value) -> Result<Option<String>> {
        let text = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .send_json(body)
            .context("Failed to send request to input solver")?
            .into_body()
            .read_to_string()
            .context("Failed to read input solver response")?;
        Ok(interpret_response(&text))
    }
}

impl InputResolver for HttpInputResolver {
    fn resolve(&self, prompt: Option<&str>, logs: &[LogEntry]) -> Result<Option<String>> {
        let body = build_request_body(prompt, logs, &self.model);
        let mut attempt = 0;
        loop {
            match self.attempt(&body) {
                Ok(answer) => {
                    debug!(
                        attempt,
                        answered = answer.is_some(),
                        "Input solver responded"
                    );
                    return Ok(answer);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Input solver request failed, retrying");
                    thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LogKind;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves one canned response per connection, in order
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/solve", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                read_request(&mut stream);
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(reply.as_bytes()).unwrap();
            }
        });
        (url, hits)
    }

    fn read_request(stream: &mut std::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn resolver(url: String, max_retries: u32) -> HttpInputResolver {
        HttpInputResolver::new(&AiResolverConfig {
            endpoint: url,
            model: "fast".into(),
            timeout_secs: 5,
            max_retries,
        })
        .with_backoff(Duration::from_millis(10))
    }

    #[test]
    fn test_request_body_shape() {
        let logs = vec![LogEntry::new("Level 1\n", LogKind::Stdout)];
        let body = build_request_body(Some("Name? "), &logs, "fast");
        assert_eq!(body["mode"], "input_solver");
        assert_eq!(body["prompt"], "Name? ");
        assert_eq!(body["model"], "fast");
        assert_eq!(body["logs"][0]["content"], "Level 1\n");
        assert_eq!(body["logs"][0]["type"], "stdout");
    }

    #[test]
    fn test_interpret_response() {
        assert_eq!(interpret_response("  42\n").as_deref(), Some("42"));
        assert_eq!(interpret_response(" \n\t"), None);
    }

    #[test]
    fn test_resolves_plain_text_answer() {
        let (url, hits) = serve(vec![(200, "Ada\n")]);
        let answer = resolver(url, 0).resolve(Some("Name? "), &[]).unwrap();
        assert_eq!(answer.as_deref(), Some("Ada"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let (url, hits) = serve(vec![(500, "down"), (200, "7")]);
        let answer = resolver(url, 2).resolve(None, &[]).unwrap();
        assert_eq!(answer.as_deref(), Some("7"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let (url, hits) = serve(vec![(500, "a"), (502, "b")]);
        assert!(resolver(url, 1).resolve(None, &[]).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_answer_is_none() {
        let (url, _) = serve(vec![(200, "   ")]);
        assert_eq!(resolver(url, 0).resolve(None, &[]).unwrap(), None);
    }
}
