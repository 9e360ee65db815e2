//! One POST to an inference backend, normalized into `{text, stats}`.
//!
//! Backends answer in several shapes: a direct answer field, OpenAI-style
//! `choices[0]`, or an SSE stream of `data: {...}` frames terminated by
//! `data: [DONE]`. All of them land here. The transport also owns
//! out-of-memory recovery: a hard 5xx or an embedded error payload carrying
//! an OOM signature triggers exactly one transparent re-issue with the
//! low-memory header before any error becomes visible to callers.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::Value;

use lumen_core::api::{DevicePerformanceMetrics, MemoryMode, ProviderError, ProviderStats};

/// Memory-mode header attached to every local-backend request.
pub const VRAM_MODE_HEADER: &str = "X-VRAM-Mode";

/// Auth header used by the cloud API (local servers take a bearer token).
pub const CLOUD_AUTH_HEADER: &str = "X-Moondream-Auth";

/// The signatures a backend embeds when the GPU ran out of memory. The
/// classification happens here, once; everything above the transport
/// branches only on the structured `oom` flag.
const OOM_SIGNATURES: [&str; 3] = ["CUDA out of memory", "out of memory", "OutOfMemoryError"];

pub fn is_oom_message(message: &str) -> bool {
    OOM_SIGNATURES.iter().any(|sig| message.contains(sig))
}

/// Strip a trailing `/` and `/v1` from a configured endpoint, and force
/// IPv4 loopback so the client matches the backend listener.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    trimmed.replace("localhost", "127.0.0.1")
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub text: String,
    pub stats: Option<ProviderStats>,
}

#[derive(Debug, Clone)]
pub struct ApiRequest<'a> {
    pub url: &'a str,
    pub api_key: Option<&'a str>,
    /// Cloud endpoints take the key in `X-Moondream-Auth`; local servers use
    /// a bearer token.
    pub cloud_auth: bool,
    pub body: &'a Value,
    pub timeout: Duration,
    pub memory_mode: MemoryMode,
}

/// Issue one backend call, with at most one OOM retry in low memory mode.
///
/// The retry is a bounded loop, not recursion: the second pass either
/// succeeds or its error surfaces unchanged.
pub async fn call_model_api(
    client: &reqwest::Client,
    request: ApiRequest<'_>,
) -> Result<ApiResponse, ProviderError> {
    let mut mode = request.memory_mode;
    let mut oom_retried = false;
    loop {
        match send_once(client, &request, mode).await {
            Err(e) if e.is_oom() && !oom_retried && mode != MemoryMode::Low => {
                tracing::warn!(
                    url = request.url,
                    "backend reported out-of-memory, retrying once in low memory mode"
                );
                oom_retried = true;
                mode = MemoryMode::Low;
            }
            other => return other,
        }
    }
}

async fn send_once(
    client: &reqwest::Client,
    request: &ApiRequest<'_>,
    mode: MemoryMode,
) -> Result<ApiResponse, ProviderError> {
    let started = Instant::now();

    let mut builder = client
        .post(request.url)
        .timeout(request.timeout)
        .header(VRAM_MODE_HEADER, mode.as_header_value())
        .json(request.body);
    if let Some(key) = request.api_key.filter(|k| !k.is_empty()) {
        builder = if request.cloud_auth {
            builder.header(CLOUD_AUTH_HEADER, key)
        } else {
            builder.bearer_auth(key)
        };
    }

    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Transport(format!(
                "request timed out after {}s",
                request.timeout.as_secs()
            ))
        } else {
            ProviderError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    let metrics = metrics_from_headers(response.headers());

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), url = request.url, "backend error: {body}");
        if status.is_server_error() && is_oom_message(&body) {
            return Err(ProviderError::oom(format!(
                "backend error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        return Err(ProviderError::backend(format!(
            "backend error ({}): {}",
            status.as_u16(),
            body.trim_end()
        )));
    }

    let streaming = request
        .body
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if streaming {
        return read_sse_stream(response, metrics, started).await;
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Validation(format!("invalid JSON response: {e}")))?;
    parse_single_response(&data, metrics, started.elapsed())
}

fn parse_single_response(
    data: &Value,
    metrics: DevicePerformanceMetrics,
    elapsed: Duration,
) -> Result<ApiResponse, ProviderError> {
    // Structured error payloads come back with 200s from some backends.
    if let Some(error) = data.get("error") {
        let status = data.get("status").and_then(Value::as_str).unwrap_or("");
        let message = match error.as_str() {
            Some(s) => s.to_string(),
            None => error.to_string(),
        };
        if status == "timeout" || message == "Request timeout" {
            return Err(ProviderError::backend(
                "backend timeout: the operation took too long",
            ));
        }
        if is_oom_message(&message) {
            return Err(ProviderError::oom(message));
        }
        return Err(ProviderError::backend(message));
    }
    if data.get("status").and_then(Value::as_str) == Some("rejected") {
        return Err(ProviderError::backend("backend rejected the request"));
    }

    // Structured endpoint payloads (generations, classify, batch-caption)
    // have no answer field; pass the raw JSON through for the caller to
    // interpret.
    let answer = match extract_answer(data) {
        Some(answer) => answer,
        None => {
            tracing::debug!(
                "no standard answer key in response, returning raw payload: {}",
                truncate_for_log(&data.to_string())
            );
            data.to_string()
        }
    };

    // Some backends wrap their error payload inside the answer string.
    if let Ok(Value::Object(embedded)) = serde_json::from_str::<Value>(&answer) {
        if let Some(error) = embedded.get("error") {
            let message = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            if is_oom_message(&message) {
                return Err(ProviderError::oom(message));
            }
            return Err(ProviderError::backend(format!(
                "model returned an error: {message}"
            )));
        }
    }

    let stats = build_stats(data, metrics, elapsed);
    Ok(ApiResponse {
        text: answer,
        stats: Some(stats),
    })
}

fn extract_answer(data: &Value) -> Option<String> {
    for key in ["answer", "caption", "text", "response", "generated_text"] {
        if let Some(answer) = data.get(key).and_then(Value::as_str) {
            return Some(answer.to_string());
        }
    }
    let first_choice = data.get("choices").and_then(|c| c.get(0))?;
    if let Some(text) = first_choice.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    first_choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn read_sse_stream(
    response: reqwest::Response,
    metrics: DevicePerformanceMetrics,
    started: Instant,
) -> Result<ApiResponse, ProviderError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut full_text = String::new();
    let mut stream_stats: Option<Value> = None;

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| ProviderError::Transport(format!("stream error: {e}")))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);
            if line.is_empty() || line == "data: [DONE]" {
                continue;
            }
            let Some(json_str) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<Value>(json_str) {
                Ok(frame) => {
                    if let Some(text) = frame.get("chunk").and_then(Value::as_str) {
                        full_text.push_str(text);
                    }
                    if let Some(stats) = frame.get("stats") {
                        stream_stats = Some(stats.clone());
                    }
                }
                Err(e) => tracing::warn!(line = %line, error = %e, "failed to parse SSE line"),
            }
        }
    }

    let carrier = match stream_stats {
        Some(stats) => serde_json::json!({ "stats": stats }),
        None => Value::Null,
    };
    let stats = build_stats(&carrier, metrics, started.elapsed());
    Ok(ApiResponse {
        text: full_text,
        stats: Some(stats),
    })
}

fn metrics_from_headers(headers: &reqwest::header::HeaderMap) -> DevicePerformanceMetrics {
    let header_f64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let mut metrics = DevicePerformanceMetrics {
        vram_used_mb: header_f64("X-VRAM-Used"),
        vram_total_mb: header_f64("X-VRAM-Total"),
        inference_time_ms: header_f64("X-Inference-Time"),
        model_load_time_ms: header_f64("X-Model-Load-Time"),
        ..Default::default()
    };
    if metrics.vram_total_mb > 0.0 {
        metrics.vram_usage_percent = Some(metrics.vram_used_mb / metrics.vram_total_mb * 100.0);
    }
    metrics
}

fn build_stats(
    data: &Value,
    mut metrics: DevicePerformanceMetrics,
    elapsed: Duration,
) -> ProviderStats {
    let duration_secs = elapsed.as_secs_f64();

    if let Some(tokens) = data
        .pointer("/usage/completion_tokens")
        .and_then(Value::as_u64)
    {
        let tokens_per_sec = if duration_secs > 0.0 {
            Some(tokens as f64 / duration_secs)
        } else {
            None
        };
        metrics.tokens_per_second = tokens_per_sec;
        return ProviderStats {
            tokens_per_sec,
            device: data
                .get("device")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            total_tokens: Some(tokens),
            duration_secs,
            device_performance: Some(metrics),
        };
    }

    if let Some(stats) = data.get("stats") {
        let tokens_per_sec = stats.get("tokens_per_sec").and_then(Value::as_f64);
        metrics.tokens_per_second = tokens_per_sec;
        return ProviderStats {
            tokens_per_sec,
            device: stats
                .get("device")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            total_tokens: stats.get("tokens").and_then(Value::as_u64),
            duration_secs: stats
                .get("duration")
                .and_then(Value::as_f64)
                .unwrap_or(duration_secs),
            device_performance: Some(metrics),
        };
    }

    ProviderStats {
        tokens_per_sec: None,
        device: "Unknown".to_string(),
        total_tokens: None,
        duration_secs,
        device_performance: Some(metrics),
    }
}

fn truncate_for_log(s: &str) -> String {
    const MAX: usize = 200;
    if s.len() <= MAX {
        s.to_string()
    } else {
        let mut end = MAX;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
