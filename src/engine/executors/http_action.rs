use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect;
use serde_json::{json, Value};

use crate::engine::templating::templ_str;
use crate::error::ExecutorError;
use crate::models::Node;

use super::{build_template_context, ExecCtx};

fn is_ip_blocked(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            let a = octets[0];
            let b = octets[1];
            if a == 127 || a == 10 {
                return true;
            }
            if a == 172 && (16..=31).contains(&b) {
                return true;
            }
            if a == 192 && b == 168 {
                return true;
            }
            if a == 169 && b == 254 {
                return true;
            }
            if *v4 == Ipv4Addr::new(169, 254, 169, 254) {
                return true;
            }
            false
        }
        IpAddr::V6(v6) => {
            if *v6 == Ipv6Addr::LOCALHOST {
                return true;
            }
            let seg0 = v6.segments()[0];
            (seg0 & 0xfe00) == 0xfc00 || (seg0 & 0xffc0) == 0xfe80
        }
    }
}

/// Fixed-delay/exponential-backoff schedules (spec.md §4.2, S8). Returns the
/// sleep duration before attempt `n` (1-indexed, `n > 1`), or `None` once the
/// policy is exhausted.
fn retry_delay(policy: &str, attempt: usize) -> Option<Duration> {
    match policy {
        "simple" if attempt <= 4 => Some(Duration::from_secs(1)),
        "exponential" if attempt <= 6 => {
            let n = (attempt - 2) as u32;
            Some(Duration::from_millis((500.0 * 2f64.powi(n as i32)) as u64))
        }
        _ => None,
    }
}

fn max_attempts(policy: &str) -> usize {
    match policy {
        "simple" => 4,
        "exponential" => 6,
        _ => 1,
    }
}

/// Outbound HTTP call with SSRF hardening, configurable auth, retry policy,
/// and response-type handling (spec.md §4.2 "http_action / api_consumer").
pub async fn execute(node: &Node, input: Value, ctx: &ExecCtx<'_>) -> Result<Value, ExecutorError> {
    let params = node.data.get("params").cloned().unwrap_or(Value::Null);
    let template_ctx = build_template_context(&input, ctx.run_outputs);

    let url_raw = params
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::Validation("http_action requires a `url`".into()))?;
    let url = templ_str(url_raw, &template_ctx);
    let method = params.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
    let response_type = params
        .get("response_type")
        .and_then(|v| v.as_str())
        .unwrap_or("json");
    let retry_policy = params
        .get("retry_policy")
        .and_then(|v| v.as_str())
        .unwrap_or("none");
    let follow = params
        .get("follow_redirects")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let parsed = reqwest::Url::parse(&url).map_err(|e| ExecutorError::Validation(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ExecutorError::Validation(
            "only http/https schemes are allowed".into(),
        ));
    }
    if let Some(ip) = parsed.host_str().and_then(|h| h.parse::<IpAddr>().ok()) {
        if is_ip_blocked(&ip) {
            return Err(ExecutorError::Validation(format!(
                "outbound request to {ip} blocked (private/link-local address)"
            )));
        }
    }

    let redirect_policy = if follow {
        redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= 10 {
                return attempt.stop();
            }
            if let Some(ip) = attempt.url().host_str().and_then(|h| h.parse::<IpAddr>().ok()) {
                if is_ip_blocked(&ip) {
                    return attempt.stop();
                }
            }
            attempt.follow()
        })
    } else {
        redirect::Policy::none()
    };

    let timeout_ms = node.data.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(30_000);
    let client = reqwest::Client::builder()
        .redirect(redirect_policy)
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| ExecutorError::Validation(e.to_string()))?;

    let mut headers = HeaderMap::new();
    if let Some(hs) = params.get("headers").and_then(|v| v.as_array()) {
        for h in hs {
            if let (Some(k), Some(v)) = (
                h.get("key").and_then(|v| v.as_str()),
                h.get("value").and_then(|v| v.as_str()),
            ) {
                let rendered = templ_str(v, &template_ctx);
                if let (Ok(name), Ok(val)) = (HeaderName::try_from(k), HeaderValue::from_str(&rendered)) {
                    headers.append(name, val);
                }
            }
        }
    }

    let mut url_with_query = url.clone();
    let mut first_qp = !url.contains('?');
    if let Some(qs) = params.get("query_params").and_then(|v| v.as_array()) {
        for qp in qs {
            if let (Some(k), Some(v)) = (
                qp.get("key").and_then(|v| v.as_str()),
                qp.get("value").and_then(|v| v.as_str()),
            ) {
                let rendered = templ_str(v, &template_ctx);
                url_with_query.push(if first_qp { '?' } else { '&' });
                first_qp = false;
                url_with_query.push_str(&format!(
                    "{}={}",
                    urlencoding::encode(k),
                    urlencoding::encode(&rendered)
                ));
            }
        }
    }

    let auth_type = params.get("auth_type").and_then(|v| v.as_str()).unwrap_or("none");
    let bearer_token = match auth_type {
        "oauth2" => Some(fetch_oauth2_token(&client, &params).await?),
        "bearer" => params.get("token").and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    };
    if auth_type == "api_key" {
        let key_name = params.get("api_key_name").and_then(|v| v.as_str()).unwrap_or("");
        let key_value = params.get("api_key_value").and_then(|v| v.as_str()).unwrap_or("");
        let location = params.get("api_key_location").and_then(|v| v.as_str()).unwrap_or("header");
        if location == "query" {
            url_with_query.push(if first_qp { '?' } else { '&' });
            first_qp = false;
            url_with_query.push_str(&format!(
                "{}={}",
                urlencoding::encode(key_name),
                urlencoding::encode(key_value)
            ));
        } else if let (Ok(name), Ok(val)) = (HeaderName::try_from(key_name), HeaderValue::from_str(key_value)) {
            headers.append(name, val);
        }
    }

    let body_type = params.get("body_type").and_then(|v| v.as_str()).unwrap_or("raw");
    let body_raw = params.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let rendered_body = templ_str(body_raw, &template_ctx);

    let max_attempts = max_attempts(retry_policy);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let mut builder = match method {
            "GET" => client.get(&url_with_query),
            "POST" => client.post(&url_with_query),
            "PUT" => client.put(&url_with_query),
            "PATCH" => client.patch(&url_with_query),
            "DELETE" => client.delete(&url_with_query),
            "HEAD" => client.head(&url_with_query),
            _ => client.get(&url_with_query),
        }
        .headers(headers.clone());

        builder = match auth_type {
            "basic" => {
                let user = params.get("username").and_then(|v| v.as_str()).unwrap_or("");
                let pass = params.get("password").and_then(|v| v.as_str()).unwrap_or("");
                builder.basic_auth(user, Some(pass))
            }
            "bearer" | "oauth2" => match &bearer_token {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            },
            _ => builder,
        };

        if !matches!(method, "GET" | "DELETE" | "HEAD") {
            builder = match body_type {
                "json" if !rendered_body.is_empty() => match serde_json::from_str::<Value>(&rendered_body) {
                    Ok(v) => builder.json(&v),
                    Err(_) => builder.body(rendered_body.clone()),
                },
                "form" => {
                    let mut form = vec![];
                    if let Some(fb) = params.get("form_body").and_then(|v| v.as_array()) {
                        for kv in fb {
                            if let (Some(k), Some(v)) = (
                                kv.get("key").and_then(|v| v.as_str()),
                                kv.get("value").and_then(|v| v.as_str()),
                            ) {
                                form.push((k.to_string(), templ_str(v, &template_ctx)));
                            }
                        }
                    }
                    builder.form(&form)
                }
                _ => builder.body(rendered_body.clone()),
            };
        }

        match builder.send().await {
            Ok(resp) => return build_response(resp, response_type, attempt).await,
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(ExecutorError::Transport(err.to_string()));
                }
                if let Some(delay) = retry_delay(retry_policy, attempt + 1) {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn build_response(
    resp: reqwest::Response,
    response_type: &str,
    attempts: usize,
) -> Result<Value, ExecutorError> {
    let status_code = resp.status().as_u16();
    let mut header_map = serde_json::Map::new();
    for (k, v) in resp.headers().iter() {
        if let Ok(s) = v.to_str() {
            header_map.insert(k.as_str().to_string(), Value::String(s.to_string()));
        }
    }
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_value = match response_type {
        "binary" => {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let preview_len = bytes.len().min(200);
            json!({
                "base64": encoded,
                "content_type": content_type,
                "content_length": bytes.len(),
                "preview": String::from_utf8_lossy(&bytes[..preview_len]).to_string(),
            })
        }
        "text" => {
            let text = resp.text().await.unwrap_or_default();
            Value::String(text)
        }
        _ => {
            let text = resp.text().await.unwrap_or_default();
            serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
        }
    };

    Ok(json!({
        "status_code": status_code,
        "full_response": body_value,
        "response_summary": {
            "status_code": status_code,
            "content_type": content_type,
            "headers": header_map,
        },
        "details": {"attempts": attempts},
    }))
}

async fn fetch_oauth2_token(client: &reqwest::Client, params: &Value) -> Result<String, ExecutorError> {
    let token_url = params
        .get("token_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecutorError::Validation("oauth2 auth requires `token_url`".into()))?;
    let client_id = params.get("client_id").and_then(|v| v.as_str()).unwrap_or("");
    let client_secret = params.get("client_secret").and_then(|v| v.as_str()).unwrap_or("");

    let resp = client
        .post(token_url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|e| ExecutorError::Transport(e.to_string()))?;

    if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 {
        return Err(ExecutorError::Authentication(
            "oauth2 token endpoint rejected client credentials".into(),
        ));
    }
    let body: Value = resp
        .json()
        .await
        .map_err(|e| ExecutorError::Transport(format!("malformed token response: {e}")))?;
    body.get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ExecutorError::Authentication("token response missing access_token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ips_are_blocked() {
        assert!(is_ip_blocked(&"127.0.0.1".parse().unwrap()));
        assert!(is_ip_blocked(&"10.0.0.5".parse().unwrap()));
        assert!(is_ip_blocked(&"169.254.169.254".parse().unwrap()));
        assert!(!is_ip_blocked(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn exponential_schedule_matches_s8() {
        assert_eq!(max_attempts("exponential"), 6);
        assert_eq!(retry_delay("exponential", 2), Some(Duration::from_millis(500)));
        assert_eq!(retry_delay("exponential", 3), Some(Duration::from_millis(1000)));
        assert_eq!(retry_delay("exponential", 6), Some(Duration::from_millis(8000)));
        assert_eq!(retry_delay("exponential", 7), None);
    }

    #[test]
    fn none_policy_allows_a_single_attempt() {
        assert_eq!(max_attempts("none"), 1);
        assert_eq!(retry_delay("none", 2), None);
    }
}
