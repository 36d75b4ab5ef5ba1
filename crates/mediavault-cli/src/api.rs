// HTTP client for the MediaVault server API

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix every server route is mounted under.
const API_PREFIX: &str = "/api/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header names the server checks on provider webhooks.
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// An owner reference as the server expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: String,
    pub owner_type: String,
}

/// Parses `type:id` (e.g. `post:42`). The id may itself contain colons.
pub fn parse_owner(raw: &str) -> Result<Owner> {
    let (owner_type, owner_id) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid owner '{}'. Expected 'type:id'", raw))?;
    if owner_type.is_empty() || owner_id.is_empty() {
        return Err(anyhow!("Invalid owner '{}'. Type and id must be non-empty", raw));
    }
    Ok(Owner {
        owner_id: owner_id.to_string(),
        owner_type: owner_type.to_string(),
    })
}

/// Blocking client for one server.
pub struct ApiClient {
    agent: ureq::Agent,
    base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(server: &str, token: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base: server.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base, API_PREFIX, path)
    }

    pub fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut request = self.request("GET", path);
        for (key, value) in query {
            request = request.query(key, value);
        }
        finish(request.call())
    }

    pub fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let request = self.request("POST", path);
        match body {
            Some(body) => finish(request.send_json(body)),
            None => finish(request.call()),
        }
    }

    pub fn put(&self, path: &str, body: &Value) -> Result<Value> {
        finish(self.request("PUT", path).send_json(body))
    }

    pub fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        finish(self.request("PATCH", path).send_json(body))
    }

    pub fn delete(&self, path: &str) -> Result<Value> {
        finish(self.request("DELETE", path).call())
    }

    /// Delivers a signed provider webhook. No service token is sent.
    pub fn post_webhook(&self, timestamp: i64, signature: &str, body: &[u8]) -> Result<Value> {
        let request = self
            .agent
            .post(&self.url("/webhooks/provider"))
            .set("Content-Type", "application/json")
            .set(WEBHOOK_TIMESTAMP_HEADER, &timestamp.to_string())
            .set(WEBHOOK_SIGNATURE_HEADER, signature);
        finish(request.send_bytes(body))
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = self.agent.request(method, &self.url(path));
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

/// Turns a response into its JSON body, or a readable error.
fn finish(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<Value> {
    match result {
        Ok(response) if response.status() == 204 => Ok(Value::Null),
        Ok(response) => response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse server response: {}", e)),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(anyhow!(describe_error(code, &body)))
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(anyhow!("Could not reach server: {}", transport))
        }
    }
}

/// Formats a server error body (`{"error": kind, "message": ...}`).
pub fn describe_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let kind = json["error"].as_str().unwrap_or("error");
            let message = json["message"].as_str().unwrap_or("");
            let hint = if matches!(kind, "unavailable" | "canceled") {
                " (safe to retry)"
            } else {
                ""
            };
            format!("Server returned {} {}: {}{}", status, kind, message, hint)
        }
        Err(_) if body.is_empty() => format!("Server returned {}", status),
        Err(_) => format!("Server returned {}: {}", status, body),
    }
}
