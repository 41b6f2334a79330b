//! A JSON-RPC [`UpstreamClient`] adapter (spec §1: "the upstream RPC
//! client" is a host-supplied collaborator). Shaped on the workspace's own
//! dotted model-name convention (`crm.lead`, `res.partner`) — an
//! Odoo-style `/web/dataset/call_kw` endpoint, the same request/response
//! contract `HttpEmbedder` uses for its own provider: one authenticated
//! session, JSON bodies, `reqwest`.

use async_trait::async_trait;
use cascade_upstream::{Batch, Domain, Record, UpstreamClient, UpstreamError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

/// One authenticated session against an Odoo-shaped JSON-RPC endpoint.
pub struct HttpUpstreamClient {
    client: Client,
    url: String,
    db: String,
    uid: i64,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

impl HttpUpstreamClient {
    /// Authenticates once against `{url}/web/session/authenticate` and
    /// caches the resulting `uid` for every subsequent call.
    pub async fn connect(url: &str, db: &str, user: &str, password: &str) -> Result<Self, UpstreamError> {
        let client = Client::new();
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {"db": db, "login": user, "password": password},
        });
        let response = client
            .post(format!("{}/web/session/authenticate", url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let envelope: RpcEnvelope<AuthResult> =
            response.json().await.map_err(|e| UpstreamError::Transport(format!("malformed auth response: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(UpstreamError::Transport(error.message));
        }
        let uid = envelope.result.and_then(|r| r.uid).ok_or_else(|| UpstreamError::Transport("authentication rejected".to_string()))?;

        Ok(Self { client, url: url.trim_end_matches('/').to_string(), db: db.to_string(), uid, password: password.to_string() })
    }

    async fn call_kw(&self, model: &str, method: &str, args: JsonValue, kwargs: JsonValue) -> Result<JsonValue, UpstreamError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": "object",
                "method": "execute_kw",
                "args": [self.db, self.uid, self.password, model, method, args, kwargs],
            },
        });
        let response = self
            .client
            .post(format!("{}/web/dataset/call_kw", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let envelope: RpcEnvelope<JsonValue> =
            response.json().await.map_err(|e| UpstreamError::Transport(format!("malformed response body: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(UpstreamError::Transport(error.message));
        }
        envelope.result.ok_or_else(|| UpstreamError::Transport("empty RPC result".to_string()))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn count(&self, model: &str, domain: &Domain) -> Result<u64, UpstreamError> {
        let result = self.call_kw(model, "search_count", json!([domain_to_odoo(domain)]), json!({})).await?;
        result.as_u64().ok_or_else(|| UpstreamError::Transport("search_count did not return an integer".to_string()))
    }

    async fn search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Batch, UpstreamError> {
        let kwargs = json!({"fields": fields, "offset": offset, "limit": limit, "order": "id asc"});
        let result = self.call_kw(model, "search_read", json!([domain_to_odoo(domain)]), kwargs).await?;
        let records: Vec<Record> = result
            .as_array()
            .ok_or_else(|| UpstreamError::Transport("search_read did not return a list".to_string()))?
            .iter()
            .filter_map(|row| row.as_object().map(|obj| obj.clone().into_iter().collect()))
            .collect();
        let total = self.count(model, domain).await?;
        Ok(Batch { records, total })
    }
}

#[derive(Debug, Deserialize)]
struct AuthResult {
    uid: Option<i64>,
}

/// Translates the engine's [`Domain`] into an Odoo-style domain (a list of
/// `[field, operator, value]` triples, implicitly ANDed).
fn domain_to_odoo(domain: &Domain) -> Vec<JsonValue> {
    let mut clauses = Vec::new();
    if domain.watermark_applies() {
        if let Some(watermark) = domain.watermark {
            clauses.push(json!(["write_date", ">", watermark.to_rfc3339()]));
        }
    }
    if let Some(ids) = &domain.record_ids {
        clauses.push(json!(["id", "in", ids]));
    }
    if !domain.include_archived {
        clauses.push(json!(["active", "=", true]));
    }
    if let Some(window) = &domain.create_date_window {
        if let Some(from) = &window.from {
            clauses.push(json!(["create_date", ">=", from]));
        }
        if let Some(to) = &window.to {
            clauses.push(json!(["create_date", "<=", format!("{to} 23:59:59")]));
        }
    }
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_upstream::DateWindow;

    #[test]
    fn id_list_domain_translates_to_an_in_clause() {
        let domain = Domain::for_ids(vec![1, 2, 3]);
        let clauses = domain_to_odoo(&domain);
        assert!(clauses.iter().any(|c| c[0] == "id" && c[1] == "in"));
    }

    #[test]
    fn default_domain_excludes_archived_records() {
        let clauses = domain_to_odoo(&Domain::default());
        assert!(clauses.iter().any(|c| c[0] == "active" && c[2] == true));
    }

    #[test]
    fn date_window_adds_bounded_create_date_clauses() {
        let domain = Domain {
            create_date_window: Some(DateWindow { from: Some("2026-01-01".to_string()), to: Some("2026-01-31".to_string()) }),
            ..Domain::default()
        };
        let clauses = domain_to_odoo(&domain);
        assert!(clauses.iter().any(|c| c[0] == "create_date" && c[1] == ">="));
        assert!(clauses.iter().any(|c| c[2] == "2026-01-31 23:59:59"));
    }
}
