use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::types::*;

/// The trial endpoints the mutation layer drives.
pub trait TrialApi {
    fn create_trial(&self, draft: &TrialDraft) -> impl Future<Output = ClientResult<TrialWrite>> + Send;

    fn update_trial(
        &self,
        id: Uuid,
        patch: &TrialPatch,
    ) -> impl Future<Output = ClientResult<TrialWrite>> + Send;

    fn delete_trial(&self, id: Uuid) -> impl Future<Output = ClientResult<DeletedTrial>> + Send;
}

/// Typed client for the tenant-scoped JSON API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: String,
    tenant: String,
}

impl ApiClient {
    pub fn new(base_url: &str, access_token: &str, tenant: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            tenant: tenant.to_string(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    fn scoped(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.access_token)
            .query(&[("tenant", self.tenant.as_str())])
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let resp = self.scoped(builder).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        unwrap_envelope(status.as_u16(), &text)
    }

    pub async fn list_trials(&self) -> ClientResult<Vec<Trial>> {
        self.send(self.client.get(self.url("/trials"))).await
    }

    pub async fn list_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ClientResult<Vec<CalendarEvent>> {
        let builder = self
            .client
            .get(self.url("/calendar/events"))
            .query(&[("start", start.to_rfc3339()), ("end", end.to_rfc3339())]);
        self.send(builder).await
    }
}

impl TrialApi for ApiClient {
    async fn create_trial(&self, draft: &TrialDraft) -> ClientResult<TrialWrite> {
        self.send(self.client.post(self.url("/trials")).json(draft))
            .await
    }

    async fn update_trial(&self, id: Uuid, patch: &TrialPatch) -> ClientResult<TrialWrite> {
        self.send(self.client.patch(self.url(&format!("/trials/{id}"))).json(patch))
            .await
    }

    async fn delete_trial(&self, id: Uuid) -> ClientResult<DeletedTrial> {
        self.send(self.client.delete(self.url(&format!("/trials/{id}"))))
            .await
    }
}

fn unwrap_envelope<T: DeserializeOwned>(status: u16, body: &str) -> ClientResult<T> {
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| {
        if (200..300).contains(&status) {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Http {
                status,
                message: body.chars().take(200).collect(),
            }
        }
    })?;

    if !envelope.success || !(200..300).contains(&status) {
        return Err(ClientError::Http {
            status,
            message: envelope.error.unwrap_or_else(|| "request failed".to_string()),
        });
    }
    envelope
        .data
        .ok_or_else(|| ClientError::Decode("success envelope without data".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_yields_data() {
        let deleted: DeletedTrial = unwrap_envelope(
            200,
            r#"{"success":true,"data":{"id":"00000000-0000-0000-0000-000000000001","deletedEvents":1}}"#,
        )
        .unwrap();
        assert_eq!(deleted.deleted_events, 1);
    }

    #[test]
    fn failure_envelope_keeps_status_and_message() {
        let err = unwrap_envelope::<DeletedTrial>(404, r#"{"success":false,"error":"Trial not found"}"#)
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "http 404: Trial not found");
    }

    #[test]
    fn non_json_error_body_is_http_error() {
        let err = unwrap_envelope::<DeletedTrial>(502, "Bad Gateway").unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn client_scopes_requests_to_tenant() {
        let api = ApiClient::new("https://app.test/", "tok", "fc-test");
        assert_eq!(api.url("/trials"), "https://app.test/api/trials");
        assert_eq!(api.tenant(), "fc-test");
    }
}
