//! PostgREST-style records backend.

use async_trait::async_trait;
use reqwest::Client;

use voxline_config::RecordsSettings;
use voxline_core::{AgentConfig, CallError, CallRecord, Result};

use crate::{RecordsBackend, StoredSegment};

/// REST client for the management database.
///
/// Tables: `ai_agents`, `phone_numbers`, `calls`, `call_segments`.
pub struct SupabaseRecords {
    settings: RecordsSettings,
    client: Client,
}

impl SupabaseRecords {
    pub fn new(settings: RecordsSettings) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.settings.endpoint)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.settings.api_key)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
    }

    /// Fetches an agent configuration by id.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        let request = self
            .client
            .get(self.table_url("ai_agents"))
            .query(&[("id", format!("eq.{agent_id}")), ("select", "*".to_string())]);

        let rows: Vec<AgentConfig> = self
            .authorized(request)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        Ok(rows.into_iter().next())
    }

    /// Resolves the agent routed to a phone number, if any.
    pub async fn get_agent_for_number(&self, number: &str) -> Result<Option<String>> {
        #[derive(serde::Deserialize)]
        struct PhoneNumberRow {
            ai_agent_id: Option<String>,
        }

        let request = self.client.get(self.table_url("phone_numbers")).query(&[
            ("number", format!("eq.{number}")),
            ("select", "ai_agent_id".to_string()),
        ]);

        let rows: Vec<PhoneNumberRow> = self
            .authorized(request)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        Ok(rows.into_iter().next().and_then(|row| row.ai_agent_id))
    }
}

fn request_error(e: reqwest::Error) -> CallError {
    CallError::Internal {
        message: format!("records backend error: {e}"),
    }
}

#[async_trait]
impl RecordsBackend for SupabaseRecords {
    async fn write_call(&self, record: &CallRecord) -> Result<()> {
        let request = self
            .client
            .post(self.table_url("calls"))
            // Upsert keyed on the call id; replays are idempotent.
            .header("Prefer", "resolution=merge-duplicates")
            .json(record);

        self.authorized(request)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    async fn write_segment(&self, segment: &StoredSegment) -> Result<()> {
        let request = self
            .client
            .post(self.table_url("call_segments"))
            .json(segment);

        self.authorized(request)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }
}
