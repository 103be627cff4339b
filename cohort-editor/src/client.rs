use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::cohort_models::{Cohort, CohortId, CsvUpload};
use crate::config::Config;
use crate::format::CohortPayload;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cohort not found: {0}")]
    NotFound(String),
    #[error("cohort rejected by the API: {0}")]
    Validation(String),
    #[error("API error: status='{status}' detail='{detail}'")]
    Server { status: u16, detail: String },
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to build URL: {0}")]
    InvalidUrl(String),
    #[error("failed to encode cohort: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// The server's own explanation of the failure, when it sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::NotFound(detail)
            | ClientError::Validation(detail)
            | ClientError::Server { detail, .. } => {
                Some(detail.as_str()).filter(|detail| !detail.is_empty())
            }
            _ => None,
        }
    }
}

/// Error body returned by the PostHog API.
#[derive(Deserialize, Debug)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub attr: Option<String>,
}

#[async_trait]
pub trait CohortClient {
    async fn fetch_cohort(&self, id: CohortId) -> Result<Cohort, ClientError>;
    async fn create_cohort(&self, payload: &CohortPayload) -> Result<Cohort, ClientError>;
    async fn update_cohort(
        &self,
        id: CohortId,
        payload: &CohortPayload,
    ) -> Result<Cohort, ClientError>;
    async fn delete_cohort(&self, id: CohortId) -> Result<(), ClientError>;
}

/// Talks to `/api/projects/{project_id}/cohorts/` with a personal API key.
#[derive(Clone)]
pub struct HttpCohortClient {
    client: reqwest::Client,
    host: String,
    project_id: i64,
    api_key: String,
}

impl HttpCohortClient {
    pub fn new(
        host: &str,
        project_id: i64,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "User-Agent",
            HeaderValue::from_static("posthog-cohort-editor"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            host: host.to_owned(),
            project_id,
            api_key: api_key.to_owned(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Self::new(
            &config.api_host,
            config.project_id,
            &config.personal_api_key,
            config.request_timeout.0,
        )
    }

    pub fn cohorts_url(&self, id: Option<CohortId>) -> Result<Url, ClientError> {
        let host = &self.host;
        let project_id = self.project_id;
        let path = match id {
            Some(id) => format!("cohorts/{id}/"),
            None => "cohorts/".to_string(),
        };

        Url::parse(host)
            .map_err(|e| ClientError::InvalidUrl(format!("{e} {host}")))?
            .join(&format!("api/projects/{project_id}/"))
            .map_err(|e| ClientError::InvalidUrl(format!("{e} {host}/api/projects/{project_id}")))?
            .join(&path)
            .map_err(|e| {
                ClientError::InvalidUrl(format!("{e} {host}/api/projects/{project_id}/{path}"))
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("building request for {method} {url}");
        self.client.request(method, url).bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn save(
        &self,
        method: Method,
        id: Option<CohortId>,
        payload: &CohortPayload,
    ) -> Result<Cohort, ClientError> {
        let request = self.request(method, self.cohorts_url(id)?);
        let request = match (&payload.csv, payload.is_static) {
            (Some(csv), true) => request.multipart(multipart_form(payload, csv)?),
            _ => request.json(payload),
        };

        Ok(self.send(request).await?.json::<Cohort>().await?)
    }
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    // a non-JSON body is kept whole as the detail
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorResponse>(&body)
        .ok()
        .and_then(|error| error.detail)
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(detail),
        StatusCode::BAD_REQUEST => ClientError::Validation(detail),
        _ => ClientError::Server {
            status: status.as_u16(),
            detail,
        },
    }
}

fn multipart_form(payload: &CohortPayload, csv: &CsvUpload) -> Result<Form, ClientError> {
    let file = Part::bytes(csv.contents.clone())
        .file_name(csv.file_name.clone())
        .mime_str("text/csv")?;

    let mut form = Form::new()
        .text("name", payload.name.clone())
        .text("description", payload.description.clone())
        .text("is_static", payload.is_static.to_string())
        .text("groups", serde_json::to_string(&payload.groups)?);
    if let Some(filters) = &payload.filters {
        form = form.text("filters", serde_json::to_string(filters)?);
    }

    Ok(form.part("csv", file))
}

#[async_trait]
impl CohortClient for HttpCohortClient {
    async fn fetch_cohort(&self, id: CohortId) -> Result<Cohort, ClientError> {
        let request = self.request(Method::GET, self.cohorts_url(Some(id))?);
        Ok(self.send(request).await?.json::<Cohort>().await?)
    }

    async fn create_cohort(&self, payload: &CohortPayload) -> Result<Cohort, ClientError> {
        self.save(Method::POST, None, payload).await
    }

    async fn update_cohort(
        &self,
        id: CohortId,
        payload: &CohortPayload,
    ) -> Result<Cohort, ClientError> {
        self.save(Method::PATCH, Some(id), payload).await
    }

    async fn delete_cohort(&self, id: CohortId) -> Result<(), ClientError> {
        let request = self
            .request(Method::PATCH, self.cohorts_url(Some(id))?)
            .json(&serde_json::json!({ "deleted": true }));
        self.send(request).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCohortCall {
    Fetch(CohortId),
    Create(CohortPayload),
    Update(CohortId, CohortPayload),
    Delete(CohortId),
}

#[derive(Default)]
struct MockState {
    cohorts: HashMap<CohortId, Cohort>,
    fetch_ret: VecDeque<Result<Cohort, ClientError>>,
    save_ret: VecDeque<ClientError>,
    calculating_after_save: bool,
    next_id: CohortId,
    latency: Duration,
    calls: Vec<MockCohortCall>,
}

/// In-memory cohorts API. Saved cohorts are stored and served back on fetch,
/// unless fetch results have been scripted with `fetch_ret`.
#[derive(Clone, Default)]
pub struct MockCohortClient {
    state: Arc<Mutex<MockState>>,
}

impl MockCohortClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_cohort(self, cohort: Cohort) -> Self {
        if let Some(id) = cohort.id {
            self.lock_state().cohorts.insert(id, cohort);
        }
        self
    }

    /// Queues the result of the next fetch. Queued results are served in order
    /// before falling back to the stored cohorts.
    pub fn fetch_ret(self, ret: Result<Cohort, ClientError>) -> Self {
        self.lock_state().fetch_ret.push_back(ret);
        self
    }

    /// Makes the next create or update fail with `error`.
    pub fn save_err(self, error: ClientError) -> Self {
        self.lock_state().save_ret.push_back(error);
        self
    }

    /// Whether saved cohorts come back with `is_calculating` set.
    pub fn calculating_after_save(self, calculating: bool) -> Self {
        self.lock_state().calculating_after_save = calculating;
        self
    }

    /// Delays every response by `latency` after the call has been recorded.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock_state().latency = latency;
        self
    }

    pub fn get_calls(&self) -> Vec<MockCohortCall> {
        self.lock_state().calls.clone()
    }

    pub fn stored_cohort(&self, id: CohortId) -> Option<Cohort> {
        self.lock_state().cohorts.get(&id).cloned()
    }

    async fn record(&self, call: MockCohortCall) {
        let latency = {
            let mut state = self.lock_state();
            state.calls.push(call);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn store(&self, id: Option<CohortId>, payload: &CohortPayload) -> Result<Cohort, ClientError> {
        let mut state = self.lock_state();
        if let Some(error) = state.save_ret.pop_front() {
            return Err(error);
        }

        let id = match id {
            Some(id) => id,
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        let previous = state.cohorts.get(&id).cloned();
        let cohort = Cohort {
            id: Some(id),
            name: payload.name.clone(),
            description: payload.description.clone(),
            is_static: payload.is_static,
            csv: None,
            groups: payload.groups.clone(),
            filters: payload
                .filters
                .clone()
                .or_else(|| previous.map(|cohort| cohort.filters))
                .unwrap_or_default(),
            is_calculating: state.calculating_after_save,
            count: None,
            errors_calculating: 0,
            deleted: false,
        };
        state.cohorts.insert(id, cohort.clone());
        Ok(cohort)
    }
}

#[async_trait]
impl CohortClient for MockCohortClient {
    async fn fetch_cohort(&self, id: CohortId) -> Result<Cohort, ClientError> {
        self.record(MockCohortCall::Fetch(id)).await;
        let mut state = self.lock_state();
        if let Some(ret) = state.fetch_ret.pop_front() {
            return ret;
        }

        state
            .cohorts
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound("Not found.".to_string()))
    }

    async fn create_cohort(&self, payload: &CohortPayload) -> Result<Cohort, ClientError> {
        self.record(MockCohortCall::Create(payload.clone())).await;
        self.store(None, payload)
    }

    async fn update_cohort(
        &self,
        id: CohortId,
        payload: &CohortPayload,
    ) -> Result<Cohort, ClientError> {
        self.record(MockCohortCall::Update(id, payload.clone())).await;
        self.store(Some(id), payload)
    }

    async fn delete_cohort(&self, id: CohortId) -> Result<(), ClientError> {
        self.record(MockCohortCall::Delete(id)).await;
        let mut state = self.lock_state();
        match state.cohorts.get_mut(&id) {
            Some(cohort) => {
                cohort.deleted = true;
                Ok(())
            }
            None => Err(ClientError::NotFound("Not found.".to_string())),
        }
    }
}
