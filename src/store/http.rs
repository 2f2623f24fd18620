//! # HTTP Collaborators
//!
//! reqwest-backed stores speaking JSON to the report API, plus a client
//! for an ArcGIS-style geography feature service.
//!
//! ## REST Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | templates | `GET /templates?active=true`, `GET /templates/{id}` |
//! | analyze | `POST /templates/analyze` (multipart `file`) |
//! | reports | `POST /reports`, `GET /reports/{id}`, `PATCH /reports/{id}` |
//! | render | `GET /reports/{id}/generate?format=pdf` |
//! | appendix | `GET/POST /reports/{id}/appendix`, `PUT .../appendix/order`, `DELETE .../appendix/{item}` |
//! | user templates | `GET /user-templates/by-template/{id}`, `POST /user-templates`, `PATCH /user-templates/{id}` |
//! | uploads | `POST /uploads/images` (multipart `file`) |
//! | extraction | `POST /extract` (multipart `file`) |
//!
//! Requests carry the session's bearer token when it has one. A 404 maps
//! to [`StoreError::NotFound`]; other failures keep their status and body.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    DocumentExtractor, ReportStore, StoreError, Stores, TemplateStore, UploadStore,
    UserTemplateStore,
};
use crate::FolioError;
use crate::config::EngineConfig;
use crate::geo::{GeographyService, PlanQuery, QuarterQuery, RegionOption, SheetQuery};
use crate::report::{AppendixItem, ExportFormat, NewReport, Report, ReportPatch};
use crate::session::SessionContext;
use crate::template::Template;
use crate::user_template::{UserTemplate, UserTemplatePatch};

fn build_client(config: &EngineConfig) -> Result<Client, FolioError> {
    Client::builder()
        .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| StoreError::Transport(format!("HTTP client error: {}", e)).into())
}

fn transport(e: reqwest::Error) -> StoreError {
    if e.is_decode() {
        StoreError::Decode(e.to_string())
    } else {
        StoreError::Transport(e.to_string())
    }
}

/// Turn a non-success response into a [`StoreError`].
async fn check(response: Response, what: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(what.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        message: excerpt(&body),
    })
}

const ERROR_EXCERPT_CHARS: usize = 200;

/// Leading characters of an error body. Cuts on a char boundary.
fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_EXCERPT_CHARS).collect()
}

fn file_part(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<Part, StoreError> {
    Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(content_type)
        .map_err(|e| StoreError::Transport(format!("bad content type {}: {}", content_type, e)))
}

/// Multipart form with a single `file` part typed from its extension.
fn file_form(file_name: &str, bytes: Vec<u8>) -> Result<Form, StoreError> {
    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    Ok(Form::new().part("file", file_part(file_name, mime.essence_str(), bytes)?))
}

// ============================================================================
// REST BACKEND
// ============================================================================

/// One client for all REST stores.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &EngineConfig, session: &SessionContext) -> Result<Self, FolioError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: session.auth_token.clone(),
        })
    }

    /// Every collaborator backed by HTTP, with `geography` for lookups.
    pub fn stores(self, geography: HttpGeographyService) -> Stores {
        let backend = Arc::new(self);
        Stores {
            templates: backend.clone(),
            reports: backend.clone(),
            user_templates: backend.clone(),
            uploads: backend.clone(),
            extractor: backend,
            geography: Arc::new(geography),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "collaborator request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(transport)?;
        check(response, what).await
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T, StoreError> {
        self.send(builder, what).await?.json().await.map_err(transport)
    }

    async fn empty(&self, builder: RequestBuilder, what: &str) -> Result<(), StoreError> {
        self.send(builder, what).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    variables: Vec<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    values: BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserTemplate<'a> {
    template_id: &'a str,
}

#[derive(Serialize)]
struct AppendixOrder<'a> {
    order: &'a [String],
}

#[async_trait]
impl TemplateStore for HttpBackend {
    async fn fetch_all(&self, active_only: bool) -> Result<Vec<Template>, StoreError> {
        let builder = self
            .request(Method::GET, "/templates")
            .query(&[("active", active_only)]);
        self.json(builder, "templates").await
    }

    async fn fetch(&self, id: &str) -> Result<Template, StoreError> {
        let builder = self.request(Method::GET, &format!("/templates/{}", id));
        self.json(builder, &format!("template {}", id)).await
    }

    async fn analyze_document(&self, file_name: &str, bytes: Vec<u8>) -> Result<Vec<String>, StoreError> {
        let form = file_form(file_name, bytes)?;
        let builder = self.request(Method::POST, "/templates/analyze").multipart(form);
        let response: AnalyzeResponse = self.json(builder, "template analysis").await?;
        Ok(response.variables)
    }
}

#[async_trait]
impl ReportStore for HttpBackend {
    async fn create(&self, new: &NewReport) -> Result<Report, StoreError> {
        let builder = self.request(Method::POST, "/reports").json(new);
        self.json(builder, "reports").await
    }

    async fn fetch(&self, id: &str) -> Result<Report, StoreError> {
        let builder = self.request(Method::GET, &format!("/reports/{}", id));
        self.json(builder, &format!("report {}", id)).await
    }

    async fn update(&self, id: &str, patch: &ReportPatch) -> Result<(), StoreError> {
        let builder = self.request(Method::PATCH, &format!("/reports/{}", id)).json(patch);
        self.empty(builder, &format!("report {}", id)).await
    }

    async fn generate(&self, id: &str, format: ExportFormat) -> Result<Vec<u8>, StoreError> {
        let builder = self
            .request(Method::GET, &format!("/reports/{}/generate", id))
            .query(&[("format", format.as_str())]);
        let response = self.send(builder, &format!("report {}", id)).await?;
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    async fn list_appendix(&self, id: &str) -> Result<Vec<AppendixItem>, StoreError> {
        let builder = self.request(Method::GET, &format!("/reports/{}/appendix", id));
        self.json(builder, &format!("report {}", id)).await
    }

    async fn upload_appendix(
        &self,
        id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<AppendixItem, StoreError> {
        let form = file_form(file_name, bytes)?;
        let builder = self
            .request(Method::POST, &format!("/reports/{}/appendix", id))
            .multipart(form);
        self.json(builder, &format!("report {}", id)).await
    }

    async fn reorder_appendix(&self, id: &str, order: &[String]) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PUT, &format!("/reports/{}/appendix/order", id))
            .json(&AppendixOrder { order });
        self.empty(builder, &format!("report {}", id)).await
    }

    async fn delete_appendix(&self, id: &str, item_id: &str) -> Result<(), StoreError> {
        let builder = self.request(Method::DELETE, &format!("/reports/{}/appendix/{}", id, item_id));
        self.empty(builder, &format!("appendix item {}", item_id)).await
    }
}

#[async_trait]
impl UserTemplateStore for HttpBackend {
    async fn fetch_by_template(&self, template_id: &str) -> Result<UserTemplate, StoreError> {
        let builder = self.request(
            Method::GET,
            &format!("/user-templates/by-template/{}", template_id),
        );
        self.json(builder, &format!("user template for {}", template_id)).await
    }

    async fn create(&self, template_id: &str) -> Result<UserTemplate, StoreError> {
        let builder = self
            .request(Method::POST, "/user-templates")
            .json(&CreateUserTemplate { template_id });
        self.json(builder, "user templates").await
    }

    async fn patch(&self, id: &str, patch: &UserTemplatePatch) -> Result<(), StoreError> {
        let builder = self
            .request(Method::PATCH, &format!("/user-templates/{}", id))
            .json(patch);
        self.empty(builder, &format!("user template {}", id)).await
    }
}

#[async_trait]
impl UploadStore for HttpBackend {
    async fn upload_image(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError> {
        let part = file_part(file_name, content_type, bytes)?;
        let builder = self
            .request(Method::POST, "/uploads/images")
            .multipart(Form::new().part("file", part));
        let response: UploadResponse = self.json(builder, "uploads").await?;
        Ok(response.url)
    }
}

#[async_trait]
impl DocumentExtractor for HttpBackend {
    async fn extract_values(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let form = file_form(file_name, bytes)?;
        let builder = self.request(Method::POST, "/extract").multipart(form);
        let response: ExtractResponse = self.json(builder, "extraction").await?;
        Ok(response.values)
    }
}

// ============================================================================
// GEOGRAPHY FEATURE SERVICE
// ============================================================================

/// Layer ids and attribute names of the feature service.
pub mod fields {
    pub const REGION_LAYER: u32 = 0;
    pub const QUARTER_LAYER: u32 = 1;
    pub const SHEET_LAYER: u32 = 2;
    pub const PLAN_LAYER: u32 = 3;

    pub const PROVINCE: &str = "PROV_CODE";
    pub const DISTRICT: &str = "DIST_CODE";
    pub const VILLAGE: &str = "VIL_CODE";
    pub const VILLAGE_NAME: &str = "VIL_NAME";
    pub const QUARTER: &str = "QRTR_CODE";
    pub const SHEET: &str = "SHEET_NO";
    pub const PLAN: &str = "PLAN_NO";
}

#[derive(Debug, Deserialize)]
struct FeatureSet {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Attribute as a string; services return codes as numbers or strings.
fn attribute(attributes: &Map<String, Value>, key: &str) -> Option<String> {
    match attributes.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `FIELD = 'value'` clauses joined with AND; quotes in values are doubled.
fn where_clause(conditions: &[(&str, &str)]) -> String {
    conditions
        .iter()
        .map(|(field, value)| format!("{} = '{}'", field, value.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub struct HttpGeographyService {
    client: Client,
    base_url: String,
}

impl HttpGeographyService {
    pub fn new(config: &EngineConfig) -> Result<Self, FolioError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.geo_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn query(&self, layer: u32, conditions: &[(&str, &str)]) -> Result<Vec<Map<String, Value>>, StoreError> {
        let url = format!("{}/{}/query", self.base_url, layer);
        let filter = where_clause(conditions);
        debug!(%url, %filter, "feature query");
        let response = self
            .client
            .get(&url)
            .query(&[("where", filter.as_str()), ("outFields", "*"), ("f", "json")])
            .send()
            .await
            .map_err(transport)?;
        let set: FeatureSet = check(response, &format!("layer {}", layer))
            .await?
            .json()
            .await
            .map_err(transport)?;
        if let Some(error) = set.error {
            return Err(StoreError::Status {
                status: error.code,
                message: error.message,
            });
        }
        Ok(set.features.into_iter().map(|f| f.attributes).collect())
    }

    async fn column(&self, layer: u32, field: &str, conditions: &[(&str, &str)]) -> Result<Vec<String>, StoreError> {
        Ok(self
            .query(layer, conditions)
            .await?
            .iter()
            .filter_map(|attributes| attribute(attributes, field))
            .collect())
    }
}

#[async_trait]
impl GeographyService for HttpGeographyService {
    async fn regions(&self, province: &str) -> Result<Vec<RegionOption>, StoreError> {
        let features = self
            .query(fields::REGION_LAYER, &[(fields::PROVINCE, province)])
            .await?;
        Ok(features
            .iter()
            .filter_map(|attributes| {
                Some(RegionOption {
                    village_code: attribute(attributes, fields::VILLAGE)?,
                    district_code: attribute(attributes, fields::DISTRICT)?,
                    name: attribute(attributes, fields::VILLAGE_NAME).unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn quarter(&self, query: &QuarterQuery) -> Result<Option<String>, StoreError> {
        let codes = self
            .column(
                fields::QUARTER_LAYER,
                fields::QUARTER,
                &[
                    (fields::DISTRICT, query.district_code.as_str()),
                    (fields::VILLAGE, query.village_code.as_str()),
                ],
            )
            .await?;
        Ok(codes.into_iter().next())
    }

    async fn sheets(&self, query: &SheetQuery) -> Result<Vec<String>, StoreError> {
        self.column(
            fields::SHEET_LAYER,
            fields::SHEET,
            &[
                (fields::DISTRICT, query.district_code.as_str()),
                (fields::VILLAGE, query.village_code.as_str()),
                (fields::QUARTER, query.quarter_code.as_str()),
            ],
        )
        .await
    }

    async fn plans(&self, query: &PlanQuery) -> Result<Vec<String>, StoreError> {
        self.column(
            fields::PLAN_LAYER,
            fields::PLAN,
            &[
                (fields::DISTRICT, query.district_code.as_str()),
                (fields::VILLAGE, query.village_code.as_str()),
                (fields::QUARTER, query.quarter_code.as_str()),
                (fields::SHEET, query.sheet.as_str()),
            ],
        )
        .await
    }
}
