use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry resource segments: {0}")]
    InvalidBase(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
    Transport,
}

/// Which content-bearing field of a repository object a caller reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentField {
    Script,
    Definition,
}

impl ContentField {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentField::Script => "Script",
            ContentField::Definition => "Definition",
        }
    }
}

/// Query parameters for a single read. `uniformresponse` and `childlinks`
/// are always sent so the body shape does not depend on the result count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub fields: Vec<String>,
    pub search_spec: Option<String>,
    pub page_size: Option<u32>,
}

impl Query {
    pub fn fields(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_search_spec(mut self, spec: impl Into<String>) -> Self {
        self.search_spec = Some(spec.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl RestClient {
    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidBase(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Reads a resource collection or a single resource. A 404 means the
    /// remote has nothing under that path and yields an empty list.
    pub async fn read(&self, segments: &[&str], query: &Query) -> Result<Vec<Item>, RemoteError> {
        let mut url = self.endpoint(segments)?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.fields.is_empty() {
                pairs.append_pair("fields", &query.fields.join(","));
            }
            if let Some(spec) = query.search_spec.as_deref() {
                pairs.append_pair("searchspec", spec);
            }
            if let Some(page_size) = query.page_size {
                pairs.append_pair("PageSize", &page_size.to_string());
            }
            pairs
                .append_pair("uniformresponse", "y")
                .append_pair("childlinks", "None");
        }
        debug!(url = %url, "remote read");
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let payload: ItemsResponse = Self::handle_response(response).await?;
        Ok(payload.items)
    }

    /// Upserts one resource. The remote keeps no version token, so the last
    /// writer wins.
    pub async fn write(&self, segments: &[&str], item: &Item) -> Result<(), RemoteError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "remote write");
        let response = self
            .http
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(item)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidBase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        RemoteError::Api { status, body }
    }
}

impl RemoteError {
    pub fn kind(&self) -> ApiErrorClass {
        match self {
            RemoteError::Api { status, .. } => classify_api_status(*status),
            RemoteError::Request(_) => ApiErrorClass::Transport,
            RemoteError::Url(_) | RemoteError::InvalidBase(_) => ApiErrorClass::Permanent,
        }
    }

    /// Whether offering the user a retry makes sense. Nothing is retried
    /// automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ApiErrorClass::RateLimit | ApiErrorClass::Transient | ApiErrorClass::Transport
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Item {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Script", default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(rename = "Definition", default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(
        rename = "Program Language",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub program_language: Option<String>,
}

impl Item {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, field: ContentField, text: impl Into<String>) -> Self {
        match field {
            ContentField::Script => self.script = Some(text.into()),
            ContentField::Definition => self.definition = Some(text.into()),
        }
        self
    }

    pub fn with_program_language(mut self, language: impl Into<String>) -> Self {
        self.program_language = Some(language.into());
        self
    }

    /// Content of the given field, treating an empty string as absent.
    pub fn content(&self, field: ContentField) -> Option<&str> {
        let value = match field {
            ContentField::Script => self.script.as_deref(),
            ContentField::Definition => self.definition.as_deref(),
        };
        value.filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_encoded_segments_after_base_path() {
        let client = RestClient::with_base_url("https://host/siebel/v1.0/", "u", "p").unwrap();
        let url = client
            .endpoint(&["workspace", "dev_ws", "Business Service", "My Service"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://host/siebel/v1.0/workspace/dev_ws/Business%20Service/My%20Service"
        );
    }

    #[test]
    fn classifies_api_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::INTERNAL_SERVER_ERROR),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_REQUEST),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn empty_content_counts_as_absent() {
        let item = Item::named("A").with_content(ContentField::Script, "");
        assert_eq!(item.content(ContentField::Script), None);
        let item = Item::named("A").with_content(ContentField::Definition, "<html/>");
        assert_eq!(item.content(ContentField::Definition), Some("<html/>"));
    }

    #[test]
    fn item_serializes_only_present_fields() {
        let item = Item::named("Calc")
            .with_content(ContentField::Script, "function Calc() {}")
            .with_program_language("JS");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Name": "Calc",
                "Script": "function Calc() {}",
                "Program Language": "JS"
            })
        );
    }
}
