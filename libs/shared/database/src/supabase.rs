use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl SupabaseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SupabaseError::Api { status, .. } => Some(*status),
            SupabaseError::Transport(e) => e.status(),
            SupabaseError::InvalidHeader(_) => None,
        }
    }
}

/// Thin PostgREST client. One instance is created at startup and shared.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_base_url(&config.supabase_url, &config.supabase_service_role_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn get_headers(&self, extra: &[(&'static str, &str)]) -> Result<HeaderMap, SupabaseError> {
        let mut headers = HeaderMap::new();

        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;

        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in extra {
            let value = HeaderValue::from_str(value)
                .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;
            headers.insert(HeaderName::from_static(name), value);
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, &[]).await
    }

    /// Same as [`request`](Self::request) with additional headers, e.g.
    /// `("prefer", "return=representation")` for writes that echo rows back.
    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: &[(&'static str, &str)],
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let headers = self.get_headers(extra_headers)?;

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                error!("API error ({}): {}", status, error_text);
            } else {
                debug!("API rejected request ({}): {}", status, error_text);
            }
            return Err(SupabaseError::Api {
                status,
                body: error_text,
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}
