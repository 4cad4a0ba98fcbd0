use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::error::{classify_response, DatabaseError};

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, DatabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|_| DatabaseError::Configuration("anon key is not a valid header value".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Service calls without a user token authenticate with the anon key.
        let bearer = auth_token.unwrap_or(&self.anon_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|_| DatabaseError::Auth("token is not a valid header value".to_string()))?,
        );

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         extra_headers: Option<HeaderMap>)
                                         -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(classify_response(status.as_u16(), &error_text));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Write rows and return their stored representation.
    pub async fn insert_returning<T>(&self, table: &str, body: Value,
                                     auth_token: Option<&str>) -> Result<Vec<T>, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(
            Method::POST,
            &format!("/rest/v1/{}", table),
            auth_token,
            Some(body),
            Some(Self::return_representation()),
        ).await
    }

    /// Conditional update: only rows matching `filter` change, and the changed rows are returned.
    pub async fn patch_returning<T>(&self, table: &str, filter: &str, body: Value,
                                    auth_token: Option<&str>) -> Result<Vec<T>, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(
            Method::PATCH,
            &format!("/rest/v1/{}?{}", table, filter),
            auth_token,
            Some(body),
            Some(Self::return_representation()),
        ).await
    }

    /// Call a Postgres function; each call runs in its own transaction.
    pub async fn rpc<T>(&self, function: &str, args: Value,
                        auth_token: Option<&str>) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request(
            Method::POST,
            &format!("/rest/v1/rpc/{}", function),
            auth_token,
            Some(args),
        ).await
    }

    fn return_representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SupabaseClient {
        let mut config = AppConfig::local("secret");
        config.supabase_url = server.uri();
        config.supabase_anon_key = "test-anon-key".to_string();
        SupabaseClient::new(&config)
    }

    #[tokio::test]
    async fn test_insert_returning_sends_prefer_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/slots"))
            .and(header("Prefer", "return=representation"))
            .and(header("apikey", "test-anon-key"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": 1}])))
            .mount(&server)
            .await;

        let rows: Vec<Value> = client_for(&server)
            .insert_returning("slots", json!({"id": 1}), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_response_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/book_slot"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let result: Result<Value, _> = client_for(&server).rpc("book_slot", json!({}), Some("token")).await;
        assert_matches!(result, Err(DatabaseError::UniqueViolation(_)));
    }
}
