use crate::traits::PostSource;
use crate::types::{FetchConfig, RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// HTTP client for the booru post listing endpoint
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn posts_endpoint(&self, limit: Option<usize>, tags: &[String]) -> Result<Url> {
        // Without a trailing slash `join` would replace the last path segment
        let mut base = Url::parse(&self.config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base.join("posts.json")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            query.append_pair("tags", &tags.join(" "));
        }
        Ok(url)
    }

    async fn fetch_posts(&self, url: Url) -> Result<Vec<Value>> {
        let start_time = Instant::now();
        info!("Sending request: {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let json: Value = response.json().await?;
        debug!("Got {} from {} in {:?}", status, url, start_time.elapsed());

        match json {
            Value::Array(posts) => Ok(posts),
            Value::Object(ref body) if body.get("success") == Some(&Value::Bool(false)) => {
                Err(RelayError::SourceRejected(json.to_string()))
            }
            other => Err(RelayError::SourceRejected(format!(
                "HTTP {}: unexpected response body {}",
                status, other
            ))),
        }
    }
}

#[async_trait]
impl PostSource for Fetcher {
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn most_recent(&self, tags: &[String], after: Option<u64>) -> Result<Option<Value>> {
        let mut query: Vec<String> = tags.to_vec();
        if let Some(last_id) = after {
            query.push("order:id".to_string());
            query.push(format!("id:>{}", last_id));
        }
        let url = self.posts_endpoint(Some(1), &query)?;
        let posts = self.fetch_posts(url).await?;
        Ok(posts.into_iter().next())
    }

    async fn posts_with_ids(&self, ids: &[u64]) -> Result<Vec<Value>> {
        let id_list = ids.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
        let url = self.posts_endpoint(None, &[format!("id:{}", id_list)])?;
        self.fetch_posts(url).await
    }
}
