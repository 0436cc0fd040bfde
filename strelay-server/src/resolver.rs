//! HTTP-backed stream resolver.
//!
//! The engine treats source resolution as an external collaborator; this is
//! the thin adapter that speaks to it. The wire format is the resolver
//! service's camelCase JSON, deserialized straight into the engine types.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use relay_engine::{RelayError, ResolvedServer, StreamResolver};

pub struct HttpResolver {
    client: Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: impl Into<String>) -> relay_engine::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StreamResolver for HttpResolver {
    async fn resolve(
        &self,
        episode_id: &str,
        server_type: Option<&str>,
    ) -> relay_engine::Result<Vec<ResolvedServer>> {
        let mut request = self
            .client
            .get(format!("{}/sources/{}", self.base_url, episode_id));
        if let Some(server_type) = server_type {
            request = request.query(&[("serverType", server_type)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::resolver(format!("resolver unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::resolver(format!(
                "resolver returned HTTP {status} for episode {episode_id}"
            )));
        }

        let servers: Vec<ResolvedServer> = response
            .json()
            .await
            .map_err(|e| RelayError::resolver(format!("malformed resolver response: {e}")))?;
        debug!(episode = episode_id, servers = servers.len(), "episode resolved");
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn resolves_servers_and_forwards_type_filter() {
        async fn sources(
            Path(episode): Path<String>,
            Query(params): Query<HashMap<String, String>>,
        ) -> String {
            assert_eq!(episode, "ep-1");
            assert_eq!(params.get("serverType").map(String::as_str), Some("sub"));
            r#"[{
                "serverName": "hd-1",
                "serverType": "sub",
                "sources": [{"url": "https://cdn.example.com/master.m3u8"}]
            }]"#
            .to_string()
        }
        let app = Router::new().route("/sources/{episode}", get(sources));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resolver = HttpResolver::new(format!("http://{addr}")).unwrap();
        let servers = resolver.resolve("ep-1", Some("sub")).await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].server_name, "hd-1");
        assert_eq!(
            servers[0].sources[0].url,
            "https://cdn.example.com/master.m3u8"
        );
    }

    #[tokio::test]
    async fn resolver_failures_are_resolver_errors() {
        // Nothing is listening here.
        let resolver = HttpResolver::new("http://127.0.0.1:1").unwrap();
        let err = resolver.resolve("ep-1", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Resolver { .. }));
    }
}
