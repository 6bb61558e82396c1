use super::Executor;
use super::observer::{RequestObserver, TracingObserver};
use async_trait::async_trait;
use oscal_runner_core::{
    DocumentRef, ExecutionFailure, ExecutionOutcome, ExecutorKind, FailureKind, Operation,
    OutputFormat, RunnerConfig, RunnerError,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Server endpoint an operation maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRoute {
    Validate,
    Convert,
    Resolve,
    Query,
}

impl ServerRoute {
    /// Route for an operation name; the last token decides (`metaschema metapath eval` → query)
    pub fn for_operation(name: &str) -> Option<Self> {
        match name.split_whitespace().last()? {
            "validate" => Some(ServerRoute::Validate),
            "convert" => Some(ServerRoute::Convert),
            "resolve" | "resolve-profile" => Some(ServerRoute::Resolve),
            "eval" | "query" => Some(ServerRoute::Query),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            ServerRoute::Validate => "validate",
            ServerRoute::Convert => "convert",
            ServerRoute::Resolve => "resolve",
            ServerRoute::Query => "query",
        }
    }
}

/// `Accept` value for a requested output format, JSON when absent or unrecognized
pub fn accept_header(format: Option<&str>) -> &'static str {
    match format {
        None => OutputFormat::Json.mime(),
        Some(requested) => match requested.parse::<OutputFormat>() {
            Ok(format) => format.mime(),
            Err(e) => {
                warn!(format = %requested, error = %e, "Falling back to JSON output");
                OutputFormat::Json.mime()
            }
        },
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Runs operations against the HTTP service
pub struct ServerExecutor {
    client: reqwest::Client,
    base_url: Url,
    upload_local_documents: bool,
    observer: Arc<dyn RequestObserver>,
}

impl ServerExecutor {
    pub fn new(config: &RunnerConfig) -> Result<Self, RunnerError> {
        let base_url = Url::parse(&config.server_base_url())
            .map_err(|e| RunnerError::Configuration(format!("invalid server URL: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect_timeout())
            .timeout(config.timeouts.request_timeout())
            .build()
            .map_err(|e| RunnerError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            upload_local_documents: config.upload_local_documents,
            observer: Arc::new(TracingObserver),
        })
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn build_request(
        &self,
        route: ServerRoute,
        operation: &Operation,
    ) -> Result<(Method, Url, RequestBuilder), ExecutionFailure> {
        let mut url = self
            .base_url
            .join(route.path())
            .map_err(|e| ExecutionFailure::new(FailureKind::Http, format!("bad route: {e}")))?;

        let upload = match operation.document() {
            DocumentRef::Path(path) if self.upload_local_documents => Some(path.as_path()),
            _ => None,
        };

        {
            let mut query = url.query_pairs_mut();
            if upload.is_none() {
                let reference = operation
                    .document()
                    .reference_uri()
                    .map_err(|e| ExecutionFailure::new(FailureKind::Http, e))?;
                query.append_pair("document", &reference);
            }
            if let Some(format) = operation.output_format() {
                query.append_pair("format", format);
            }
            for (key, value) in operation.params() {
                query.append_pair(key, value);
            }
        }

        let accept = accept_header(operation.output_format());

        let (method, request) = match upload {
            Some(path) => {
                let body = tokio::fs::read(path).await.map_err(|e| {
                    ExecutionFailure::new(
                        FailureKind::Http,
                        format!("cannot upload {}: {e}", path.display()),
                    )
                })?;
                let request = self
                    .client
                    .post(url.clone())
                    .header(CONTENT_TYPE, content_type(path))
                    .body(body);
                (Method::POST, request)
            }
            None => (Method::GET, self.client.get(url.clone())),
        };

        Ok((method, url, request.header(ACCEPT, accept)))
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("xml") => OutputFormat::Xml.mime(),
        Some("yaml") | Some("yml") => OutputFormat::Yaml.mime(),
        Some("json") => OutputFormat::Json.mime(),
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Executor for ServerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Remote
    }

    async fn execute(&self, operation: &Operation) -> ExecutionOutcome {
        let Some(route) = ServerRoute::for_operation(operation.name()) else {
            return ExecutionOutcome::failure(
                FailureKind::Http,
                format!("the server has no route for '{}'", operation.name()),
            );
        };

        let (method, url, request) = match self.build_request(route, operation).await {
            Ok(parts) => parts,
            Err(failure) => return ExecutionOutcome::Failure(failure),
        };

        self.observer.before_send(&method, &url);
        let started = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.observer
                    .after_receive(&method, &url, None, started.elapsed());
                return ExecutionOutcome::failure(
                    FailureKind::Network,
                    format!("could not reach oscal-server at {}: {e}", self.base_url),
                );
            }
        };

        let status = response.status();
        let body = response.text().await;
        self.observer
            .after_receive(&method, &url, Some(status), started.elapsed());

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                return ExecutionOutcome::failure(
                    FailureKind::Http,
                    format!("unreadable response from oscal-server: {e}"),
                );
            }
        };

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("oscal-server responded with {status}"));
            debug!(status = %status, message = %message, "Server reported failure");
            return ExecutionOutcome::failure(FailureKind::Http, message);
        }

        if body.trim().is_empty() {
            return ExecutionOutcome::failure(
                FailureKind::Http,
                "oscal-server returned an empty response",
            );
        }

        ExecutionOutcome::success(body, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(ServerRoute::for_operation("validate"), Some(ServerRoute::Validate));
        assert_eq!(
            ServerRoute::for_operation("resolve-profile"),
            Some(ServerRoute::Resolve)
        );
        assert_eq!(
            ServerRoute::for_operation("metaschema metapath eval"),
            Some(ServerRoute::Query)
        );
        assert_eq!(ServerRoute::for_operation("list-allowed-values"), None);
        assert_eq!(ServerRoute::for_operation(""), None);
    }

    #[test]
    fn test_accept_header() {
        assert_eq!(accept_header(Some("yaml")), "text/yaml");
        assert_eq!(accept_header(Some("XML")), "text/xml");
        assert_eq!(accept_header(None), "application/json");
        assert_eq!(accept_header(Some("toml")), "application/json");
    }

    #[test]
    fn test_upload_content_type() {
        assert_eq!(content_type(Path::new("ssp.yml")), "text/yaml");
        assert_eq!(content_type(Path::new("catalog.xml")), "text/xml");
        assert_eq!(content_type(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_unknown_route_is_http_failure() {
        let executor = ServerExecutor::new(&RunnerConfig::default()).unwrap();
        let outcome = executor
            .execute(&Operation::new("list-allowed-values", "ssp.json"))
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Http));
    }
}
