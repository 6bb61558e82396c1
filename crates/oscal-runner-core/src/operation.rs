use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Which backend handles an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    /// The installed command-line tool, run as a child process
    Local,
    /// The HTTP service
    Remote,
}

impl ExecutorKind {
    /// The executor a fallback would switch to
    pub fn other(self) -> Self {
        match self {
            ExecutorKind::Local => ExecutorKind::Remote,
            ExecutorKind::Remote => ExecutorKind::Local,
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Local => f.write_str("local"),
            ExecutorKind::Remote => f.write_str("remote"),
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "cli" | "oscal-cli" => Ok(ExecutorKind::Local),
            "remote" | "server" | "oscal-server" => Ok(ExecutorKind::Remote),
            other => Err(format!("unknown executor '{other}', expected local or remote")),
        }
    }
}

/// Document serialization formats understood by both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Json,
    Xml,
    Yaml,
}

impl OutputFormat {
    /// Media type sent in the `Accept` header
    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Xml => "text/xml",
            OutputFormat::Yaml => "text/yaml",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Xml => "xml",
            OutputFormat::Yaml => "yaml",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "application/json" => Ok(OutputFormat::Json),
            "xml" | "text/xml" | "application/xml" => Ok(OutputFormat::Xml),
            "yaml" | "yml" | "text/yaml" | "application/yaml" => Ok(OutputFormat::Yaml),
            other => Err(format!("unrecognized output format '{other}'")),
        }
    }
}

/// Where the input document lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    Path(PathBuf),
    Url(Url),
}

impl DocumentRef {
    /// Interpret user input: `http(s)://` stays a URL, `file://` and bare paths become paths
    pub fn parse(input: &str) -> Self {
        match Url::parse(input) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => DocumentRef::Url(url),
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => DocumentRef::Path(path),
                Err(()) => DocumentRef::Path(PathBuf::from(input)),
            },
            _ => DocumentRef::Path(PathBuf::from(input)),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DocumentRef::Path(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            DocumentRef::Path(path) => Some(path),
            DocumentRef::Url(_) => None,
        }
    }

    /// Argument handed to the command-line tool
    pub fn cli_arg(&self) -> String {
        match self {
            DocumentRef::Path(path) => path.display().to_string(),
            DocumentRef::Url(url) => url.to_string(),
        }
    }

    /// Value of the `document` query parameter: a `file://` URI for paths
    pub fn reference_uri(&self) -> Result<String, String> {
        match self {
            DocumentRef::Path(path) => {
                let absolute = std::path::absolute(path)
                    .map_err(|e| format!("cannot resolve {}: {e}", path.display()))?;
                Url::from_file_path(&absolute)
                    .map(|url| url.to_string())
                    .map_err(|()| format!("cannot express {} as a file URI", absolute.display()))
            }
            DocumentRef::Url(url) => Ok(url.to_string()),
        }
    }
}

impl From<&str> for DocumentRef {
    fn from(value: &str) -> Self {
        DocumentRef::parse(value)
    }
}

impl From<PathBuf> for DocumentRef {
    fn from(value: PathBuf) -> Self {
        DocumentRef::Path(value)
    }
}

/// A logical request for one of the backends
///
/// `name` may span several tokens (`"metaschema metapath eval"`); `args` is
/// what the command-line tool receives after the name, while `params` carries
/// the equivalent query parameters for the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    args: Vec<String>,
    document: DocumentRef,
    output_format: Option<String>,
    params: Vec<(String, String)>,
}

impl Operation {
    pub fn new(name: impl Into<String>, document: impl Into<DocumentRef>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            document: document.into(),
            output_format: None,
            params: Vec::new(),
        }
    }

    /// `oscal-cli validate <document>`
    pub fn validate(document: impl Into<DocumentRef>) -> Self {
        let document = document.into();
        Self::new("validate", document.clone()).with_arg(document.cli_arg())
    }

    /// `oscal-cli convert --to=<format> <document>`
    pub fn convert(document: impl Into<DocumentRef>, format: impl Into<String>) -> Self {
        let document = document.into();
        let format = format.into();
        Self::new("convert", document.clone())
            .with_arg(format!("--to={format}"))
            .with_arg(document.cli_arg())
            .with_output_format(format)
    }

    /// `oscal-cli resolve-profile --to=<format> <document>`
    pub fn resolve(document: impl Into<DocumentRef>, format: impl Into<String>) -> Self {
        let document = document.into();
        let format = format.into();
        Self::new("resolve-profile", document.clone())
            .with_arg(format!("--to={format}"))
            .with_arg(document.cli_arg())
            .with_output_format(format)
    }

    /// `oscal-cli metaschema metapath eval -e <expression> -i <document>`
    pub fn query(document: impl Into<DocumentRef>, expression: impl Into<String>) -> Self {
        let document = document.into();
        let expression = expression.into();
        Self::new("metaschema metapath eval", document.clone())
            .with_arg("-e")
            .with_arg(expression.clone())
            .with_arg("-i")
            .with_arg(document.cli_arg())
            .with_param("expression", expression)
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<S: Into<String>, I: IntoIterator<Item = S>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a metaschema constraint file for validation
    pub fn with_constraint(self, constraint: impl Into<String>) -> Self {
        let constraint = constraint.into();
        self.with_arg("-c")
            .with_arg(constraint.clone())
            .with_param("constraint[]", constraint)
    }

    /// Add a server-side flag; locally it becomes `--<flag>`
    pub fn with_flag(self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        self.with_arg(format!("--{flag}")).with_param("flags[]", flag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    pub fn output_format(&self) -> Option<&str> {
        self.output_format.as_deref()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Full argument vector for the command-line tool: name tokens then args
    pub fn argv(&self) -> Vec<String> {
        self.name
            .split_whitespace()
            .map(String::from)
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Failure classes of a single executor attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The tool could not be started (missing binary, permission denied)
    Spawn,
    /// The tool ran and reported failure
    NonZeroExit,
    /// The service could not be reached
    Network,
    /// The service answered with an error or an unusable response
    Http,
}

impl FailureKind {
    /// Failures that a retry on the local executor can recover
    pub fn is_fallback_eligible(self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::Http)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Spawn => "spawnError",
            FailureKind::NonZeroExit => "nonZeroExit",
            FailureKind::Network => "networkError",
            FailureKind::Http => "httpError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub stderr: Option<String>,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stderr: None,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Captured stderr when present, otherwise the failure message
    pub fn diagnostic(&self) -> &str {
        match self.stderr.as_deref() {
            Some(stderr) if !stderr.trim().is_empty() => stderr,
            _ => &self.message,
        }
    }
}

/// Result of one executor attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success { stdout: String, stderr: String },
    Failure(ExecutionFailure),
}

impl ExecutionOutcome {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        ExecutionOutcome::Success {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure(ExecutionFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionOutcome::Success { .. } => None,
            ExecutionOutcome::Failure(failure) => Some(failure.kind),
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success { stderr, .. } => Some(stderr),
            ExecutionOutcome::Failure(failure) => failure.stderr.as_deref(),
        }
    }

    /// Stdout on success, the failure otherwise
    pub fn into_result(self) -> Result<String, ExecutionFailure> {
        match self {
            ExecutionOutcome::Success { stdout, .. } => Ok(stdout),
            ExecutionOutcome::Failure(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_splits_multi_token_names() {
        let operation = Operation::query("ssp.json", "count(//component)");
        assert_eq!(
            operation.argv(),
            vec![
                "metaschema",
                "metapath",
                "eval",
                "-e",
                "count(//component)",
                "-i",
                "ssp.json"
            ]
        );
        assert_eq!(
            operation.params(),
            &[("expression".to_string(), "count(//component)".to_string())]
        );
    }

    #[test]
    fn test_convert_records_format_for_both_backends() {
        let operation = Operation::convert("catalog.xml", "yaml");
        assert_eq!(operation.argv(), vec!["convert", "--to=yaml", "catalog.xml"]);
        assert_eq!(operation.output_format(), Some("yaml"));
        assert!(operation.document().is_local());
    }

    #[test]
    fn test_validate_with_constraint_and_flag() {
        let operation = Operation::validate("profile.json")
            .with_constraint("extra-constraints.xml")
            .with_flag("disable-schema");
        assert_eq!(
            operation.argv(),
            vec![
                "validate",
                "profile.json",
                "-c",
                "extra-constraints.xml",
                "--disable-schema"
            ]
        );
        assert_eq!(operation.params().len(), 2);
        assert_eq!(operation.params()[0].0, "constraint[]");
        assert_eq!(operation.params()[1].0, "flags[]");
    }

    #[test]
    fn test_document_ref_parse() {
        assert!(matches!(
            DocumentRef::parse("https://example.com/catalog.json"),
            DocumentRef::Url(_)
        ));
        assert_eq!(
            DocumentRef::parse("docs/catalog.json"),
            DocumentRef::Path(PathBuf::from("docs/catalog.json"))
        );
        #[cfg(unix)]
        assert_eq!(
            DocumentRef::parse("file:///tmp/catalog.json"),
            DocumentRef::Path(PathBuf::from("/tmp/catalog.json"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_reference_uri_for_paths() {
        let document = DocumentRef::Path(PathBuf::from("/tmp/ssp.json"));
        assert_eq!(document.reference_uri().unwrap(), "file:///tmp/ssp.json");

        let relative = DocumentRef::Path(PathBuf::from("ssp.json"));
        let uri = relative.reference_uri().unwrap();
        assert!(uri.starts_with("file:///"));
        assert!(uri.ends_with("/ssp.json"));
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("yaml".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert_eq!("YML".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert_eq!("xml".parse::<OutputFormat>().map(OutputFormat::mime), Ok("text/xml"));
        assert!("toml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_executor_kind() {
        assert_eq!("server".parse::<ExecutorKind>(), Ok(ExecutorKind::Remote));
        assert_eq!("local".parse::<ExecutorKind>(), Ok(ExecutorKind::Local));
        assert_eq!(ExecutorKind::Remote.other(), ExecutorKind::Local);
        assert_eq!(ExecutorKind::Local.to_string(), "local");
        assert!("cloud".parse::<ExecutorKind>().is_err());
    }

    #[test]
    fn test_outcome_helpers() {
        let outcome = ExecutionOutcome::success("{}", "note: using defaults");
        assert!(outcome.is_success());
        assert_eq!(outcome.stderr(), Some("note: using defaults"));
        assert_eq!(outcome.into_result().unwrap(), "{}");

        let outcome = ExecutionOutcome::Failure(
            ExecutionFailure::new(FailureKind::NonZeroExit, "oscal-cli exited with code 2")
                .with_stderr("boom"),
        );
        assert_eq!(outcome.failure_kind(), Some(FailureKind::NonZeroExit));
        assert_eq!(outcome.stderr(), Some("boom"));
        assert_eq!(FailureKind::Network.to_string(), "networkError");
        assert!(FailureKind::Http.is_fallback_eligible());
        assert!(!FailureKind::Spawn.is_fallback_eligible());
    }
}
