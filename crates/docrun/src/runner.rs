//! HTTP requests against a running example and their transcripts.

use std::path::Path;

use reqwest::redirect::Policy;
use reqwest::Method;
use tracing::{debug, error};

use crate::config::RequestConfig;
use crate::error::{DocrunError, DocrunResult};
use crate::request::RequestSpec;
use crate::types::{Directive, ExampleFile, Transcript};

/// Issues directive requests the way `curl -s` would and records the output.
#[derive(Clone)]
pub struct RequestRunner {
    client: reqwest::Client,
    /// Redirect-following client for `-L`.
    follow_client: reqwest::Client,
    config: RequestConfig,
}

impl RequestRunner {
    pub fn new(config: &RequestConfig) -> DocrunResult<Self> {
        let build = |policy: Policy| {
            reqwest::Client::builder()
                .timeout(config.timeout())
                .redirect(policy)
                .build()
                .map_err(|e| DocrunError::config(format!("cannot build HTTP client: {e}")))
        };

        Ok(Self {
            client: build(Policy::none())?,
            follow_client: build(Policy::limited(10))?,
            config: config.clone(),
        })
    }

    /// Run one directive against `base_url` (e.g. `http://127.0.0.1:9998`).
    ///
    /// Transport failures are errors. An empty response is a transcript with
    /// `success == false`; the caller decides what that means.
    pub async fn run_directive(
        &self,
        base_url: &str,
        file: &Path,
        directive: &Directive,
    ) -> DocrunResult<Transcript> {
        let spec = RequestSpec::parse(&directive.args).map_err(|message| DocrunError::Directive {
            file: file.to_path_buf(),
            line: directive.line,
            message,
        })?;
        let command = spec.display_command(&self.config.display_host, self.config.display_port);
        let method = Method::from_bytes(spec.method.as_bytes()).map_err(|_| DocrunError::Directive {
            file: file.to_path_buf(),
            line: directive.line,
            message: format!("invalid request method {:?}", spec.method),
        })?;

        let url = spec.url(base_url);
        debug!(%url, %method, line = directive.line, "issuing request");

        let client = if spec.follow_redirects {
            &self.follow_client
        } else {
            &self.client
        };
        let mut builder = client.request(method, &url);
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }

        let request_error = |source: reqwest::Error| DocrunError::Request {
            command: command.clone(),
            source,
        };
        let resp = builder.send().await.map_err(request_error)?;
        let status = resp.status();

        let mut output = String::new();
        if spec.include_headers {
            output.push_str(&format!("{:?} {}\n", resp.version(), status));
            for (name, value) in resp.headers() {
                output.push_str(&format!(
                    "{}: {}\n",
                    name,
                    String::from_utf8_lossy(value.as_bytes())
                ));
            }
            output.push('\n');
        }
        let body = resp.text().await.map_err(request_error)?;
        output.push_str(&body);

        let success = !output.trim().is_empty();
        debug!(
            line = directive.line,
            status = status.as_u16(),
            bytes = output.len(),
            "request complete"
        );

        Ok(Transcript {
            line: directive.line,
            command,
            output,
            status: Some(status.as_u16()),
            success,
        })
    }

    /// Run every directive of `example` in file order.
    ///
    /// In strict mode an empty response fails the run; otherwise it is
    /// logged and kept as an unsuccessful transcript.
    pub async fn run_all(
        &self,
        base_url: &str,
        example: &ExampleFile,
    ) -> DocrunResult<Vec<Transcript>> {
        let mut transcripts = Vec::with_capacity(example.directives.len());

        for directive in &example.directives {
            let transcript = self.run_directive(base_url, &example.path, directive).await?;
            if !transcript.success {
                if self.config.strict {
                    return Err(DocrunError::EmptyResponse {
                        file: example.path.clone(),
                        line: directive.line,
                        command: transcript.command,
                    });
                }
                error!(
                    file = %example.path.display(),
                    line = directive.line,
                    command = %transcript.command,
                    "example yielded no output"
                );
            }
            transcripts.push(transcript);
        }

        Ok(transcripts)
    }
}
