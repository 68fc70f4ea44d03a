use std::sync::Arc;
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, Method, Request, Response, Url};
use sealpkg_protocol::{PackageError, PackageResult, PermissionError};

use crate::Sandbox;

const MAX_REDIRECTS: usize = 10;

/// Outbound HTTP for package code. The URL is checked before any
/// connection is attempted, and again for every redirect hop.
#[derive(Debug, Clone)]
pub struct SandboxedHttp {
    sandbox: Arc<Sandbox>,
    client: Client,
}

/// A denied redirect surfaces as the permission error it carries.
fn network_error(error: reqwest::Error) -> PackageError {
    let mut source = std::error::Error::source(&error);
    while let Some(inner) = source {
        if let Some(denied) = inner.downcast_ref::<PermissionError>() {
            return PackageError::Permission(denied.clone());
        }
        source = inner.source();
    }
    PackageError::Network(error.to_string())
}

fn redirect_policy(sandbox: Arc<Sandbox>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match sandbox.check_network(attempt.url().as_str()) {
            Ok(()) => attempt.follow(),
            Err(denied) => attempt.error(denied),
        }
    })
}

impl SandboxedHttp {
    pub fn new(sandbox: Arc<Sandbox>, timeout: Duration) -> PackageResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy(Arc::clone(&sandbox)))
            .build()
            .map_err(network_error)?;
        Ok(Self { sandbox, client })
    }

    /// Build a request for [`execute`](Self::execute).
    pub fn request(&self, method: Method, url: &str) -> PackageResult<Request> {
        let url = Url::parse(url)
            .map_err(|error| PackageError::Network(format!("{url}: {error}")))?;
        Ok(Request::new(method, url))
    }

    pub async fn get(&self, url: &str) -> PackageResult<Response> {
        self.sandbox.check_network(url)?;
        self.client.get(url).send().await.map_err(network_error)
    }

    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> PackageResult<Response> {
        self.sandbox.check_network(url)?;
        self.client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(network_error)
    }

    /// Arbitrary request; the target is checked from the request URL.
    pub async fn execute(&self, request: Request) -> PackageResult<Response> {
        self.sandbox.check_network(request.url().as_str())?;
        self.client.execute(request).await.map_err(network_error)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use httpmock::prelude::*;
    use sealpkg_protocol::{PackageId, PermissionDeclaration, PermissionKind};

    use super::*;
    use reqwest::Method;

    fn http_for(permissions: PermissionDeclaration) -> SandboxedHttp {
        let sandbox = Sandbox::new(
            PackageId::from("demo/pkg"),
            permissions,
            "/tmp/unused-install",
            "/tmp/unused-data",
        );
        SandboxedHttp::new(Arc::new(sandbox), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn allowed_host_reaches_server() -> Result<()> {
        let server = MockServer::start();
        let ping = server.mock(|when, then| {
            when.method(GET).path("/ping");
            then.status(200).body("pong");
        });
        let echo = server.mock(|when, then| {
            when.method(POST).path("/echo").body("hi");
            then.status(201);
        });

        let http = http_for(PermissionDeclaration {
            network: true,
            network_hosts: vec!["127.0.0.1".to_owned(), "localhost".to_owned()],
            ..PermissionDeclaration::default()
        });

        let response = http.get(&server.url("/ping")).await?;
        assert_eq!(response.text().await?, "pong");

        let response = http.post(&server.url("/echo"), "text/plain", "hi").await?;
        assert_eq!(response.status().as_u16(), 201);

        let request = http.request(Method::GET, &server.url("/ping"))?;
        assert!(http.execute(request).await?.status().is_success());

        ping.assert_calls(2);
        echo.assert_calls(1);
        Ok(())
    }

    #[tokio::test]
    async fn denied_request_never_leaves_the_process() -> Result<()> {
        let server = MockServer::start();
        let ping = server.mock(|when, then| {
            when.method(GET).path("/ping");
            then.status(200);
        });

        let http = http_for(PermissionDeclaration {
            network: true,
            network_hosts: vec!["*.example.com".to_owned()],
            ..PermissionDeclaration::default()
        });

        match http.get(&server.url("/ping")).await {
            Err(PackageError::Permission(error)) => {
                assert_eq!(error.permission, PermissionKind::NetworkHost)
            }
            other => panic!("expected host denial, got {other:?}"),
        }
        ping.assert_calls(0);
        Ok(())
    }

    #[tokio::test]
    async fn redirect_to_undeclared_host_is_refused() -> Result<()> {
        let server = MockServer::start();
        let secret_url = format!("http://localhost:{}/secret", server.port());
        let hop = server.mock(|when, then| {
            when.method(GET).path("/hop");
            then.status(302).header("location", secret_url.as_str());
        });
        let secret = server.mock(|when, then| {
            when.method(GET).path("/secret");
            then.status(200).body("classified");
        });

        let http = http_for(PermissionDeclaration {
            network: true,
            network_hosts: vec!["127.0.0.1".to_owned()],
            ..PermissionDeclaration::default()
        });

        match http.get(&server.url("/hop")).await {
            Err(PackageError::Permission(error)) => {
                assert_eq!(error.permission, PermissionKind::NetworkHost)
            }
            other => panic!("expected redirect denial, got {other:?}"),
        }
        hop.assert_calls(1);
        secret.assert_calls(0);
        Ok(())
    }

    #[tokio::test]
    async fn redirect_within_declared_hosts_is_followed() -> Result<()> {
        let server = MockServer::start();
        let next = server.url("/landing");
        server.mock(|when, then| {
            when.method(GET).path("/start");
            then.status(302).header("location", next.as_str());
        });
        let landing = server.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200).body("arrived");
        });

        let http = http_for(PermissionDeclaration {
            network: true,
            network_hosts: vec!["127.0.0.1".to_owned()],
            ..PermissionDeclaration::default()
        });

        let response = http.get(&server.url("/start")).await?;
        assert_eq!(response.text().await?, "arrived");
        landing.assert_calls(1);
        Ok(())
    }
}
