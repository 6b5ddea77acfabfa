use serde::Deserialize;

use crate::backend::MembershipApi;
use crate::config::BackendConfig;
use crate::error::Error;
use crate::types::{AcceptInviteRequest, BootstrapOwnerRequest, Memberships};

/// HTTP client for the Tally auth endpoints.
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
}

/// Body of `GET /auth/refresh-claims`.
#[derive(Debug, Deserialize)]
struct RefreshClaimsResponse {
    #[serde(default)]
    memberships: Memberships,
}

impl BackendClient {
    /// Create a client with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    ///
    /// The configured timeout is not applied to a supplied client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn invite_path(invite_id: &str) -> String {
        format!("auth/invites/{}/accept", urlencoding::encode(invite_id))
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

impl MembershipApi for BackendClient {
    async fn refresh_claims(&self, token: &str) -> Result<Memberships, Error> {
        let response = self
            .http
            .get(self.config.endpoint("auth/refresh-claims")?)
            .bearer_auth(token)
            .send()
            .await?;

        let response = Self::ensure_success(response, "refresh claims").await?;
        let body = response.json::<RefreshClaimsResponse>().await?;
        Ok(body.memberships)
    }

    async fn bootstrap_owner(
        &self,
        token: &str,
        request: &BootstrapOwnerRequest,
    ) -> Result<(), Error> {
        let response = self
            .http
            .post(self.config.endpoint("auth/bootstrap-owner")?)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        Self::ensure_success(response, "bootstrap owner").await?;
        Ok(())
    }

    async fn accept_invite(
        &self,
        token: &str,
        invite_id: &str,
        request: &AcceptInviteRequest,
    ) -> Result<(), Error> {
        let response = self
            .http
            .post(self.config.endpoint(&Self::invite_path(invite_id))?)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        Self::ensure_success(response, "accept invite").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::resolver::SessionResolver;
    use crate::testing::MockIdentityProvider;
    use crate::types::{BusinessId, Role};

    fn test_config() -> BackendConfig {
        BackendConfig::new("https://api.tally.test/".parse().unwrap())
    }

    /// Local server answering one connection per body, in order, with `200 OK`.
    async fn serve(bodies: Vec<&'static str>) -> BackendConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        BackendConfig::new(format!("http://{addr}/").parse().unwrap())
    }

    #[test]
    fn invite_id_is_one_path_segment() {
        assert_eq!(
            BackendClient::invite_path("inv-42"),
            "auth/invites/inv-42/accept"
        );
        assert_eq!(
            BackendClient::invite_path("a/b?c"),
            "auth/invites/a%2Fb%3Fc/accept"
        );
    }

    #[test]
    fn invite_endpoint_resolves_under_base() {
        let config = test_config();
        let url = config.endpoint(&BackendClient::invite_path("a/b")).unwrap();
        assert_eq!(url.as_str(), "https://api.tally.test/auth/invites/a%2Fb/accept");
    }

    #[test]
    fn refresh_claims_body_parses_in_order() {
        let body: RefreshClaimsResponse = serde_json::from_str(
            r#"{"memberships": {
                "b2": {"businessId": "b2", "role": "super", "permissions": ["pos.sell"]},
                "b1": {"role": "owner", "permissions": {"vat.file": true}}
            }}"#,
        )
        .unwrap();

        let entries: Vec<_> = body.memberships.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.as_str(), "b2");
        assert_eq!(entries[0].1.role, Role::Super);
        assert_eq!(entries[1].1.business_id.as_str(), "b1");
        assert!(entries[1].1.permissions.contains("vat.file"));
    }

    #[test]
    fn refresh_claims_body_without_memberships_is_empty() {
        let body: RefreshClaimsResponse = serde_json::from_str("{}").unwrap();
        assert!(body.memberships.is_empty());

        let body: RefreshClaimsResponse =
            serde_json::from_str(r#"{"memberships": null}"#).unwrap();
        assert!(body.memberships.is_empty());
    }

    #[test]
    fn client_builds_from_config() {
        let client = BackendClient::new(test_config()).unwrap();
        assert_eq!(client.config().base_url().as_str(), "https://api.tally.test/");
    }

    #[tokio::test]
    async fn unreachable_server_is_network_unavailable() {
        let client =
            BackendClient::new(BackendConfig::new("http://127.0.0.1:1/".parse().unwrap())).unwrap();

        let err = client.refresh_claims("t").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "{err:?}");
        assert_eq!(err.status(), Some(0));
        assert!(err.is_network_unavailable());
        assert!(!err.is_authorization_failure());
    }

    #[tokio::test]
    async fn malformed_body_is_not_network_unavailable() {
        let client = BackendClient::new(serve(vec!["not json"]).await).unwrap();

        let err = client.refresh_claims("t").await.unwrap_err();
        assert!(matches!(&err, Error::Http(e) if e.is_decode()), "{err:?}");
        assert_eq!(err.status(), None);
        assert!(!err.is_network_unavailable());
        assert!(!err.is_authorization_failure());
    }

    #[tokio::test]
    async fn malformed_refresh_keeps_business_context() {
        let config = serve(vec![
            r#"{"memberships": {"biz-1": {"role": "owner"}}}"#,
            "{\"memberships\": ",
        ])
        .await;
        let resolver =
            SessionResolver::new(MockIdentityProvider::new(), BackendClient::new(config).unwrap());
        resolver
            .identity_provider()
            .add_account("owner@shop.test", "secret1");
        let identity = resolver.sign_in("owner@shop.test", "secret1").await.unwrap();

        let before = resolver.handle_identity_event(Some(identity)).await;
        assert_eq!(before.business_id(), Some(&BusinessId::from("biz-1")));

        let after = resolver.refresh_session().await;
        assert_eq!(after.identity, before.identity);
        assert_eq!(after.business_user, before.business_user);
        assert_eq!(after.memberships, before.memberships);
        assert!(!after.is_connectivity_degraded());
    }
}
