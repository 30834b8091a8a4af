//! Google tokeninfo client.
//!
//! The identity provider boundary is a single HTTP GET against the tokeninfo
//! endpoint with the token in the URL query string. A successful response
//! carries the verified subject id and, usually, an email.

use crate::APP_USER_AGENT;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::{future::Future, pin::Pin, time::Duration};
use tracing::{debug, instrument};

pub const DEFAULT_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Verified claims returned by the identity provider.
#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    pub sub: String,
    pub email: Option<String>,
}

/// Seam between the handlers and the identity provider so the google-auth
/// flow can be exercised without the network.
pub trait IdentityVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenInfo>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct GoogleVerifier {
    client: Client,
    tokeninfo_url: String,
}

impl GoogleVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(tokeninfo_url: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build tokeninfo HTTP client")?;

        Ok(Self {
            client,
            tokeninfo_url,
        })
    }

    #[instrument(skip(self, token))]
    async fn introspect(&self, token: &str) -> Result<TokenInfo> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "{} - {}",
                self.tokeninfo_url,
                response.status()
            ));
        }

        let info: TokenInfo = response
            .json()
            .await
            .context("failed to parse tokeninfo response")?;

        debug!("verified subject: {}", info.sub);

        Ok(info)
    }
}

impl IdentityVerifier for GoogleVerifier {
    fn verify<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenInfo>> + Send + 'a>> {
        Box::pin(self.introspect(token))
    }
}
