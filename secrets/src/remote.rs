use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{SecretError, SecretResult, SecretService};

/// Talks to the secret process over plain request/response HTTP:
/// `POST {base}/encrypt` and `POST {base}/decrypt`, both taking
/// `{ value, passphrase }` and answering `{ value }`.
#[derive(Clone)]
pub struct RemoteSecretService {
    client: Client,
    api_base: String,
}

#[derive(Serialize)]
struct SecretRequest<'a> {
    value: &'a str,
    passphrase: &'a str,
}

#[derive(Deserialize)]
struct SecretReply {
    value: String,
}

impl RemoteSecretService {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        op: &str,
        value: &str,
        passphrase: &str,
    ) -> SecretResult<Zeroizing<String>> {
        let url = format!("{}/{op}", self.api_base);
        let resp = self
            .client
            .post(url)
            .json(&SecretRequest { value, passphrase })
            .send()
            .await
            .map_err(|err| SecretError::Transport(format!("{op} request failed: {err}")))?;
        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY
        ) && op == "decrypt"
        {
            return Err(SecretError::Decryption);
        }
        if !status.is_success() {
            return Err(SecretError::Transport(format!("{op} returned status {status}")));
        }
        let reply: SecretReply = resp
            .json()
            .await
            .map_err(|err| SecretError::Transport(format!("{op} response decode failed: {err}")))?;
        Ok(Zeroizing::new(reply.value))
    }
}

#[async_trait]
impl SecretService for RemoteSecretService {
    async fn encrypt(&self, plaintext: &str, passphrase: &str) -> SecretResult<String> {
        if passphrase.is_empty() {
            return Err(SecretError::EmptyPassphrase);
        }
        let sealed = self.call("encrypt", plaintext, passphrase).await?;
        Ok(sealed.to_string())
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        passphrase: &str,
    ) -> SecretResult<Zeroizing<String>> {
        self.call("decrypt", ciphertext, passphrase).await
    }
}
