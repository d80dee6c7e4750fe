//! Login exchange and session construction.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::{ClcConfig, Credentials};

use super::{ApiRequest, ClcApiError, ClcClient, Session, Transport, resolve_url};

const LOGIN_PATH: &str = "authentication/login";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    bearer_token: String,
    account_alias: String,
    #[serde(default)]
    location_alias: Option<String>,
}

impl<T: Transport> ClcClient<T> {
    /// Authenticates with the credentials in `config` and returns a ready
    /// client.
    ///
    /// A configured token plus account alias is used as-is; otherwise the
    /// username and password are exchanged for a bearer token. Configured
    /// alias and location override the values returned by the login call.
    ///
    /// # Errors
    ///
    /// Returns [`ClcApiError::Authentication`] when no usable credentials are
    /// configured or the API rejects them.
    pub async fn connect(transport: T, config: &ClcConfig) -> Result<Self, ClcApiError> {
        let base_url = config.v2_api_url.trim_end_matches('/').to_owned();
        let credentials = config
            .credentials()
            .map_err(|err| ClcApiError::Authentication {
                message: err.to_string(),
            })?;

        let session = match credentials {
            Credentials::Token { token, alias } => Session {
                bearer_token: token,
                account_alias: alias,
                location: config.location.clone(),
            },
            Credentials::Password { username, password } => {
                let login = login(&transport, &base_url, &username, &password).await?;
                Session {
                    bearer_token: login.bearer_token,
                    account_alias: config.acct_alias.clone().unwrap_or(login.account_alias),
                    location: config.location.clone().or(login.location_alias),
                }
            }
        };

        info!(alias = %session.account_alias, "authenticated against the CLC v2 API");
        Ok(Self::with_session(transport, base_url, session))
    }
}

async fn login<T: Transport>(
    transport: &T,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<LoginResponse, ClcApiError> {
    let url = resolve_url(base_url, LOGIN_PATH);
    let response = transport
        .send(ApiRequest {
            method: Method::POST,
            url: url.clone(),
            bearer_token: None,
            body: Some(json!({ "username": username, "password": password })),
        })
        .await?;

    match response.status {
        400 | 401 | 403 => Err(ClcApiError::Authentication {
            message: String::from("failed to authenticate with the CLC v2 API"),
        }),
        _ if !response.is_success() => Err(ClcApiError::Http {
            method: Method::POST.to_string(),
            url,
            status: response.status,
            body: response.body,
        }),
        _ => serde_json::from_str(&response.body).map_err(|err| ClcApiError::Decode {
            url,
            message: err.to_string(),
        }),
    }
}
