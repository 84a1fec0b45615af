//! `Client` and `Session`.

use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use url::{form_urlencoded, Url};

use std::time::Duration;

use crate::{
    types::{LoginResponse, VerifyResponse},
    Credentials, CurrentUser, Error, Friend,
};

/// Base URL of the public VRChat API.
pub const DEFAULT_API_URL: &str = "https://vrchat.com/api/1";

/// The API rejects requests without an identifying user agent.
const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (presence exporter)"
);

/// Default timeout for a single API request, including reading the response body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum page size supported by the friends endpoint.
const FRIENDS_PAGE_SIZE: usize = 100;
/// Upper bound on the number of friends pages fetched in a single [`Session::friends()`] call.
pub(crate) const MAX_FRIENDS_PAGES: usize = 100;

#[derive(Debug, Clone)]
struct Api {
    http: reqwest::Client,
    base_url: Url,
}

impl Api {
    fn url(&self, endpoint: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{endpoint}")
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.http.get(self.url(endpoint))
    }

    fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> RequestBuilder {
        self.http.post(self.url(endpoint)).json(body)
    }

    async fn read_json<T: DeserializeOwned>(
        endpoint: &'static str,
        response: Response,
    ) -> Result<T, Error> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Status {
                endpoint,
                status,
                body,
            });
        }
        serde_json::from_str(&body).map_err(|source| Error::Decode { endpoint, source })
    }
}

/// Unauthenticated API client. Use [`Self::authenticate()`] to obtain a [`Session`].
#[derive(Debug)]
pub struct Client {
    api: Api,
}

impl Client {
    const LOGIN_ENDPOINT: &'static str = "auth/user";

    /// Creates a client for the API rooted at `base_url` (usually [`DEFAULT_API_URL`])
    /// with the [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialized.
    pub fn new(base_url: Url) -> Result<Self, Error> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client for the API rooted at `base_url`. Requests not completed within `timeout`
    /// fail with [`Error::Transport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialized.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api: Api { http, base_url },
        })
    }

    /// Logs in using the provided credentials. If the account has two-factor authentication enabled,
    /// the one-time code from `credentials` is submitted as well.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are rejected, the two-factor code is missing or rejected,
    /// or the API cannot be reached.
    pub async fn authenticate(self, credentials: &Credentials) -> Result<Session, Error> {
        let api = self.api;
        tracing::info!(
            base_url = %api.base_url,
            username = %credentials.username,
            "Logging in to VRChat API"
        );

        let response = api
            .get(Self::LOGIN_ENDPOINT)
            .basic_auth(
                encode_component(&credentials.username),
                Some(encode_component(&credentials.password)),
            )
            .send()
            .await?;
        let login: LoginResponse = Api::read_json(Self::LOGIN_ENDPOINT, response).await?;

        match login {
            LoginResponse::User(user) => {
                tracing::debug!(user_id = %user.id, "Logged in without two-factor authentication");
            }
            LoginResponse::TwoFactorRequired { methods } => {
                let Some(code) = credentials.totp.as_deref() else {
                    return Err(Error::TwoFactorRequired { methods });
                };
                Self::verify_two_factor(&api, &methods, code).await?;
            }
        }
        Ok(Session { api })
    }

    async fn verify_two_factor(api: &Api, methods: &[String], code: &str) -> Result<(), Error> {
        #[derive(Serialize)]
        struct VerifyRequest<'a> {
            code: &'a str,
        }

        let offers = |method: &str| methods.iter().any(|offered| offered == method);
        let endpoint = if offers("totp") {
            "auth/twofactorauth/totp/verify"
        } else if offers("emailOtp") {
            "auth/twofactorauth/emailotp/verify"
        } else {
            "auth/twofactorauth/otp/verify"
        };
        tracing::debug!(?methods, endpoint, "Submitting two-factor code");

        let response = api
            .post_json(endpoint, &VerifyRequest { code })
            .send()
            .await?;
        let verification: VerifyResponse = Api::read_json(endpoint, response).await?;
        if verification.verified {
            Ok(())
        } else {
            Err(Error::TwoFactorRejected)
        }
    }
}

/// Authenticated API session returned by [`Client::authenticate()`].
///
/// The session only holds the authentication cookies; it is never modified after login,
/// so it can be shared among tasks freely.
#[derive(Debug, Clone)]
pub struct Session {
    api: Api,
}

impl Session {
    /// Fetches the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails.
    pub async fn current_user(&self) -> Result<CurrentUser, Error> {
        const ENDPOINT: &str = "auth/user";

        let response = self.api.get(ENDPOINT).send().await?;
        Api::read_json(ENDPOINT, response).await
    }

    /// Fetches all online friends of the logged-in user, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if any API request fails, or if pagination does not terminate: the API
    /// returns the same full page twice in a row, or keeps returning full pages for
    /// more than a fixed number of pages.
    pub async fn friends(&self) -> Result<Vec<Friend>, Error> {
        const ENDPOINT: &str = "auth/user/friends";

        let mut friends = Vec::new();
        let mut prev_page = Vec::new();
        for page_idx in 0..MAX_FRIENDS_PAGES {
            let query = [
                ("offline", "false".to_owned()),
                ("n", FRIENDS_PAGE_SIZE.to_string()),
                ("offset", friends.len().to_string()),
            ];
            let response = self.api.get(ENDPOINT).query(&query).send().await?;
            let page: Vec<Friend> = Api::read_json(ENDPOINT, response).await?;

            if page.len() < FRIENDS_PAGE_SIZE {
                friends.extend(page);
                tracing::debug!(count = friends.len(), "Fetched online friends");
                return Ok(friends);
            }
            if page == prev_page {
                tracing::warn!(offset = friends.len(), "Friends page repeats the previous one");
                return Err(Error::Pagination {
                    endpoint: ENDPOINT,
                    pages: page_idx + 1,
                });
            }
            friends.extend_from_slice(&page);
            prev_page = page;
        }
        Err(Error::Pagination {
            endpoint: ENDPOINT,
            pages: MAX_FRIENDS_PAGES,
        })
    }
}

/// Percent-encodes a basic auth component; the API expects this encoding before the usual Base64 one.
fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
