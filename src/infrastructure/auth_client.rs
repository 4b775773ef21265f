use crate::domain::models::Session;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::todo_api_client::{BackendConfig, backend_endpoint, check_status};
use async_trait::async_trait;
use reqwest::{Client, Request, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const TOKEN_PATH: [&str; 3] = ["auth", "v1", "token"];
const SIGNUP_PATH: [&str; 3] = ["auth", "v1", "signup"];
const LOGOUT_PATH: [&str; 3] = ["auth", "v1", "logout"];
const USER_PATH: [&str; 3] = ["auth", "v1", "user"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Result of a sign-up: either a usable session, or an account that still has to
/// confirm its email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired(AuthUser),
}

/// Password authentication against the backend's auth service.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, InfraError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, InfraError>;

    /// Revokes `access_token` on the server.
    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError>;

    async fn current_user(&self, access_token: &str) -> Result<AuthUser, InfraError>;
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), InfraError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(InfraError::Unauthorized("a valid email address is required".to_string()));
    }
    if password.is_empty() {
        return Err(InfraError::Unauthorized("password must not be empty".to_string()));
    }
    Ok(())
}

fn ensure_token(access_token: &str) -> Result<(), InfraError> {
    if access_token.trim().is_empty() {
        return Err(InfraError::Unauthorized("access token must not be empty".to_string()));
    }
    Ok(())
}

/// A rejected password grant answers 400, which means bad credentials here.
pub fn check_sign_in_status(status: StatusCode, body: &str) -> Result<(), InfraError> {
    if status == StatusCode::BAD_REQUEST {
        return Err(InfraError::Unauthorized(format!(
            "invalid email or password (http 400; body={body})"
        )));
    }
    check_status(status, body)
}

pub fn decode_token_response(body: &str) -> Result<Session, InfraError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|error| InfraError::Payload(format!("invalid token response: {error}")))?;
    Ok(session_from(response))
}

/// Sign-up answers with a token response when no confirmation is needed, and with
/// the bare (or wrapped) user otherwise.
pub fn decode_sign_up_response(body: &str) -> Result<SignUpOutcome, InfraError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|error| InfraError::Payload(format!("invalid sign-up response: {error}")))?;

    if value.get("access_token").is_some_and(|token| !token.is_null()) {
        let response: TokenResponse = serde_json::from_value(value)
            .map_err(|error| InfraError::Payload(format!("invalid sign-up session: {error}")))?;
        return Ok(SignUpOutcome::SignedIn(session_from(response)));
    }

    let user = match value.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => value,
    };
    let user: AuthUser = serde_json::from_value(user)
        .map_err(|error| InfraError::Payload(format!("invalid sign-up user: {error}")))?;
    Ok(SignUpOutcome::ConfirmationRequired(user))
}

fn session_from(response: TokenResponse) -> Session {
    Session {
        access_token: response.access_token,
        user_id: Some(response.user.id),
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    token_endpoint: Url,
    signup_endpoint: Url,
    logout_endpoint: Url,
    user_endpoint: Url,
    api_key: String,
}

impl ReqwestAuthClient {
    pub fn new(config: &BackendConfig) -> Result<Self, InfraError> {
        if config.api_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig("backend api key must not be empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;

        let mut token_endpoint = backend_endpoint(&config.base_url, &TOKEN_PATH)?;
        token_endpoint
            .query_pairs_mut()
            .append_pair("grant_type", "password");

        Ok(Self {
            client,
            token_endpoint,
            signup_endpoint: backend_endpoint(&config.base_url, &SIGNUP_PATH)?,
            logout_endpoint: backend_endpoint(&config.base_url, &LOGOUT_PATH)?,
            user_endpoint: backend_endpoint(&config.base_url, &USER_PATH)?,
            api_key: config.api_key.trim().to_string(),
        })
    }

    fn build(&self, request: RequestBuilder) -> Result<Request, InfraError> {
        request
            .header("apikey", &self.api_key)
            .build()
            .map_err(|error| InfraError::Payload(format!("failed to build request: {error}")))
    }

    pub fn sign_in_request(&self, email: &str, password: &str) -> Result<Request, InfraError> {
        validate_credentials(email, password)?;
        let credentials = Credentials {
            email: email.trim(),
            password,
        };
        self.build(self.client.post(self.token_endpoint.clone()).json(&credentials))
    }

    pub fn sign_up_request(&self, email: &str, password: &str) -> Result<Request, InfraError> {
        validate_credentials(email, password)?;
        let credentials = Credentials {
            email: email.trim(),
            password,
        };
        self.build(self.client.post(self.signup_endpoint.clone()).json(&credentials))
    }

    pub fn sign_out_request(&self, access_token: &str) -> Result<Request, InfraError> {
        ensure_token(access_token)?;
        self.build(
            self.client
                .post(self.logout_endpoint.clone())
                .bearer_auth(access_token),
        )
    }

    pub fn user_request(&self, access_token: &str) -> Result<Request, InfraError> {
        ensure_token(access_token)?;
        self.build(
            self.client
                .get(self.user_endpoint.clone())
                .bearer_auth(access_token),
        )
    }

    async fn send(&self, request: Request, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response while {action}: {error}")))?;
        debug!(status = status.as_u16(), action, "auth service responded");
        Ok((status, body))
    }
}

#[async_trait]
impl AuthApi for ReqwestAuthClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, InfraError> {
        let request = self.sign_in_request(email, password)?;
        let (status, body) = self.send(request, "signing in").await?;
        check_sign_in_status(status, &body)?;
        let session = decode_token_response(&body)?;
        info!(user_id = ?session.user_id, "signed in");
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, InfraError> {
        let request = self.sign_up_request(email, password)?;
        let (status, body) = self.send(request, "signing up").await?;
        check_status(status, &body)?;
        decode_sign_up_response(&body)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError> {
        let request = self.sign_out_request(access_token)?;
        let (status, body) = self.send(request, "signing out").await?;
        check_status(status, &body)
    }

    async fn current_user(&self, access_token: &str) -> Result<AuthUser, InfraError> {
        let request = self.user_request(access_token)?;
        let (status, body) = self.send(request, "reading the current user").await?;
        check_status(status, &body)?;
        serde_json::from_str(&body)
            .map_err(|error| InfraError::Payload(format!("invalid user payload: {error}")))
    }
}

#[derive(Debug)]
struct Account {
    password: String,
    user: AuthUser,
}

#[derive(Debug, Default)]
struct InMemoryAccounts {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, AuthUser>,
    issued: u64,
    require_confirmation: bool,
}

impl InMemoryAccounts {
    fn issue(&mut self, user: AuthUser) -> Session {
        self.issued += 1;
        let access_token = format!("token-{}-{}", user.id, self.issued);
        self.tokens.insert(access_token.clone(), user.clone());
        Session {
            access_token,
            user_id: Some(user.id),
        }
    }
}

/// Process-local accounts with the same answers as the auth service.
#[derive(Debug, Default)]
pub struct InMemoryAuthApi {
    state: Mutex<InMemoryAccounts>,
}

impl InMemoryAuthApi {
    /// Treats `access_token` as already issued to `user_id`.
    pub fn with_session(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let mut state = InMemoryAccounts::default();
        state.tokens.insert(
            access_token.into(),
            AuthUser {
                id: user_id.into(),
                email: None,
                created_at: None,
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_require_confirmation(&self, enabled: bool) -> Result<(), InfraError> {
        self.lock()?.require_confirmation = enabled;
        Ok(())
    }

    pub fn is_active(&self, access_token: &str) -> Result<bool, InfraError> {
        Ok(self.lock()?.tokens.contains_key(access_token))
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryAccounts>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory account lock poisoned: {error}")))
    }
}

#[async_trait]
impl AuthApi for InMemoryAuthApi {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, InfraError> {
        validate_credentials(email, password)?;
        let mut state = self.lock()?;
        let user = match state.accounts.get(&email.trim().to_lowercase()) {
            Some(account) if account.password == password => account.user.clone(),
            _ => return Err(InfraError::Unauthorized("invalid email or password".to_string())),
        };
        Ok(state.issue(user))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, InfraError> {
        validate_credentials(email, password)?;
        let key = email.trim().to_lowercase();
        let mut state = self.lock()?;
        if state.accounts.contains_key(&key) {
            return Err(InfraError::Network("backend error: http 422; body=User already registered".to_string()));
        }

        let user = AuthUser {
            id: format!("user-{}", state.accounts.len() + 1),
            email: Some(key.clone()),
            created_at: None,
        };
        state.accounts.insert(
            key,
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        if state.require_confirmation {
            return Ok(SignUpOutcome::ConfirmationRequired(user));
        }
        Ok(SignUpOutcome::SignedIn(state.issue(user)))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError> {
        ensure_token(access_token)?;
        match self.lock()?.tokens.remove(access_token) {
            Some(_) => Ok(()),
            None => {
                warn!("sign-out for an unknown token");
                Err(InfraError::Unauthorized("http 401; body=invalid token".to_string()))
            }
        }
    }

    async fn current_user(&self, access_token: &str) -> Result<AuthUser, InfraError> {
        ensure_token(access_token)?;
        self.lock()?
            .tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| InfraError::Unauthorized("http 401; body=invalid token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ReqwestAuthClient {
        ReqwestAuthClient::new(&BackendConfig::new("https://example.supabase.co/", "anon-key"))
            .expect("auth client")
    }

    fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|value| value.to_str().ok())
    }

    fn json_body(request: &Request) -> serde_json::Value {
        let bytes = request
            .body()
            .and_then(|body| body.as_bytes())
            .expect("buffered body");
        serde_json::from_slice(bytes).expect("json body")
    }

    #[test]
    fn sign_in_uses_the_password_grant() {
        let request = client()
            .sign_in_request(" ada@example.com ", "hunter2")
            .expect("sign-in request");

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://example.supabase.co/auth/v1/token?grant_type=password"
        );
        assert_eq!(header(&request, "apikey"), Some("anon-key"));
        assert_eq!(header(&request, "authorization"), None);
        let body = json_body(&request);
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["password"], "hunter2");
    }

    #[test]
    fn sign_out_and_user_requests_carry_the_bearer_token() {
        let client = client();
        let sign_out = client.sign_out_request("token-1").expect("sign-out request");
        assert_eq!(sign_out.url().path(), "/auth/v1/logout");
        assert_eq!(header(&sign_out, "authorization"), Some("Bearer token-1"));

        let user = client.user_request("token-1").expect("user request");
        assert_eq!(user.method(), reqwest::Method::GET);
        assert_eq!(user.url().path(), "/auth/v1/user");

        let sign_up = client.sign_up_request("ada@example.com", "pw").expect("sign-up request");
        assert_eq!(sign_up.url().path(), "/auth/v1/signup");

        assert!(matches!(client.sign_out_request(" "), Err(InfraError::Unauthorized(_))));
        assert!(matches!(
            client.sign_in_request("not-an-email", "pw"),
            Err(InfraError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejected_password_grant_is_an_authentication_failure() {
        assert!(matches!(
            check_sign_in_status(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#),
            Err(InfraError::Unauthorized(message)) if message.contains("invalid email or password")
        ));
        assert!(matches!(
            check_sign_in_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            Err(InfraError::Network(_))
        ));
        assert!(check_sign_in_status(StatusCode::OK, "{}").is_ok());
    }

    #[test]
    fn token_response_becomes_a_session() {
        let session = decode_token_response(
            r#"{"access_token":"jwt","token_type":"bearer","user":{"id":"u-1","email":"ada@example.com"}}"#,
        )
        .expect("session");
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user_id.as_deref(), Some("u-1"));

        assert!(matches!(decode_token_response("{}"), Err(InfraError::Payload(_))));
    }

    #[test]
    fn sign_up_response_distinguishes_confirmation() {
        let signed_in = decode_sign_up_response(r#"{"access_token":"jwt","user":{"id":"u-1"}}"#)
            .expect("signed in");
        assert!(matches!(signed_in, SignUpOutcome::SignedIn(session) if session.access_token == "jwt"));

        let pending = decode_sign_up_response(r#"{"id":"u-2","email":"bob@example.com"}"#)
            .expect("pending");
        assert!(matches!(pending, SignUpOutcome::ConfirmationRequired(user) if user.id == "u-2"));

        let wrapped = decode_sign_up_response(r#"{"user":{"id":"u-3"},"session":null}"#)
            .expect("wrapped");
        assert!(matches!(wrapped, SignUpOutcome::ConfirmationRequired(user) if user.id == "u-3"));
    }

    #[tokio::test]
    async fn in_memory_accounts_sign_up_in_and_out() {
        let auth = InMemoryAuthApi::default();
        let SignUpOutcome::SignedIn(first) = auth.sign_up("ada@example.com", "pw").await.expect("sign up")
        else {
            panic!("expected a session");
        };
        assert!(auth.sign_up("ADA@example.com", "other").await.is_err());

        assert!(matches!(
            auth.sign_in("ada@example.com", "wrong").await,
            Err(InfraError::Unauthorized(_))
        ));
        let second = auth.sign_in("ada@example.com", "pw").await.expect("sign in");
        assert_eq!(second.user_id, first.user_id);
        assert_ne!(second.access_token, first.access_token);

        let user = auth.current_user(&second.access_token).await.expect("user");
        assert_eq!(Some(user.id), second.user_id);

        auth.sign_out(&second.access_token).await.expect("sign out");
        assert!(!auth.is_active(&second.access_token).expect("active"));
        assert!(matches!(
            auth.current_user(&second.access_token).await,
            Err(InfraError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn confirmation_required_issues_no_token() {
        let auth = InMemoryAuthApi::default();
        auth.set_require_confirmation(true).expect("toggle");
        let outcome = auth.sign_up("bob@example.com", "pw").await.expect("sign up");
        assert!(matches!(outcome, SignUpOutcome::ConfirmationRequired(user) if user.email.as_deref() == Some("bob@example.com")));
    }
}
