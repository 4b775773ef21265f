use crate::domain::models::{SortOrder, Todo, token_preview};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::todo_mapper::{decode_todo_list, decode_todo_response, encode_todo_row};
use crate::infrastructure::wall_clock::WallClock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Request, RequestBuilder, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const TASKS_PATH: [&str; 3] = ["rest", "v1", "tasks"];
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Remote CRUD over the `tasks` resource. Implementations never touch reminders or
/// calendar state.
#[async_trait]
pub trait TodoApi: Send + Sync {
    /// Lists the user's tasks in server order, or every visible task when `user_id`
    /// is absent.
    async fn list(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        sort_order: Option<SortOrder>,
    ) -> Result<Vec<Todo>, InfraError>;

    async fn create(
        &self,
        access_token: &str,
        todo: &Todo,
        user_id: Option<&str>,
    ) -> Result<Todo, InfraError>;

    async fn update(&self, access_token: &str, todo: &Todo) -> Result<Todo, InfraError>;

    async fn delete(&self, access_token: &str, id: i64) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTodoApiClient {
    client: Client,
    tasks_endpoint: Url,
    api_key: String,
    clock: WallClock,
}

impl ReqwestTodoApiClient {
    pub fn new(config: &BackendConfig, clock: WallClock) -> Result<Self, InfraError> {
        if config.api_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig("backend api key must not be empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            tasks_endpoint: tasks_endpoint(&config.base_url)?,
            api_key: config.api_key.trim().to_string(),
            clock,
        })
    }

    fn authorized(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Prefer", "return=representation")
            .bearer_auth(access_token)
    }

    fn ensure_token(access_token: &str) -> Result<(), InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Unauthorized("access token must not be empty".to_string()));
        }
        Ok(())
    }

    fn build(&self, request: RequestBuilder, access_token: &str) -> Result<Request, InfraError> {
        Self::ensure_token(access_token)?;
        self.authorized(request, access_token)
            .build()
            .map_err(|error| InfraError::Payload(format!("failed to build request: {error}")))
    }

    /// `GET tasks?user_id=eq.{id}&order={expr}`, or `?select=*` without an owner.
    pub fn list_request(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        sort_order: Option<SortOrder>,
    ) -> Result<Request, InfraError> {
        let mut request = self.client.get(self.tasks_endpoint.clone());
        match user_id.map(str::trim).filter(|value| !value.is_empty()) {
            Some(user_id) => {
                debug!(user_id, "fetching tasks for user");
                request = request.query(&[("user_id", format!("eq.{user_id}"))]);
            }
            None => {
                warn!("fetching all tasks without a user id");
                request = request.query(&[("select", "*")]);
            }
        }
        if let Some(order) = sort_order {
            request = request.query(&[("order", order.api_value())]);
        }
        self.build(request, access_token)
    }

    pub fn create_request(&self, access_token: &str, submitted: &Todo) -> Result<Request, InfraError> {
        let row = encode_todo_row(submitted, &self.clock);
        self.build(self.client.post(self.tasks_endpoint.clone()).json(&row), access_token)
    }

    pub fn update_request(&self, access_token: &str, todo: &Todo) -> Result<Request, InfraError> {
        if !todo.is_persisted() {
            return Err(InfraError::Payload("cannot update a task without an id".to_string()));
        }
        let row = encode_todo_row(todo, &self.clock);
        let request = self
            .client
            .patch(self.tasks_endpoint.clone())
            .query(&[("id", format!("eq.{}", todo.id))])
            .json(&row);
        self.build(request, access_token)
    }

    pub fn delete_request(&self, access_token: &str, id: i64) -> Result<Request, InfraError> {
        let request = self
            .client
            .delete(self.tasks_endpoint.clone())
            .query(&[("id", format!("eq.{id}"))]);
        self.build(request, access_token)
    }

    async fn execute(&self, request: Request, action: &str) -> Result<String, InfraError> {
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

        debug!(status = status.as_u16(), action, "backend responded");
        check_status(status, &body)?;
        Ok(body)
    }
}

/// Stamps the owner onto a task about to be created.
pub fn submission(todo: &Todo, user_id: Option<&str>) -> Todo {
    let mut submitted = todo.clone();
    match user_id.map(str::trim).filter(|value| !value.is_empty()) {
        Some(user_id) => submitted.user_id = Some(user_id.to_string()),
        None => warn!("creating task without a user id"),
    }
    submitted
}

/// The server row when the write answered with one, otherwise the submitted task.
pub fn written_or_echo(body: &str, submitted: &Todo, clock: &WallClock) -> Result<Todo, InfraError> {
    match decode_todo_response(body, clock)? {
        Some(written) => Ok(written),
        None => {
            debug!(todo_id = submitted.id, "empty write response; echoing request");
            Ok(submitted.clone())
        }
    }
}

pub fn tasks_endpoint(base_url: &str) -> Result<Url, InfraError> {
    backend_endpoint(base_url, &TASKS_PATH)
}

/// Appends `segments` to the backend base URL.
pub fn backend_endpoint(base_url: &str, segments: &[&str]) -> Result<Url, InfraError> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|error| InfraError::InvalidConfig(format!("invalid backend base url: {error}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| InfraError::InvalidConfig("backend base URL cannot be a base".to_string()))?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Maps an HTTP status to the error taxonomy: 401/403 are authentication failures,
/// anything else outside 2xx is a network failure.
pub fn check_status(status: StatusCode, body: &str) -> Result<(), InfraError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = if body.trim().is_empty() {
        format!("http {}", status.as_u16())
    } else {
        format!("http {}; body={body}", status.as_u16())
    };
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(InfraError::Unauthorized(detail));
    }
    Err(InfraError::Network(format!("backend error: {detail}")))
}

#[async_trait]
impl TodoApi for ReqwestTodoApiClient {
    async fn list(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        sort_order: Option<SortOrder>,
    ) -> Result<Vec<Todo>, InfraError> {
        let request = self.list_request(access_token, user_id, sort_order)?;
        let body = self.execute(request, "listing tasks").await?;
        let todos = decode_todo_list(&body, &self.clock)?;
        debug!(count = todos.len(), "parsed tasks");
        Ok(todos)
    }

    async fn create(
        &self,
        access_token: &str,
        todo: &Todo,
        user_id: Option<&str>,
    ) -> Result<Todo, InfraError> {
        let submitted = submission(todo, user_id);
        let request = self.create_request(access_token, &submitted)?;
        let body = self.execute(request, "creating task").await?;
        written_or_echo(&body, &submitted, &self.clock)
    }

    async fn update(&self, access_token: &str, todo: &Todo) -> Result<Todo, InfraError> {
        let request = self.update_request(access_token, todo)?;
        debug!(todo_id = todo.id, token = %token_preview(access_token), "updating task");
        let body = self.execute(request, "updating task").await?;
        written_or_echo(&body, todo, &self.clock)
    }

    async fn delete(&self, access_token: &str, id: i64) -> Result<bool, InfraError> {
        let request = self.delete_request(access_token, id)?;
        self.execute(request, "deleting task").await?;
        debug!(todo_id = id, "deleted task");
        Ok(true)
    }
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct InMemoryTasks {
    rows: Vec<Todo>,
    next_id: i64,
    offline: bool,
    empty_write_responses: bool,
}

/// In-process backend with the same contract as the REST resource: server-assigned
/// ids and `created_at`, owner filtering and server-side ordering.
pub struct InMemoryTodoApi {
    tasks: Mutex<InMemoryTasks>,
    clock: WallClock,
    now_provider: NowProvider,
    required_token: Option<String>,
}

impl Default for InMemoryTodoApi {
    fn default() -> Self {
        Self::new(WallClock::System)
    }
}

impl InMemoryTodoApi {
    pub fn new(clock: WallClock) -> Self {
        Self {
            tasks: Mutex::new(InMemoryTasks {
                next_id: 1,
                ..InMemoryTasks::default()
            }),
            clock,
            now_provider: Arc::new(Utc::now),
            required_token: None,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Rejects every call whose token differs, like an expired session would.
    pub fn with_required_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    /// Simulates an unreachable backend.
    pub fn set_offline(&self, offline: bool) -> Result<(), InfraError> {
        self.lock()?.offline = offline;
        Ok(())
    }

    /// Makes create/update answer like a backend that replies with an empty body.
    pub fn set_empty_write_responses(&self, enabled: bool) -> Result<(), InfraError> {
        self.lock()?.empty_write_responses = enabled;
        Ok(())
    }

    pub fn rows(&self) -> Result<Vec<Todo>, InfraError> {
        Ok(self.lock()?.rows.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryTasks>, InfraError> {
        self.tasks
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("in-memory task lock poisoned: {error}")))
    }

    fn begin(&self, access_token: &str) -> Result<std::sync::MutexGuard<'_, InMemoryTasks>, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Unauthorized("access token must not be empty".to_string()));
        }
        if let Some(required) = self.required_token.as_deref() {
            if required != access_token {
                return Err(InfraError::Unauthorized("http 401; body=JWT expired".to_string()));
            }
        }
        let tasks = self.lock()?;
        if tasks.offline {
            return Err(InfraError::Network("network error: backend unreachable".to_string()));
        }
        Ok(tasks)
    }
}

#[async_trait]
impl TodoApi for InMemoryTodoApi {
    async fn list(
        &self,
        access_token: &str,
        user_id: Option<&str>,
        sort_order: Option<SortOrder>,
    ) -> Result<Vec<Todo>, InfraError> {
        let tasks = self.begin(access_token)?;
        let mut rows = tasks
            .rows
            .iter()
            .filter(|row| user_id.is_none_or(|owner| row.user_id.as_deref() == Some(owner)))
            .cloned()
            .collect::<Vec<_>>();
        drop(tasks);

        let now = self.clock.to_local((self.now_provider)());
        match sort_order {
            Some(order) => order.sort(&mut rows, now),
            None => rows.sort_by_key(|row| row.id),
        }
        Ok(rows)
    }

    async fn create(
        &self,
        access_token: &str,
        todo: &Todo,
        user_id: Option<&str>,
    ) -> Result<Todo, InfraError> {
        let mut tasks = self.begin(access_token)?;
        let mut submitted = todo.clone();
        if let Some(user_id) = user_id {
            submitted.user_id = Some(user_id.to_string());
        }

        let stored = Todo {
            id: tasks.next_id,
            created_at: Some(self.clock.to_local((self.now_provider)())),
            ..submitted.clone()
        };
        tasks.next_id += 1;
        tasks.rows.push(stored.clone());

        if tasks.empty_write_responses {
            return Ok(submitted);
        }
        Ok(stored)
    }

    async fn update(&self, access_token: &str, todo: &Todo) -> Result<Todo, InfraError> {
        let mut tasks = self.begin(access_token)?;
        let echo = tasks.empty_write_responses;
        let Some(row) = tasks.rows.iter_mut().find(|row| row.id == todo.id) else {
            // PATCH on a missing row matches nothing and answers with an empty list.
            return Ok(todo.clone());
        };

        *row = Todo {
            user_id: row.user_id.clone(),
            created_at: row.created_at,
            ..todo.clone()
        };
        if echo {
            return Ok(todo.clone());
        }
        Ok(row.clone())
    }

    async fn delete(&self, access_token: &str, id: i64) -> Result<bool, InfraError> {
        let mut tasks = self.begin(access_token)?;
        tasks.rows.retain(|row| row.id != id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDateTime};

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T12:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn api() -> InMemoryTodoApi {
        InMemoryTodoApi::new(WallClock::Named(chrono_tz::UTC)).with_now_provider(Arc::new(fixed_time))
    }

    fn due(offset_hours: i64) -> Option<NaiveDateTime> {
        Some(fixed_time().naive_utc() + ChronoDuration::hours(offset_hours))
    }

    fn named(name: &str, due_date: Option<NaiveDateTime>) -> Todo {
        Todo {
            name: name.to_string(),
            due_date,
            ..Todo::default()
        }
    }

    #[test]
    fn tasks_endpoint_appends_rest_path() {
        let url = tasks_endpoint("https://example.supabase.co").expect("endpoint");
        assert_eq!(url.as_str(), "https://example.supabase.co/rest/v1/tasks");

        let trailing = tasks_endpoint("https://example.supabase.co/").expect("endpoint");
        assert_eq!(trailing.as_str(), "https://example.supabase.co/rest/v1/tasks");

        assert!(matches!(
            tasks_endpoint("not a url"),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn status_mapping_separates_auth_failures() {
        assert!(check_status(StatusCode::OK, "").is_ok());
        assert!(check_status(StatusCode::NO_CONTENT, "").is_ok());
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, "JWT expired"),
            Err(InfraError::Unauthorized(message)) if message.contains("JWT expired")
        ));
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN, ""),
            Err(InfraError::Unauthorized(_))
        ));
        assert!(matches!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            Err(InfraError::Network(message)) if message.contains("500")
        ));
    }

    #[test]
    fn reqwest_client_requires_api_key() {
        let result = ReqwestTodoApiClient::new(
            &BackendConfig::new("https://example.supabase.co", " "),
            WallClock::System,
        );
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    fn rest_client() -> ReqwestTodoApiClient {
        ReqwestTodoApiClient::new(
            &BackendConfig::new("https://example.supabase.co", "anon-key"),
            WallClock::Named(chrono_tz::UTC),
        )
        .expect("client")
    }

    fn query_pairs(request: &Request) -> Vec<(String, String)> {
        request
            .url()
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
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
    fn list_request_filters_by_owner_and_orders() {
        let request = rest_client()
            .list_request("token-1", Some("user-1"), Some(SortOrder::DueSoonFirst))
            .expect("list request");

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/tasks");
        assert_eq!(
            query_pairs(&request),
            vec![
                ("user_id".to_string(), "eq.user-1".to_string()),
                ("order".to_string(), SortOrder::DueSoonFirst.api_value().to_string()),
            ]
        );
        assert_eq!(header(&request, "apikey"), Some("anon-key"));
        assert_eq!(header(&request, "authorization"), Some("Bearer token-1"));
        assert_eq!(header(&request, "prefer"), Some("return=representation"));
    }

    #[test]
    fn list_request_without_owner_selects_everything() {
        let request = rest_client()
            .list_request("token-1", Some("  "), None)
            .expect("list request");
        assert_eq!(query_pairs(&request), vec![("select".to_string(), "*".to_string())]);
    }

    #[test]
    fn create_request_posts_the_row_with_its_owner() {
        let submitted = submission(&named("Buy milk", None), Some("user-1"));
        let request = rest_client()
            .create_request("token-1", &submitted)
            .expect("create request");

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().query(), None);
        assert_eq!(header(&request, "content-type"), Some("application/json"));
        let body = json_body(&request);
        assert_eq!(body["name"], "Buy milk");
        assert_eq!(body["user_id"], "user-1");
        assert!(body.get("id").is_none());
    }

    #[test]
    fn update_and_delete_requests_target_one_row() {
        let client = rest_client();
        let todo = Todo {
            id: 17,
            ..named("Draft", None)
        };

        let update = client.update_request("token-1", &todo).expect("update request");
        assert_eq!(update.method(), reqwest::Method::PATCH);
        assert_eq!(query_pairs(&update), vec![("id".to_string(), "eq.17".to_string())]);
        assert!(json_body(&update)["due_date"].is_null());

        let delete = client.delete_request("token-1", 17).expect("delete request");
        assert_eq!(delete.method(), reqwest::Method::DELETE);
        assert_eq!(query_pairs(&delete), vec![("id".to_string(), "eq.17".to_string())]);
        assert_eq!(header(&delete, "authorization"), Some("Bearer token-1"));

        assert!(matches!(
            client.update_request("token-1", &named("Unsaved", None)),
            Err(InfraError::Payload(_))
        ));
        assert!(matches!(
            client.delete_request(" ", 17),
            Err(InfraError::Unauthorized(_))
        ));
    }

    #[test]
    fn empty_write_body_echoes_the_submitted_task() {
        let clock = WallClock::Named(chrono_tz::UTC);
        let submitted = submission(&named("Buy milk", None), Some("user-1"));

        let echoed = written_or_echo("", &submitted, &clock).expect("echo");
        assert_eq!(echoed, submitted);

        let written = written_or_echo(
            r#"[{"id": 5, "name": "Buy milk", "created_at": "2026-02-16T12:00:00Z"}]"#,
            &submitted,
            &clock,
        )
        .expect("server row");
        assert_eq!(written.id, 5);
        assert_eq!(written.created_at, Some(fixed_time().naive_utc()));
    }

    #[tokio::test]
    async fn create_assigns_id_owner_and_created_at() {
        let api = api();
        let created = api
            .create("token", &named("Buy milk", None), Some("user-1"))
            .await
            .expect("create");

        assert_eq!(created.id, 1);
        assert_eq!(created.user_id.as_deref(), Some("user-1"));
        assert_eq!(created.created_at, Some(fixed_time().naive_utc()));
    }

    #[tokio::test]
    async fn empty_write_responses_echo_the_request() {
        let api = api();
        api.set_empty_write_responses(true).expect("toggle echo");

        let echoed = api
            .create("token", &named("Buy milk", None), Some("user-1"))
            .await
            .expect("create");

        assert_eq!(echoed.id, 0);
        assert_eq!(echoed.created_at, None);
        let rows = api.rows().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[tokio::test]
    async fn list_filters_by_owner_and_applies_order() {
        let api = api();
        for (name, offset, owner) in [
            ("C", None, "user-1"),
            ("B", Some(24), "user-1"),
            ("A", Some(-24), "user-1"),
            ("Z", Some(-48), "user-2"),
        ] {
            api.create("token", &named(name, offset.and_then(due)), Some(owner))
                .await
                .expect("seed");
        }

        let listed = api
            .list("token", Some("user-1"), Some(SortOrder::DueSoonFirst))
            .await
            .expect("list");
        let names = listed.iter().map(|todo| todo.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B", "C"]);

        let everyone = api.list("token", None, None).await.expect("list all");
        assert_eq!(everyone.len(), 4);
    }

    #[tokio::test]
    async fn update_keeps_owner_and_creation_time() {
        let api = api();
        let created = api
            .create("token", &named("Draft", None), Some("user-1"))
            .await
            .expect("create");

        let edited = Todo {
            name: "Final".to_string(),
            user_id: None,
            created_at: None,
            ..created.clone()
        };
        let updated = api.update("token", &edited).await.expect("update");

        assert_eq!(updated.name, "Final");
        assert_eq!(updated.user_id, created.user_id);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn offline_and_wrong_token_fail_with_distinct_errors() {
        let api = api().with_required_token("good");
        assert!(matches!(
            api.list("stale", None, None).await,
            Err(InfraError::Unauthorized(_))
        ));

        api.set_offline(true).expect("go offline");
        assert!(matches!(
            api.delete("good", 1).await,
            Err(InfraError::Network(_))
        ));
    }
}
