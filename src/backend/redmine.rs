use crate::ticket::{CustomField, Ticket, TicketBackend, TicketRef, User, UserDirectory};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method, RequestBuilder, Response,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;
use url::Url;

const API_KEY_HEADER: &str = "X-Redmine-API-Key";
const DEFAULT_PAGE_SIZE: usize = 100;

/// Redmine REST adapter for issues and users.
pub struct RedmineBackend {
    site: Url,
    api_key: Option<String>,
    username: Option<String>,
    password: Option<String>,
    headers: HeaderMap,
    page_size: usize,
    client: Client,
}

impl RedmineBackend {
    pub fn new(
        site: &str,
        api_key: &Option<String>,
        username: &Option<String>,
        password: &Option<String>,
        headers: &Option<HashMap<String, String>>,
        page_size: Option<usize>,
    ) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with a slash.
        let mut site = site.trim().to_string();
        if !site.ends_with('/') {
            site.push('/');
        }
        let site = Url::parse(&site).with_context(|| format!("invalid redmine site {}", site))?;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers.iter().flatten() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid header name {}", key))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {}", key))?;
            header_map.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(crate::version::get_useragent())
            .build()?;

        Ok(Self {
            site,
            api_key: api_key.clone(),
            username: username.clone(),
            password: password.clone(),
            headers: header_map,
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            client,
        })
    }

    pub fn site(&self) -> &Url {
        &self.site
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.site
            .join(path)
            .with_context(|| format!("invalid redmine path {}", path))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(ref api_key) = self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }
        if let Some(ref username) = self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }
        request
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("redmine responded {}: {}", status, body))
    }
}

#[async_trait]
impl TicketBackend for RedmineBackend {
    async fn create(&self, ticket: &Ticket) -> Result<TicketRef> {
        let start_time = Instant::now();
        let url = self.endpoint("issues.json")?;
        let response = self
            .request(Method::POST, url)
            .json(&json!({ "issue": ticket }))
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        let id = body
            .pointer("/issue/id")
            .and_then(id_to_string)
            .ok_or_else(|| anyhow!("redmine create response carries no issue id"))?;
        debug!(
            ticket = %id,
            elapsed = start_time.elapsed().as_millis(),
            "redmine issue created"
        );
        Ok(TicketRef(id))
    }

    async fn save(&self, ticket_ref: &TicketRef, ticket: &Ticket) -> Result<()> {
        let start_time = Instant::now();
        let url = self.endpoint(&format!("issues/{}.json", ticket_ref))?;
        let response = self
            .request(Method::PUT, url)
            .json(&json!({ "issue": ticket }))
            .send()
            .await?;
        Self::check(response).await?;
        debug!(
            ticket = %ticket_ref,
            elapsed = start_time.elapsed().as_millis(),
            "redmine issue saved"
        );
        Ok(())
    }

    async fn find(&self, ticket_ref: &TicketRef) -> Result<Ticket> {
        let url = self.endpoint(&format!("issues/{}.json", ticket_ref))?;
        let response = self.request(Method::GET, url).send().await?;
        let body: Value = Self::check(response).await?.json().await?;
        let issue = body
            .get("issue")
            .cloned()
            .ok_or_else(|| anyhow!("redmine issue response carries no issue"))?;
        ticket_from_issue(issue)
    }
}

#[async_trait]
impl UserDirectory for RedmineBackend {
    /// Redmine cannot filter users by login, so every page is fetched.
    async fn find_all(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut url = self.endpoint("users.json")?;
            url.query_pairs_mut()
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("offset", &offset.to_string());
            let response = self.request(Method::GET, url).send().await?;
            let body: Value = Self::check(response).await?.json().await?;
            let page = users_from_page(&body)?;
            let next = page.next_offset(offset);
            users.extend(page.users);
            match next {
                Some(next) => offset = next,
                None => break,
            }
        }
        debug!(users = users.len(), "redmine users listed");
        Ok(users)
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub(crate) fn ticket_from_issue(issue: Value) -> Result<Ticket> {
    let Value::Object(mut fields) = issue else {
        return Err(anyhow!("redmine issue is not an object"));
    };
    let custom_fields = match fields.remove("custom_fields") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(id_to_string)?;
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Some(CustomField { id, value })
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(Ticket {
        fields,
        custom_fields,
    })
}

/// One page of `GET /users.json`.
pub(crate) struct UserPage {
    pub users: Vec<User>,
    /// Entries in the response, including ones skipped as malformed.
    pub fetched: usize,
    pub total: Option<u64>,
}

impl UserPage {
    /// Offset of the following page, or `None` when this was the last one.
    pub fn next_offset(&self, offset: usize) -> Option<usize> {
        let next = offset + self.fetched;
        match self.total {
            Some(total) if self.fetched > 0 && (next as u64) < total => Some(next),
            _ => None,
        }
    }
}

pub(crate) fn users_from_page(body: &Value) -> Result<UserPage> {
    let items = body
        .get("users")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("redmine users response carries no users"))?;
    let users = items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_u64)?;
            let login = item.get("login").and_then(Value::as_str)?;
            Some(User {
                id,
                login: login.to_string(),
            })
        })
        .collect();
    let total = body.get("total_count").and_then(Value::as_u64);
    Ok(UserPage {
        users,
        fetched: items.len(),
        total,
    })
}
