pub mod cookies;
pub mod error;
pub mod parser;

pub use cookies::CookieJar;
pub use error::{PortalError, Result};

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{COOKIE, LOCATION, REFERER};
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};
use url::Url;

use profilesync_common::{AccountStatus, ProfileRecord};

const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A fetched page after following redirects.
struct Page {
    url: Url,
    status: StatusCode,
    body: String,
}

/// Cookie-authenticated client for the platform's server-rendered pages.
///
/// Redirects are followed by hand so `Set-Cookie` headers on intermediate
/// responses (the login POST answers with a redirect) land in the jar.
pub struct PortalClient {
    client: reqwest::Client,
    base_url: Url,
}

impl PortalClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Submit the login form. Success means the platform moved us off the
    /// login page; the returned jar carries the authenticated cookies.
    pub async fn login(&self, username: &str, password: &str) -> Result<CookieJar> {
        let login_url = self.base_url.join("login/")?;
        let mut jar = CookieJar::new();

        let form_page = self
            .navigate(&mut jar, Method::GET, login_url.clone(), None)
            .await?;
        let csrf = parser::login_form_token(&form_page.body)
            .or_else(|| jar.get("csrftoken").map(String::from));

        let mut form = vec![
            ("nick".to_string(), username.to_string()),
            ("pass".to_string(), password.to_string()),
        ];
        if let Some(token) = csrf {
            form.push(("csrfmiddlewaretoken".to_string(), token));
        }

        let landed = self
            .navigate(&mut jar, Method::POST, login_url, Some(form))
            .await?;
        if is_login_page(&landed.url) || !landed.status.is_success() {
            return Err(PortalError::LoginRejected(username.to_string()));
        }

        debug!(username, cookies = jar.len(), "Login accepted");
        Ok(jar)
    }

    /// Lightweight authenticated request: load the home page and check we
    /// weren't bounced to the login form.
    pub async fn probe(&self, jar: &CookieJar) -> Result<bool> {
        let mut jar = jar.clone();
        let page = self
            .navigate(&mut jar, Method::GET, self.base_url.clone(), None)
            .await?;
        if is_login_page(&page.url) {
            return Ok(false);
        }
        if !page.status.is_success() {
            return Err(PortalError::Api {
                status: page.status.as_u16(),
                message: truncate(&page.body, 200),
            });
        }
        Ok(true)
    }

    /// Fetch and parse one profile, plus its most recent post when the
    /// profile has any.
    pub async fn fetch_profile(&self, jar: &CookieJar, nickname: &str) -> Result<ProfileRecord> {
        let mut jar = jar.clone();
        let url = parser::profile_url(&self.base_url, nickname)?;
        let page = self.navigate(&mut jar, Method::GET, url, None).await?;

        if page.status == StatusCode::NOT_FOUND {
            return Err(PortalError::NotFound(nickname.to_string()));
        }
        if is_login_page(&page.url) {
            return Err(PortalError::SessionExpired);
        }
        if !page.status.is_success() {
            return Err(PortalError::Api {
                status: page.status.as_u16(),
                message: truncate(&page.body, 200),
            });
        }

        let now = Utc::now();
        let mut record = parser::parse_profile(&page.body, nickname, &self.base_url, now)?;

        let has_posts = !record.posts.is_empty() && record.posts != "0";
        if record.status == AccountStatus::Verified && has_posts {
            let posts = parser::posts_url(&self.base_url, nickname)?;
            match self.navigate(&mut jar, Method::GET, posts, None).await {
                Ok(page) if page.status.is_success() => {
                    if let Some(post) = parser::parse_last_post(&page.body, &self.base_url, now) {
                        record.last_post = post.url;
                        record.last_post_time = post.time;
                    }
                }
                Ok(page) => {
                    warn!(nickname, status = page.status.as_u16(), "Post page unavailable");
                }
                Err(e @ PortalError::RateLimited { .. }) => return Err(e),
                Err(e) => warn!(nickname, error = %e, "Failed to fetch last post"),
            }
        }

        Ok(record)
    }

    /// Nicknames currently on the platform's online-users page.
    pub async fn online_nicknames(&self, jar: &CookieJar) -> Result<Vec<String>> {
        let mut jar = jar.clone();
        let url = self.base_url.join("online_kon/")?;
        let page = self.navigate(&mut jar, Method::GET, url, None).await?;

        if is_login_page(&page.url) {
            return Err(PortalError::SessionExpired);
        }
        if !page.status.is_success() {
            return Err(PortalError::Api {
                status: page.status.as_u16(),
                message: truncate(&page.body, 200),
            });
        }

        let nicknames = parser::parse_online_nicknames(&page.body);
        debug!(count = nicknames.len(), "Fetched online list");
        Ok(nicknames)
    }

    async fn navigate(
        &self,
        jar: &mut CookieJar,
        mut method: Method,
        mut url: Url,
        mut form: Option<Vec<(String, String)>>,
    ) -> Result<Page> {
        for _ in 0..=MAX_REDIRECTS {
            let mut req = self.client.request(method.clone(), url.clone());
            if let Some(cookie) = jar.header_value() {
                req = req.header(COOKIE, cookie);
            }
            if let Some(ref fields) = form {
                req = req.header(REFERER, url.as_str()).form(fields);
            }

            let resp = req.send().await?;
            jar.absorb(resp.headers());
            let status = resp.status();

            if status.is_redirection() {
                if let Some(location) = resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
                    url = url.join(location)?;
                    method = Method::GET;
                    form = None;
                    continue;
                }
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(PortalError::RateLimited {
                    status: status.as_u16(),
                });
            }

            let body = resp.text().await?;
            return Ok(Page { url, status, body });
        }

        Err(PortalError::Api {
            status: 310,
            message: format!("too many redirects, last hop {url}"),
        })
    }
}

/// The login route is the first path segment; nicknames live deeper.
fn is_login_page(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next())
        .is_some_and(|first| first.eq_ignore_ascii_case("login"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
