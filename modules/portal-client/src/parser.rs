// Profile page → ProfileRecord.
//
// The platform renders profiles server-side; every field we want is in the
// static HTML, so plain CSS selection is enough. Selectors are tried in order
// and the first non-empty match wins, since the markup varies between
// profile layouts.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use profilesync_common::time::format_date;
use profilesync_common::{AccountStatus, ProfileRecord};

use crate::error::{PortalError, Result};

/// Phrases the platform shows on suspended accounts (lowercase).
const SUSPENSION_PHRASES: &[&str] = &[
    "accounts suspend",
    "aik se zyada fake accounts",
    "abuse ya harassment",
    "kisi aur user ki identity apnana",
    "account suspended",
];

/// Values the platform renders in place of an empty field (lowercase).
const PLACEHOLDERS: &[&str] = &[
    "no city",
    "not set",
    "no set",
    "[no posts]",
    "[no post url]",
    "[error]",
    "n/a",
    "none",
    "null",
];

static PROFILE_HEADING: LazyLock<Selector> = LazyLock::new(|| sel("h1.cxl.clb.lsp"));
static LABEL: LazyLock<Selector> = LazyLock::new(|| sel("b"));
static TOMATO_BANNER: LazyLock<Selector> = LazyLock::new(|| sel("div[style*='tomato']"));
static INTRO: LazyLock<Vec<Selector>> =
    LazyLock::new(|| sels(&["span.cl.sp.lsp.nos", "span.cl", ".ow span.nos"]));
static FOLLOWERS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| sels(&["span.cl.sp.clb", ".cl.sp.clb"]));
static POST_COUNT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "a[href*='/profile/public/'] button div:first-child",
        "a[href*='/profile/public/'] button div",
    ])
});
static AVATAR: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "img[src*='avatar-imgs']",
        "img[src*='avatar']",
        "div[style*='whitesmoke'] img[src*='cloudfront.net']",
    ])
});
static CSRF_INPUT: LazyLock<Selector> =
    LazyLock::new(|| sel("input[name='csrfmiddlewaretoken']"));
static ONLINE_NICK: LazyLock<Selector> = LazyLock::new(|| sel("li bdi"));
static POST_ARTICLE: LazyLock<Selector> = LazyLock::new(|| sel("article.mbl"));
static POST_LINK: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "a[href*='/content/']",
        "a[href*='/comments/text/']",
        "a[href*='/comments/image/']",
    ])
});
static POST_TIME: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "span[itemprop='datePublished']",
        "time[itemprop='datePublished']",
        "span.cxs.cgy",
        "time",
    ])
});

static RE_UNVERIFIED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)>\s*unverified\s*user\s*<").expect("valid regex"));
static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));
static RE_RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|months?|years?)\s*ago",
    )
    .expect("valid regex")
});
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

fn sels(css: &[&str]) -> Vec<Selector> {
    css.iter().map(|c| sel(c)).collect()
}

/// Most recent post on a profile's public post page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPost {
    pub url: String,
    /// Absolute date (`dd-Mon-yy`) when the page shows a relative time.
    pub time: String,
}

/// Parse a rendered profile page.
///
/// Suspended and unverified accounts short-circuit: only the status and a
/// reason in `intro` are filled in, the remaining fields stay empty.
pub fn parse_profile(
    html: &str,
    nickname: &str,
    base: &Url,
    now: DateTime<Utc>,
) -> Result<ProfileRecord> {
    let doc = Html::parse_document(html);
    if doc.select(&PROFILE_HEADING).next().is_none() {
        return Err(PortalError::Parse(format!(
            "profile heading missing on page for '{nickname}'"
        )));
    }

    let mut record = ProfileRecord::new(nickname);
    record.captured_at = now;
    record.profile_link = profile_url(base, nickname)?
        .as_str()
        .trim_end_matches('/')
        .to_string();
    record.post_url = posts_url(base, nickname)?.to_string();

    let status = account_status(&doc, html);
    if status != AccountStatus::Verified {
        record.status = status;
        record.intro = match status {
            AccountStatus::Banned => "Account Suspended",
            _ => "Account Unverified",
        }
        .to_string();
        return Ok(record);
    }

    if let Some(v) = labelled_value(&doc, "City:") {
        record.city = clean_placeholder(&v);
    }
    if let Some(v) = labelled_value(&doc, "Gender:") {
        record.gender = normalize_gender(&v).to_string();
    }
    if let Some(v) = labelled_value(&doc, "Married:") {
        record.married = normalize_married(&v).to_string();
    }
    if let Some(v) = labelled_value(&doc, "Age:") {
        record.age = clean_placeholder(&v);
    }
    if let Some(v) = labelled_value(&doc, "Joined:") {
        record.joined = relative_to_date(&v, now);
    }

    if let Some(intro) = first_text(&doc, &INTRO) {
        record.intro = intro;
    }
    if let Some(n) = first_number(&doc, &FOLLOWERS) {
        record.followers = n;
    }
    if let Some(n) = first_number(&doc, &POST_COUNT) {
        record.posts = n;
    }
    record.image = avatar(&doc).unwrap_or_default();

    Ok(record)
}

/// Parse the first post on a profile's public post page. `None` when the
/// profile has no posts.
pub fn parse_last_post(html: &str, base: &Url, now: DateTime<Utc>) -> Option<LastPost> {
    let doc = Html::parse_document(html);
    let article = doc.select(&POST_ARTICLE).next()?;

    let url = POST_LINK
        .iter()
        .filter_map(|s| article.select(s).next())
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| base.join(href).ok())
        .map(String::from)
        .unwrap_or_default();

    let time = POST_TIME
        .iter()
        .filter_map(|s| article.select(s).next())
        .map(|e| text_of(&e))
        .find(|t| !t.is_empty())
        .map(|t| relative_to_date(&t, now))
        .unwrap_or_default();

    Some(LastPost { url, time })
}

/// Hidden CSRF token of the login form, if the page carries one.
pub fn login_form_token(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&CSRF_INPUT)
        .filter_map(|input| input.value().attr("value"))
        .find(|v| !v.is_empty())
        .map(String::from)
}

/// Nicknames on the online-users page, in page order without repeats.
pub fn parse_online_nicknames(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    doc.select(&ONLINE_NICK)
        .map(|bdi| text_of(&bdi))
        .filter(|nick| !nick.is_empty())
        .filter(|nick| seen.insert(nick.clone()))
        .collect()
}

pub fn profile_url(base: &Url, nickname: &str) -> Result<Url> {
    let mut url = with_nickname(base, "users/", nickname)?;
    url.path_segments_mut()
        .map_err(|_| PortalError::Parse(format!("base URL {base} cannot carry a path")))?
        .push("");
    Ok(url)
}

pub fn posts_url(base: &Url, nickname: &str) -> Result<Url> {
    with_nickname(base, "profile/public/", nickname)
}

/// `base` + `prefix` + the nickname as one percent-encoded path segment.
fn with_nickname(base: &Url, prefix: &str, nickname: &str) -> Result<Url> {
    let nickname = nickname.trim();
    if nickname.is_empty() || nickname == "." || nickname == ".." {
        return Err(PortalError::NotFound(nickname.to_string()));
    }
    let mut url = base.join(prefix)?;
    url.path_segments_mut()
        .map_err(|_| PortalError::Parse(format!("base URL {base} cannot carry a path")))?
        .pop_if_empty()
        .push(nickname);
    Ok(url)
}

fn account_status(doc: &Html, html: &str) -> AccountStatus {
    let lower = html.to_lowercase();
    if SUSPENSION_PHRASES.iter().any(|p| lower.contains(p)) {
        return AccountStatus::Banned;
    }
    if RE_UNVERIFIED.is_match(html)
        || lower.contains("background:tomato")
        || doc.select(&TOMATO_BANNER).next().is_some()
    {
        return AccountStatus::Unverified;
    }
    AccountStatus::Verified
}

/// Text of the first `<span>` following a `<b>` label such as `City:`.
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    doc.select(&LABEL)
        .filter(|b| text_of(b).contains(label))
        .find_map(|b| {
            b.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "span")
                .map(|span| text_of(&span))
        })
        .filter(|v| !v.is_empty())
}

fn first_text(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| doc.select(s).next())
        .map(|e| text_of(&e))
        .find(|t| !t.is_empty())
}

fn first_number(doc: &Html, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| doc.select(s).next())
        .find_map(|e| RE_NUMBER.find(&text_of(&e)).map(|m| m.as_str().replace(',', "")))
}

fn avatar(doc: &Html) -> Option<String> {
    AVATAR
        .iter()
        .filter_map(|s| doc.select(s).next())
        .filter_map(|img| img.value().attr("src"))
        .find(|src| src.contains("avatar") || src.contains("cloudfront.net"))
        .map(|src| src.replace("/thumbnail/", "/"))
}

/// Element text with whitespace (including NBSP) collapsed.
fn text_of(e: &ElementRef) -> String {
    let raw = e.text().collect::<String>().replace('\u{a0}', " ");
    RE_WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

/// Blank out the platform's stand-in values ("Not set", "No city", ...).
pub fn clean_placeholder(value: &str) -> String {
    let value = RE_WHITESPACE
        .replace_all(value.replace('\u{a0}', " ").trim(), " ")
        .into_owned();
    if PLACEHOLDERS.iter().any(|p| value.eq_ignore_ascii_case(p)) {
        String::new()
    } else {
        value
    }
}

pub fn normalize_gender(value: &str) -> &'static str {
    let lower = value.to_lowercase();
    if lower.contains("female") {
        "Female"
    } else if lower.contains("male") {
        "Male"
    } else {
        ""
    }
}

pub fn normalize_married(value: &str) -> &'static str {
    match value.trim().to_lowercase().as_str() {
        "yes" | "married" => "Yes",
        "no" | "single" | "unmarried" => "No",
        _ => "",
    }
}

/// Convert "3 days ago" style text to an absolute `dd-Mon-yy` date in PKT.
/// Text that isn't a relative time is returned unchanged.
pub fn relative_to_date(text: &str, now: DateTime<Utc>) -> String {
    let Some(caps) = RE_RELATIVE.captures(text) else {
        return text.trim().to_string();
    };
    let Ok(amount) = caps[1].parse::<i64>() else {
        return text.trim().to_string();
    };

    let unit = caps[2].to_lowercase();
    let seconds_per = if unit.starts_with("mo") {
        2_592_000
    } else if unit.starts_with("mi") {
        60
    } else if unit.starts_with('s') {
        1
    } else if unit.starts_with('h') {
        3_600
    } else if unit.starts_with('d') {
        86_400
    } else if unit.starts_with('w') {
        604_800
    } else {
        31_536_000
    };

    format_date(now - Duration::seconds(amount.saturating_mul(seconds_per)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> Url {
        Url::parse("https://damadam.pk/").unwrap()
    }

    fn now() -> DateTime<Utc> {
        // 15:00 PKT
        Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
    }

    const PROFILE_HTML: &str = r#"
        <html><body>
          <h1 class="cxl clb lsp">alice</h1>
          <div class="ow">
            <b>City:</b> <span>Lahore</span><br>
            <b>Gender:</b> <span>FEMALE</span><br>
            <b>Married:</b> <span>Single</span><br>
            <b>Age:</b> <span>Not set</span><br>
            <b>Joined:</b> <span>2 years ago</span><br>
          </div>
          <span class="cl sp lsp nos">  Hello&nbsp;there
             world </span>
          <span class="cl sp clb">1,234 followers</span>
          <a href="/profile/public/alice"><button><div>57</div><div>posts</div></button></a>
          <img src="https://cdn.example.cloudfront.net/avatar-imgs/thumbnail/alice.jpg">
        </body></html>
    "#;

    #[test]
    fn verified_profile_fields_are_extracted() {
        let record = parse_profile(PROFILE_HTML, "alice", &base(), now()).unwrap();
        assert_eq!(record.nickname, "alice");
        assert_eq!(record.city, "Lahore");
        assert_eq!(record.gender, "Female");
        assert_eq!(record.married, "No");
        assert_eq!(record.age, "");
        assert_eq!(record.joined, "15-Oct-24");
        assert_eq!(record.intro, "Hello there world");
        assert_eq!(record.followers, "1234");
        assert_eq!(record.posts, "57");
        assert_eq!(
            record.image,
            "https://cdn.example.cloudfront.net/avatar-imgs/alice.jpg"
        );
        assert_eq!(record.status, AccountStatus::Verified);
        assert_eq!(record.profile_link, "https://damadam.pk/users/alice");
        assert_eq!(record.post_url, "https://damadam.pk/profile/public/alice");
        assert_eq!(record.captured_at, now());
    }

    #[test]
    fn suspended_profile_short_circuits() {
        let html = r#"<h1 class="cxl clb lsp">bob</h1>
            <p>Yeh account suspend hai: aik se zyada fake accounts</p>
            <b>City:</b> <span>Karachi</span>"#;
        let record = parse_profile(html, "bob", &base(), now()).unwrap();
        assert_eq!(record.status, AccountStatus::Banned);
        assert_eq!(record.intro, "Account Suspended");
        assert!(record.city.is_empty());
    }

    #[test]
    fn tomato_banner_means_unverified() {
        let html = r#"<h1 class="cxl clb lsp">carol</h1>
            <div style="background:tomato;color:white">UNVERIFIED USER</div>"#;
        let record = parse_profile(html, "carol", &base(), now()).unwrap();
        assert_eq!(record.status, AccountStatus::Unverified);
        assert_eq!(record.intro, "Account Unverified");
    }

    #[test]
    fn page_without_heading_is_a_parse_error() {
        let err = parse_profile("<html><body>maintenance</body></html>", "dan", &base(), now())
            .unwrap_err();
        assert!(matches!(err, PortalError::Parse(_)));
    }

    #[test]
    fn last_post_link_is_absolute_and_time_is_dated() {
        let html = r#"
            <article class="mbl">
              <a href="/comments/text/98765/">reply</a>
              <span itemprop="datePublished">3 days ago</span>
            </article>
            <article class="mbl"><a href="/content/1/">older</a></article>"#;
        let post = parse_last_post(html, &base(), now()).unwrap();
        assert_eq!(post.url, "https://damadam.pk/comments/text/98765/");
        assert_eq!(post.time, "12-Oct-26");
    }

    #[test]
    fn login_form_token_is_read_from_hidden_input() {
        let html = r#"<form method="post">
            <input type="hidden" name="csrfmiddlewaretoken" value="tok123">
            <input id="nick" name="nick"><input id="pass" name="pass" type="password">
        </form>"#;
        assert_eq!(login_form_token(html).as_deref(), Some("tok123"));
        assert!(login_form_token("<form></form>").is_none());
    }

    #[test]
    fn no_articles_means_no_last_post() {
        assert!(parse_last_post("<p>No posts yet</p>", &base(), now()).is_none());
    }

    #[test]
    fn nickname_stays_a_single_path_segment() {
        assert_eq!(
            profile_url(&base(), "alice").unwrap().as_str(),
            "https://damadam.pk/users/alice/"
        );
        assert_eq!(
            profile_url(&base(), "a/b?c#d").unwrap().as_str(),
            "https://damadam.pk/users/a%2Fb%3Fc%23d/"
        );
        assert_eq!(
            posts_url(&base(), "a/../b").unwrap().as_str(),
            "https://damadam.pk/profile/public/a%2F..%2Fb"
        );
        assert!(matches!(profile_url(&base(), ".."), Err(PortalError::NotFound(_))));
        assert!(matches!(posts_url(&base(), " "), Err(PortalError::NotFound(_))));
    }

    #[test]
    fn online_nicknames_keep_order_and_drop_repeats() {
        let html = r#"<ul>
            <li><a href="/users/zara/"><bdi>zara</bdi></a></li>
            <li><a href="/users/ali/"><bdi> ali </bdi></a></li>
            <li><bdi></bdi></li>
            <li><a href="/users/zara/"><bdi>zara</bdi></a></li>
        </ul><p><bdi>footer</bdi></p>"#;
        assert_eq!(parse_online_nicknames(html), vec!["zara", "ali"]);
    }

    #[test]
    fn relative_dates_cover_unit_spellings() {
        assert_eq!(relative_to_date("5 mins ago", now()), "15-Oct-26");
        assert_eq!(relative_to_date("20 hrs ago", now()), "14-Oct-26");
        assert_eq!(relative_to_date("1 week ago", now()), "08-Oct-26");
        assert_eq!(relative_to_date("2 months ago", now()), "16-Aug-26");
        assert_eq!(relative_to_date("just now", now()), "just now");
        assert_eq!(relative_to_date(" 01-Jan-20 ", now()), "01-Jan-20");
    }

    #[test]
    fn placeholders_are_blanked() {
        assert_eq!(clean_placeholder("No City"), "");
        assert_eq!(clean_placeholder("[No Posts]"), "");
        assert_eq!(clean_placeholder("  Multan\u{a0} Cantt "), "Multan Cantt");
    }

    #[test]
    fn gender_and_married_normalize() {
        assert_eq!(normalize_gender("Male"), "Male");
        assert_eq!(normalize_gender("female"), "Female");
        assert_eq!(normalize_gender("?"), "");
        assert_eq!(normalize_married("Married"), "Yes");
        assert_eq!(normalize_married("unmarried"), "No");
        assert_eq!(normalize_married("maybe"), "");
    }
}
