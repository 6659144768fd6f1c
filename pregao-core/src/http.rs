//! HTTP content sources for the B3 historical quote archives.
//!
//! B3 publishes `COTAHIST_D<ddmmyyyy>.ZIP` (daily) and
//! `COTAHIST_M<mmyyyy>.ZIP` (monthly) files. [`HttpDateSource`] addresses the
//! daily files directly; [`HttpListingSource`] scrapes a listing page for
//! whatever links are currently published.
//!
//! Neither source retries. A failed date is reported and picked up again by
//! reconciliation on the next run.

use crate::calendar::PeriodKey;
use crate::error::SourceError;
use crate::source::{Coverage, DateSource, DiscoverySource, Locator};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

/// HTTP client settings shared by both sources.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) pregao".to_string(),
        }
    }
}

fn build_client(settings: &HttpSettings) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(settings.timeout)
        .user_agent(settings.user_agent.clone())
        .build()
        .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))
}

/// GET `url`, mapping "not published" responses to `None`.
///
/// 404/410 and empty bodies are "not published". B3 also answers missing
/// files with a 200 HTML error page, which is treated the same way.
fn get_optional(client: &Client, url: &str) -> Result<Option<Vec<u8>>, SourceError> {
    let resp = client.get(url).send()?;
    let status = resp.status();

    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        debug!(url, %status, "not published");
        return Ok(None);
    }
    if !status.is_success() {
        return Err(SourceError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = resp.bytes()?;
    if body.is_empty() || looks_like_html(&body) {
        debug!(url, bytes = body.len(), "empty or HTML body, treating as not published");
        return Ok(None);
    }
    Ok(Some(body.to_vec()))
}

fn looks_like_html(body: &[u8]) -> bool {
    body.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}

/// Render a URL template such as `.../COTAHIST_D{%d%m%Y}.ZIP` for `date`.
///
/// The text between the first `{` and the following `}` is a chrono format
/// string. Returns `None` when the template has no placeholder or the
/// placeholder is not a valid format.
pub fn render_url(template: &str, date: NaiveDate) -> Option<String> {
    let open = template.find('{')?;
    let close = open + template[open..].find('}')?;
    let format = &template[open + 1..close];
    if format.is_empty() {
        return None;
    }
    let mut url = String::with_capacity(template.len());
    url.push_str(&template[..open]);
    // chrono reports unknown specifiers through fmt::Error
    write!(url, "{}", date.format(format)).ok()?;
    url.push_str(&template[close + 1..]);
    Some(url)
}

/// Date-addressed source: one URL per calendar date.
pub struct HttpDateSource {
    client: Client,
    url_template: String,
}

impl HttpDateSource {
    pub fn new(url_template: impl Into<String>, settings: &HttpSettings) -> Result<Self, SourceError> {
        let url_template = url_template.into();
        if render_url(&url_template, NaiveDate::MIN).is_none() {
            return Err(SourceError::InvalidLocator(url_template));
        }
        Ok(Self {
            client: build_client(settings)?,
            url_template,
        })
    }

    pub fn url_for(&self, date: NaiveDate) -> String {
        // validated in `new`
        render_url(&self.url_template, date).unwrap_or_else(|| self.url_template.clone())
    }
}

impl DateSource for HttpDateSource {
    fn name(&self) -> &str {
        "b3_http_daily"
    }

    fn fetch(&self, date: NaiveDate) -> Result<Option<Vec<u8>>, SourceError> {
        let url = self.url_for(date);
        debug!(%date, url = %url, "fetching");
        get_optional(&self.client, &url)
    }
}

/// Discovery source: scrapes `<a href>` links off a listing page.
pub struct HttpListingSource {
    client: Client,
    listing_url: String,
}

impl HttpListingSource {
    pub fn new(listing_url: impl Into<String>, settings: &HttpSettings) -> Result<Self, SourceError> {
        let listing_url = listing_url.into();
        Url::parse(&listing_url).map_err(|_| SourceError::InvalidLocator(listing_url.clone()))?;
        Ok(Self {
            client: build_client(settings)?,
            listing_url,
        })
    }
}

impl DiscoverySource for HttpListingSource {
    fn name(&self) -> &str {
        "b3_http_listing"
    }

    fn discover(&self) -> Result<BTreeMap<PeriodKey, Vec<Locator>>, SourceError> {
        let resp = self.client.get(&self.listing_url).send()?.error_for_status()?;
        let html = resp.text()?;
        parse_listing(&html, &self.listing_url)
    }

    fn fetch_locator(&self, locator: &Locator) -> Result<Option<Vec<u8>>, SourceError> {
        debug!(%locator, "fetching");
        get_optional(&self.client, locator.as_str())
    }
}

/// Extract COTAHIST links from a listing page, grouped by month.
///
/// Relative links are resolved against `base_url`. Links whose file name
/// carries no recognisable daily or monthly token are ignored. Monthly
/// archives are [`Coverage::Full`] and daily ones [`Coverage::Partial`].
/// Within a month, full links come first; otherwise links keep document
/// order and duplicates are dropped.
pub fn parse_listing(html: &str, base_url: &str) -> Result<BTreeMap<PeriodKey, Vec<Locator>>, SourceError> {
    let base = Url::parse(base_url).map_err(|_| SourceError::InvalidLocator(base_url.to_string()))?;
    let selector = Selector::parse("a[href]").map_err(|e| SourceError::Listing(e.to_string()))?;
    let document = Html::parse_document(html);

    let mut grouped: BTreeMap<PeriodKey, Vec<Locator>> = BTreeMap::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        let Some((period, coverage)) = period_from_file_name(file_name) else {
            continue;
        };
        let locator = match coverage {
            Coverage::Full => Locator::new(url.as_str()),
            Coverage::Partial => Locator::partial(url.as_str()),
        };
        let links = grouped.entry(period).or_default();
        if !links.contains(&locator) {
            links.push(locator);
        }
    }
    for links in grouped.values_mut() {
        links.sort_by_key(Locator::coverage);
    }
    Ok(grouped)
}

/// `COTAHIST_D02012024.ZIP` → 2024-01, `COTAHIST_M012024.ZIP` → 2024-01.
fn period_from_file_name(file_name: &str) -> Option<(PeriodKey, Coverage)> {
    let upper = file_name.to_ascii_uppercase();
    let rest = upper.strip_prefix("COTAHIST_")?;
    let (kind, rest) = rest.split_at_checked(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    match (kind, digits.len()) {
        ("D", 8) => {
            let date = NaiveDate::parse_from_str(&digits, "%d%m%Y").ok()?;
            Some((PeriodKey::of(date), Coverage::Partial))
        }
        ("M", 6) => {
            let month: u32 = digits[..2].parse().ok()?;
            let year: i32 = digits[2..].parse().ok()?;
            PeriodKey::new(year, month).map(|period| (period, Coverage::Full))
        }
        _ => None,
    }
}
