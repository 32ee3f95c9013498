//! Link resolver — finds at most one unsubscribe URL per message.
//!
//! Sources are tried in order and the first hit wins:
//! 1. the `List-Unsubscribe` header (first `http` entry),
//! 2. an HTML link whose visible text contains an unsubscribe keyword,
//! 3. an HTML link whose href contains `unsubscribe`.
//!
//! Relative links from the HTML sources are joined onto `https://<domain>`
//! of the sender. Resolution is pure: no network access.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::mailbox::Message;
use crate::pipeline::types::{DiscoveryMethod, UnsubscribeCandidate};

/// Link-text keywords, matched as substrings of the lowercased text.
const LINK_TEXT_KEYWORDS: &[&str] = &[
    "unsubscribe",
    "manage subscription",
    "opt out",
    "opt-out",
    "unsub",
    "cancel subscription",
    "stop emails",
    "remove from list",
];

const HREF_KEYWORD: &str = "unsubscribe";

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

static SENDER_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9.-]+)").expect("static regex"));

/// Resolve the unsubscribe candidate for a message, if any.
pub fn resolve(message: &Message) -> Option<UnsubscribeCandidate> {
    if let Some(url) = message
        .headers
        .get("List-Unsubscribe")
        .and_then(from_list_unsubscribe)
    {
        return Some(UnsubscribeCandidate::new(url, DiscoveryMethod::Header));
    }

    let html = message.html.as_deref()?;
    let links = collect_links(html);

    let (href, method) = links
        .iter()
        .find(|link| {
            LINK_TEXT_KEYWORDS
                .iter()
                .any(|keyword| link.text.contains(keyword))
        })
        .map(|link| (link.href.as_str(), DiscoveryMethod::HtmlKeywordLink))
        .or_else(|| {
            links
                .iter()
                .find(|link| link.href.to_lowercase().contains(HREF_KEYWORD))
                .map(|link| (link.href.as_str(), DiscoveryMethod::HtmlKeywordHref))
        })?;

    let url = absolutize(href, &message.sender);
    debug!(sender = %message.sender, url = %url, method = method.label(), "Resolved from HTML");
    Some(UnsubscribeCandidate::new(url, method))
}

/// First comma-separated entry that is an http(s) URL, without brackets.
fn from_list_unsubscribe(value: &str) -> Option<String> {
    value
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '<' || c == '>'))
        .find(|part| part.to_lowercase().starts_with("http"))
        .map(str::to_string)
}

struct Link {
    /// Visible text, trimmed and lowercased.
    text: String,
    /// Raw href attribute.
    href: String,
}

/// Every `<a href>` in document order.
fn collect_links(html: &str) -> Vec<Link> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            Some(Link {
                text: element.text().collect::<String>().trim().to_lowercase(),
                href: href.to_string(),
            })
        })
        .collect()
}

/// Domain part of a sender address, e.g. `shop.example.com` for
/// `Shop <a@shop.example.com>`.
fn sender_domain(sender: &str) -> Option<&str> {
    SENDER_DOMAIN
        .captures(sender)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('.'))
        .filter(|domain| !domain.is_empty())
}

/// Absolute URLs pass through. Relative ones are joined onto the sender's
/// domain; without a usable domain the href is returned unchanged.
fn absolutize(href: &str, sender: &str) -> String {
    if href.to_lowercase().starts_with("http") {
        return href.to_string();
    }
    sender_domain(sender)
        .and_then(|domain| Url::parse(&format!("https://{domain}")).ok())
        .and_then(|base| base.join(href).ok())
        .map(String::from)
        .unwrap_or_else(|| href.to_string())
}
