//! Retirement tracker page parser.
//!
//! The tracker lists every tracked set across all themes on one page; a
//! single fetch yields one batch per sweep. Rows look like:
//! `<tr class="set-row" data-theme="Star Wars"> ... </tr>`.

use super::{ParsedRetirementSet, body_str};
use crate::currency::parse_cents;
use crate::error::ScrapeError;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static SET_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<tr\s+class="set-row"\s+data-theme="([^"]*)">(.*?)</tr>"#,
    )
    .unwrap()
});
static SET_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-set-number="([0-9]{3,7})""#).unwrap());
static SET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<td class="set-name">([^<]+)</td>"#).unwrap());
static RETAIL_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<td class="retail-price">\$([0-9.,]+)</td>"#).unwrap());
static RETIRE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<td class="retirement-date">(\d{4}-\d{2}-\d{2})</td>"#).unwrap());
static STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<td class="status">([^<]+)</td>"#).unwrap());

/// Extract every set row from the tracker page.
///
/// An empty page is a parse error, not an empty batch: the tracker always
/// lists thousands of sets, so zero rows means the markup changed or the
/// page only partially loaded.
pub fn parse_tracker_page(body: &[u8], url: &str) -> Result<Vec<ParsedRetirementSet>, ScrapeError> {
    let html = body_str(body);

    let mut sets = Vec::new();
    for row in SET_ROW.captures_iter(&html) {
        let theme = htmlize::unescape(&row[1]).into_owned();
        let cells = &row[2];

        let Some(number) = SET_NUMBER.captures(cells) else {
            continue; // header or spacer row
        };

        sets.push(ParsedRetirementSet {
            set_number: number[1].to_string(),
            theme: Some(theme),
            name: SET_NAME
                .captures(cells)
                .map(|c| htmlize::unescape(c[1].trim()).into_owned()),
            retail_price_cents: RETAIL_PRICE.captures(cells).and_then(|c| parse_cents(&c[1]).ok()),
            expected_retirement_date: RETIRE_DATE
                .captures(cells)
                .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok()),
            retirement_status: STATUS.captures(cells).map(|c| c[1].trim().to_string()),
        });
    }

    if sets.is_empty() {
        return Err(ScrapeError::Parse(format!(
            "no set rows on retirement tracker page {url}"
        )));
    }

    Ok(sets)
}
