//! Community board JSON search parser.
//!
//! The board exposes an unauthenticated JSON search endpoint; a query for a
//! set number returns a listing of posts. Zero hits is a normal outcome (a
//! set nobody talks about), not a not-found signal: the record stores a zero
//! mention count.

use super::ParsedRedditVolume;
use crate::error::ScrapeError;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<PostWrapper>,
}

#[derive(Deserialize)]
struct PostWrapper {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    title: String,
    score: i32,
    created_utc: f64,
}

/// Summarize search results for one set number.
pub fn parse_search_json(
    body: &[u8],
    url: &str,
    set_number: &str,
) -> Result<ParsedRedditVolume, ScrapeError> {
    let listing: Listing = serde_json::from_slice(body)
        .map_err(|e| ScrapeError::Parse(format!("bad board listing from {url}: {e}")))?;

    let posts = listing.data.children;
    let mut volume = ParsedRedditVolume {
        set_number: set_number.to_string(),
        mention_count: posts.len() as i32,
        ..Default::default()
    };

    volume.latest_post_at = posts
        .iter()
        .map(|p| p.data.created_utc)
        .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |a| a.max(t))))
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

    if let Some(top) = posts.iter().max_by_key(|p| p.data.score) {
        volume.top_post_title = Some(top.data.title.clone());
        volume.top_post_score = Some(top.data.score);
    }

    Ok(volume)
}
