//! Raw-payload store.
//!
//! Every byte delivered to a parser is persisted here first, gzip-compressed
//! and linked to its scrape session, enabling post-mortem re-parsing.

use crate::data::models::{RawPayload, Source};
use crate::error::Result;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sqlx::PgPool;
use std::io::{Read, Write};

#[derive(Clone)]
pub struct RawPayloadStore {
    pool: PgPool,
}

/// What to persist for one fetched page.
pub struct SavePayload<'a> {
    pub session_id: i64,
    pub source: Source,
    pub source_url: &'a str,
    pub body: &'a [u8],
    pub content_type: Option<&'a str>,
    pub http_status: u16,
}

impl RawPayloadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Compress and insert one payload row. Only propagates DB errors;
    /// compression of arbitrary bytes cannot fail.
    pub async fn save(&self, payload: SavePayload<'_>) -> Result<i64> {
        let compressed = compress(payload.body);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO raw_payloads (session_id, source, source_url, body_gzip, content_type, http_status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(payload.session_id)
        .bind(payload.source.as_str())
        .bind(payload.source_url)
        .bind(&compressed)
        .bind(payload.content_type)
        .bind(i32::from(payload.http_status))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn list_for_session(&self, session_id: i64) -> Result<Vec<RawPayload>> {
        let payloads = sqlx::query_as::<_, RawPayload>(
            "SELECT * FROM raw_payloads WHERE session_id = $1 ORDER BY scraped_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payloads)
    }
}

pub fn compress(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    // Writing to a Vec cannot fail
    encoder.write_all(body).expect("gzip write to Vec");
    encoder.finish().expect("gzip finish to Vec")
}

pub fn decompress(body_gzip: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body_gzip);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let cases: [&[u8]; 3] = [
            b"",
            b"<html><body>LEGO Star Wars UCS Millennium Falcon 75192</body></html>",
            &[0u8, 1, 2, 255, 254, 253],
        ];
        for body in cases {
            assert_eq!(decompress(&compress(body)).unwrap(), body);
        }
    }
}
