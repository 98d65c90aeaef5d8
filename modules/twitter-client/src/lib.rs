pub mod error;
pub mod types;

pub use error::{Result, TwitterError};
pub use types::{SearchResponse, TrendEntry, TrendsResponse, VerifiedUser};

use async_stream::try_stream;
use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;

const API_BASE_URL: &str = "https://api.twitter.com/1.1";
const STREAM_BASE_URL: &str = "https://stream.twitter.com/1.1";

/// Results per page on the search endpoint (upstream maximum).
const SEARCH_PAGE_SIZE: u32 = 100;

pub struct TwitterClient {
    client: reqwest::Client,
    token: String,
}

impl TwitterClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Open a filtered realtime stream for the given track terms.
    ///
    /// Returns a lazy, unbounded sequence of raw post payloads. Blank
    /// keep-alive lines are skipped. Any transport failure, and the stream
    /// ending on its own, surface as an `Err` item so callers can
    /// distinguish failure from close; the stream never just runs dry.
    pub async fn filter_stream(
        &self,
        track: &[String],
    ) -> Result<BoxStream<'static, Result<serde_json::Value>>> {
        let url = format!("{STREAM_BASE_URL}/statuses/filter.json");
        tracing::info!(terms = track.len(), "Opening filtered stream");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&[("track", track.join(","))])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 420 || status.as_u16() == 429 {
            return Err(TwitterError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut body = resp.bytes_stream();
        let stream = try_stream! {
            let mut buf = BytesMut::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| TwitterError::Network(e.to_string()))?;
                buf.extend_from_slice(&chunk);

                // The stream delimits messages with \r\n; a bare \r\n is a
                // keep-alive.
                while let Some(pos) = find_delimiter(&buf) {
                    let line = buf.split_to(pos + 2);
                    let line = &line[..pos];
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let value: serde_json::Value = serde_json::from_slice(line)?;
                    yield value;
                }
            }
            // Ran dry without a transport error: upstream hung up.
            Err(TwitterError::StreamClosed)?;
        };

        Ok(stream.boxed())
    }

    /// Run one page of the standard search endpoint.
    pub async fn search_tweets(
        &self,
        query: &str,
        max_id: Option<&str>,
    ) -> Result<SearchResponse> {
        let url = format!("{API_BASE_URL}/search/tweets.json");
        let count = SEARCH_PAGE_SIZE.to_string();
        let mut req = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("q", query), ("count", count.as_str())]);
        if let Some(max_id) = max_id {
            req = req.query(&[("max_id", max_id)]);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(TwitterError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let page: SearchResponse = resp.json().await?;
        tracing::debug!(query, count = page.statuses.len(), "Search page fetched");
        Ok(page)
    }

    /// Fetch all pages for a query up to `max_pages`, oldest id wins paging.
    pub async fn search_all(
        &self,
        query: &str,
        max_pages: u32,
    ) -> Result<Vec<serde_json::Value>> {
        let mut results = Vec::new();
        let mut max_id: Option<String> = None;

        for _ in 0..max_pages {
            let page = self.search_tweets(query, max_id.as_deref()).await?;
            if page.statuses.is_empty() {
                break;
            }
            // Page backwards: next request starts just below the oldest id
            // seen, per the search API's max_id contract.
            max_id = page
                .statuses
                .last()
                .and_then(|s| s.get("id_str"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|id| (id - 1).to_string());
            results.extend(page.statuses);
            if max_id.is_none() {
                break;
            }
        }

        tracing::info!(query, total = results.len(), "Search complete");
        Ok(results)
    }

    /// Current trending topics for a place (WOEID).
    pub async fn trends_for_place(&self, place_id: &str) -> Result<TrendsResponse> {
        let url = format!("{API_BASE_URL}/trends/place.json");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("id", place_id)])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(TwitterError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let mut responses: Vec<TrendsResponse> = resp.json().await?;
        responses
            .pop()
            .ok_or_else(|| TwitterError::Parse("empty trends response".to_string()))
    }

    /// Check that the configured credentials are usable.
    pub async fn verify_credentials(&self) -> Result<VerifiedUser> {
        let url = format!("{API_BASE_URL}/account/verify_credentials.json");
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

/// Find the first \r\n in the buffer.
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_found_mid_buffer() {
        assert_eq!(find_delimiter(b"{\"a\":1}\r\n{\"b\""), Some(7));
        assert_eq!(find_delimiter(b"no delimiter"), None);
        assert_eq!(find_delimiter(b"\r\n"), Some(0));
    }
}
