//! The jandan picture-comment API.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::{Error, Result, error::Context as _};

pub const API_URL: &str = "https://i.jandan.net/?oxwlxojflwblxbsapi=jandan.get_pic_comments";
pub const CDN_URL: &str = "https://img.toto.im/large";

/// One picture post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Post {
    #[serde(rename = "comment_ID")]
    pub id: String,
    #[serde(rename = "comment_author", default)]
    pub author: String,
    /// `YYYY-MM-DD HH:MM:SS`, site local time.
    #[serde(rename = "comment_date", default)]
    pub date: String,
    #[serde(default)]
    pub pics: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub comments: Vec<Post>,
}

/// Where picture posts come from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Page `page` of the feed; `0` is the newest page.
    async fn page(&self, page: u32) -> Result<FeedPage>;

    /// Download URL for a picture listed in a post.
    fn image_url(&self, pic: &str) -> String;

    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP client for the public jandan API, serving pictures from the CDN.
pub struct JandanFeed {
    http: reqwest::Client,
    api_url: String,
    cdn_url: String,
    attempts: u32,
    retry_delay: Duration,
}

impl JandanFeed {
    pub fn new() -> Result<Self> {
        Self::with_urls(API_URL, CDN_URL)
    }

    pub fn with_urls(api_url: impl Into<String>, cdn_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            cdn_url: cdn_url.into().trim_end_matches('/').to_string(),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// GET with retries on transport errors and 5xx responses.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut attempt = 1;
        loop {
            let outcome = self.http.get(url).query(query).send().await;
            let retryable = match &outcome {
                Ok(resp) => resp.status().is_server_error(),
                Err(e) => !e.is_builder(),
            };
            if !retryable || attempt >= self.attempts {
                let resp = outcome?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(Error::message(format!("GET {url}: unexpected status {status}")));
                }
                return Ok(resp);
            }
            match &outcome {
                Ok(resp) => warn!(url, attempt, status = %resp.status(), "feed request failed, retrying"),
                Err(e) => warn!(url, attempt, error = %e, "feed request failed, retrying"),
            }
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[async_trait]
impl FeedSource for JandanFeed {
    async fn page(&self, page: u32) -> Result<FeedPage> {
        let query = if page > 0 {
            vec![("page", page.to_string())]
        } else {
            Vec::new()
        };
        let resp = self.get(&self.api_url, &query).await?;
        let page: FeedPage = resp.json().await.context("decode feed page")?;
        debug!(
            current = page.current_page,
            count = page.page_count,
            posts = page.comments.len(),
            "fetched feed page"
        );
        Ok(page)
    }

    fn image_url(&self, pic: &str) -> String {
        let file = pic.split(['?', '#']).next().unwrap_or(pic);
        let file = file.rsplit('/').next().unwrap_or(file);
        format!("{}/{file}", self.cdn_url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.get(url, &[]).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        mockito::{Matcher, Server},
        rstest::rstest,
        serde_json::json,
    };

    fn feed(server: &Server) -> JandanFeed {
        JandanFeed::with_urls(
            format!("{}/?oxwlxojflwblxbsapi=jandan.get_pic_comments", server.url()),
            format!("{}/large/", server.url()),
        )
        .unwrap()
        .with_retry(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn first_page_has_no_page_param() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded(
                "oxwlxojflwblxbsapi".into(),
                "jandan.get_pic_comments".into(),
            ))
            .with_body(
                json!({
                    "current_page": 1,
                    "page_count": 3,
                    "comments": [{
                        "comment_ID": "5001",
                        "comment_author": "reader",
                        "comment_date": "2026-10-01 08:00:00",
                        "vote_positive": "12",
                        "pics": ["https://wx1.sinaimg.cn/mw600/a.jpg"]
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let page = feed(&server).page(0).await.unwrap();
        mock.assert_async().await;
        assert_eq!(page.current_page, 1);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.comments[0], Post {
            id: "5001".into(),
            author: "reader".into(),
            date: "2026-10-01 08:00:00".into(),
            pics: vec!["https://wx1.sinaimg.cn/mw600/a.jpg".into()],
        });
    }

    #[tokio::test]
    async fn later_pages_pass_page_param() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_body(r#"{"current_page": 2, "page_count": 3, "comments": []}"#)
            .create_async()
            .await;
        let page = feed(&server).page(2).await.unwrap();
        mock.assert_async().await;
        assert_eq!(page.current_page, 2);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let err = feed(&server).page(0).await.unwrap_err();
        mock.assert_async().await;
        assert!(err.to_string().contains("503"), "{err}");
    }

    #[tokio::test]
    async fn downloads_bytes() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/large/a.jpg")
            .with_body(b"\x89PNG")
            .create_async()
            .await;
        let feed = feed(&server);
        let url = feed.image_url("https://wx1.sinaimg.cn/mw600/a.jpg");
        assert_eq!(feed.download(&url).await.unwrap(), b"\x89PNG");

        server
            .mock("GET", "/large/missing.jpg")
            .with_status(404)
            .create_async()
            .await;
        assert!(feed.download(&feed.image_url("missing.jpg")).await.is_err());
    }

    #[rstest]
    #[case("https://wx1.sinaimg.cn/mw600/abc.jpg", "https://img.toto.im/large/abc.jpg")]
    #[case("https://wx1.sinaimg.cn/large/abc.png?x=1", "https://img.toto.im/large/abc.png")]
    #[case("abc.jpg", "https://img.toto.im/large/abc.jpg")]
    fn rewrites_to_cdn(#[case] pic: &str, #[case] expected: &str) {
        assert_eq!(JandanFeed::new().unwrap().image_url(pic), expected);
    }
}
