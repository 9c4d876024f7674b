use std::time::Duration;

use log::{debug, info};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::FetchError;

/// One item read from the upstream page.
///
/// Identity is `id`; the rest is whatever the page showed when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub text: Option<String>,
    pub source_url: String,
}

impl Post {
    pub fn new(id: impl Into<String>, text: Option<&str>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.map(str::to_owned),
            source_url: source_url.into(),
        }
    }
}

/// Anything that can list the most recent posts of a page.
pub trait PostSource {
    /// Return up to `page_depth` listing pages worth of posts, newest first.
    ///
    /// # Errors
    ///
    /// Any network or parsing failure fails the whole fetch; nothing is
    /// retried.
    fn fetch_recent(&self, page_name: &str, page_depth: u32) -> Result<Vec<Post>, FetchError>;
}

const MOBILE_BASE_URL: &str = "https://m.facebook.com/";
const POST_URL_PREFIX: &str = "https://facebook.com/";
const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";

/// Reads posts from the mobile Facebook page listing.
///
/// Every listing page is one blocking request. Stories the listing cut short
/// with a "More" link cost one extra request each for the full text.
pub struct FacebookSource {
    client: reqwest::blocking::Client,
    base_url: Url,
}

impl FacebookSource {
    /// Create a source whose requests all time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(MOBILE_BASE_URL, timeout)
    }

    /// Create a source against a different host, e.g. a local mirror.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|e| FetchError::ParseFailed {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::RequestFailed {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|e| FetchError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().map_err(|e| FetchError::RequestFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Replace truncated listing text with the text of the full story page.
    fn expand(&self, story: ListedStory) -> Result<Post, FetchError> {
        let Some(full_story_url) = story.full_story_url else {
            return Ok(story.post);
        };

        debug!("Expanding truncated post {}", story.post.id);
        let html = self.get_text(&full_story_url)?;
        let text = parse_full_story(&html, &full_story_url)?.ok_or_else(|| {
            FetchError::ParseFailed {
                url: full_story_url.to_string(),
                reason: format!("no story text for post {}", story.post.id),
            }
        })?;

        Ok(Post {
            text: Some(text),
            ..story.post
        })
    }
}

impl PostSource for FacebookSource {
    fn fetch_recent(&self, page_name: &str, page_depth: u32) -> Result<Vec<Post>, FetchError> {
        let mut next = Some(
            self.base_url
                .join(&format!("{}/posts/", page_name))
                .map_err(|e| FetchError::ParseFailed {
                    url: self.base_url.to_string(),
                    reason: e.to_string(),
                })?,
        );

        let mut posts = Vec::new();
        let mut pages_read = 0;

        while let Some(url) = next.take() {
            if pages_read >= page_depth {
                break;
            }
            debug!("Fetching listing page {}", url);

            let html = self.get_text(&url)?;
            let listing = parse_listing(&html, &url)?;
            pages_read += 1;

            for story in listing.stories {
                posts.push(self.expand(story)?);
            }
            next = listing.next_page;
        }

        info!(
            "Read {} posts from {} listing page(s) of '{}'",
            posts.len(),
            pages_read,
            page_name
        );

        Ok(posts)
    }
}

/// A story as it appears on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedStory {
    pub post: Post,
    /// Set when the listing truncated the text behind a "More" link.
    pub full_story_url: Option<Url>,
}

/// One parsed listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub stories: Vec<ListedStory>,
    pub next_page: Option<Url>,
}

fn selector(css: &str, url: &Url) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::ParseFailed {
        url: url.to_string(),
        reason: format!("invalid selector '{}': {:?}", css, e),
    })
}

/// Parse a listing page into stories (newest first) and the next page link.
///
/// Stories without a recognizable id are skipped. A page with neither
/// stories nor a pager link is not a listing (login wall, consent page or
/// changed markup) and fails with `ParseFailed`.
pub fn parse_listing(html: &str, page_url: &Url) -> Result<Listing, FetchError> {
    let document = Html::parse_document(html);
    let article_selector = selector("article", page_url)?;
    let body_selector = selector(".story_body_container", page_url)?;
    let link_selector = selector("a[href]", page_url)?;
    let pager_selector = selector("#see_more_pager a[href]", page_url)?;

    let mut stories = Vec::new();

    for article in document.select(&article_selector) {
        let Some(id) = story_id(article) else {
            debug!("Skipping story without an id on {}", page_url);
            continue;
        };

        let body = article.select(&body_selector).next();
        let text = body.and_then(story_text);
        let full_story_url = body.and_then(|body| {
            body.select(&link_selector)
                .find(|link| is_more_link(*link))
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| page_url.join(href).ok())
        });

        stories.push(ListedStory {
            post: Post {
                source_url: format!("{}{}", POST_URL_PREFIX, id),
                id,
                text,
            },
            full_story_url,
        });
    }

    let next_page = document
        .select(&pager_selector)
        .next()
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| page_url.join(href).ok());

    if stories.is_empty() && next_page.is_none() && document.select(&body_selector).next().is_none()
    {
        return Err(FetchError::ParseFailed {
            url: page_url.to_string(),
            reason: "no stories on listing page".to_string(),
        });
    }

    Ok(Listing { stories, next_page })
}

/// Extract the untruncated text from a single-story page.
pub fn parse_full_story(html: &str, page_url: &Url) -> Result<Option<String>, FetchError> {
    let document = Html::parse_document(html);
    let body_selector = selector(".story_body_container", page_url)?;
    Ok(document.select(&body_selector).next().and_then(story_text))
}

/// Read the post id from the `data-ft` tracking attribute.
fn story_id(article: ElementRef) -> Option<String> {
    let raw = article.value().attr("data-ft")?;
    let data: Value = serde_json::from_str(raw).ok()?;

    ["top_level_post_id", "mf_story_key"]
        .iter()
        .find_map(|key| match data.get(*key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn is_more_link(link: ElementRef) -> bool {
    let label = link.text().collect::<String>();
    matches!(label.trim(), "More" | "See more" | "See More")
}

/// Paragraphs of a story body joined by line breaks, `<br>` kept as breaks.
fn story_text(body: ElementRef) -> Option<String> {
    let paragraph_selector = Selector::parse("p").ok()?;

    let paragraphs: Vec<String> = body
        .select(&paragraph_selector)
        .map(|p| {
            let mut out = String::new();
            append_text(p, &mut out);
            out.trim().to_string()
        })
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join("\n"))
    }
}

fn append_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let value = child_element.value();
            if value.name() == "br" {
                out.push('\n');
            } else if value.classes().any(|c| c == "text_exposed_hide")
                || (value.name() == "a" && is_more_link(child_element))
            {
                continue;
            } else {
                append_text(child_element, out);
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <article data-ft='{"top_level_post_id":"1002","page_id":"77"}'>
            <div class="story_body_container">
              <header>Columbia Confessions</header>
              <div><p>12346. Newest one<br>second line</p></div>
            </div>
          </article>
          <article data-ft='{"mf_story_key":1001}'>
            <div class="story_body_container">
              <div>
                <p>12345. I once<span class="text_exposed_hide">...</span>
                  <a href="/story.php?story_fbid=1001">More</a></p>
              </div>
            </div>
          </article>
          <article data-ft='{"page_id":"77"}'>
            <div class="story_body_container"><p>no id</p></div>
          </article>
          <article data-ft='{"top_level_post_id":"1000"}'>
            <div class="story_body_container"><div>photo only</div></div>
          </article>
          <div id="see_more_pager"><a href="/columbiaconfessionz/posts/?cursor=abc">See more</a></div>
        </body></html>
    "#;

    fn page_url() -> Url {
        Url::parse("https://m.facebook.com/columbiaconfessionz/posts/").unwrap()
    }

    #[test]
    fn listing_keeps_upstream_order_and_ids() {
        let listing = parse_listing(LISTING, &page_url()).unwrap();
        let ids: Vec<_> = listing.stories.iter().map(|s| s.post.id.as_str()).collect();
        assert_eq!(ids, vec!["1002", "1001", "1000"]);
        assert_eq!(
            listing.stories[0].post.source_url,
            "https://facebook.com/1002"
        );
    }

    #[test]
    fn line_breaks_survive_text_extraction() {
        let listing = parse_listing(LISTING, &page_url()).unwrap();
        assert_eq!(
            listing.stories[0].post.text.as_deref(),
            Some("12346. Newest one\nsecond line")
        );
        assert!(listing.stories[0].full_story_url.is_none());
    }

    #[test]
    fn truncated_story_points_at_full_text() {
        let listing = parse_listing(LISTING, &page_url()).unwrap();
        let story = &listing.stories[1];
        assert_eq!(story.post.text.as_deref(), Some("12345. I once"));
        assert_eq!(
            story.full_story_url.as_ref().map(Url::as_str),
            Some("https://m.facebook.com/story.php?story_fbid=1001")
        );
    }

    #[test]
    fn story_without_paragraphs_has_no_text() {
        let listing = parse_listing(LISTING, &page_url()).unwrap();
        assert_eq!(listing.stories[2].post.text, None);
    }

    #[test]
    fn next_page_is_resolved_against_the_listing() {
        let listing = parse_listing(LISTING, &page_url()).unwrap();
        assert_eq!(
            listing.next_page.as_ref().map(Url::as_str),
            Some("https://m.facebook.com/columbiaconfessionz/posts/?cursor=abc")
        );
    }

    #[test]
    fn full_story_page_yields_whole_text() {
        let html = r#"<div class="story_body_container"><p>12345. I once</p><p>did a thing</p></div>"#;
        let text = parse_full_story(html, &page_url()).unwrap();
        assert_eq!(text.as_deref(), Some("12345. I once\ndid a thing"));
    }

    #[test]
    fn login_wall_is_a_parse_failure() {
        let html = r#"
            <html><body>
              <div id="login_form"><form action="/login/"><input name="email"></form></div>
              <p>You must log in to continue.</p>
            </body></html>
        "#;
        let result = parse_listing(html, &page_url());
        assert!(matches!(result, Err(FetchError::ParseFailed { .. })));
    }

    #[test]
    fn last_page_without_stories_but_with_pager_is_accepted() {
        let html = r#"<div id="see_more_pager"><a href="/p/posts/?cursor=z">See more</a></div>"#;
        let listing = parse_listing(html, &page_url()).unwrap();
        assert!(listing.stories.is_empty());
        assert!(listing.next_page.is_some());
    }

    /// Serve `routes` (path, status, body) for `requests` connections.
    fn serve(routes: Vec<(&'static str, u16, &'static str)>, requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                }

                let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _, _)| path.starts_with(prefix))
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, "not found"));
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });

        format!("http://{}/", addr)
    }

    const FULL_STORY: &str =
        r#"<div class="story_body_container"><p>12345. I once</p><p>did a thing</p></div>"#;

    #[test]
    fn truncated_story_is_fetched_in_full() {
        let base = serve(
            vec![("/page/posts/", 200, LISTING), ("/story.php", 200, FULL_STORY)],
            2,
        );
        let source = FacebookSource::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let posts = source.fetch_recent("page", 1).unwrap();
        let expanded = posts.iter().find(|p| p.id == "1001").unwrap();
        assert_eq!(expanded.text.as_deref(), Some("12345. I once\ndid a thing"));
    }

    #[test]
    fn failed_story_expansion_fails_the_fetch() {
        let base = serve(
            vec![("/page/posts/", 200, LISTING), ("/story.php", 500, "oops")],
            2,
        );
        let source = FacebookSource::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let result = source.fetch_recent("page", 1);
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 500, .. })
        ));
    }

    #[test]
    fn login_wall_fails_the_fetch() {
        let base = serve(vec![("/page/posts/", 200, "<html><body>Log in</body></html>")], 1);
        let source = FacebookSource::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let result = source.fetch_recent("page", 1);
        assert!(matches!(result, Err(FetchError::ParseFailed { .. })));
    }
}
