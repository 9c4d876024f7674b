use std::time::Duration;

use log::info;
use reqwest::blocking::{Client, Response, multipart};
use serde_json::{Value, json};

use crate::error::{ConfigError, PublishError};
use crate::oauth::OAuthSigner;
use crate::renderer::RenderedImage;
use crate::source::Post;

/// Destination for rendered confessions.
pub trait Publisher {
    /// Upload `image` and post it publicly with a link back to `post`.
    fn publish(&self, image: &RenderedImage, post: &Post) -> Result<(), PublishError>;

    /// Send a private message to the operator account `recipient`.
    fn notify_operator(&self, message: &str, recipient: &str) -> Result<(), PublishError>;
}

/// API credentials for the destination platform.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub const VARIABLES: [&'static str; 4] = [
        "CONSUMER_KEY",
        "CONSUMER_SECRET",
        "ACCESS_TOKEN",
        "ACCESS_TOKEN_SECRET",
    ];

    /// Read all four credentials through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` naming the first variable that is absent or
    /// empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar {
                    var_name: name.to_string(),
                })
        };

        Ok(Self {
            consumer_key: require("CONSUMER_KEY")?,
            consumer_secret: require("CONSUMER_SECRET")?,
            access_token: require("ACCESS_TOKEN")?,
            access_token_secret: require("ACCESS_TOKEN_SECRET")?,
        })
    }

    fn signer(&self) -> OAuthSigner {
        OAuthSigner::new(
            &self.consumer_key,
            &self.consumer_secret,
            &self.access_token,
            &self.access_token_secret,
        )
    }
}

const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
const TWEETS_URL: &str = "https://api.twitter.com/2/tweets";
const DM_URL_PREFIX: &str = "https://api.twitter.com/2/dm_conversations/with";

/// Publishes to Twitter/X through its REST API.
///
/// A publish is two requests: a multipart media upload, then a tweet whose
/// text is the source post URL with the uploaded media attached.
pub struct TwitterPublisher {
    client: Client,
    signer: OAuthSigner,
}

impl TwitterPublisher {
    /// Create a publisher whose requests all time out after `timeout`.
    pub fn new(credentials: &Credentials, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::RequestFailed {
                endpoint: TWEETS_URL.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            signer: credentials.signer(),
        })
    }

    /// Upload PNG bytes and return the media id.
    fn upload_media(&self, image: &RenderedImage, post: &Post) -> Result<String, PublishError> {
        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(format!("confession_{}.png", post.id))
            .mime_str("image/png")
            .map_err(|e| PublishError::RequestFailed {
                endpoint: MEDIA_UPLOAD_URL.to_string(),
                reason: e.to_string(),
            })?;
        let form = multipart::Form::new().part("media", part);

        let authorization = self
            .signer
            .authorization_header("POST", MEDIA_UPLOAD_URL, &[])?;
        let response = self
            .client
            .post(MEDIA_UPLOAD_URL)
            .header("Authorization", authorization)
            .multipart(form)
            .send()
            .map_err(|e| request_failed(MEDIA_UPLOAD_URL, e))?;

        let body = check_response(MEDIA_UPLOAD_URL, response)?;
        media_id_from(&body).ok_or_else(|| PublishError::MalformedResponse {
            endpoint: MEDIA_UPLOAD_URL.to_string(),
            reason: "response has no media_id_string".to_string(),
        })
    }

    fn post_json(&self, url: &str, payload: &Value) -> Result<Value, PublishError> {
        let authorization = self.signer.authorization_header("POST", url, &[])?;
        let response = self
            .client
            .post(url)
            .header("Authorization", authorization)
            .json(payload)
            .send()
            .map_err(|e| request_failed(url, e))?;

        check_response(url, response)
    }
}

impl Publisher for TwitterPublisher {
    fn publish(&self, image: &RenderedImage, post: &Post) -> Result<(), PublishError> {
        info!("Uploading image for post {}", post.id);
        let media_id = self.upload_media(image, post)?;

        info!("Sending tweet for post {}", post.id);
        let body = self.post_json(TWEETS_URL, &tweet_payload(post, &media_id))?;

        let tweet_id = body["data"]["id"].as_str().unwrap_or("unknown");
        info!("Successfully sent tweet {} for post {}", tweet_id, post.id);
        Ok(())
    }

    fn notify_operator(&self, message: &str, recipient: &str) -> Result<(), PublishError> {
        let url = format!(
            "{}/{}/messages",
            DM_URL_PREFIX,
            urlencoding::encode(recipient)
        );
        self.post_json(&url, &json!({ "text": message }))?;
        info!("Sent direct message to operator {}", recipient);
        Ok(())
    }
}

/// Body of the tweet-creation request.
pub fn tweet_payload(post: &Post, media_id: &str) -> Value {
    json!({
        "text": post.source_url,
        "media": {
            "media_ids": [media_id]
        }
    })
}

fn media_id_from(body: &Value) -> Option<String> {
    match &body["media_id_string"] {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        _ => body["media_id"].as_u64().map(|id| id.to_string()),
    }
}

fn request_failed(endpoint: &str, err: reqwest::Error) -> PublishError {
    PublishError::RequestFailed {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    }
}

/// Map the HTTP status onto the error taxonomy and parse the JSON body.
fn check_response(endpoint: &str, response: Response) -> Result<Value, PublishError> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|e| request_failed(endpoint, e))?;

    classify_status(endpoint, status.as_u16(), &text)?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| PublishError::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn classify_status(endpoint: &str, status: u16, body: &str) -> Result<(), PublishError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(PublishError::AuthenticationFailed {
            endpoint: endpoint.to_string(),
            status,
        }),
        429 => Err(PublishError::RateLimited {
            endpoint: endpoint.to_string(),
        }),
        _ => Err(PublishError::ApiError {
            endpoint: endpoint.to_string(),
            status,
            message: body.chars().take(500).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const ALL: [(&str, &str); 4] = [
        ("CONSUMER_KEY", "ck"),
        ("CONSUMER_SECRET", "cs"),
        ("ACCESS_TOKEN", "at"),
        ("ACCESS_TOKEN_SECRET", "ats"),
    ];

    #[test]
    fn each_missing_variable_is_reported() {
        for missing in Credentials::VARIABLES {
            let pairs: Vec<_> = ALL.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = Credentials::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingEnvVar { ref var_name } if var_name == missing),
                "expected {} to be reported",
                missing
            );
        }
    }

    #[test]
    fn empty_variable_counts_as_missing() {
        let mut pairs = ALL.to_vec();
        pairs[3] = ("ACCESS_TOKEN_SECRET", "  ");
        assert!(Credentials::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let credentials = Credentials::from_lookup(lookup_from(&ALL)).unwrap();
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("ck"));
        assert!(!printed.contains("ats"));
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(classify_status("e", 201, "").is_ok());
        assert!(matches!(
            classify_status("e", 401, ""),
            Err(PublishError::AuthenticationFailed { status: 401, .. })
        ));
        assert!(matches!(
            classify_status("e", 429, ""),
            Err(PublishError::RateLimited { .. })
        ));
        assert!(matches!(
            classify_status("e", 500, "boom"),
            Err(PublishError::ApiError { status: 500, ref message, .. }) if message == "boom"
        ));
    }

    #[test]
    fn tweet_links_back_to_the_post() {
        let post = Post::new("42", Some("12345. hi"), "https://facebook.com/42");
        let payload = tweet_payload(&post, "777");
        assert_eq!(payload["text"], "https://facebook.com/42");
        assert_eq!(payload["media"]["media_ids"][0], "777");
    }

    #[test]
    fn media_id_accepts_string_or_number() {
        assert_eq!(
            media_id_from(&json!({"media_id_string": "9"})),
            Some("9".to_string())
        );
        assert_eq!(media_id_from(&json!({"media_id": 10})), Some("10".to_string()));
        assert_eq!(media_id_from(&json!({})), None);
    }
}
