//! Console API client
//!
//! The conversation core consumes three out-of-band collaborator contracts:
//! a pre-authorized socket URL, the voice catalog, and speech previews. All
//! three are simple request/response calls against the console HTTP API and
//! live outside the session socket entirely.

use async_trait::async_trait;
use serde::Deserialize;

use crate::session::SessionConfig;
use crate::{Error, Result};

/// Source of pre-authorized conversation socket URLs.
///
/// Failures surface as connection-time errors; they are never silently
/// retried forever.
#[async_trait]
pub trait SocketUrlProvider: Send + Sync {
    /// Fetch a fresh, time-limited socket URL
    async fn signed_socket_url(&self) -> Result<String>;
}

/// A fixed socket URL, for deployments that skip the console indirection
#[derive(Debug, Clone)]
pub struct StaticSocketUrl(pub String);

#[async_trait]
impl SocketUrlProvider for StaticSocketUrl {
    async fn signed_socket_url(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// One selectable voice, immutable once fetched.
///
/// Selecting a profile only affects the *next* connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    /// Voice identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Language the voice was trained for, if known
    pub language: Option<String>,
    /// Tag wrapped around outbound text when this voice is active
    pub label: Option<String>,
}

impl VoiceProfile {
    /// The built-in fallback when the catalog is empty or unreachable
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default (Agent)".to_string(),
            language: None,
            label: None,
        }
    }

    /// Derive the configuration the next connection will initiate with
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            voice_id: (self.id != "default").then(|| self.id.clone()),
            language: self.language.clone().unwrap_or_else(|| "auto".to_string()),
            voice_label: self.label.clone(),
        }
    }
}

/// A supported conversation language
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SignedUrlResponse {
    signed_url: Option<String>,
    ws_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<VoiceEntry>,
}

/// Raw catalog entry; consoles disagree on where the language lives
#[derive(Debug, Default, Deserialize)]
struct VoiceEntry {
    voice_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    language_trained: Option<String>,
    language: Option<String>,
    default_language: Option<String>,
    #[serde(default)]
    labels: serde_json::Map<String, serde_json::Value>,
}

impl VoiceEntry {
    fn into_profile(self) -> Option<VoiceProfile> {
        let id = self.voice_id.or(self.id)?;

        let label_str = |key: &str| {
            self.labels
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        let language = self
            .language_trained
            .or(self.language)
            .or(self.default_language)
            .or_else(|| label_str("language"))
            .or_else(|| label_str("lang"))
            .or_else(|| label_str("voice_lang"));

        let name = self.name.unwrap_or_else(|| id.clone());
        let label = label_str("assistant_voice")
            .or_else(|| label_str("voice_label"))
            .unwrap_or_else(|| name.clone());

        Some(VoiceProfile {
            id,
            name,
            language,
            label: Some(label),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct LanguagesResponse {
    #[serde(default)]
    languages: Vec<Language>,
}

/// HTTP client for the console API
#[derive(Debug, Clone)]
pub struct ConsoleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ConsoleClient {
    /// Create a client for the console at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Fetch the voice catalog.
    ///
    /// Degrades to a single default profile when the console is unreachable
    /// or the catalog is empty; the selector is never left unusable.
    pub async fn voices(&self) -> Vec<VoiceProfile> {
        match self.fetch_voices().await {
            Ok(profiles) if !profiles.is_empty() => profiles,
            Ok(_) => {
                tracing::warn!("voice catalog is empty, using default voice");
                vec![VoiceProfile::fallback()]
            }
            Err(e) => {
                tracing::warn!(error = %e, "voice catalog unavailable, using default voice");
                vec![VoiceProfile::fallback()]
            }
        }
    }

    async fn fetch_voices(&self) -> Result<Vec<VoiceProfile>> {
        let response = self.request(reqwest::Method::GET, "/voices").send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Console(format!("voices error {status}: {body}")));
        }

        let parsed: VoicesResponse = response.json().await?;
        Ok(parsed
            .voices
            .into_iter()
            .filter_map(VoiceEntry::into_profile)
            .collect())
    }

    /// Synthesize a short out-of-band preview of a voice.
    ///
    /// Returns MPEG audio bytes. Failures are non-fatal to any running
    /// session; the caller decides whether to play or ignore.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the console rejects it
    pub async fn preview(&self, voice_id: &str, text: &str) -> Result<Vec<u8>> {
        let response = self
            .request(reqwest::Method::POST, "/tts-preview")
            .json(&serde_json::json!({ "voice_id": voice_id, "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Console(format!("preview error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// List languages the agent supports
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn languages(&self) -> Result<Vec<Language>> {
        let response = self
            .request(reqwest::Method::GET, "/languages")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Console(format!("languages error {status}: {body}")));
        }

        let parsed: LanguagesResponse = response.json().await?;
        Ok(parsed.languages)
    }
}

#[async_trait]
impl SocketUrlProvider for ConsoleClient {
    /// Fetch a time-limited pre-authorized socket URL
    async fn signed_socket_url(&self) -> Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/conversation/signed-url")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Console(format!("signed-url error {status}: {body}")));
        }

        let parsed: SignedUrlResponse = response.json().await?;
        let url = parsed
            .signed_url
            .or(parsed.ws_url)
            .ok_or_else(|| Error::Console("no signed_url in response".to_string()))?;

        // Only socket schemes are acceptable here
        let scheme = url::Url::parse(&url)
            .map_err(|e| Error::Console(format!("invalid signed url: {e}")))?
            .scheme()
            .to_string();
        if scheme != "wss" && scheme != "ws" {
            return Err(Error::Console(format!(
                "signed url has non-socket scheme: {scheme}"
            )));
        }

        Ok(url)
    }
}
