//! Digs the image out of whatever shape the provider answered with.
//!
//! Providers move the image around between releases, so extraction is an ordered list of
//! strategies, each reading one field of the assistant message. The first candidate that
//! decodes (or downloads) to non-empty bytes wins.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Where the bytes of an image can be found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageSource {
    /// Bare base64 payload
    Inline(String),
    /// `data:image/png;base64,...`
    DataUrl(String),
    /// http(s) URL that still needs downloading
    Remote(String),
}

impl ImageSource {
    /// Works out what kind of reference a string is. Empty strings are nothing.
    pub fn classify(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("data:") {
            Some(Self::DataUrl(value.to_string()))
        } else if lowered.starts_with("http://") || lowered.starts_with("https://") {
            Some(Self::Remote(value.to_string()))
        } else {
            Some(Self::Inline(value.to_string()))
        }
    }

    /// Like [`ImageSource::classify`] but only accepts references, never bare base64.
    fn classify_reference(raw: &str) -> Option<Self> {
        match Self::classify(raw)? {
            Self::Inline(_) => None,
            other => Some(other),
        }
    }
}

/// The parts of an assistant message that have been seen carrying images.
///
/// Fields stay as raw JSON so one oddly typed field can't stop the others from being read.
#[derive(Deserialize, Debug, Default)]
pub struct ImageMessage {
    #[serde(default)]
    images: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, alias = "imageUrl")]
    image_url: Option<Value>,
    #[serde(default)]
    parts: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
struct ImageResponse {
    #[serde(default)]
    choices: Vec<ImageChoice>,
    /// Gemini-native bodies put the message under `candidates[].content`.
    #[serde(default)]
    candidates: Vec<NativeCandidate>,
}

#[derive(Deserialize, Debug)]
struct ImageChoice {
    #[serde(default)]
    message: ImageMessage,
}

#[derive(Deserialize, Debug)]
struct NativeCandidate {
    #[serde(default)]
    content: ImageMessage,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ImageRef {
    Url(String),
    Object { url: String },
}

impl ImageRef {
    fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Object { url } => url,
        }
    }
}

#[derive(Deserialize, Debug)]
struct InlineData {
    data: String,
}

#[derive(Deserialize, Debug)]
struct FileData {
    #[serde(alias = "fileUri")]
    file_uri: String,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ImageEntry {
    Text(String),
    Object {
        #[serde(default, alias = "imageUrl")]
        image_url: Option<ImageRef>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        b64_json: Option<String>,
        #[serde(default)]
        base64: Option<String>,
        #[serde(default)]
        data: Option<String>,
        #[serde(default, alias = "inlineData")]
        inline_data: Option<InlineData>,
    },
    Other(Value),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ContentItem {
    Tagged {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default, alias = "imageUrl")]
        image_url: Option<ImageRef>,
        #[serde(default)]
        url: Option<String>,
    },
    Other(Value),
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Part {
    Known {
        #[serde(default, alias = "inlineData")]
        inline_data: Option<InlineData>,
        #[serde(default, alias = "fileData")]
        file_data: Option<FileData>,
        #[serde(default, alias = "imageUrl")]
        image_url: Option<ImageRef>,
        #[serde(default)]
        url: Option<String>,
    },
    Other(Value),
}

/// Reads one message field, in one shape, into candidate sources.
pub type Strategy = fn(&ImageMessage) -> Vec<ImageSource>;

/// Extraction strategies, tried in this order.
pub const STRATEGIES: [(&str, Strategy); 5] = [
    ("images", from_images),
    ("content_items", from_content_items),
    ("image_url", from_image_field),
    ("content_text", from_content_text),
    ("parts", from_parts),
];

fn typed<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    value.and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn from_images(message: &ImageMessage) -> Vec<ImageSource> {
    let entries: Vec<ImageEntry> = typed(message.images.as_ref()).unwrap_or_default();
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            ImageEntry::Text(raw) => ImageSource::classify(&raw),
            ImageEntry::Object {
                image_url,
                url,
                b64_json,
                base64,
                data,
                inline_data,
            } => image_url
                .as_ref()
                .and_then(|image_url| ImageSource::classify(image_url.url()))
                .or_else(|| url.as_deref().and_then(ImageSource::classify))
                .or_else(|| b64_json.as_deref().and_then(ImageSource::classify))
                .or_else(|| base64.as_deref().and_then(ImageSource::classify))
                .or_else(|| data.as_deref().and_then(ImageSource::classify))
                .or_else(|| {
                    inline_data
                        .as_ref()
                        .and_then(|inline| ImageSource::classify(&inline.data))
                }),
            ImageEntry::Other(value) => {
                debug!("Ignoring unrecognised image entry {value}");
                None
            }
        })
        .collect()
}

fn from_content_items(message: &ImageMessage) -> Vec<ImageSource> {
    let items: Vec<ContentItem> = typed(message.content.as_ref()).unwrap_or_default();
    items
        .into_iter()
        .filter_map(|item| match item {
            ContentItem::Tagged {
                kind,
                image_url,
                url,
            } if kind.to_ascii_lowercase().contains("image") => image_url
                .as_ref()
                .map(|image_url| image_url.url().to_string())
                .or(url)
                .and_then(|url| ImageSource::classify_reference(&url)),
            ContentItem::Tagged { .. } => None,
            ContentItem::Other(value) => {
                debug!("Ignoring unrecognised content item {value}");
                None
            }
        })
        .collect()
}

fn from_image_field(message: &ImageMessage) -> Vec<ImageSource> {
    typed::<ImageRef>(message.image_url.as_ref())
        .and_then(|image_ref| ImageSource::classify_reference(image_ref.url()))
        .into_iter()
        .collect()
}

fn from_content_text(message: &ImageMessage) -> Vec<ImageSource> {
    match message.content.as_ref() {
        Some(Value::String(text)) => ImageSource::classify_reference(text).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn from_parts(message: &ImageMessage) -> Vec<ImageSource> {
    let parts: Vec<Part> = typed(message.parts.as_ref()).unwrap_or_default();
    parts
        .into_iter()
        .filter_map(|part| match part {
            Part::Known {
                inline_data,
                file_data,
                image_url,
                url,
            } => inline_data
                .and_then(|inline| ImageSource::classify(&inline.data))
                .or_else(|| {
                    file_data.and_then(|file| ImageSource::classify_reference(&file.file_uri))
                })
                .or_else(|| {
                    image_url.and_then(|image_url| ImageSource::classify_reference(image_url.url()))
                })
                .or_else(|| url.and_then(|url| ImageSource::classify_reference(&url))),
            Part::Other(value) => {
                debug!("Ignoring unrecognised part {value}");
                None
            }
        })
        .collect()
}

/// Every candidate source in the body, labelled with the strategy that found it.
pub fn candidate_sources(body: &[u8]) -> Result<Vec<(&'static str, ImageSource)>, PipelineError> {
    let parsed: ImageResponse =
        serde_json::from_slice(body).map_err(|err| PipelineError::ResponseShape {
            tried: Vec::new(),
            detail: Some(format!("response is not a JSON object: {err}")),
        })?;

    let message = match (parsed.choices.into_iter().next(), parsed.candidates.into_iter().next()) {
        (Some(choice), _) => choice.message,
        (None, Some(candidate)) => candidate.content,
        (None, None) => ImageMessage::default(),
    };

    Ok(STRATEGIES
        .iter()
        .flat_map(|(name, strategy)| {
            strategy(&message)
                .into_iter()
                .map(move |source| (*name, source))
        })
        .collect())
}

fn decode_base64(payload: &str) -> Option<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| general_purpose::URL_SAFE.decode(compact.as_bytes()))
        .ok()
}

fn decode_data_url(value: &str) -> Option<Vec<u8>> {
    let (meta, payload) = value.split_once(',')?;
    if !meta.to_ascii_lowercase().ends_with(";base64") {
        debug!("Skipping data URL that isn't base64 encoded");
        return None;
    }
    decode_base64(payload)
}

async fn download(
    client: &reqwest::Client,
    timeout: Duration,
    url: &str,
) -> Result<Vec<u8>, PipelineError> {
    let resp = client.get(url).timeout(timeout).send().await?;
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let body = format!("image download from {url} failed");
        return Err(if status.is_client_error() {
            PipelineError::Client { status, body }
        } else {
            PipelineError::Server { status, body }
        });
    }
    Ok(bytes.to_vec())
}

/// Image bytes pulled out of a response.
#[derive(Debug)]
pub struct ExtractedImage {
    /// raw image content
    pub bytes: Vec<u8>,
    /// name of the strategy that produced it
    pub strategy: &'static str,
}

/// Runs the strategies over a successful response body and returns the first image found.
///
/// Remote references are downloaded. Fails with [`PipelineError::ResponseShape`] when no
/// strategy produced usable bytes.
pub async fn extract_image(
    client: &reqwest::Client,
    timeout: Duration,
    body: &[u8],
) -> Result<ExtractedImage, PipelineError> {
    for (strategy, source) in candidate_sources(body)? {
        let bytes = match &source {
            ImageSource::Inline(payload) => decode_base64(payload),
            ImageSource::DataUrl(value) => decode_data_url(value),
            ImageSource::Remote(url) => Some(download(client, timeout, url).await?),
        };
        match bytes {
            Some(bytes) if !bytes.is_empty() => {
                debug!("Found image data via {strategy}");
                return Ok(ExtractedImage { bytes, strategy });
            }
            _ => warn!("Image candidate from {strategy} did not decode, trying the next one"),
        }
    }

    Err(PipelineError::ResponseShape {
        tried: STRATEGIES.iter().map(|(name, _)| *name).collect(),
        detail: None,
    })
}
