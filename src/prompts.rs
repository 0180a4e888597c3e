//! Turns the user's goals and confidence areas into affirmation prompts.
//!
//! Every prompt looks like `"<affirmation text>: <scene description>"`. Only a missing
//! credential escapes from here, anything else degrades to a fixed set of prompts.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants::{APP_REFERER, APP_TITLE};
use crate::error::PipelineError;

/// How many prompts we ask for, and the most we hand back.
pub const PROMPT_COUNT: usize = 3;

/// Returned when the model answered but nothing usable could be parsed.
pub const EMPTY_PARSE_FALLBACK: [&str; PROMPT_COUNT] = [
    "I Am Confident: Beautiful sunrise over calm ocean, affirmation text in elegant white typography centered in the sky",
    "I Believe in Myself: Majestic forest with rays of light, affirmation text glowing in golden letters above the trees",
    "I Am Growing Every Day: Blooming flower garden in vibrant colors, affirmation text in bold script at the bottom",
];

/// Returned when the request itself failed.
pub const REQUEST_FAILED_FALLBACK: [&str; PROMPT_COUNT] = [
    "I Am Worthy of Success: Stunning mountain landscape at golden hour with the affirmation text in bold white letters across the sky",
    "Every Day I Grow Stronger: Peaceful zen garden with cherry blossoms, affirmation text in elegant calligraphy floating above",
    "I Trust My Journey: Winding path through beautiful autumn forest, affirmation text in warm orange tones along the path",
];

/// Leading `1.` or `-` list marker. Kept as a `Result` because the crate denies
/// `expect`/`unwrap`; a test pins that the pattern compiles.
static LIST_MARKER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(?:\d+\.|-)\s*"));

/// Shortest prompt (after stripping the list marker) worth keeping.
const MIN_PROMPT_CHARS: usize = 10;

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize, Debug)]
pub(crate) struct ChatMessage<'a> {
    pub(crate) role: &'a str,
    pub(crate) content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize, Debug)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Builds the single user message sent to the text model.
pub fn build_instruction(goals: &[String], areas: &[String]) -> String {
    format!(
        r#"You are an expert affirmation coach. Generate powerful, personalized affirmation image prompts based on the user's goals and confidence areas.

User wants to improve in: {areas}
User's goals: {goals}

Generate {count} different affirmation image prompts. Each prompt should:
1. Include a short, powerful affirmation text (5-8 words max)
2. Describe a beautiful, uplifting visual scene
3. Specify where the affirmation text should appear in the image
4. Use inspiring, motivational imagery

Return them as a numbered list, one prompt per line, each formatted as:
[AFFIRMATION TEXT]: [Visual scene description with text placement]

Example: 1. I Am Confident and Capable: A serene mountain peak at sunrise with golden light, the affirmation text elegantly overlaid in the sky in bold white letters"#,
        areas = areas.join(", "),
        goals = goals.join(", "),
        count = PROMPT_COUNT,
    )
}

/// Pulls up to [`PROMPT_COUNT`] prompts out of a free-form model reply.
///
/// Only numbered (`1.`) or dashed (`-`) lines count, and only when what's left after the
/// marker is long enough and still has the `text: scene` shape.
pub fn parse_prompts(content: &str) -> Vec<String> {
    let marker = match LIST_MARKER.as_ref() {
        Ok(marker) => marker,
        Err(err) => {
            warn!("Prompt list marker regex failed to compile: {err}");
            return Vec::new();
        }
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| marker.is_match(line))
        .map(|line| {
            marker
                .replace(line, "")
                .trim()
                .trim_matches(|c: char| c == '"' || c == '*')
                .trim()
                .to_string()
        })
        .filter(|prompt| prompt.chars().count() > MIN_PROMPT_CHARS && has_prompt_shape(prompt))
        .take(PROMPT_COUNT)
        .collect()
}

/// True for `"<text>: <scene>"` with something on both sides of the first colon.
pub fn has_prompt_shape(prompt: &str) -> bool {
    match prompt.split_once(':') {
        Some((text, scene)) => !text.trim().is_empty() && !scene.trim().is_empty(),
        None => false,
    }
}

fn fallback(prompts: [&str; PROMPT_COUNT]) -> Vec<String> {
    prompts.iter().map(|prompt| prompt.to_string()).collect()
}

/// Asks the text model for affirmation prompts.
///
/// Fails only when no credential is configured; every other problem is logged and
/// answered with one of the fixed fallback lists.
pub async fn generate_prompts(
    client: &reqwest::Client,
    settings: &Settings,
    goals: &[String],
    areas: &[String],
) -> Result<Vec<String>, PipelineError> {
    let api_key = settings.api_key()?;
    let instruction = build_instruction(goals, areas);

    match request_completion(client, settings, api_key, &instruction).await {
        Ok(content) => {
            let prompts = parse_prompts(&content);
            if prompts.is_empty() {
                warn!("Could not parse any prompts from the text model, using defaults");
                debug!("Unparseable prompt reply: {content}");
                return Ok(fallback(EMPTY_PARSE_FALLBACK));
            }
            info!("Generated {} affirmation prompts", prompts.len());
            Ok(prompts)
        }
        Err(err) => {
            warn!("Prompt generation failed, using defaults: {err}");
            Ok(fallback(REQUEST_FAILED_FALLBACK))
        }
    }
}

fn attribution_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("http-referer", HeaderValue::from_static(APP_REFERER));
    headers.insert("x-title", HeaderValue::from_static(APP_TITLE));
    headers
}

async fn request_completion(
    client: &reqwest::Client,
    settings: &Settings,
    api_key: &str,
    instruction: &str,
) -> Result<String, PipelineError> {
    let req_body = ChatRequest {
        model: &settings.text_model,
        messages: [ChatMessage {
            role: "user",
            content: instruction,
        }],
    };

    let resp = client
        .post(settings.text_endpoint.clone())
        .bearer_auth(api_key)
        .headers(attribution_headers())
        .timeout(settings.request_timeout)
        .json(&req_body)
        .send()
        .await?;

    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).to_string();
        return Err(if status.is_client_error() {
            PipelineError::Client { status, body }
        } else {
            PipelineError::Server { status, body }
        });
    }

    let parsed: ChatResponse = serde_json::from_slice(&bytes)
        .map_err(|err| PipelineError::Transport(format!("Invalid chat completion JSON: {err}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| PipelineError::Transport("Chat completion had no choices".to_string()))
}
