mod common;

use std::time::{Duration, Instant};

use affirmwall::config::FallbackPolicy;
use affirmwall::error::PipelineError;
use affirmwall::images::{ArtifactFormat, generate_image};
use base64::Engine;
use base64::engine::general_purpose;
use common::{IMAGE_BYTES, MockProvider, dead_endpoint, files_in, image_reply, status};
use serde_json::json;

const PROMPT: &str = "I Am Unstoppable: A runner on a mountain ridge at dawn";

fn encoded() -> String {
    general_purpose::STANDARD.encode(IMAGE_BYTES)
}

async fn generate_from(message: serde_json::Value) -> Vec<u8> {
    let provider = MockProvider::start(vec![], vec![image_reply(message)]).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());
    let client = reqwest::Client::new();

    let artifact = generate_image(&client, &settings, PROMPT)
        .await
        .expect("generate image");
    assert_eq!(artifact.format, ArtifactFormat::Png);
    assert!(artifact.path.is_absolute());
    assert!(artifact.path.starts_with(&settings.images_dir));
    let written = std::fs::read(&artifact.path).expect("read artifact");
    assert_eq!(written, artifact.bytes);
    written
}

#[tokio::test]
async fn inline_base64_images_entry() {
    let message = json!({"images": [{"b64_json": encoded()}]});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn data_url_images_entry() {
    let message = json!({"images": [{
        "type": "image_url",
        "image_url": {"url": format!("data:image/png;base64,{}", encoded())}
    }]});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn remote_url_images_entry() {
    let files = MockProvider::start(vec![], vec![]).await;
    let message = json!({"images": [files.file_url()]});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn content_array_image_reference() {
    let files = MockProvider::start(vec![], vec![]).await;
    let message = json!({
        "role": "assistant",
        "content": [
            {"type": "text", "text": "Here is your wallpaper"},
            {"type": "image_url", "image_url": {"url": files.file_url()}}
        ]
    });
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn parts_inline_data() {
    let message = json!({"parts": [
        {"text": "caption"},
        {"inlineData": {"mimeType": "image/png", "data": encoded()}}
    ]});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn direct_image_field_and_plain_string_body() {
    let message = json!({"image_url": {"url": format!("data:image/png;base64,{}", encoded())}});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);

    let message = json!({"content": format!("data:image/png;base64,{}", encoded())});
    assert_eq!(generate_from(message).await, IMAGE_BYTES);
}

#[tokio::test]
async fn request_carries_prompt_credential_and_aspect_ratio() {
    let provider = MockProvider::start(
        vec![],
        vec![image_reply(json!({"images": [encoded()]}))],
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());

    generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("generate image");

    let requests = provider.image_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.authorization.as_deref(), Some("Bearer test-key"));
    assert_eq!(request.body["model"], settings.image_model.as_str());
    assert_eq!(request.body["messages"][0]["content"], PROMPT);
    assert_eq!(request.body["image_config"]["aspect_ratio"], "16:9");
    assert_eq!(request.body["modalities"], json!(["image", "text"]));
}

#[tokio::test]
async fn rate_limit_backs_off_then_succeeds() {
    let provider = MockProvider::start(
        vec![],
        vec![status(429), image_reply(json!({"images": [encoded()]}))],
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());

    let started = Instant::now();
    let artifact = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("generate image after retry");
    let elapsed = started.elapsed();

    assert_eq!(provider.image_requests().len(), 2);
    assert!(
        elapsed >= Duration::from_millis(1000),
        "only waited {elapsed:?}"
    );
    assert_eq!(std::fs::read(&artifact.path).expect("read"), IMAGE_BYTES);
}

#[tokio::test]
async fn rate_limit_gives_up_after_three_attempts() {
    let provider = MockProvider::start(vec![], vec![status(429)]).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());

    let err = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect_err("rate limited");
    assert!(matches!(err, PipelineError::RateLimited { attempts: 3 }), "{err}");
    assert_eq!(provider.image_requests().len(), 3);
    assert!(files_in(&settings.images_dir).is_empty());
}

#[tokio::test]
async fn forbidden_fails_on_first_attempt() {
    let provider = MockProvider::start(vec![], vec![status(403)]).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());

    let err = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect_err("forbidden");
    assert!(matches!(err, PipelineError::Client { .. }), "{err}");
    assert_eq!(provider.image_requests().len(), 1);
    assert!(files_in(&settings.images_dir).is_empty());
}

#[tokio::test]
async fn server_errors_retry_without_backoff() {
    let provider = MockProvider::start(
        vec![],
        vec![status(502), image_reply(json!({"images": [encoded()]}))],
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = provider.settings(dir.path());

    let started = Instant::now();
    generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("generate image");
    assert_eq!(provider.image_requests().len(), 2);
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn timed_out_attempt_is_retried() {
    let provider = MockProvider::start_stalled(
        vec![],
        vec![image_reply(json!({"images": [encoded()]}))],
        Duration::from_secs(2),
        1,
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = provider.settings(dir.path());
    settings.request_timeout = Duration::from_millis(300);

    let started = Instant::now();
    let artifact = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("second attempt succeeds");

    assert_eq!(provider.image_requests().len(), 2);
    assert_eq!(std::fs::read(&artifact.path).expect("read"), IMAGE_BYTES);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn timeouts_exhaust_the_attempt_budget() {
    let provider = MockProvider::start_with_delay(
        vec![],
        vec![image_reply(json!({"images": [encoded()]}))],
        Duration::from_secs(2),
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = provider.settings(dir.path());
    settings.request_timeout = Duration::from_millis(200);

    let err = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect_err("every attempt times out");
    assert!(matches!(err, PipelineError::Transport(_)), "{err}");
    assert_eq!(provider.image_requests().len(), 3);
    assert!(files_in(&settings.images_dir).is_empty());
}

#[tokio::test]
async fn missing_image_data_is_surfaced_even_with_placeholders() {
    let provider = MockProvider::start(
        vec![],
        vec![image_reply(json!({"content": "I could not draw that"}))],
    )
    .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = provider.settings(dir.path());
    settings.fallback = FallbackPolicy::Placeholder;

    let err = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect_err("no image");
    match err {
        PipelineError::ResponseShape { tried, .. } => assert_eq!(
            tried,
            vec!["images", "content_items", "image_url", "content_text", "parts"]
        ),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(provider.image_requests().len(), 1);
    assert!(files_in(&settings.images_dir).is_empty());
}

#[tokio::test]
async fn unreachable_provider_surfaces_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = MockProvider::start(vec![], vec![]).await;
    let mut settings = provider.settings(dir.path());
    settings.image_endpoint = dead_endpoint().await;

    let err = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect_err("unreachable");
    assert!(matches!(err, PipelineError::Transport(_)), "{err}");
    assert!(files_in(&settings.images_dir).is_empty());
}

#[tokio::test]
async fn unreachable_provider_renders_placeholder_when_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = MockProvider::start(vec![], vec![]).await;
    let mut settings = provider.settings(dir.path());
    settings.image_endpoint = dead_endpoint().await;
    settings.fallback = FallbackPolicy::Placeholder;

    let artifact = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("placeholder");
    assert_eq!(artifact.format, ArtifactFormat::Svg);
    let svg = std::fs::read_to_string(&artifact.path).expect("read svg");
    assert!(svg.contains(">I Am Unstoppable</text>"));
}

#[tokio::test]
async fn forbidden_renders_placeholder_when_enabled() {
    let provider = MockProvider::start(vec![], vec![status(403)]).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = provider.settings(dir.path());
    settings.fallback = FallbackPolicy::Placeholder;

    let artifact = generate_image(&reqwest::Client::new(), &settings, PROMPT)
        .await
        .expect("placeholder");
    assert_eq!(artifact.format, ArtifactFormat::Svg);
    assert_eq!(provider.image_requests().len(), 1);
}
