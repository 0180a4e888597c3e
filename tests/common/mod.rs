//! Local stand-in for the text and image providers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use affirmwall::config::Settings;
use affirmwall::wallpaper::WallpaperSetter;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};
use url::Url;

/// A tiny PNG-looking payload, enough for byte comparisons.
pub const IMAGE_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4];

/// A captured request.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub authorization: Option<String>,
    pub title: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct Queue {
    replies: VecDeque<(StatusCode, Value)>,
    seen: Vec<Recorded>,
}

impl Queue {
    /// Pops the next reply, the last one repeats forever.
    fn next(&mut self) -> (StatusCode, Value) {
        if self.replies.len() > 1 {
            self.replies
                .pop_front()
                .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, Value::Null))
        } else {
            self.replies
                .front()
                .cloned()
                .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, Value::Null))
        }
    }
}

#[derive(Clone, Default)]
struct MockState {
    text: Arc<Mutex<Queue>>,
    image: Arc<Mutex<Queue>>,
    delay: Duration,
    /// how many image requests, from the first, are held back by `delay`
    stalled: usize,
}

fn record(headers: &HeaderMap, body: Value) -> Recorded {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Recorded {
        authorization: header("authorization"),
        title: header("x-title"),
        body,
    }
}

async fn reply(
    queue: &Mutex<Queue>,
    headers: &HeaderMap,
    body: Value,
    delay: Duration,
    stalled: usize,
) -> (StatusCode, axum::Json<Value>) {
    let (index, (status, payload)) = {
        let mut queue = queue.lock().unwrap();
        let index = queue.seen.len();
        queue.seen.push(record(headers, body));
        (index, queue.next())
    };
    if index < stalled && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    (status, axum::Json(payload))
}

async fn text_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    reply(&state.text, &headers, body, Duration::ZERO, 0).await
}

async fn image_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    reply(&state.image, &headers, body, state.delay, state.stalled).await
}

async fn file_handler() -> impl IntoResponse {
    ([("content-type", "image/png")], IMAGE_BYTES.to_vec())
}

/// Running mock provider.
pub struct MockProvider {
    addr: SocketAddr,
    state: MockState,
}

impl MockProvider {
    /// Starts a provider answering the text and image endpoints from the given queues.
    pub async fn start(text: Vec<(StatusCode, Value)>, image: Vec<(StatusCode, Value)>) -> Self {
        Self::start_with_delay(text, image, Duration::ZERO).await
    }

    /// Like [`MockProvider::start`] but every image reply is held back by `delay`.
    pub async fn start_with_delay(
        text: Vec<(StatusCode, Value)>,
        image: Vec<(StatusCode, Value)>,
        delay: Duration,
    ) -> Self {
        Self::start_stalled(text, image, delay, usize::MAX).await
    }

    /// Holds back only the first `stalled` image replies by `delay`.
    pub async fn start_stalled(
        text: Vec<(StatusCode, Value)>,
        image: Vec<(StatusCode, Value)>,
        delay: Duration,
        stalled: usize,
    ) -> Self {
        let state = MockState {
            text: Arc::new(Mutex::new(Queue {
                replies: text.into(),
                seen: Vec::new(),
            })),
            image: Arc::new(Mutex::new(Queue {
                replies: image.into(),
                seen: Vec::new(),
            })),
            delay,
            stalled,
        };
        let app = Router::new()
            .route("/text", post(text_handler))
            .route("/image", post(image_handler))
            .route("/files/wallpaper.png", get(file_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock provider");
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{path}", self.addr)).expect("mock url")
    }

    pub fn file_url(&self) -> String {
        self.url("/files/wallpaper.png").to_string()
    }

    pub fn text_requests(&self) -> Vec<Recorded> {
        self.state.text.lock().unwrap().seen.clone()
    }

    pub fn image_requests(&self) -> Vec<Recorded> {
        self.state.image.lock().unwrap().seen.clone()
    }

    /// Settings pointing both endpoints at this provider.
    pub fn settings(&self, data_dir: &Path) -> Settings {
        let mut settings =
            Settings::new(Some("test-key".to_string()), data_dir).expect("settings");
        settings.text_endpoint = self.url("/text");
        settings.image_endpoint = self.url("/image");
        settings.request_timeout = Duration::from_secs(10);
        settings
    }
}

/// An address nothing listens on.
pub async fn dead_endpoint() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    Url::parse(&format!("http://{addr}/image")).expect("dead url")
}

/// Chat completion whose content is `content`.
pub fn text_reply(content: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}),
    )
}

/// Chat completion with `message` as the assistant message.
pub fn image_reply(message: Value) -> (StatusCode, Value) {
    (StatusCode::OK, json!({"choices": [{"message": message}]}))
}

pub fn status(code: u16) -> (StatusCode, Value) {
    (
        StatusCode::from_u16(code).expect("status"),
        json!({"error": {"code": code, "message": "mock error"}}),
    )
}

pub const PROMPT_REPLY: &str = "1. I Am Unstoppable: A runner on a mountain ridge at dawn, text in the sky\n\
2. I Speak With Ease: A sunlit auditorium, text across the stage curtain\n\
3. I Am Enough: A calm lake with reflections, text mirrored on the water";

/// Files currently in `dir`, or nothing if it doesn't exist.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Wallpaper setter that remembers what it was asked to apply.
#[derive(Debug, Default)]
pub struct RecordingWallpaper {
    pub applied: Mutex<Vec<PathBuf>>,
    pub fail: bool,
}

impl RecordingWallpaper {
    pub fn failing() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

impl WallpaperSetter for RecordingWallpaper {
    async fn set_wallpaper(&self, path: &Path) -> bool {
        self.applied.lock().unwrap().push(path.to_path_buf());
        !self.fail
    }
}
