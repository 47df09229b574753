pub mod clip;
pub mod playback;
pub mod speech;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client as HttpClient;
use tracing::{debug, info, warn};

use crate::api::types::{ChatRequest, ChatResponse};
use clip::{remove_clip, write_clip, RetryPolicy};
use playback::{play_clip, AudioBackend, PlaybackSettings};
use speech::SpeechSynthesizer;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Network(#[from] reqwest::Error),
}

// ---------------------------------------------------------
// HTTP side
// ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ChatClient {
    http_client: HttpClient,
    endpoint: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http_client,
            endpoint: format!("{}/chat", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One `POST /chat` round trip. The message goes out exactly as typed.
    pub async fn ask(&self, message: &str) -> Result<String, ClientError> {
        let request = ChatRequest {
            message: message.to_string(),
        };

        let reply: ChatResponse = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| self.classify(err))?
            .json()
            .await
            .map_err(|err| self.classify(err))?;

        Ok(reply.response)
    }

    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Network(err)
        }
    }
}

// ---------------------------------------------------------
// Submission lifecycle
// ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    AwaitingReply,
    RepliedTextShown,
    SynthesizingSpeech,
    Playing,
    CleaningUp,
}

/// Something the user gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    Reply(String),
    WordCount(usize),
    NetworkError(String),
    AudioError(String),
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Reply(text) => write!(f, "🤖 Voxa says: '{text}'"),
            StatusLine::WordCount(n) => write!(f, "🧠 Word count: {n}"),
            StatusLine::NetworkError(msg) => write!(f, "❌ Network error: {msg}"),
            StatusLine::AudioError(msg) => write!(f, "🔊 Audio playback error: {msg}"),
        }
    }
}

pub trait Presenter: Send + Sync {
    fn show(&self, line: &StatusLine);
}

/// Prints status lines to stdout as they happen.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn show(&self, line: &StatusLine) {
        println!("{line}");
    }
}

#[derive(Debug, Default, Clone)]
pub struct SubmissionOutcome {
    pub states: Vec<SubmissionState>,
    pub lines: Vec<StatusLine>,
}

impl SubmissionOutcome {
    fn enter(&mut self, state: SubmissionState) {
        debug!(?state, "submission state");
        self.states.push(state);
    }

    pub fn reply(&self) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            StatusLine::Reply(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn word_count(&self) -> Option<usize> {
        self.lines.iter().find_map(|line| match line {
            StatusLine::WordCount(n) => Some(*n),
            _ => None,
        })
    }

    pub fn network_error(&self) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            StatusLine::NetworkError(msg) => Some(msg.as_str()),
            _ => None,
        })
    }

    pub fn audio_error(&self) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            StatusLine::AudioError(msg) => Some(msg.as_str()),
            _ => None,
        })
    }

    pub fn reached(&self, state: SubmissionState) -> bool {
        self.states.contains(&state)
    }
}

/// Whitespace word count shown next to every reply.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

struct Voice {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioBackend>,
}

/// Single-user front end: one submission at a time, reply text first, then
/// the spoken version.
pub struct Assistant {
    chat: ChatClient,
    presenter: Arc<dyn Presenter>,
    voice: Option<Voice>,
    playback: PlaybackSettings,
    cleanup: RetryPolicy,
    scratch_dir: PathBuf,
}

impl Assistant {
    pub fn new(chat: ChatClient, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            chat,
            presenter,
            voice: None,
            playback: PlaybackSettings::default(),
            cleanup: RetryPolicy::default(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_voice(
        mut self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioBackend>,
    ) -> Self {
        self.voice = Some(Voice {
            synthesizer,
            output,
        });
        self
    }

    pub fn with_playback(mut self, playback: PlaybackSettings) -> Self {
        self.playback = playback;
        self
    }

    pub fn with_cleanup(mut self, cleanup: RetryPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Runs one submission to completion. Empty input is ignored. Errors are
    /// shown to the user and recorded in the outcome, never returned, so the
    /// caller can always take the next submission.
    pub async fn handle_submit(&self, user_text: &str) -> SubmissionOutcome {
        let mut outcome = SubmissionOutcome::default();
        if user_text.is_empty() {
            return outcome;
        }

        outcome.enter(SubmissionState::AwaitingReply);
        let reply = match self.chat.ask(user_text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "chat request failed");
                self.emit(&mut outcome, StatusLine::NetworkError(err.to_string()));
                outcome.enter(SubmissionState::Idle);
                return outcome;
            }
        };

        outcome.enter(SubmissionState::RepliedTextShown);
        info!(chars = reply.chars().count(), "reply received");
        let words = word_count(&reply);
        self.emit(&mut outcome, StatusLine::Reply(reply.clone()));
        self.emit(&mut outcome, StatusLine::WordCount(words));

        if let Some(voice) = &self.voice {
            if let Err(err) = self.speak(voice, &reply, &mut outcome).await {
                warn!(error = %format!("{err:#}"), "audio playback failed");
                self.emit(&mut outcome, StatusLine::AudioError(format!("{err:#}")));
            }
        }

        outcome.enter(SubmissionState::Idle);
        outcome
    }

    async fn speak(&self, voice: &Voice, text: &str, outcome: &mut SubmissionOutcome) -> Result<()> {
        outcome.enter(SubmissionState::SynthesizingSpeech);
        let audio = voice
            .synthesizer
            .synthesize(text)
            .await
            .context("speech synthesis failed")?;
        let clip = write_clip(&self.scratch_dir, &audio)?;
        debug!(path = %clip.display(), bytes = audio.len(), "clip written");

        outcome.enter(SubmissionState::Playing);
        let output = voice.output.clone();
        let settings = self.playback.clone();
        let path = clip.clone();
        let played = tokio::task::spawn_blocking(move || play_clip(output.as_ref(), &path, &settings))
            .await
            .context("playback task panicked")
            .and_then(|res| res);

        // The clip is ours whether or not playback worked.
        outcome.enter(SubmissionState::CleaningUp);
        let policy = self.cleanup;
        let cleaned = tokio::task::spawn_blocking(move || remove_clip(&clip, &policy))
            .await
            .context("cleanup task panicked")
            .and_then(|res| res);

        match (played, cleaned) {
            (Ok(()), Ok(removed)) => {
                if !removed {
                    debug!("audio clip left behind");
                }
                Ok(())
            }
            (Ok(()), Err(cleanup)) => Err(cleanup),
            (Err(playback), Ok(_)) => Err(playback),
            (Err(playback), Err(cleanup)) => {
                warn!(error = %format!("{cleanup:#}"), "clip cleanup failed after playback error");
                Err(playback)
            }
        }
    }

    fn emit(&self, outcome: &mut SubmissionOutcome, line: StatusLine) {
        self.presenter.show(&line);
        outcome.lines.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_not_tokens() {
        assert_eq!(word_count("Hello there"), 2);
        assert_eq!(word_count("  spaced\tout\nwords  "), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = ChatClient::new("http://localhost:5000/", Duration::from_secs(60)).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:5000/chat");
    }

    #[test]
    fn status_lines_render_for_the_console() {
        assert_eq!(StatusLine::WordCount(2).to_string(), "🧠 Word count: 2");
        assert_eq!(
            StatusLine::Reply("Hello there".into()).to_string(),
            "🤖 Voxa says: 'Hello there'"
        );
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let client = ChatClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let assistant = Assistant::new(client, Arc::new(ConsolePresenter));

        let outcome = assistant.handle_submit("").await;

        assert!(outcome.states.is_empty());
        assert!(outcome.lines.is_empty());
    }
}
