use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::debug;

const TRANSLATE_TTS_URL: &str = "https://translate.google.com/translate_tts";
/// The translate endpoint refuses longer inputs.
const MAX_CHUNK_CHARS: usize = 100;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns an MP3 payload speaking `text`.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Speech through the public Google Translate TTS endpoint.
#[derive(Debug, Clone)]
pub struct GoogleTranslateTts {
    http_client: HttpClient,
    endpoint: String,
    lang: String,
}

impl GoogleTranslateTts {
    pub fn new(lang: &str) -> Result<Self> {
        Self::with_endpoint(TRANSLATE_TTS_URL, lang)
    }

    pub fn with_endpoint(endpoint: &str, lang: &str) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build TTS http client")?;
        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            lang: lang.to_string(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTranslateTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let chunks = split_for_tts(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            bail!("no text to speak");
        }

        let total = chunks.len().to_string();
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx = idx.to_string();
            let textlen = chunk.chars().count().to_string();
            let bytes = self
                .http_client
                .get(&self.endpoint)
                .query(&[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", self.lang.as_str()),
                    ("q", chunk.as_str()),
                    ("total", total.as_str()),
                    ("idx", idx.as_str()),
                    ("textlen", textlen.as_str()),
                ])
                .send()
                .await
                .context("TTS request failed")?
                .error_for_status()
                .context("TTS endpoint rejected the request")?
                .bytes()
                .await
                .context("failed to read TTS audio")?;

            debug!(chunk = %idx, bytes = bytes.len(), "synthesized chunk");
            // MP3 frames are self-delimiting, so chunks concatenate cleanly.
            audio.extend_from_slice(&bytes);
        }

        Ok(audio)
    }
}

/// Splits `text` into pieces of at most `max_chars` characters, breaking on
/// whitespace where possible.
pub fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
