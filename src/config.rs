use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Inference service settings. Every flag can also come from the
/// environment (or a `.env` file loaded by the binary).
#[derive(Debug, Clone, Parser)]
#[command(name = "voxa-server", about = "Voxa customer-support inference service")]
pub struct ServiceConfig {
    /// Local snapshot directory or Hugging Face Hub model id.
    #[arg(long, env = "VOXA_MODEL_PATH", default_value = "model3")]
    pub model: String,

    /// `cpu`, `cuda` or `cuda:N`; auto-detected when unset.
    #[arg(long, env = "VOXA_DEVICE")]
    pub device: Option<String>,

    #[arg(long, env = "VOXA_BIND_ADDR", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Fixes the sampling seed so replies are reproducible.
    #[arg(long, env = "VOXA_SEED")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "voxa-client", about = "Voxa terminal chat client with spoken replies")]
pub struct ClientConfig {
    #[arg(long, env = "VOXA_SERVICE_URL", default_value = "http://localhost:5000")]
    pub service_url: String,

    #[arg(long, env = "VOXA_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Language code passed to the speech synthesizer.
    #[arg(long, env = "VOXA_TTS_LANG", default_value = "en")]
    pub tts_lang: String,

    /// Upper bound on how long a single reply may play.
    #[arg(long, env = "VOXA_MAX_PLAYBACK_SECS", default_value_t = 600)]
    pub max_playback_secs: u64,

    /// Show replies as text only.
    #[arg(long = "no-audio", env = "VOXA_NO_AUDIO")]
    pub no_audio: bool,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_playback(&self) -> Duration {
        Duration::from_secs(self.max_playback_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_flags_override_defaults() {
        let cfg = ServiceConfig::try_parse_from([
            "voxa-server",
            "--model",
            "google/flan-t5-base",
            "--bind",
            "0.0.0.0:8080",
            "--device",
            "cpu",
            "--seed",
            "9",
        ])
        .unwrap();

        assert_eq!(cfg.model, "google/flan-t5-base");
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.device.as_deref(), Some("cpu"));
        assert_eq!(cfg.seed, Some(9));
    }

    #[test]
    fn bad_bind_address_is_an_error() {
        assert!(ServiceConfig::try_parse_from(["voxa-server", "--bind", "nowhere"]).is_err());
    }

    #[test]
    fn client_durations() {
        let cfg = ClientConfig::try_parse_from([
            "voxa-client",
            "--timeout-secs",
            "5",
            "--max-playback-secs",
            "30",
            "--no-audio",
        ])
        .unwrap();

        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_playback(), Duration::from_secs(30));
        assert!(cfg.no_audio);
    }
}
