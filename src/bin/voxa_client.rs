use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use voxa::client::playback::{PlaybackSettings, RodioBackend};
use voxa::client::speech::GoogleTranslateTts;
use voxa::client::{Assistant, ChatClient, ConsolePresenter};
use voxa::config::ClientConfig;
use voxa::logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = ClientConfig::parse();
    logging::init("warn");

    let chat = ChatClient::new(&config.service_url, config.request_timeout())?;
    let mut assistant = Assistant::new(chat, Arc::new(ConsolePresenter)).with_playback(
        PlaybackSettings {
            max_duration: config.max_playback(),
            ..Default::default()
        },
    );
    if !config.no_audio {
        let tts = GoogleTranslateTts::new(&config.tts_lang)?;
        assistant = assistant.with_voice(Arc::new(tts), Arc::new(RodioBackend));
    }

    println!("💬 Voxa - Your AI Customer Support Assistant");
    println!("Ask your question using text. Voxa is ready to help you! (:quit to leave)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("⌨ Type your question here: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == ":quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        println!("🤖 Voxa is thinking...");
        assistant.handle_submit(&line).await;
    }

    println!("---");
    println!("Made with ❤ by the Voxa Team - Powered by FLAN-T5, axum and candle");
    Ok(())
}
