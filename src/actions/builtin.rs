use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::dispatcher::Action;
use super::topics;
use crate::bus::BusClient;
use crate::intent::Parameters;

pub const JOKES: &[&str] = &[
    "¿Qué le dice un techo a otro? Techo de menos.",
    "¿Cuál es el café más peligroso del mundo? El ex-preso.",
    "¿Por qué la computadora fue al médico? Porque tenía un virus.",
    "¿Qué hace una abeja en el gimnasio? ¡Zum-ba!",
    "¿Cómo se despiden los químicos? Ácido un placer.",
];

/// Every built-in action
pub fn builtin_actions() -> Vec<Box<dyn Action>> {
    vec![
        Box::new(PlaySpotify),
        Box::new(PlaySong),
        Box::new(NextTrack),
        Box::new(TellJoke),
    ]
}

/// Resume playback with the agent's default selection
pub struct PlaySpotify;

#[async_trait]
impl Action for PlaySpotify {
    fn intent(&self) -> &str {
        "play_spotify"
    }

    async fn execute(&self, bus: &BusClient, _parameters: &Parameters) -> Result<()> {
        bus.publish_text(topics::SPOTIFY_PLAY, "true").await?;
        Ok(())
    }
}

/// Ask the playback agent to search for and play `query`
pub struct PlaySong;

#[async_trait]
impl Action for PlaySong {
    fn intent(&self) -> &str {
        "play_song_by_name"
    }

    async fn execute(&self, bus: &BusClient, parameters: &Parameters) -> Result<()> {
        let query = parameters.get("query").map(String::as_str).unwrap_or_default();
        bus.publish_text(topics::SPOTIFY_PLAY_SONG, query).await?;
        Ok(())
    }
}

pub struct NextTrack;

#[async_trait]
impl Action for NextTrack {
    fn intent(&self) -> &str {
        "next_track"
    }

    async fn execute(&self, bus: &BusClient, _parameters: &Parameters) -> Result<()> {
        bus.publish_text(topics::SPOTIFY_NEXT, "1").await?;
        Ok(())
    }
}

/// Speak a random joke and log it
pub struct TellJoke;

#[async_trait]
impl Action for TellJoke {
    fn intent(&self) -> &str {
        "tell_joke"
    }

    async fn execute(&self, bus: &BusClient, _parameters: &Parameters) -> Result<()> {
        let joke = JOKES
            .choose(&mut rand::thread_rng())
            .copied()
            .context("Joke list is empty")?;

        bus.publish_text(topics::TTS_SAY, joke).await?;
        bus.publish_text(topics::LOG_INFO, &format!("JOKE::{}", joke)).await?;
        Ok(())
    }
}
