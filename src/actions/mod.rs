//! Intent actions and the dispatcher that runs them on the scheduler

mod builtin;
mod dispatcher;

pub use builtin::{builtin_actions, NextTrack, PlaySong, PlaySpotify, TellJoke, JOKES};
pub use dispatcher::{Action, ActionDispatcher, DispatchStats};

/// Topic suffixes (below the configured base) consumed by downstream agents
pub mod topics {
    /// Resume default playback; payload `"true"`
    pub const SPOTIFY_PLAY: &str = "spotify/play";
    /// Search and play a song; payload is the free-text query
    pub const SPOTIFY_PLAY_SONG: &str = "spotify/play_song";
    /// Skip to the next track; payload `"1"`
    pub const SPOTIFY_NEXT: &str = "spotify/next";
    /// Text for the speech synthesizer
    pub const TTS_SAY: &str = "tts/say";
    pub const LOG_INFO: &str = "log/info";
    pub const LOG_WARN: &str = "log/warn";
}
