use thiserror::Error;

use crate::sources::ResolveError;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("you must be in a voice channel")]
    NotInVoiceChannel,
    #[error("nothing is currently playing")]
    NoActivePlayback,
    #[error("playback is already paused")]
    AlreadyPaused,
    #[error("playback is not paused")]
    AlreadyPlaying,
    #[error("voice connection error: {0}")]
    VoiceConnection(String),
    #[error("the queue is full (max {0} tracks)")]
    QueueFull(usize),
    #[error("playback dispatcher is not running")]
    DispatcherClosed,
}
