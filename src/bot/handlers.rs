use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Instant;
use tracing::{info, warn};

use crate::{
    audio::{
        driver::{GuildStatus, Phase},
        error::PlaybackError,
        player::{PlayOutcome, PlayRequest},
    },
    bot::OpenMusicBot,
    sources::TrackRef,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenMusicBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => {
            let content = match bot.player.skip(guild_id).await {
                Ok(track) => skipped_message(&track),
                Err(PlaybackError::NoActivePlayback) => "Not playing anything to skip.".to_string(),
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "pause" => {
            let content = match bot.player.pause(guild_id).await {
                Ok(()) => "Playback paused!".to_string(),
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "resume" => {
            let content = match bot.player.resume(guild_id).await {
                Ok(()) => "Playback resumed!".to_string(),
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "stop" => {
            let content = match bot.player.stop(guild_id).await {
                Ok(()) => "Stopped playback and disconnected!".to_string(),
                Err(PlaybackError::NoActivePlayback) => {
                    "I'm not connected to any voice channel.".to_string()
                }
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "queue" => {
            let content = match bot.player.queue(guild_id).await {
                Ok(titles) => format_queue(&titles),
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "nowplaying" => {
            let content = match bot.player.status(guild_id).await {
                Ok(status) => now_playing_message(&status),
                Err(e) => error_message(&e),
            };
            respond(ctx, &command, content).await?;
        }
        "ping" => handle_ping(ctx, &command).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Unknown command")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let request = PlayRequest {
        guild_id,
        query,
        voice_channel: get_user_voice_channel(ctx, guild_id, command.user.id),
        text_channel: command.channel_id,
    };

    let content = match bot.player.play(request).await {
        Ok(outcome) => {
            if let Some(title) = &outcome.playlist_title {
                info!("📃 Playlist `{}` encolada en guild {}", title, guild_id);
            }
            play_message(&outcome)
        }
        Err(e) => {
            warn!("❌ /play falló en guild {}: {}", guild_id, e);
            error_message(&e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

/// Latencia medida como ida y vuelta a la API REST
async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let started = Instant::now();
    ctx.http.get_current_user().await?;
    let latency_ms = started.elapsed().as_millis();

    respond(ctx, command, format!("Pong! Latency: {} ms", latency_ms)).await
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: String) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;

    Ok(())
}

/// Canal de voz del usuario según la caché de la guild
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

fn play_message(outcome: &PlayOutcome) -> String {
    let mut message = match outcome.tracks.as_slice() {
        [track] => format!("Added to queue: **{}**", track.title),
        tracks => format!("Queued **{}** tracks from playlist.", tracks.len()),
    };

    if outcome.dropped > 0 {
        message.push_str(&format!(
            "\n⚠️ {} tracks were not added: the queue is full.",
            outcome.dropped
        ));
    }

    message
}

fn skipped_message(track: &TrackRef) -> String {
    format!("Skipped **{}**.", track.title)
}

fn now_playing_message(status: &GuildStatus) -> String {
    match &status.now_playing {
        Some(track) if status.paused => format!("⏸️ Paused: **{}**", track.title),
        Some(track) => format!("🎵 Now playing: **{}**", track.title),
        None if status.active && status.phase == Phase::Resolving => {
            "⏳ Loading the next track...".to_string()
        }
        None => "Nothing is currently playing.".to_string(),
    }
}

/// Lista numerada desde 1, un título por línea
pub fn format_queue(titles: &[String]) -> String {
    if titles.is_empty() {
        return "The queue is empty.".to_string();
    }

    let list = titles
        .iter()
        .enumerate()
        .map(|(i, title)| format!("{}. {}", i + 1, title))
        .collect::<Vec<_>>()
        .join("\n");

    format!("Current Queue:\n{}", list)
}

fn error_message(error: &PlaybackError) -> String {
    match error {
        PlaybackError::Resolve(e) => format!("Error fetching results: {}", e),
        PlaybackError::NotInVoiceChannel => "You must be in a voice channel.".to_string(),
        PlaybackError::NoActivePlayback => "Nothing is currently playing.".to_string(),
        PlaybackError::AlreadyPaused => "Playback is already paused.".to_string(),
        PlaybackError::AlreadyPlaying => "I'm not paused right now.".to_string(),
        PlaybackError::VoiceConnection(e) => format!("Could not join the voice channel: {}", e),
        PlaybackError::QueueFull(max) => format!("The queue is full (max {} tracks).", max),
        PlaybackError::DispatcherClosed => {
            "The player is shutting down, try again later.".to_string()
        }
    }
}
