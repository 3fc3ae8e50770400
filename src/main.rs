use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod sources;

use crate::audio::{player::AudioPlayer, voice::SongbirdGateway};
use crate::bot::{ChannelAnnouncer, OpenMusicBot};
use crate::config::Config;
use crate::sources::{ResolverPool, YtDlpResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("⚙️ {}", config.summary());

    let ytdlp = YtDlpResolver::new(&config);

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&ytdlp).await;
    }

    // Pool de resolución acotado
    let resolver = ResolverPool::new(
        Arc::new(ytdlp),
        config.resolver_workers,
        config.resolve_timeout(),
    );

    // Intents mínimos: comandos y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let shutdown = CancellationToken::new();

    let (player, dispatcher) = AudioPlayer::start(
        config.max_queue_size,
        resolver.clone(),
        Arc::new(SongbirdGateway::new(songbird.clone())),
        Arc::new(ChannelAnnouncer::new(http)),
        shutdown.clone(),
    );

    // Crear handler del bot
    let handler = OpenMusicBot::new(config.clone(), player);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        signal_shutdown.cancel();
        resolver.close();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    if let Err(e) = dispatcher.await {
        error!("El contexto de dispatch terminó con error: {:?}", e);
    }

    Ok(())
}

async fn health_check(ytdlp: &YtDlpResolver) -> Result<()> {
    let version = ytdlp.version().await?;
    info!("✅ yt-dlp {}", version);
    println!("OK");
    Ok(())
}
