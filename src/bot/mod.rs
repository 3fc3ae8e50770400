//! # Bot Module
//!
//! Capa de Discord del bot: registro de comandos slash, handlers y
//! seguimiento del estado de voz del propio bot.
//!
//! [`OpenMusicBot`] implementa el [`EventHandler`] de serenity y delega todo
//! lo relacionado con colas y reproducción en [`AudioPlayer`].

use anyhow::Result;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    http::Http,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{driver::Announcer, player::AudioPlayer},
    config::Config,
};

/// Handler principal de eventos de Discord
pub struct OpenMusicBot {
    config: Arc<Config>,
    pub player: AudioPlayer,
}

impl OpenMusicBot {
    pub fn new(config: Config, player: AudioPlayer) -> Self {
        Self {
            config: Arc::new(config),
            player,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered on a single guild when `GUILD_ID` is set
    /// (instant propagation, useful for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for OpenMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        ctx.set_activity(Some(ActivityData::listening(self.config.status_text.as_str())));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detecta cuando el bot es sacado del canal de voz.
    ///
    /// Nuestras propias desconexiones también llegan por acá; el reproductor
    /// las reconoce y las descarta.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new
            .guild_id
            .or_else(|| old.as_ref().and_then(|state| state.guild_id))
        else {
            return;
        };
        let left = old.and_then(|state| state.channel_id);

        info!("🔌 Bot desconectado de voz en guild {} ({:?})", guild_id, left);
        self.player.connection_lost(guild_id, left);
    }
}

/// Publica los avisos del reproductor con la API REST de Discord
pub struct ChannelAnnouncer {
    http: Arc<Http>,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn announce(&self, channel_id: ChannelId, message: String) {
        match channel_id.say(self.http.as_ref(), message).await {
            Ok(_) => debug!("📨 Aviso enviado a canal {}", channel_id),
            Err(e) => warn!("No se pudo enviar aviso a canal {}: {:?}", channel_id, e),
        }
    }
}
