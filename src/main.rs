use std::env;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::StandardFramework,
    model::application::interaction::{Interaction, InteractionResponseType},
    model::gateway::Ready,
    model::id::{GuildId, UserId},
    model::prelude::VoiceState,
    prelude::{GatewayIntents, TypeMapKey},
};
use songbird::{SerenityInit, Songbird};
use tracing::info;

use cadence_bot::commands::{OrchestratorKey, MUSIC_GROUP};
use cadence_bot::config::BotConfig;
use cadence_bot::dashboard;
use cadence_bot::history::HistoryStore;
use cadence_bot::pipeline::{SongbirdGateway, SongbirdPipeline};
use cadence_bot::player::{Orchestrator, Origin};
use cadence_bot::resolver::YtDlpResolver;
use cadence_bot::session::Op;
use cadence_bot::stats::StatsStore;
use cadence_bot::ui::{
    MessageSurface, CONTROL_AUTOPLAY, CONTROL_NEXT, CONTROL_PREVIOUS, CONTROL_REPEAT,
    CONTROL_STOP, CONTROL_TOGGLE,
};

struct Handler;

struct BotUser;

impl TypeMapKey for BotUser {
    type Value = u64;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let data = &mut ctx.data.write().await;
        data.insert::<BotUser>(ready.user.id.0);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        let bot_id = {
            let data = ctx.data.read().await;
            data.get::<BotUser>().copied()
        };
        let (Some(bot_id), Some(guild_id)) = (bot_id, new.guild_id) else {
            return;
        };
        let orchestrator = {
            let data = ctx.data.read().await;
            data.get::<OrchestratorKey>().cloned()
        };
        let Some(orchestrator) = orchestrator else {
            return;
        };

        // The bot itself dropped off a channel: fatal for the session.
        if new.user_id.0 == bot_id && new.channel_id.is_none() {
            info!("Voice connection closed for guild {guild_id}");
            orchestrator.handle_voice_disconnect(guild_id.0).await;
            return;
        }

        if let Some(alone) = bot_alone_in_channel(&ctx, guild_id, bot_id) {
            orchestrator.handle_alone_state(guild_id.0, alone).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::MessageComponent(component) = interaction else {
            return;
        };
        let Some(guild_id) = component.guild_id else {
            return;
        };

        let op = match component.data.custom_id.as_str() {
            CONTROL_PREVIOUS => Op::Previous,
            CONTROL_TOGGLE => Op::TogglePlayback,
            CONTROL_NEXT => Op::Skip,
            CONTROL_STOP => Op::Stop,
            CONTROL_REPEAT => Op::ToggleRepeat,
            CONTROL_AUTOPLAY => Op::Autoplay { enabled: None },
            _ => return,
        };

        let orchestrator = {
            let data = ctx.data.read().await;
            data.get::<OrchestratorKey>()
                .expect("Orchestrator placed in at initialisation.")
                .clone()
        };

        let origin = Origin {
            text_channel: Some(component.channel_id.0),
            guild_name: None,
        };
        let reply = match orchestrator.dispatch(guild_id.0, origin, op).await {
            Ok(reply) if reply.is_empty() => "Done".to_string(),
            Ok(reply) => reply,
            Err(why) => format!("❌ {why}"),
        };

        let response = component
            .create_interaction_response(&ctx.http, |r| {
                r.kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|d| d.content(reply).ephemeral(true))
            })
            .await;
        if let Err(why) = response {
            info!("Error responding to interaction: {why:?}");
        }
    }
}

/// Whether the bot is the only non-bot member left in its voice channel.
/// None when the bot is not in a voice channel (or the guild is not cached).
fn bot_alone_in_channel(ctx: &Context, guild_id: GuildId, bot_id: u64) -> Option<bool> {
    let guild = ctx.cache.guild(guild_id)?;
    let bot_channel = guild
        .voice_states
        .get(&UserId(bot_id))
        .and_then(|voice_state| voice_state.channel_id)?;

    let humans = guild
        .voice_states
        .iter()
        .filter(|(user_id, voice_state)| {
            user_id.0 != bot_id && voice_state.channel_id == Some(bot_channel)
        })
        .filter(|(user_id, _)| {
            !ctx.cache
                .user(**user_id)
                .map(|user| user.bot)
                .unwrap_or(false)
        })
        .count();

    Some(humans == 0)
}

#[tokio::main]
async fn main() {
    let _ = dotenv();

    tracing_subscriber::fmt::init();

    let token = env::var("DISCORD_TOKEN").expect("Expected a token in the environment");
    let config = BotConfig::from_env();

    let framework = StandardFramework::new()
        .configure(|c| c.prefix(&config.command_prefix))
        .group(&MUSIC_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();

    let mut client = Client::builder(&token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await
        .expect("Err creating client");

    let history = Arc::new(HistoryStore::new(
        &config.history_dir,
        config.history_max_entries,
    ));
    let stats = Arc::new(StatsStore::new(&config.stats_dir));
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(YtDlpResolver),
        Arc::new(SongbirdPipeline::new(songbird.clone())),
        Arc::new(SongbirdGateway::new(songbird)),
        Arc::new(MessageSurface::new(client.cache_and_http.http.clone())),
        history,
        stats,
    );

    {
        let mut data = client.data.write().await;
        data.insert::<OrchestratorKey>(orchestrator.clone());
    }

    tokio::spawn(dashboard::serve(orchestrator));

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
}
