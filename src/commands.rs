use std::sync::Arc;

use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandError, CommandResult};
use serenity::model::channel::Message;
use serenity::model::guild::Guild;
use serenity::model::id::GuildId;
use serenity::prelude::TypeMapKey;
use serenity::Result as SerenityResult;
use tracing::info;

use crate::player::{Orchestrator, Origin};
use crate::recommend::MAX_RECOMMENDATIONS;
use crate::session::Op;

pub struct OrchestratorKey;

impl TypeMapKey for OrchestratorKey {
    type Value = Arc<Orchestrator>;
}

#[group]
#[commands(
    join, play, pause, resume, stop, leave, skip, jump, queue, remove, move_track, shuffle,
    repeat, volume, autoplay, recommend, nowplaying, help
)]
struct Music;

async fn orchestrator(ctx: &Context) -> Arc<Orchestrator> {
    ctx.data
        .read()
        .await
        .get::<OrchestratorKey>()
        .expect("Orchestrator placed in at initialisation.")
        .clone()
}

fn origin_of(ctx: &Context, msg: &Message) -> Origin {
    Origin {
        text_channel: Some(msg.channel_id.0),
        guild_name: msg.guild(&ctx.cache).map(|guild| guild.name),
    }
}

/// Dispatches one operation and relays the reply (or the validation error)
/// to the channel the command came from.
async fn run(ctx: &Context, msg: &Message, op: Op) -> CommandResult {
    let orchestrator = orchestrator(ctx).await;
    let guild_id = get_guild_id(ctx, msg)?;

    match orchestrator.dispatch(guild_id.0, origin_of(ctx, msg), op).await {
        Ok(reply) => {
            if !reply.is_empty() {
                check_msg(msg.channel_id.say(&ctx.http, reply).await);
            }
        }
        Err(why) => {
            check_msg(msg.channel_id.say(&ctx.http, format!("❌ {why}")).await);
        }
    }
    Ok(())
}

/// Joins the voice channel of the command author. Returns false (after
/// telling the user) when they are not in one.
async fn ensure_joined(ctx: &Context, msg: &Message) -> Result<bool, CommandError> {
    let guild = get_guild(ctx, msg)?;
    let voice_channel = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);

    let connect_to = match voice_channel {
        Some(channel) => channel,
        None => {
            check_msg(msg.reply(ctx, "Join a voice channel first!").await);
            return Ok(false);
        }
    };

    let orchestrator = orchestrator(ctx).await;
    if let Err(why) = orchestrator
        .join(guild.id.0, connect_to.0, origin_of(ctx, msg))
        .await
    {
        check_msg(msg.channel_id.say(&ctx.http, format!("❌ {why}")).await);
        return Ok(false);
    }
    Ok(true)
}

#[command]
#[only_in(guilds)]
async fn join(ctx: &Context, msg: &Message) -> CommandResult {
    if ensure_joined(ctx, msg).await? {
        check_msg(msg.channel_id.say(&ctx.http, "Joined your voice channel").await);
    }
    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("p")]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim().to_string();
    if query.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Usage: `play <search or URL>`")
                .await,
        );
        return Ok(());
    }

    info!("User input is {query}");

    if !ensure_joined(ctx, msg).await? {
        return Ok(());
    }

    run(
        ctx,
        msg,
        Op::Play {
            query,
            requester: msg.author.id.0,
        },
    )
    .await
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::Pause).await
}

#[command]
#[only_in(guilds)]
#[aliases("unpause")]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::Resume).await
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::Stop).await
}

#[command]
#[only_in(guilds)]
async fn leave(ctx: &Context, msg: &Message) -> CommandResult {
    let orchestrator = orchestrator(ctx).await;
    let guild_id = get_guild_id(ctx, msg)?;

    match orchestrator.leave(guild_id.0).await {
        Ok(()) => check_msg(msg.channel_id.say(&ctx.http, "Left the voice channel").await),
        Err(why) => check_msg(msg.channel_id.say(&ctx.http, format!("❌ {why}")).await),
    }
    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("next")]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::Skip).await
}

#[command]
#[only_in(guilds)]
#[aliases("goto")]
async fn jump(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let position = match args.single::<usize>() {
        Ok(position) => position,
        Err(_) => {
            check_msg(msg.channel_id.say(&ctx.http, "Usage: `jump <position>`").await);
            return Ok(());
        }
    };
    run(ctx, msg, Op::Jump { position }).await
}

#[command]
#[only_in(guilds)]
#[aliases("q")]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::ShowQueue).await
}

#[command]
#[only_in(guilds)]
async fn remove(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let position = match args.single::<usize>() {
        Ok(position) => position,
        Err(_) => {
            check_msg(msg.channel_id.say(&ctx.http, "Usage: `remove <position>`").await);
            return Ok(());
        }
    };
    run(ctx, msg, Op::Remove { position }).await
}

#[command("move")]
#[only_in(guilds)]
async fn move_track(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let (from, to) = match (args.single::<usize>(), args.single::<usize>()) {
        (Ok(from), Ok(to)) => (from, to),
        _ => {
            check_msg(msg.channel_id.say(&ctx.http, "Usage: `move <from> <to>`").await);
            return Ok(());
        }
    };
    run(ctx, msg, Op::Move { from, to }).await
}

#[command]
#[only_in(guilds)]
async fn shuffle(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::Shuffle).await
}

#[command]
#[only_in(guilds)]
async fn repeat(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::ToggleRepeat).await
}

#[command]
#[only_in(guilds)]
#[aliases("vol")]
async fn volume(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let value = match args.single::<f32>() {
        Ok(value) => value,
        Err(_) => {
            check_msg(msg.channel_id.say(&ctx.http, "Usage: `volume <value>`").await);
            return Ok(());
        }
    };
    run(ctx, msg, Op::Volume { value }).await
}

#[command]
#[only_in(guilds)]
#[aliases("ap", "auto")]
async fn autoplay(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let enabled = match args.single::<String>().as_deref() {
        Ok("on") => Some(true),
        Ok("off") => Some(false),
        _ => None, // bare `autoplay` toggles
    };
    run(ctx, msg, Op::Autoplay { enabled }).await
}

#[command]
#[only_in(guilds)]
#[aliases("rec")]
async fn recommend(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let count = args
        .single::<usize>()
        .unwrap_or(5)
        .clamp(1, MAX_RECOMMENDATIONS);
    run(ctx, msg, Op::Recommend { count }).await
}

#[command]
#[only_in(guilds)]
#[aliases("np")]
async fn nowplaying(ctx: &Context, msg: &Message) -> CommandResult {
    run(ctx, msg, Op::ShowPlayer).await
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **play [URL|title]** (p) - Plays (or queues) tracks from a URL, playlist URL or search.
    **pause** / **resume** - Pause or resume the current track.
    **skip** (next) - Plays the next track.
    **jump [POSITION]** (goto) - Jumps to any position in the queue, forward or back.
    **queue** (q) - Shows the queue.
    **remove [POSITION]** - Removes a track from the queue.
    **move [FROM] [TO]** - Moves a track to another position.
    **shuffle** - Reorders the queue randomly, keeping the playing track in place.
    **repeat** - Toggles repeating the current track.
    **volume [0.1-2.0]** (vol) - Sets the playback volume.
    **autoplay [on|off]** (ap) - Keeps the music going from your listening history.
    **recommend [N]** (rec) - Suggests tracks based on what has been played here.
    **nowplaying** (np) - Shows the player controls.
    **stop** - Stops playback and clears the queue.
    **leave** - Disconnects from the voice channel.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);
    Ok(())
}

/// Checks that a message successfully sent; if not, then logs why.
pub fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

pub fn get_guild(ctx: &Context, msg: &Message) -> Result<Guild, CommandError> {
    msg.guild(&ctx.cache)
        .ok_or(CommandError::from("Guild not found"))
}

pub fn get_guild_id(ctx: &Context, msg: &Message) -> Result<GuildId, CommandError> {
    Ok(get_guild(ctx, msg)?.id)
}
