use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::application::component::ButtonStyle;
use serenity::model::id::{ChannelId, MessageId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{PlaybackStatus, SessionSnapshot, AUTOPLAY_REQUESTER};

pub const CONTROL_PREVIOUS: &str = "player:prev";
pub const CONTROL_TOGGLE: &str = "player:toggle";
pub const CONTROL_NEXT: &str = "player:next";
pub const CONTROL_STOP: &str = "player:stop";
pub const CONTROL_REPEAT: &str = "player:repeat";
pub const CONTROL_AUTOPLAY: &str = "player:autoplay";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

/// One button on the control surface. Enabled state is a pure function of
/// the snapshot the view was rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub id: &'static str,
    pub label: &'static str,
    pub style: ControlStyle,
    pub enabled: bool,
}

/// Fully rendered control surface. Two views rendered from equal snapshots
/// compare equal, which is what makes in-place edits cheap to skip and the
/// renderer testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub content: String,
    pub controls: Vec<Control>,
}

/// Renders the player message for a session snapshot.
pub fn render_player(snapshot: &SessionSnapshot, page_size: usize) -> PlayerView {
    let page_size = page_size.max(1);
    let mut content = String::new();

    match snapshot.current() {
        Some(track) => {
            let glyph = match snapshot.status {
                PlaybackStatus::Playing => "▶",
                PlaybackStatus::Paused => "⏸",
                PlaybackStatus::Transitioning => "⏳",
                PlaybackStatus::Idle => "⏹",
            };
            content.push_str(&format!("{glyph} **{}**\n", track.title));

            let requester = if track.requester == AUTOPLAY_REQUESTER {
                "autoplay".to_string()
            } else {
                format!("<@{}>", track.requester)
            };
            let elapsed = snapshot
                .elapsed
                .map(|e| {
                    let secs = e.as_secs();
                    format!("{}:{:02}", secs / 60, secs % 60)
                })
                .unwrap_or_else(|| "-".to_string());
            content.push_str(&format!(
                "requested by {requester} • {elapsed} / {}\n",
                track.format_duration()
            ));
        }
        None => {
            content.push_str("⏹ Nothing is playing.\n");
        }
    }

    if !snapshot.tracks.is_empty() {
        let page = snapshot.current_index.min(snapshot.tracks.len() - 1) / page_size;
        let start = page * page_size;
        let end = (start + page_size).min(snapshot.tracks.len());

        content.push_str("```\n");
        for index in start..end {
            let track = &snapshot.tracks[index];
            let marker = if index == snapshot.current_index { "▶" } else { " " };
            content.push_str(&format!(
                "{marker} {:>2}. [{}] {}\n",
                index + 1,
                track.format_duration(),
                track.title
            ));
        }
        content.push_str("```\n");

        let pages = (snapshot.tracks.len() + page_size - 1) / page_size;
        content.push_str(&format!(
            "{} track(s) • page {}/{} • ",
            snapshot.tracks.len(),
            page + 1,
            pages
        ));
    }

    content.push_str(&format!(
        "volume {:.1} • repeat {} • autoplay {}",
        snapshot.volume,
        if snapshot.repeat { "on" } else { "off" },
        if snapshot.autoplay { "on" } else { "off" },
    ));

    let has_current = snapshot.current().is_some();
    let at_last = snapshot.current_index + 1 >= snapshot.tracks.len();
    let controls = vec![
        Control {
            id: CONTROL_PREVIOUS,
            label: "⏮ Prev",
            style: ControlStyle::Secondary,
            enabled: has_current && snapshot.current_index > 0,
        },
        Control {
            id: CONTROL_TOGGLE,
            label: if snapshot.status == PlaybackStatus::Playing {
                "⏸ Pause"
            } else {
                "▶ Play"
            },
            style: ControlStyle::Primary,
            enabled: has_current,
        },
        Control {
            id: CONTROL_NEXT,
            label: "⏭ Next",
            style: ControlStyle::Secondary,
            enabled: has_current && (!at_last || snapshot.autoplay),
        },
        Control {
            id: CONTROL_STOP,
            label: "⏹ Stop",
            style: ControlStyle::Danger,
            enabled: snapshot.status != PlaybackStatus::Idle,
        },
        Control {
            id: CONTROL_REPEAT,
            label: "🔂 Repeat",
            style: if snapshot.repeat {
                ControlStyle::Success
            } else {
                ControlStyle::Secondary
            },
            enabled: has_current,
        },
        Control {
            id: CONTROL_AUTOPLAY,
            label: "♾ Autoplay",
            style: if snapshot.autoplay {
                ControlStyle::Success
            } else {
                ControlStyle::Secondary
            },
            enabled: true,
        },
    ];

    PlayerView { content, controls }
}

/// Renders the standalone queue listing used by the `queue` command.
pub fn render_queue(snapshot: &SessionSnapshot, limit: usize) -> String {
    if snapshot.tracks.is_empty() {
        return "The queue is empty!".to_string();
    }

    let mut lines = Vec::with_capacity(snapshot.tracks.len().min(limit));
    for (index, track) in snapshot.tracks.iter().take(limit).enumerate() {
        let marker = if index == snapshot.current_index { "▶" } else { " " };
        lines.push(format!(
            "{marker} {:>2}. [{}] {}",
            index + 1,
            track.format_duration(),
            track.title
        ));
    }
    if snapshot.tracks.len() > limit {
        lines.push(format!("... and {} more", snapshot.tracks.len() - limit));
    }
    format!("**Queue**:\n```\n{}\n```", lines.join("\n"))
}

/// Where rendered views end up. The gateway-backed implementation keeps one
/// live message per guild and edits it in place.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    async fn publish(&self, guild_id: u64, channel_id: u64, view: PlayerView);

    async fn clear(&self, guild_id: u64);

    async fn notify(&self, channel_id: u64, text: &str);
}

/// Serenity-backed surface. Holds only message addresses, never player
/// state; whatever is on screen came from the last published view.
pub struct MessageSurface {
    http: Arc<Http>,
    live: Mutex<HashMap<u64, (ChannelId, MessageId)>>,
}

impl MessageSurface {
    pub fn new(http: Arc<Http>) -> Self {
        MessageSurface {
            http,
            live: Mutex::new(HashMap::new()),
        }
    }

    async fn send_new(&self, guild_id: u64, channel_id: ChannelId, view: &PlayerView) {
        let sent = channel_id
            .send_message(&self.http, |m| {
                m.content(&view.content);
                apply_controls(m, &view.controls);
                m
            })
            .await;

        match sent {
            Ok(message) => {
                self.live
                    .lock()
                    .await
                    .insert(guild_id, (channel_id, message.id));
            }
            Err(why) => warn!("Sending player message failed for guild {guild_id}: {why:?}"),
        }
    }
}

#[async_trait]
impl ControlSurface for MessageSurface {
    async fn publish(&self, guild_id: u64, channel_id: u64, view: PlayerView) {
        let channel_id = ChannelId(channel_id);
        let existing = self.live.lock().await.get(&guild_id).copied();

        if let Some((live_channel, message_id)) = existing {
            let edited = live_channel
                .edit_message(&self.http, message_id, |m| {
                    m.content(&view.content);
                    m.components(|c| {
                        c.create_action_row(|row| {
                            for control in &view.controls {
                                row.create_button(|button| {
                                    button
                                        .custom_id(control.id)
                                        .label(control.label)
                                        .style(button_style(control.style))
                                        .disabled(!control.enabled)
                                });
                            }
                            row
                        })
                    })
                })
                .await;

            match edited {
                Ok(_) => return,
                Err(why) => {
                    // Message deleted or otherwise unreachable; fall through
                    // and publish a fresh one.
                    debug!("Editing player message failed for guild {guild_id}: {why:?}");
                    self.live.lock().await.remove(&guild_id);
                }
            }
        }

        self.send_new(guild_id, channel_id, &view).await;
    }

    async fn clear(&self, guild_id: u64) {
        if let Some((channel_id, message_id)) = self.live.lock().await.remove(&guild_id) {
            info!("Removing player message for guild {guild_id}");
            if let Err(why) = channel_id.delete_message(&self.http, message_id).await {
                debug!("Deleting player message failed for guild {guild_id}: {why:?}");
            }
        }
    }

    async fn notify(&self, channel_id: u64, text: &str) {
        if let Err(why) = ChannelId(channel_id).say(&self.http, text).await {
            info!("Error sending message: {why:?}");
        }
    }
}

fn apply_controls(
    message: &mut serenity::builder::CreateMessage<'_>,
    controls: &[Control],
) {
    message.components(|c| {
        c.create_action_row(|row| {
            for control in controls {
                row.create_button(|button| {
                    button
                        .custom_id(control.id)
                        .label(control.label)
                        .style(button_style(control.style))
                        .disabled(!control.enabled)
                });
            }
            row
        })
    });
}

fn button_style(style: ControlStyle) -> ButtonStyle {
    match style {
        ControlStyle::Primary => ButtonStyle::Primary,
        ControlStyle::Secondary => ButtonStyle::Secondary,
        ControlStyle::Success => ButtonStyle::Success,
        ControlStyle::Danger => ButtonStyle::Danger,
    }
}
