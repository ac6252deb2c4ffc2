// src/notify/markers.rs
use super::{ChannelInfo, ChatPlatform, PlatformError, Reactor, ReactionMarker, SentMessage};

/// Outcome of decorating one message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReactionReport {
    pub added: usize,
    pub failed: usize,
    /// Permission was denied; remaining markers were not attempted.
    pub halted: bool,
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Map configured marker names onto platform handles.
///
/// Names found among the guild's custom emoji become `name:id` handles.
/// Anything that is not a plain identifier is taken to be a unicode emoji.
/// Plain names the guild does not have are logged and left out.
/// A failed emoji listing degrades to unicode markers only.
pub async fn resolve_markers<P: ChatPlatform + ?Sized>(
    platform: &P,
    guild_id: Option<u64>,
    names: &[String],
) -> Vec<ReactionMarker> {
    match try_resolve_markers(platform, guild_id, names).await {
        Ok(markers) => markers,
        Err(e) => {
            tracing::warn!(guild = ?guild_id, error = %e, "could not list guild emoji");
            match_markers(&[], names)
        }
    }
}

/// Like [`resolve_markers`] but surfaces a failed emoji listing, so callers
/// that cache the result can retry later.
pub async fn try_resolve_markers<P: ChatPlatform + ?Sized>(
    platform: &P,
    guild_id: Option<u64>,
    names: &[String],
) -> Result<Vec<ReactionMarker>, PlatformError> {
    let guild_emoji = match guild_id {
        Some(gid) => platform.guild_markers(gid).await?,
        None => Vec::new(),
    };
    Ok(match_markers(&guild_emoji, names))
}

fn match_markers(guild_emoji: &[(String, String)], names: &[String]) -> Vec<ReactionMarker> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if let Some((n, id)) = guild_emoji.iter().find(|(n, _)| n == name) {
            out.push(ReactionMarker::custom(n, id));
        } else if !is_plain_name(name) {
            out.push(ReactionMarker::unicode(name));
        } else {
            tracing::warn!(marker = name, "Emoji '{name}' not found in the server.");
        }
    }
    out
}

/// Attach each marker in order. One failing marker does not stop the rest,
/// except a permission error, which would fail the same way for all of them.
pub async fn add_reactions<R: Reactor + ?Sized>(
    reactor: &R,
    channel: &ChannelInfo,
    message: &SentMessage,
    markers: &[ReactionMarker],
) -> ReactionReport {
    let mut report = ReactionReport::default();
    for marker in markers {
        match reactor.react(message, marker).await {
            Ok(()) => report.added += 1,
            Err(e) if e.is_forbidden() => {
                tracing::error!(
                    channel = %channel,
                    marker = %marker.name,
                    "Bot lacks permissions to add reactions in channel {channel}. Emoji: {}",
                    marker.name
                );
                report.failed += 1;
                report.halted = true;
                break;
            }
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    marker = %marker.name,
                    error = %e,
                    "Failed to add reaction {}",
                    marker.name
                );
                report.failed += 1;
            }
        }
    }
    report
}
