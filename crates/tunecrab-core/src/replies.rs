//! User-facing message text.

use crate::fetcher::VideoInfo;
use crate::media::size_mb;
use crate::session::SearchResult;

pub const FALLBACK_ERROR: &str = "❌ Error occurred. Please try again.";
pub const GENERIC_ERROR: &str = "❌ An error occurred processing your message. Please try again.";
pub const MUSIC_USAGE: &str = "❌ Please provide a song name. Example: !music Shape of You";
pub const YT_INVALID: &str = "❌ Invalid YouTube URL. Please provide a valid YouTube URL.";
pub const IG_INVALID: &str = "❌ Invalid Instagram URL. Please provide a valid Instagram URL.";
pub const YT_PROCESSING: &str = "⏳ Processing YouTube URL...";
pub const IG_PROCESSING: &str = "⏳ Processing Instagram URL...";
pub const IG_PRIVATE: &str =
    "❌ This Instagram content is private. You need to be logged in and following this account to access it.";
pub const IG_LOGIN_REQUIRED: &str =
    "❌ Instagram login required or session expired. Please send Instagram cookies.";
pub const IG_NO_MEDIA: &str = "❌ No media found at this Instagram URL.";
pub const IG_COMPLETE: &str = "✅ Instagram download complete!";
pub const IG_NOTHING_SENDABLE: &str = "❌ Every file at this Instagram URL is over the size limit. Nothing was sent.";
pub const IG_LOGIN_HELP: &str = "ℹ️ Instagram login works with browser cookies only. Export your instagram.com cookies in Netscape format and send the file contents here; the bot detects and imports them automatically.";
pub const COOKIES_SAVED: &str =
    "✅ Instagram cookies successfully imported! You can now download Instagram content without manual login.";
pub const COOKIES_FAILED: &str = "❌ Failed to save Instagram cookies. Please try again.";
pub const PONG: &str = "🏓 Pong! The bot is up.";
pub const GREETING: &str = "👋 Hello! I am a media bot that can find music and download videos from Instagram and YouTube. Send !help to see available commands.";
pub const CAPABILITIES: &str =
    "I can help you find music and download videos from Instagram and YouTube. Send !help to see available commands.";
pub const BUSY: &str = "⏳ I'm still working on your previous request. Send !cancel to stop it.";
pub const QUEUE_FULL: &str = "🚦 The bot is busy right now. Please try again in a few minutes.";
pub const TIMED_OUT: &str = "⏱️ The download took too long and was stopped. Please try again later.";
pub const CANCELLED: &str = "🛑 Download cancelled.";
pub const CANCEL_REQUESTED: &str = "🛑 Cancelling your current download...";
pub const SELECTION_CLEARED: &str = "🧹 Cleared your pending search results.";
pub const NOTHING_TO_CANCEL: &str = "ℹ️ Nothing to cancel.";
pub const SHUTTING_DOWN: &str = "🔧 The bot is restarting. Please try again shortly.";
pub const RATE_LIMITED: &str = "🐢 You're sending messages too fast. Please slow down.";

pub const HELP: &str = "📱 *Media Bot Help*\n\n\
*Available Commands:*\n\n\
🎵 *!music [song name]* - Search and download a song (shows options to choose)\n\
🎬 *!yt [url]* - Download a YouTube video\n\
📸 *!ig [url]* - Download Instagram photo/video\n\
🔑 *!iglogin* - Login to Instagram (for private content)\n\
🛑 *!cancel* - Stop your current download\n\
🏓 *!ping* - Check that the bot is alive\n\
❓ *!help* - Show this help message\n\n\
*How to download music:*\n1. Send !music [song name]\n2. Choose a song by replying with its number\n3. Wait for download to complete";

/// `m:ss`
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn duration_or_unknown(secs: Option<u64>) -> String {
    secs.map(format_duration)
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn searching(query: &str) -> String {
    format!("🔍 Searching for \"{query}\"...")
}

pub fn no_results(query: &str) -> String {
    format!("❌ No songs found for \"{query}\". Please try a different search term.")
}

pub fn result_list(query: &str, results: &[SearchResult]) -> String {
    let mut text = format!(
        "🎵 *Found {} results for \"{query}\"*\n\nReply with the number to download:\n\n",
        results.len()
    );
    for (i, result) in results.iter().enumerate() {
        text.push_str(&format!(
            "*{}.* {} - {} ({})\n",
            i + 1,
            result.title,
            result.artist,
            duration_or_unknown(result.duration_secs)
        ));
    }
    text.push_str(&format!("\nReply with a number 1-{}", results.len()));
    text
}

pub fn downloading_song(result: &SearchResult) -> String {
    format!(
        "🎵 Downloading: \"{}\" by {}...\n\n⏳ Please wait, this may take a moment.",
        result.title, result.artist
    )
}

pub fn song_info(result: &SearchResult, size_bytes: u64, as_document: bool) -> String {
    let footer = if as_document {
        "ℹ️ Note: The file was sent as a document. You'll need to download it to play."
    } else {
        "▶️ The song should be playable directly in the chat"
    };
    format!(
        "🎵 *{}*\n👤 *Artist:* {}\n💿 *Album:* {}\n⏱️ *Duration:* {}\n📊 *Size:* {:.2} MB\n\n{footer}",
        result.title,
        result.artist,
        result.album.as_deref().unwrap_or("Unknown album"),
        duration_or_unknown(result.duration_secs),
        size_mb(size_bytes),
    )
}

pub fn audio_too_large(size_bytes: u64) -> String {
    format!(
        "❌ The audio file ({:.2}MB) is too large to send.",
        size_mb(size_bytes)
    )
}

pub fn video_too_long(secs: u64) -> String {
    format!(
        "⚠️ This video is {} minutes long. Please use the !music command for audio only or choose a shorter video (under 10 minutes).",
        format_duration(secs)
    )
}

pub fn video_found(info: &VideoInfo) -> String {
    format!(
        "🎬 *{}*\n⏱️ Duration: {}\n👤 Channel: {}\n\n⏳ Downloading video...",
        info.title,
        duration_or_unknown(info.duration_secs()),
        info.channel_name()
    )
}

pub fn video_caption(info: &VideoInfo, size_bytes: u64) -> String {
    format!(
        "📥 {}\n\n⏱️ Duration: {}\n📊 Size: {:.2}MB",
        info.title,
        duration_or_unknown(info.duration_secs()),
        size_mb(size_bytes)
    )
}

pub fn video_too_large(size_bytes: u64) -> String {
    format!(
        "⚠️ The video ({:.2}MB) is too large to send.\n\nTry a shorter video or use the !music command to download just the audio.",
        size_mb(size_bytes)
    )
}

pub fn file_too_large(file_name: &str, size_bytes: u64, limit_bytes: u64) -> String {
    format!(
        "❌ File {file_name} is too large ({:.2} MB). The limit is {:.0} MB.",
        size_mb(size_bytes),
        size_mb(limit_bytes)
    )
}

pub fn ig_failed(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("❌ Failed to download Instagram content. Error code: {code}"),
        None => "❌ Failed to download Instagram content.".to_string(),
    }
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
