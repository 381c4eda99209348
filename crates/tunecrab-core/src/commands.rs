//! Chat command parsing and message classification helpers.

const COOKIE_HEADER: &str = "# Netscape HTTP Cookie File";
const COOKIE_DOMAIN: &str = ".instagram.com";
const GREETINGS: [&str; 5] = ["hi", "hello", "hey", "hola", "namaste"];

/// Parsed `!command` from user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// !music <query>. An empty query gets the usage reply.
    Music { query: String },
    /// !yt <url>
    Youtube { url: String },
    /// !ig <url>
    Instagram { url: String },
    InstagramLogin,
    Help,
    Ping,
    Cancel,
}

impl BotCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Music { .. } => "music",
            BotCommand::Youtube { .. } => "yt",
            BotCommand::Instagram { .. } => "ig",
            BotCommand::InstagramLogin => "iglogin",
            BotCommand::Help => "help",
            BotCommand::Ping => "ping",
            BotCommand::Cancel => "cancel",
        }
    }
}

pub fn parse_command(text: &str) -> Option<BotCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('!') {
        return None;
    }

    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };

    match word.to_lowercase().as_str() {
        "!music" => Some(BotCommand::Music {
            query: rest.to_string(),
        }),
        "!yt" => Some(BotCommand::Youtube {
            url: rest.to_string(),
        }),
        "!ig" => Some(BotCommand::Instagram {
            url: rest.to_string(),
        }),
        "!iglogin" => Some(BotCommand::InstagramLogin),
        "!help" => Some(BotCommand::Help),
        "!ping" => Some(BotCommand::Ping),
        "!cancel" => Some(BotCommand::Cancel),
        _ => None,
    }
}

/// True when `target` (with or without the `@`) names the bot `handle`.
pub fn mentions_handle(target: &str, handle: &str) -> bool {
    let target = target.trim().trim_start_matches('@');
    let handle = handle.trim().trim_start_matches('@');
    !handle.is_empty() && target.eq_ignore_ascii_case(handle)
}

/// Drop a leading `@handle ` token addressed to the bot. Mentions of anyone
/// else, and a lone mention, are returned unchanged.
pub fn strip_mention<'a>(text: &'a str, handle: Option<&str>) -> &'a str {
    let trimmed = text.trim();
    let Some(handle) = handle else {
        return trimmed;
    };
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) if first.starts_with('@') && mentions_handle(first, handle) => rest.trim(),
        _ => trimmed,
    }
}

/// A bare digit 1-5, as a zero-based index.
pub fn parse_selection(text: &str) -> Option<usize> {
    let mut chars = text.chars();
    let digit = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match digit {
        '1'..='5' => digit.to_digit(10).map(|d| d as usize - 1),
        _ => None,
    }
}

pub fn is_credential_export(text: &str) -> bool {
    text.contains(COOKIE_HEADER) && text.contains(COOKIE_DOMAIN)
}

pub fn is_greeting(text: &str) -> bool {
    let lower = text.to_lowercase();
    GREETINGS.iter().any(|g| lower.contains(g))
}

pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtu.be") || url.contains("youtube.com")
}

pub fn is_instagram_url(url: &str) -> bool {
    url.contains("instagram.com/") || url.contains("instagr.am/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_music_keeps_query_spacing() {
        assert_eq!(
            parse_command("!music shape of  you"),
            Some(BotCommand::Music {
                query: "shape of  you".into()
            })
        );
        assert_eq!(
            parse_command("  !MUSIC   hello "),
            Some(BotCommand::Music {
                query: "hello".into()
            })
        );
    }

    #[test]
    fn bare_command_has_empty_argument() {
        assert_eq!(
            parse_command("!music"),
            Some(BotCommand::Music { query: String::new() })
        );
        assert_eq!(
            parse_command("!yt"),
            Some(BotCommand::Youtube { url: String::new() })
        );
    }

    #[test]
    fn ig_and_iglogin_are_distinct() {
        assert_eq!(
            parse_command("!ig https://instagram.com/p/x"),
            Some(BotCommand::Instagram {
                url: "https://instagram.com/p/x".into()
            })
        );
        assert_eq!(parse_command("!iglogin"), Some(BotCommand::InstagramLogin));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_command("!help"), Some(BotCommand::Help));
        assert_eq!(parse_command("!Ping"), Some(BotCommand::Ping));
        assert_eq!(parse_command("!cancel"), Some(BotCommand::Cancel));
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("!unknown"), None);
        assert_eq!(parse_command("!musicx foo"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn strip_leading_mention() {
        assert_eq!(strip_mention("@bot !help", Some("bot")), "!help");
        assert_eq!(strip_mention("@Bot   2 ", Some("bot")), "2");
        assert_eq!(strip_mention("@bot", Some("bot")), "@bot");
        assert_eq!(strip_mention("hi @bot", Some("bot")), "hi @bot");
    }

    #[test]
    fn other_mentions_are_kept() {
        assert_eq!(strip_mention("@alice 2", Some("bot")), "@alice 2");
        assert_eq!(strip_mention("@botany !help", Some("bot")), "@botany !help");
        assert_eq!(strip_mention("@bot !help", None), "@bot !help");
    }

    #[test]
    fn handle_matching() {
        assert!(mentions_handle("@TuneBot", "tunebot"));
        assert!(mentions_handle("tunebot", "@tunebot"));
        assert!(!mentions_handle("@alice", "tunebot"));
        assert!(!mentions_handle("@tunebot", ""));
    }

    #[test]
    fn selection_digits() {
        assert_eq!(parse_selection("1"), Some(0));
        assert_eq!(parse_selection("5"), Some(4));
        assert_eq!(parse_selection("0"), None);
        assert_eq!(parse_selection("6"), None);
        assert_eq!(parse_selection("12"), None);
        assert_eq!(parse_selection(""), None);
        assert_eq!(parse_selection("a"), None);
    }

    #[test]
    fn credential_export_needs_both_markers() {
        let export = "# Netscape HTTP Cookie File\n.instagram.com\tTRUE\t/\tTRUE\t0\tsessionid\tabc";
        assert!(is_credential_export(export));
        assert!(!is_credential_export("# Netscape HTTP Cookie File\n.example.com"));
        assert!(!is_credential_export(".instagram.com sessionid"));
    }

    #[test]
    fn greetings_match_substrings() {
        assert!(is_greeting("Hello there"));
        assert!(is_greeting("NAMASTE"));
        assert!(!is_greeting("play a song"));
    }

    #[test]
    fn url_checks() {
        assert!(is_youtube_url("https://youtu.be/abc"));
        assert!(is_youtube_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_youtube_url("https://vimeo.com/1"));
        assert!(is_instagram_url("https://www.instagram.com/p/abc/"));
        assert!(is_instagram_url("https://instagr.am/p/abc"));
        assert!(!is_instagram_url("https://instagram.com"));
    }
}
