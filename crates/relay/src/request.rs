use url::Url;
use crate::error::RequestError;
use crate::inspector::OutputKind;
use crate::status::Submitter;

pub const WELCOME: &str = "🤖 Welcome! This relay downloads media from supported sources, converts it \
to a widely playable format when needed and delivers the result.";

/// A parsed submitter message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download { url: String, kind: OutputKind },
    Cancel,
    Status,
    Start,
}

/// Parse one message into a command.
///
/// `/` and `!` start a command, optionally addressed as `/cmd@name`; anything
/// else is a download request. A download request prefixed with `mp3 `
/// selects audio output.
pub fn parse_command(text: &str) -> Result<Command, RequestError> {
    let text = text.trim();

    if !(text.starts_with('/') || text.starts_with('!')) {
        return parse_download(text);
    }

    let (cmd, rest) = match text.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (text, ""),
    };
    let name = cmd[1..].split('@').next().unwrap_or_default();

    match name {
        "dlp" => parse_download(rest),
        "dlpcancel" => Ok(Command::Cancel),
        "dlpstatus" => Ok(Command::Status),
        "start" => Ok(Command::Start),
        _ => Err(RequestError::InvalidCommand(name.to_string())),
    }
}

/// Parse a message with its origin taken into account.
///
/// Groups only ever get explicit download, cancel and status commands; plain
/// text and rejected commands from a group are ignored silently (`None`).
pub fn parse_message(text: &str, submitter: &Submitter) -> Option<Result<Command, RequestError>> {
    let from_group = matches!(submitter, Submitter::Group { .. });
    let explicit = text.trim_start().starts_with('/') || text.trim_start().starts_with('!');

    if from_group && !explicit {
        return None;
    }

    match parse_command(text) {
        Ok(Command::Start) | Err(RequestError::InvalidCommand(_)) if from_group => None,
        other => Some(other),
    }
}

/// Parse `[mp3 ]<url>`
pub fn parse_download(text: &str) -> Result<Command, RequestError> {
    let text = text.trim();
    let (kind, target) = match text.split_once(' ') {
        Some(("mp3", rest)) => (OutputKind::Audio, rest.trim()),
        _ => (OutputKind::Video, text),
    };

    let url = validate_url(target)?;
    Ok(Command::Download { url, kind })
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_url(text: &str) -> Result<String, RequestError> {
    let url = Url::parse(text).map_err(|_| RequestError::InvalidUrl)?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return Err(RequestError::InvalidUrl);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user() -> Submitter {
        Submitter::User { user_id: 1, username: None }
    }

    fn group() -> Submitter {
        Submitter::Group { chat_id: 9, user_id: 1, username: None }
    }

    #[test]
    fn test_plain_url_is_video_download() {
        assert_eq!(
            parse_command("https://example.com/watch?v=1").unwrap(),
            Command::Download { url: "https://example.com/watch?v=1".to_string(), kind: OutputKind::Video }
        );
    }

    #[test]
    fn test_mp3_prefix_selects_audio() {
        assert_eq!(
            parse_command("/dlp mp3 https://example.com/a").unwrap(),
            Command::Download { url: "https://example.com/a".to_string(), kind: OutputKind::Audio }
        );
        assert_eq!(
            parse_command("mp3 http://example.com/a").unwrap(),
            Command::Download { url: "http://example.com/a".to_string(), kind: OutputKind::Audio }
        );
    }

    #[test]
    fn test_commands_with_bot_suffix_and_bang() {
        assert_eq!(parse_command("/dlpcancel@relay_bot").unwrap(), Command::Cancel);
        assert_eq!(parse_command("!dlpcancel").unwrap(), Command::Cancel);
        assert_eq!(parse_command("/dlpstatus").unwrap(), Command::Status);
        assert_eq!(parse_command("/start").unwrap(), Command::Start);
        assert!(matches!(
            parse_command("!dlp@relay_bot https://example.com/v").unwrap(),
            Command::Download { kind: OutputKind::Video, .. }
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(parse_command("/frobnicate"), Err(RequestError::InvalidCommand("frobnicate".to_string())));
        assert_eq!(parse_command("hello there"), Err(RequestError::InvalidUrl));
        assert_eq!(parse_command("ftp://example.com/file"), Err(RequestError::InvalidUrl));
        assert_eq!(parse_command("/dlp"), Err(RequestError::InvalidUrl));
        assert_eq!(parse_command(""), Err(RequestError::InvalidUrl));
    }

    #[test]
    fn test_group_messages() {
        assert!(parse_message("https://example.com/v", &group()).is_none());
        assert!(parse_message("/start", &group()).is_none());
        assert!(parse_message("/nope", &group()).is_none());
        assert_eq!(parse_message("/dlpcancel", &group()), Some(Ok(Command::Cancel)));
        assert_eq!(parse_message("/dlp nope", &group()), Some(Err(RequestError::InvalidUrl)));

        assert!(matches!(parse_message("https://example.com/v", &user()), Some(Ok(Command::Download { .. }))));
        assert_eq!(parse_message("/start", &user()), Some(Ok(Command::Start)));
    }

    proptest! {
        /// Any text without a scheme is never accepted as a download
        #[test]
        fn test_schemeless_text_is_rejected(s in "[a-z ]{0,40}") {
            let parsed = parse_command(&s);
            prop_assert!(parsed.is_err());
        }
    }
}
