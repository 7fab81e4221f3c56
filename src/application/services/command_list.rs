//! Markdown command-list document published for each channel

/// Renders the published command list of `channel`.
///
/// `list` is the channel's newline separated command list; each line becomes
/// a bullet after the built-in commands info.
pub fn render(bot_name: &str, channel: &str, info: &str, list: &str) -> String {
    let login = channel.trim_start_matches('#');
    let mut document = format!(
        "# {}\n\nAvailable commands for channel [{}](https://www.twitch.tv/{}) (+ = mod only):\n\n{}\n",
        bot_name, channel, login, info
    );

    for line in list.lines().filter(|line| !line.is_empty()) {
        document.push_str("* ");
        document.push_str(line);
        document.push('\n');
    }
    document
}

pub fn file_name(channel: &str) -> String {
    format!("commands-for-{}.md", channel.trim_start_matches('#'))
}

pub fn description(bot_name: &str, channel: &str) -> String {
    format!("{} commands for {}", bot_name, channel)
}
