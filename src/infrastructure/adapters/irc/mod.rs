//! IRC adapter for Twitch chat

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::application::errors::BotError;
use crate::domain::entities::{ChatEvent, ChatMessage};
use crate::domain::traits::{Transport, TransportInfo};

/// Minimal representation of a parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub tags: Option<String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl ParsedLine {
    pub fn parse(line: &str) -> Self {
        let mut rest = line.trim();
        let mut tags = None;
        let mut prefix = None;

        // 1) tags
        if rest.starts_with('@') {
            let (head, tail) = rest.split_once(' ').unwrap_or((rest, ""));
            tags = Some(head.to_string());
            rest = tail;
        }

        // 2) prefix
        if let Some(stripped) = rest.strip_prefix(':') {
            let (head, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            prefix = Some(head.to_string());
            rest = tail;
        }

        // 3) command
        let (command, rest) = rest.split_once(' ').unwrap_or((rest, ""));

        // 4) params and trailing
        let (middle, trailing) = match rest.strip_prefix(':') {
            Some(trailing) => ("", Some(trailing.to_string())),
            None => match rest.split_once(" :") {
                Some((middle, trailing)) => (middle, Some(trailing.to_string())),
                None => (rest, None),
            },
        };

        Self {
            tags,
            prefix,
            command: command.to_uppercase(),
            params: middle.split_whitespace().map(|s| s.to_string()).collect(),
            trailing,
        }
    }

    /// The nick part of a `nick!user@host` prefix
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    /// Maps the line to the event the bot cares about, if any
    pub fn to_event(&self) -> Option<ChatEvent> {
        match self.command.as_str() {
            "001" => Some(ChatEvent::Connected),
            "PRIVMSG" => {
                let channel = self.params.first()?;
                let nick = self.nick()?;
                let text = self.trailing.as_deref().unwrap_or_default();
                Some(ChatEvent::Message(ChatMessage::new(channel.as_str(), nick, text)))
            }
            "MODE" => {
                // MODE #channel +o nick
                let [channel, flags, nick] = self.params.as_slice() else {
                    return None;
                };
                let mut flags = flags.chars();
                let op = flags.next()?;
                let mode = flags.next()?;
                Some(ChatEvent::Mode {
                    channel: channel.clone(),
                    op,
                    mode,
                    nick: nick.clone(),
                })
            }
            _ => None,
        }
    }
}

/// When to try again after the connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    /// Nobody listens for events anymore
    Closed,
    /// Dropped, or the server sent RECONNECT. `registered` is set once the server welcomed us.
    Lost { registered: bool },
}

/// What is sent on every (re)connect
#[derive(Debug, Clone)]
struct Registration {
    host: String,
    port: u16,
    nick: String,
    pass: String,
}

/// IRC connection that reconnects on its own.
///
/// Lines are queued to the connection task, so sending never blocks. The
/// queue and the event stream outlive individual connections; every new
/// connection emits `Connected` again once the server welcomes it.
pub struct IrcClient {
    outgoing: mpsc::UnboundedSender<String>,
    nick: String,
    task: JoinHandle<()>,
}

impl IrcClient {
    /// Connects with the default reconnect policy
    pub async fn connect(
        host: &str,
        port: u16,
        nick: &str,
        oauth: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ChatEvent>), BotError> {
        Self::connect_with(host, port, nick, oauth, ReconnectPolicy::default()).await
    }

    /// Connects, registers with PASS/NICK and spawns the connection task.
    ///
    /// Only the first connection failure is returned, as `BotError::Protocol`.
    /// Later drops are retried with a doubling delay.
    pub async fn connect_with(
        host: &str,
        port: u16,
        nick: &str,
        oauth: &str,
        policy: ReconnectPolicy,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ChatEvent>), BotError> {
        tracing::info!("Connecting to {}:{}", host, port);
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| BotError::Protocol(format!("Failed to connect to {}:{}: {}", host, port, e)))?;

        let registration = Registration {
            host: host.to_string(),
            port,
            nick: nick.to_string(),
            pass: if oauth.starts_with("oauth:") {
                oauth.to_string()
            } else {
                format!("oauth:{}", oauth)
            },
        };

        let (tx_outgoing, rx_outgoing) = mpsc::unbounded_channel::<String>();
        let (tx_events, rx_events) = mpsc::unbounded_channel::<ChatEvent>();

        let task = tokio::spawn(Self::supervise(
            registration,
            tcp,
            rx_outgoing,
            tx_outgoing.clone(),
            tx_events,
            policy,
        ));

        let client = Self {
            outgoing: tx_outgoing,
            nick: nick.to_string(),
            task,
        };
        Ok((Arc::new(client), rx_events))
    }

    async fn supervise(
        registration: Registration,
        first: TcpStream,
        mut outgoing: mpsc::UnboundedReceiver<String>,
        pongs: mpsc::UnboundedSender<String>,
        events: mpsc::UnboundedSender<ChatEvent>,
        policy: ReconnectPolicy,
    ) {
        let mut tcp = Some(first);
        let mut delay = policy.min_delay;

        loop {
            if let Some(stream) = tcp.take() {
                match Self::serve(stream, &registration, &mut outgoing, &pongs, &events).await {
                    LinkEnd::Closed => break,
                    LinkEnd::Lost { registered } => {
                        if registered {
                            delay = policy.min_delay;
                        }
                        if events.send(ChatEvent::Disconnected).is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
            match TcpStream::connect((registration.host.as_str(), registration.port)).await {
                Ok(stream) => tcp = Some(stream),
                Err(e) => tracing::warn!("Reconnect to {}:{} failed: {}", registration.host, registration.port, e),
            }
            delay = (delay * 2).min(policy.max_delay);
        }

        tracing::info!("IRC client stopped");
    }

    /// Runs one connection until it drops
    async fn serve(
        tcp: TcpStream,
        registration: &Registration,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
        pongs: &mpsc::UnboundedSender<String>,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> LinkEnd {
        let (read_half, write_half) = tcp.into_split();
        // Dropping either sender tells the other half to stop
        let (reader_done, reader_stopped) = oneshot::channel::<()>();
        let (writer_done, writer_stopped) = oneshot::channel::<()>();

        let ((), end) = tokio::join!(
            Self::writer_loop(write_half, registration, outgoing, reader_stopped, writer_done),
            Self::reader_loop(read_half, events, pongs, writer_stopped, reader_done),
        );
        end
    }

    async fn reader_loop<R>(
        read_half: R,
        events: &mpsc::UnboundedSender<ChatEvent>,
        pongs: &mpsc::UnboundedSender<String>,
        mut writer_stopped: oneshot::Receiver<()>,
        _done: oneshot::Sender<()>,
    ) -> LinkEnd
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(read_half);
        let mut buffer = Vec::new();
        let mut registered = false;

        loop {
            buffer.clear();
            let read = tokio::select! {
                read = reader.read_until(b'\n', &mut buffer) => read,
                _ = &mut writer_stopped => return LinkEnd::Lost { registered },
            };

            match read {
                Ok(0) => {
                    tracing::info!("IRC connection closed by server");
                    return LinkEnd::Lost { registered };
                }
                Ok(_) => {
                    // Invalid UTF-8 is replaced rather than dropping the connection
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!("<< {}", line);

                    let parsed = ParsedLine::parse(line);
                    match parsed.command.as_str() {
                        "PING" => {
                            let token = parsed.trailing.as_deref().unwrap_or("tmi.twitch.tv");
                            pongs.send(format!("PONG :{}", token)).ok();
                            continue;
                        }
                        "RECONNECT" => {
                            tracing::info!("Server asked us to reconnect");
                            return LinkEnd::Lost { registered };
                        }
                        "001" => registered = true,
                        _ => {}
                    }

                    if let Some(event) = parsed.to_event() {
                        if events.send(event).is_err() {
                            return LinkEnd::Closed;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("IRC read error: {}", e);
                    return LinkEnd::Lost { registered };
                }
            }
        }
    }

    async fn writer_loop<W>(
        write_half: W,
        registration: &Registration,
        outgoing: &mut mpsc::UnboundedReceiver<String>,
        mut reader_stopped: oneshot::Receiver<()>,
        _done: oneshot::Sender<()>,
    ) where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::new(write_half);

        let pass = format!("PASS {}", registration.pass);
        let nick = format!("NICK {}", registration.nick);
        for line in [pass, nick] {
            if let Err(e) = Self::write_line(&mut writer, &line).await {
                tracing::error!("IRC write error: {}", e);
                return;
            }
        }

        loop {
            let line = tokio::select! {
                biased;
                _ = &mut reader_stopped => break,
                line = outgoing.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };
            if let Err(e) = Self::write_line(&mut writer, &line).await {
                tracing::error!("IRC write error: {}", e);
                break;
            }
        }
    }

    async fn write_line<W>(writer: &mut BufWriter<W>, line: &str) -> std::io::Result<()>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        if line.starts_with("PASS ") {
            tracing::debug!(">> PASS ****");
        } else {
            tracing::debug!(">> {}", line);
        }
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await
    }

    /// Stops the connection task
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Transport for IrcClient {
    fn send_raw(&self, line: &str) -> Result<(), BotError> {
        self.outgoing
            .send(line.to_string())
            .map_err(|_| BotError::Network("IRC connection is closed".to_string()))
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: "twitch-irc".to_string(),
            nick: self.nick.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg() {
        let parsed = ParsedLine::parse(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :!hello there");
        assert_eq!(parsed.command, "PRIVMSG");
        assert_eq!(parsed.params, vec!["#chan"]);
        assert_eq!(parsed.trailing.as_deref(), Some("!hello there"));
        assert_eq!(parsed.nick(), Some("viewer"));

        let Some(ChatEvent::Message(message)) = parsed.to_event() else {
            panic!("expected a chat message");
        };
        assert_eq!(message.channel, "#chan");
        assert_eq!(message.nick, "viewer");
        assert_eq!(message.text, "!hello there");
    }

    #[test]
    fn parses_tags_and_numerics() {
        let parsed = ParsedLine::parse("@badge-info=;color=#FF0000 :tmi.twitch.tv 001 bot :Welcome, GLHF!");
        assert_eq!(parsed.tags.as_deref(), Some("@badge-info=;color=#FF0000"));
        assert_eq!(parsed.params, vec!["bot"]);
        assert!(matches!(parsed.to_event(), Some(ChatEvent::Connected)));
    }

    #[test]
    fn parses_mode_changes() {
        let parsed = ParsedLine::parse(":jtv MODE #chan +o somemod");
        match parsed.to_event() {
            Some(ChatEvent::Mode { channel, op, mode, nick }) => {
                assert_eq!(channel, "#chan");
                assert_eq!((op, mode), ('+', 'o'));
                assert_eq!(nick, "somemod");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn ping_has_trailing_and_no_event() {
        let parsed = ParsedLine::parse("PING :tmi.twitch.tv");
        assert_eq!(parsed.command, "PING");
        assert_eq!(parsed.trailing.as_deref(), Some("tmi.twitch.tv"));
        assert!(parsed.to_event().is_none());
    }

    #[tokio::test]
    async fn client_registers_and_answers_ping() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let pass = lines.next_line().await.unwrap().unwrap();
            let nick = lines.next_line().await.unwrap().unwrap();
            write_half
                .write_all(b":tmi.twitch.tv 001 bot :Welcome\r\nPING :tmi.twitch.tv\r\n")
                .await
                .unwrap();
            let pong = lines.next_line().await.unwrap().unwrap();
            let privmsg = lines.next_line().await.unwrap().unwrap();
            (pass, nick, pong, privmsg)
        });

        let (client, mut events) = IrcClient::connect("127.0.0.1", port, "bot", "secret").await.unwrap();
        assert!(matches!(events.recv().await, Some(ChatEvent::Connected)));

        // Let the PONG go out before the PRIVMSG
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        client.privmsg("#chan", "hi").unwrap();

        let (pass, nick, pong, privmsg) = server.await.unwrap();
        assert_eq!(pass, "PASS oauth:secret");
        assert_eq!(nick, "NICK bot");
        assert_eq!(pong, "PONG :tmi.twitch.tv");
        assert_eq!(privmsg, "PRIVMSG #chan :hi");
        client.shutdown();
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Option<ChatEvent> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap_or(None)
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_replaced_not_fatal() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap();
            lines.next_line().await.unwrap();
            write_half
                .write_all(b":a!a@a PRIVMSG #chan :caf\xe9\r\n:b!b@b PRIVMSG #chan :!hello\r\n")
                .await
                .unwrap();
            // Hold the connection until the client goes away
            let _ = lines.next_line().await;
        });

        let (client, mut events) = IrcClient::connect("127.0.0.1", port, "bot", "secret").await.unwrap();

        match next_event(&mut events).await {
            Some(ChatEvent::Message(message)) => {
                assert_eq!(message.nick, "a");
                assert_eq!(message.text, "caf\u{FFFD}");
            }
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut events).await {
            Some(ChatEvent::Message(message)) => assert_eq!(message.text, "!hello"),
            other => panic!("unexpected event {:?}", other),
        }
        client.shutdown();
    }

    #[tokio::test]
    async fn client_reconnects_after_drop_and_reconnect_request() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut registrations = Vec::new();
            let mut last = String::new();
            for round in 0..3 {
                let (socket, _) = listener.accept().await.unwrap();
                let (read_half, mut write_half) = socket.into_split();
                let mut lines = BufReader::new(read_half).lines();
                let pass = lines.next_line().await.unwrap().unwrap();
                let nick = lines.next_line().await.unwrap().unwrap();
                registrations.push((pass, nick));
                write_half.write_all(b":tmi.twitch.tv 001 bot :Welcome\r\n").await.unwrap();
                match round {
                    // Drop the socket
                    0 => {}
                    1 => write_half.write_all(b":tmi.twitch.tv RECONNECT\r\n").await.unwrap(),
                    _ => last = lines.next_line().await.unwrap().unwrap(),
                }
            }
            (registrations, last)
        });

        let policy = ReconnectPolicy {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let (client, mut events) = IrcClient::connect_with("127.0.0.1", port, "bot", "secret", policy)
            .await
            .unwrap();

        assert!(matches!(next_event(&mut events).await, Some(ChatEvent::Connected)));
        assert!(matches!(next_event(&mut events).await, Some(ChatEvent::Disconnected)));
        assert!(matches!(next_event(&mut events).await, Some(ChatEvent::Connected)));
        assert!(matches!(next_event(&mut events).await, Some(ChatEvent::Disconnected)));
        assert!(matches!(next_event(&mut events).await, Some(ChatEvent::Connected)));

        // The same client keeps working on the new connection
        client.privmsg("#chan", "back").unwrap();

        let (registrations, last) = server.await.unwrap();
        assert_eq!(registrations.len(), 3);
        for (pass, nick) in &registrations {
            assert_eq!(pass, "PASS oauth:secret");
            assert_eq!(nick, "NICK bot");
        }
        assert_eq!(last, "PRIVMSG #chan :back");
        client.shutdown();
    }
}
