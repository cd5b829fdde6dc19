//! Channel identification

/// Unique identifier for a media channel (session + channel name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Sharing session (e.g., "meeting-42")
    pub session: String,
    /// Channel within the session (e.g., "screen", "camera")
    pub channel: String,
}

impl ChannelKey {
    /// Create a new channel key
    pub fn new(session: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            channel: channel.into(),
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session, self.channel)
    }
}
