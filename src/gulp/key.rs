use std::fmt;

/// Identity used to deduplicate fetch activity: one data source plus one
/// channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GulpKey {
    source: String,
    channel: String,
}

impl GulpKey {
    pub fn new(source: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            channel: channel.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for GulpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.channel)
    }
}
