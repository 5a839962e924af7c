//! Named subsystems, and the registry the server resolves them from

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// A bidirectional byte stream, such as an SSH channel
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized {}

/// A subsystem, such as SFTP, which takes over a session channel
///
/// `exec` owns the stream until it returns. It should return promptly once
/// `cancel` fires, and log through `span`, which identifies the connection,
/// session and subsystem it's running in.
#[async_trait]
pub trait Subsystem: Send + Sync {
    async fn exec(
        &self,
        cancel: CancellationToken,
        span: tracing::Span,
        stream: &mut dyn ByteStream,
    ) -> anyhow::Result<()>;
}

/// The result of looking up a subsystem by name
pub enum Resolution {
    /// Nothing is registered under the name
    Unknown,
    /// The name is known, but turned off
    Disabled,
    Enabled(Arc<dyn Subsystem>),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Enabled(_) => f.write_str("Enabled(..)"),
        }
    }
}

/// Subsystems by name
///
/// A name registered without an implementation is disabled: requests for it
/// are declined like unknown ones, but quietly, since the operator asked for
/// it. The registry is read-only once the server is running.
#[derive(Clone, Default)]
pub struct Subsystems {
    entries: BTreeMap<String, Option<Arc<dyn Subsystem>>>,
}

impl Subsystems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem, replacing anything under the same name
    pub fn enable(&mut self, name: impl Into<String>, subsystem: Arc<dyn Subsystem>) -> &mut Self {
        self.entries.insert(name.into(), Some(subsystem));
        self
    }

    /// Mark a subsystem as disabled, replacing anything under the same name
    pub fn disable(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries.insert(name.into(), None);
        self
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        match self.entries.get(name) {
            None => Resolution::Unknown,
            Some(None) => Resolution::Disabled,
            Some(Some(subsystem)) => Resolution::Enabled(Arc::clone(subsystem)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of enabled subsystems
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, s)| s.is_some())
            .map(|(name, _)| name.as_str())
    }

    /// Names of disabled subsystems
    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, s)| s.is_none())
            .map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for Subsystems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subsystems")
            .field("enabled", &self.enabled().collect::<Vec<_>>())
            .field("disabled", &self.disabled().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl Subsystem for Nop {
        async fn exec(
            &self,
            _cancel: CancellationToken,
            _span: tracing::Span,
            _stream: &mut dyn ByteStream,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve() {
        let mut subsystems = Subsystems::new();
        subsystems.enable("sftp", Arc::new(Nop)).disable("scp");

        assert!(matches!(subsystems.resolve("sftp"), Resolution::Enabled(_)));
        assert!(matches!(subsystems.resolve("scp"), Resolution::Disabled));
        assert!(matches!(subsystems.resolve("rsync"), Resolution::Unknown));
        assert!(matches!(subsystems.resolve(""), Resolution::Unknown));
    }

    #[test]
    fn test_later_registration_wins() {
        let mut subsystems = Subsystems::new();
        subsystems.enable("sftp", Arc::new(Nop)).disable("sftp");
        assert!(matches!(subsystems.resolve("sftp"), Resolution::Disabled));

        subsystems.enable("sftp", Arc::new(Nop));
        assert!(matches!(subsystems.resolve("sftp"), Resolution::Enabled(_)));
    }

    #[test]
    fn test_names() {
        let mut subsystems = Subsystems::new();
        assert!(subsystems.is_empty());

        subsystems
            .enable("sftp", Arc::new(Nop))
            .disable("scp")
            .disable("rsync");
        assert!(!subsystems.is_empty());
        assert_eq!(subsystems.enabled().collect::<Vec<_>>(), vec!["sftp"]);
        assert_eq!(subsystems.disabled().collect::<Vec<_>>(), vec!["rsync", "scp"]);
        assert_eq!(
            format!("{:?}", subsystems),
            r#"Subsystems { enabled: ["sftp"], disabled: ["rsync", "scp"] }"#
        );
    }
}
