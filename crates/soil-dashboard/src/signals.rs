//! Signal handling for the dashboard daemon.
//!
//! SIGTERM and SIGINT (Ctrl+C) stop the dashboard. SIGHUP asks for a manual
//! refresh. Other platforms only see Ctrl+C.

use std::io;
use tracing::{debug, info};

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - graceful termination request.
    Terminate,
    /// SIGINT - interrupt (Ctrl+C).
    Interrupt,
    /// SIGHUP - reload dashboard data.
    Hangup,
}

impl SignalKind {
    /// Whether this signal ends the daemon.
    pub fn is_shutdown(self) -> bool {
        !matches!(self, Self::Hangup)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Registered signal streams.
#[derive(Debug)]
pub struct SignalListener {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Register handlers. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be installed.
    pub fn new() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind as Unix};
            let listener = Self {
                terminate: signal(Unix::terminate())?,
                hangup: signal(Unix::hangup())?,
            };
            debug!("Unix signal handlers registered");
            Ok(listener)
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next signal.
    ///
    /// # Errors
    ///
    /// Returns an error if listening for Ctrl+C fails.
    pub async fn next(&mut self) -> io::Result<SignalKind> {
        #[cfg(unix)]
        let kind = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                SignalKind::Interrupt
            }
            _ = self.terminate.recv() => SignalKind::Terminate,
            received = self.hangup.recv() => match received {
                Some(()) => SignalKind::Hangup,
                None => SignalKind::Terminate,
            },
        };

        #[cfg(not(unix))]
        let kind = {
            tokio::signal::ctrl_c().await?;
            SignalKind::Interrupt
        };

        info!(signal = %kind, "Signal received");
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind() {
        assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
        assert_eq!(SignalKind::Hangup.to_string(), "SIGHUP");
        assert!(SignalKind::Interrupt.is_shutdown());
        assert!(!SignalKind::Hangup.is_shutdown());
    }

    #[tokio::test]
    async fn test_listener_registers() {
        assert!(SignalListener::new().is_ok());
    }
}
