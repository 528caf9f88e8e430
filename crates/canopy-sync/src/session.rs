//! Client session state machine.
//!
//! ```text
//! SignedOff --sign-on--> SignedOn --sign-off--> SignedOff
//!                        SignedOn --connection lost--> Stale
//!                        Stale    --reconnect ok--> SignedOn
//!                        Stale    --reconnect fails--> Stale (unauthenticated)
//! ```

use crate::error::{Result, SyncError};
use canopy_delta::{EventSequenceNumber, ParticipationId, SequenceTracker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    SignedOff,
    SignedOn,
    /// The connection was lost; the participation may still be resumed.
    Stale,
}

#[derive(Clone, Debug)]
pub struct Session {
    state: SessionState,
    participation: Option<ParticipationId>,
    tracker: SequenceTracker,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::SignedOff,
            participation: None,
            tracker: SequenceTracker::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_signed_on(&self) -> bool {
        self.state == SessionState::SignedOn
    }

    pub fn participation(&self) -> Option<&ParticipationId> {
        self.participation.as_ref()
    }

    /// Sequence number of the last event applied.
    pub fn last_sequence(&self) -> EventSequenceNumber {
        self.tracker.last()
    }

    /// A fresh sign-on. A stale session may sign on anew, dropping its old
    /// participation.
    pub fn signed_on(&mut self, participation: ParticipationId) -> Result<()> {
        if self.state == SessionState::SignedOn {
            return Err(SyncError::AlreadySignedOn);
        }
        tracing::info!(participation = %participation, "Session signed on");
        self.state = SessionState::SignedOn;
        self.participation = Some(participation);
        self.tracker = SequenceTracker::new();
        Ok(())
    }

    pub fn signed_off(&mut self) -> Result<()> {
        if self.state != SessionState::SignedOn {
            return Err(SyncError::NotSignedOn);
        }
        tracing::info!("Session signed off");
        self.state = SessionState::SignedOff;
        self.participation = None;
        self.tracker = SequenceTracker::new();
        Ok(())
    }

    pub fn connection_lost(&mut self) {
        if self.state == SessionState::SignedOn {
            tracing::info!("Session is stale");
            self.state = SessionState::Stale;
        }
    }

    /// What to present to the repository when reconnecting.
    pub fn reconnect_request(&self) -> Result<(ParticipationId, EventSequenceNumber)> {
        match (self.state, &self.participation) {
            (SessionState::SignedOn, _) => Err(SyncError::AlreadySignedOn),
            (SessionState::Stale, Some(participation)) => {
                Ok((participation.clone(), self.tracker.last()))
            }
            _ => Err(SyncError::NotSignedOn),
        }
    }

    /// The repository confirmed a reconnect. It must name our participation
    /// and agree on the last sequence number, otherwise the session stays
    /// stale.
    pub fn reconnected(
        &mut self,
        participation: &ParticipationId,
        last_sequence: EventSequenceNumber,
    ) -> Result<()> {
        let (expected, last) = self.reconnect_request()?;
        if &expected != participation {
            return Err(SyncError::ReconnectMismatch(format!(
                "repository resumed {} instead of {}",
                participation, expected
            )));
        }
        if last != last_sequence {
            return Err(SyncError::ReconnectMismatch(format!(
                "repository is at {}, session at {}",
                last_sequence, last
            )));
        }
        tracing::info!(participation = %participation, last_sequence, "Session resumed");
        self.state = SessionState::SignedOn;
        Ok(())
    }

    /// Check that `sequence` is the next event for this session.
    pub fn accept_event(&mut self, sequence: EventSequenceNumber) -> Result<()> {
        if self.state != SessionState::SignedOn {
            return Err(SyncError::NotSignedOn);
        }
        self.tracker.accept(sequence)?;
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_delta::DeltaError;

    fn signed_on() -> Session {
        let mut session = Session::new();
        session.signed_on("p1".into()).unwrap();
        session
    }

    #[test]
    fn test_sign_on_and_off() {
        let mut session = signed_on();
        assert_eq!(session.state(), SessionState::SignedOn);
        assert_eq!(session.signed_on("p2".into()), Err(SyncError::AlreadySignedOn));

        session.signed_off().unwrap();
        assert_eq!(session.state(), SessionState::SignedOff);
        assert!(session.participation().is_none());
        assert_eq!(session.signed_off(), Err(SyncError::NotSignedOn));
    }

    #[test]
    fn test_events_must_be_consecutive() {
        let mut session = signed_on();
        session.accept_event(1).unwrap();
        session.accept_event(2).unwrap();
        assert_eq!(
            session.accept_event(4),
            Err(SyncError::Delta(DeltaError::SequenceGap {
                expected: 3,
                received: 4
            }))
        );
        assert!(session.accept_event(2).is_err());
        assert_eq!(session.last_sequence(), 2);
    }

    #[test]
    fn test_reconnect_resumes_numbering() {
        let mut session = signed_on();
        session.accept_event(1).unwrap();
        session.connection_lost();
        assert_eq!(session.state(), SessionState::Stale);
        assert_eq!(session.accept_event(2), Err(SyncError::NotSignedOn));
        assert_eq!(session.reconnect_request().unwrap(), ("p1".into(), 1));

        session.reconnected(&"p1".into(), 1).unwrap();
        assert_eq!(session.state(), SessionState::SignedOn);
        session.accept_event(2).unwrap();
    }

    #[test]
    fn test_failed_reconnect_stays_stale() {
        let mut session = signed_on();
        session.accept_event(1).unwrap();
        session.connection_lost();

        assert!(matches!(
            session.reconnected(&"p1".into(), 5),
            Err(SyncError::ReconnectMismatch(_))
        ));
        assert!(matches!(
            session.reconnected(&"other".into(), 1),
            Err(SyncError::ReconnectMismatch(_))
        ));
        assert_eq!(session.state(), SessionState::Stale);
        assert!(!session.is_signed_on());
    }

    #[test]
    fn test_reconnect_needs_a_stale_session() {
        assert_eq!(Session::new().reconnect_request(), Err(SyncError::NotSignedOn));
        assert_eq!(signed_on().reconnect_request(), Err(SyncError::AlreadySignedOn));
    }
}
