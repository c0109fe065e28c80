//! Monitor state machine.
//!
//! Numeric discriminants are preserved exactly as specified so that
//! persisted comparisons (`state > CATALOG_PUTTING`, ordering in
//! operational dashboards) remain meaningful across process restarts.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// A sub-record's position in the workflow, numerically ordered as
/// specified so persisted comparisons stay meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum State {
    Initialising = -1,
    Routing = 0,

    Splitting = 1,
    Indexing = 2,
    CatalogPutting = 3,
    TransferPutting = 4,

    CatalogGetting = 10,
    ArchiveGetting = 11,
    TransferGetting = 12,
    TransferInit = 13,

    ArchiveInit = 20,
    ArchivePutting = 21,
    ArchivePreparing = 22,

    CatalogDeleting = 30,
    CatalogArchiveUpdating = 32,
    CatalogRemoving = 33,

    Complete = 100,
    Failed = 101,
    CompleteWithErrors = 102,
    CompleteWithWarnings = 103,
    Split = 110,

    Searching = 1000,
}

impl State {
    /// Terminal states end a sub-record's life; no further transition is
    /// valid from one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Complete
                | State::Failed
                | State::CompleteWithErrors
                | State::CompleteWithWarnings
                | State::Split
        )
    }

    /// Whether `self -> next` is an allowed transition under the relation
    /// sketched in spec §4.2: the PUT path, the GET path, and the ARCHIVE
    /// path, plus the universal regress-to-immediately-prior-state rule
    /// and the universal any-state-to-terminal rule used for failures.
    pub fn can_transition_to(self, next: State) -> bool {
        if self.is_terminal() {
            // SPLIT is terminal for the subrecord that split but
            // non-terminal for the parent transaction; the parent's
            // continuation is tracked on a fresh sub-record, so from the
            // state-machine's point of view SPLIT has no outgoing edge.
            return false;
        }

        // Any non-terminal state may fail out.
        if next == State::Failed {
            return true;
        }

        // Regress-on-retry: a sub-record may fall back to its
        // immediately-prior workflow state.
        if let Some(prior) = self.immediately_prior() {
            if next == prior {
                return true;
            }
        }

        use State::*;
        matches!(
            (self, next),
            (Initialising, Routing)
                | (Routing, Splitting)
                | (Routing, CatalogGetting)
                | (Routing, ArchiveInit)
                | (Splitting, Indexing)
                | (Splitting, Split)
                | (Indexing, CatalogPutting)
                | (CatalogPutting, TransferPutting)
                | (TransferPutting, Complete)
                | (TransferPutting, CompleteWithErrors)
                | (TransferPutting, CompleteWithWarnings)
                | (CatalogGetting, ArchiveGetting)
                | (CatalogGetting, TransferGetting)
                | (ArchiveGetting, TransferInit)
                | (TransferInit, TransferGetting)
                | (TransferGetting, Complete)
                | (TransferGetting, CompleteWithErrors)
                | (TransferGetting, CompleteWithWarnings)
                | (ArchiveInit, ArchivePreparing)
                | (ArchivePreparing, ArchivePutting)
                | (ArchivePutting, CatalogArchiveUpdating)
                | (CatalogArchiveUpdating, Complete)
                | (CatalogArchiveUpdating, CompleteWithErrors)
                | (CatalogArchiveUpdating, CompleteWithWarnings)
                | (Routing, CatalogDeleting)
                | (CatalogDeleting, CatalogRemoving)
                | (CatalogRemoving, Complete)
                | (CatalogRemoving, CompleteWithErrors)
                | (Initialising, Searching)
                | (Searching, Complete)
        )
    }

    /// The state immediately prior to `self` along its own workflow path,
    /// used by the regress-on-retry rule. `None` for states with no
    /// well-defined predecessor (e.g. `Initialising`).
    fn immediately_prior(self) -> Option<State> {
        use State::*;
        match self {
            Routing => Some(Initialising),
            Splitting => Some(Routing),
            Indexing => Some(Splitting),
            CatalogPutting => Some(Indexing),
            TransferPutting => Some(CatalogPutting),
            CatalogGetting => Some(Routing),
            ArchiveGetting => Some(CatalogGetting),
            TransferInit => Some(ArchiveGetting),
            TransferGetting => Some(ArchiveGetting),
            ArchiveInit => Some(Routing),
            ArchivePreparing => Some(ArchiveInit),
            ArchivePutting => Some(ArchivePreparing),
            CatalogArchiveUpdating => Some(ArchivePutting),
            CatalogDeleting => Some(Routing),
            CatalogRemoving => Some(CatalogDeleting),
            _ => None,
        }
    }
}

/// Log level carried on envelopes addressed to the `LOG` routing-key
/// family (`nlds.log.{info,warn,err,debug,critical}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    #[serde(rename = "err")]
    Error,
    Debug,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_discriminants_match_spec() {
        assert_eq!(State::Initialising as i32, -1);
        assert_eq!(State::Routing as i32, 0);
        assert_eq!(State::Splitting as i32, 1);
        assert_eq!(State::TransferPutting as i32, 4);
        assert_eq!(State::CatalogGetting as i32, 10);
        assert_eq!(State::ArchiveGetting as i32, 11);
        assert_eq!(State::TransferGetting as i32, 12);
        assert_eq!(State::TransferInit as i32, 13);
        assert_eq!(State::ArchiveInit as i32, 20);
        assert_eq!(State::ArchivePutting as i32, 21);
        assert_eq!(State::ArchivePreparing as i32, 22);
        assert_eq!(State::CatalogDeleting as i32, 30);
        assert_eq!(State::CatalogArchiveUpdating as i32, 32);
        assert_eq!(State::CatalogRemoving as i32, 33);
        assert_eq!(State::Complete as i32, 100);
        assert_eq!(State::Failed as i32, 101);
        assert_eq!(State::CompleteWithErrors as i32, 102);
        assert_eq!(State::CompleteWithWarnings as i32, 103);
        assert_eq!(State::Split as i32, 110);
        assert_eq!(State::Searching as i32, 1000);
    }

    #[test]
    fn put_path_is_allowed() {
        assert!(State::Initialising.can_transition_to(State::Routing));
        assert!(State::Routing.can_transition_to(State::Splitting));
        assert!(State::Splitting.can_transition_to(State::Indexing));
        assert!(State::Indexing.can_transition_to(State::CatalogPutting));
        assert!(State::CatalogPutting.can_transition_to(State::TransferPutting));
        assert!(State::TransferPutting.can_transition_to(State::Complete));
    }

    #[test]
    fn get_path_with_archive_detour_is_allowed() {
        assert!(State::Routing.can_transition_to(State::CatalogGetting));
        assert!(State::CatalogGetting.can_transition_to(State::ArchiveGetting));
        assert!(State::ArchiveGetting.can_transition_to(State::TransferInit));
        assert!(State::TransferInit.can_transition_to(State::TransferGetting));
        assert!(State::TransferGetting.can_transition_to(State::Complete));
    }

    #[test]
    fn get_path_without_archive_detour_is_allowed() {
        assert!(State::CatalogGetting.can_transition_to(State::TransferGetting));
    }

    #[test]
    fn archive_path_is_allowed() {
        assert!(State::ArchiveInit.can_transition_to(State::ArchivePreparing));
        assert!(State::ArchivePreparing.can_transition_to(State::ArchivePutting));
        assert!(State::ArchivePutting.can_transition_to(State::CatalogArchiveUpdating));
        assert!(State::CatalogArchiveUpdating.can_transition_to(State::Complete));
    }

    #[test]
    fn any_non_terminal_state_can_fail() {
        assert!(State::Indexing.can_transition_to(State::Failed));
        assert!(State::ArchivePutting.can_transition_to(State::Failed));
    }

    #[test]
    fn regress_to_immediately_prior_state_is_allowed() {
        assert!(State::TransferPutting.can_transition_to(State::CatalogPutting));
        assert!(State::ArchivePutting.can_transition_to(State::ArchivePreparing));
    }

    #[test]
    fn regress_beyond_immediately_prior_is_rejected() {
        // TransferPutting's immediate prior is CatalogPutting; regressing
        // all the way back to Indexing is not a valid retry step.
        assert!(!State::TransferPutting.can_transition_to(State::Indexing));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transition() {
        assert!(!State::Complete.can_transition_to(State::Routing));
        assert!(!State::Failed.can_transition_to(State::Complete));
        assert!(!State::Split.can_transition_to(State::Indexing));
    }

    #[test]
    fn unrelated_jump_is_rejected() {
        assert!(!State::Indexing.can_transition_to(State::ArchivePutting));
    }
}
