use crate::commitlog::{LogIndex, LogTerm, TermIndexPair};
use crate::replica::peers::{ParticipantFlags, ParticipantId};
use std::collections::BTreeMap;

/// What a participant has acknowledged, as seen by the leader when it computes the commit index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantState {
    pub last_acked_entry: TermIndexPair,
    pub id: ParticipantId,
    pub snapshot_available: bool,
    pub flags: ParticipantFlags,
}

impl ParticipantState {
    fn ineligibility(&self, spearhead_term: LogTerm) -> Option<IneligibilityReason> {
        if !self.flags.allowed_in_quorum {
            Some(IneligibilityReason::ExcludedFromQuorum)
        } else if self.last_acked_entry.term != spearhead_term {
            Some(IneligibilityReason::WrongTerm)
        } else if !self.snapshot_available {
            Some(IneligibilityReason::SnapshotMissing)
        } else {
            None
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommitIndexOptions {
    pub write_concern: usize,
    pub soft_write_concern: usize,
    pub participant_count: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IneligibilityReason {
    ExcludedFromQuorum,
    // Acknowledged an entry of an older term. Old entries only commit indirectly.
    WrongTerm,
    SnapshotMissing,
}

/// Why the commit index is not at the spearhead. Purely diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitFailReason {
    NothingToCommit,
    QuorumSizeNotReached {
        who: Vec<ParticipantId>,
        spearhead: TermIndexPair,
    },
    ForcedParticipantNotInQuorum {
        who: ParticipantId,
    },
    NonEligibleServerRequiredForQuorum {
        candidates: BTreeMap<ParticipantId, IneligibilityReason>,
    },
    FewerParticipantsThanWriteConcern {
        effective_write_concern: usize,
        num_participants: usize,
    },
}

/// The participants that committed `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumData {
    pub index: LogIndex,
    pub term: LogTerm,
    pub quorum: Vec<ParticipantId>,
}

impl QuorumData {
    pub fn new(index: LogIndex, term: LogTerm, quorum: Vec<ParticipantId>) -> Self {
        QuorumData { index, term, quorum }
    }
}

/// Computes the highest index acknowledged by `write_concern` eligible participants.
///
/// The result never goes below `current_commit_index` nor above the spearhead. Only
/// acknowledgements of an entry in the spearhead's term count. Every forced participant has to
/// be part of the quorum, if one lags behind, the commit index is capped at its position.
///
/// `soft_write_concern` never holds back the commit index. It only decides whether the quorum
/// that was found is reported as too small.
///
/// Returns the new commit index, the reason it is not at the spearhead and the quorum that
/// committed it. The quorum is empty if the commit index did not move.
pub fn calculate_commit_index(
    participants: &[ParticipantState],
    options: CommitIndexOptions,
    current_commit_index: LogIndex,
    spearhead: TermIndexPair,
) -> (LogIndex, CommitFailReason, Vec<ParticipantId>) {
    let write_concern = options.write_concern;
    if participants.len() < write_concern {
        return (
            current_commit_index,
            CommitFailReason::FewerParticipantsThanWriteConcern {
                effective_write_concern: write_concern,
                num_participants: participants.len(),
            },
            Vec::new(),
        );
    }
    let soft_write_concern = options
        .soft_write_concern
        .clamp(write_concern, write_concern.max(options.participant_count));

    let mut eligible = Vec::with_capacity(participants.len());
    let mut ineligible = BTreeMap::new();
    for participant in participants {
        match participant.ineligibility(spearhead.term) {
            None => eligible.push(participant),
            Some(reason) => {
                ineligible.insert(participant.id.clone(), reason);
            }
        }
    }

    if let Some(forced) = participants
        .iter()
        .find(|p| p.flags.forced && ineligible.contains_key(&p.id))
    {
        return (
            current_commit_index,
            CommitFailReason::ForcedParticipantNotInQuorum {
                who: forced.id.clone(),
            },
            Vec::new(),
        );
    }

    if eligible.len() < write_concern || write_concern == 0 {
        return (
            current_commit_index,
            CommitFailReason::NonEligibleServerRequiredForQuorum { candidates: ineligible },
            Vec::new(),
        );
    }

    // Stable, so ties keep the input order.
    eligible.sort_by(|a, b| b.last_acked_entry.index.cmp(&a.last_acked_entry.index));
    let mut candidate = eligible[write_concern - 1].last_acked_entry.index.min(spearhead.index);

    let mut lagging_forced = None;
    for participant in eligible.iter().filter(|p| p.flags.forced) {
        if participant.last_acked_entry.index < candidate {
            candidate = participant.last_acked_entry.index;
            lagging_forced = Some(participant.id.clone());
        }
    }

    if candidate <= current_commit_index {
        let reason = match lagging_forced {
            Some(who) => CommitFailReason::ForcedParticipantNotInQuorum { who },
            None => CommitFailReason::NothingToCommit,
        };
        return (current_commit_index, reason, Vec::new());
    }

    let quorum: Vec<_> = eligible
        .iter()
        .filter(|p| p.last_acked_entry.index >= candidate)
        .map(|p| p.id.clone())
        .collect();

    let reason = if let Some(who) = lagging_forced {
        CommitFailReason::ForcedParticipantNotInQuorum { who }
    } else if quorum.len() < soft_write_concern || candidate < spearhead.index {
        let who = participants
            .iter()
            .filter(|p| ineligible.contains_key(&p.id) || p.last_acked_entry.index < spearhead.index)
            .map(|p| p.id.clone())
            .collect();
        CommitFailReason::QuorumSizeNotReached { who, spearhead }
    } else {
        CommitFailReason::NothingToCommit
    };

    (candidate, reason, quorum)
}
