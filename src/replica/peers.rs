use std::fmt;

/// ParticipantId names one member of the replicated log, the leader included.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        ParticipantId::new(id)
    }
}

/// How a participant may take part in the quorum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParticipantFlags {
    /// Excluded participants still receive entries, but never count towards a quorum.
    pub allowed_in_quorum: bool,
    /// A forced participant has to be part of every quorum.
    pub forced: bool,
}

impl Default for ParticipantFlags {
    fn default() -> Self {
        ParticipantFlags {
            allowed_in_quorum: true,
            forced: false,
        }
    }
}
