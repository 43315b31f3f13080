use std::convert::TryFrom;
use std::time::Duration;

/// How many participants have to acknowledge an entry before it counts as committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub write_concern: usize,
    // Desired quorum size. Falling short of it is reported, but never blocks a commit.
    pub soft_write_concern: usize,
    pub wait_for_sync: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            write_concern: 1,
            soft_write_concern: 1,
            wait_for_sync: false,
        }
    }
}

impl LogConfig {
    pub(super) fn validate(&self) -> Result<(), &'static str> {
        if self.write_concern == 0 {
            return Err("Write concern must be at least 1");
        }
        if self.soft_write_concern < self.write_concern {
            return Err("Soft write concern must not be smaller than write concern");
        }

        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct LeaderOptions {
    pub max_batch_bytes: Option<usize>,
    pub compaction_threshold: Option<u64>,
    pub append_entries_timeout: Option<Duration>,
}

pub(super) struct LeaderOptionsValidated {
    pub max_batch_bytes: usize,
    pub compaction_threshold: u64,
    pub append_entries_timeout: Duration,
}

impl LeaderOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.max_batch_bytes == 0 {
            return Err("Maximum batch size must be greater than 0");
        }
        if self.compaction_threshold == 0 {
            return Err("Compaction threshold must be greater than 0");
        }
        if self.append_entries_timeout.is_zero() {
            return Err("AppendEntries RPC timeout must be greater than 0");
        }

        Ok(())
    }
}

impl TryFrom<LeaderOptions> for LeaderOptionsValidated {
    type Error = &'static str;

    fn try_from(options: LeaderOptions) -> Result<Self, Self::Error> {
        let values = LeaderOptionsValidated {
            max_batch_bytes: options.max_batch_bytes.unwrap_or(1024 * 1024),
            compaction_threshold: options.compaction_threshold.unwrap_or(1000),
            append_entries_timeout: options.append_entries_timeout.unwrap_or(Duration::from_secs(5)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = LeaderOptionsValidated::try_from(LeaderOptions::default()).unwrap();
        assert_eq!(options.max_batch_bytes, 1024 * 1024);
        assert_eq!(options.compaction_threshold, 1000);
        assert_eq!(options.append_entries_timeout, Duration::from_secs(5));
        assert!(LogConfig::default().validate().is_ok());
    }

    #[test]
    fn illegal_values() {
        let zero_timeout = LeaderOptions {
            append_entries_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(LeaderOptionsValidated::try_from(zero_timeout).is_err());

        let no_write_concern = LogConfig {
            write_concern: 0,
            soft_write_concern: 0,
            wait_for_sync: false,
        };
        assert!(no_write_concern.validate().is_err());

        let soft_below_hard = LogConfig {
            write_concern: 3,
            soft_write_concern: 2,
            wait_for_sync: false,
        };
        assert!(soft_below_hard.validate().is_err());
    }
}
