//! Timing defaults for blocking protocol calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deadlines and intervals used by the protocol client.
///
/// The command deadline bounds a blocking send when the caller supplies no
/// deadline of its own. The poll interval is the slice granted to a single
/// transport read inside an event-pumping loop so the loop's predicate can
/// be re-evaluated between reads. The mapper startup deadline bounds the
/// BiDi mapper bootstrap, which loads and starts a script inside the
/// browser and is expected to take far longer than an ordinary command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProtocolTimings {
    /// Deadline applied to a blocking command without an explicit one.
    #[serde(default = "default_command_deadline")]
    pub command_deadline: Duration,
    /// Slice granted to one transport read in an event-pumping loop.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Deadline for the BiDi mapper bootstrap sequence.
    #[serde(default = "default_mapper_startup")]
    pub mapper_startup: Duration,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            command_deadline: default_command_deadline(),
            poll_interval: default_poll_interval(),
            mapper_startup: default_mapper_startup(),
        }
    }
}

fn default_command_deadline() -> Duration {
    Duration::from_secs(600)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_mapper_startup() -> Duration {
    Duration::from_secs(300)
}
