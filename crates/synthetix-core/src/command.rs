// Device commands.
//
// The hub's command endpoint takes a verb plus parameters. The only
// verb today is `set_state`; the enum leaves room for the scene and
// scheduling verbs on the hub roadmap.

use synthetix_api::types::CommandRequest;

use crate::model::StatePatch;

/// Command verbs understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandName {
    SetState,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetState => "set_state",
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command destined for one device.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: CommandName,

    /// Desired state changes. Only the named keys are affected.
    pub patch: StatePatch,
}

impl Command {
    /// A `set_state` command carrying the given patch.
    pub fn set_state(patch: StatePatch) -> Self {
        Self {
            name: CommandName::SetState,
            patch,
        }
    }

    /// The wire request for this command.
    pub(crate) fn to_request(&self) -> CommandRequest {
        CommandRequest {
            command: self.name.as_str().to_owned(),
            params: self.patch.to_wire(),
        }
    }
}
