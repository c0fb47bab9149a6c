//! Command records sent from clients to the privileged peer.

use serde::{Deserialize, Serialize};

use crate::code::WireCode;
use crate::{ClientIdentifier, Label, MAX_EXTRA_LEN, ProtocolError};

/// Namespace a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum CommandType {
    /// One-shot commands with a stream descriptor.
    Normal,
    /// Long-running services.
    Service,
    /// Event-triggered services.
    Event,
    /// Unrecognised wire value.
    Unknown,
}

impl From<u8> for CommandType {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Normal,
            1 => Self::Service,
            2 => Self::Event,
            _ => Self::Unknown,
        }
    }
}

impl From<WireCode> for CommandType {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Unknown, Self::from)
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::Normal => 0,
            CommandType::Service => 1,
            CommandType::Event => 2,
            CommandType::Unknown => Self::MAX,
        }
    }
}

/// Lifecycle operation requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum SubCommand {
    /// Start a command, service, or event service.
    Start,
    /// Stop a running service.
    Stop,
    /// Pause a running service.
    Pause,
    /// Restart a service.
    Restart,
    /// Look up a service by name or label.
    Info,
    /// Close the stream of a normal command.
    Close,
    /// Tear down everything owned by a departed client.
    Destroy,
    /// Register an event service.
    Add,
    /// Remove an event service.
    Delete,
    /// Unrecognised wire value.
    Unknown,
}

impl From<u8> for SubCommand {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Start,
            1 => Self::Stop,
            2 => Self::Pause,
            3 => Self::Restart,
            4 => Self::Info,
            5 => Self::Close,
            6 => Self::Destroy,
            7 => Self::Add,
            8 => Self::Delete,
            _ => Self::Unknown,
        }
    }
}

impl From<WireCode> for SubCommand {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Unknown, Self::from)
    }
}

impl From<SubCommand> for u8 {
    fn from(value: SubCommand) -> Self {
        match value {
            SubCommand::Start => 0,
            SubCommand::Stop => 1,
            SubCommand::Pause => 2,
            SubCommand::Restart => 3,
            SubCommand::Info => 4,
            SubCommand::Close => 5,
            SubCommand::Destroy => 6,
            SubCommand::Add => 7,
            SubCommand::Delete => 8,
            SubCommand::Unknown => Self::MAX,
        }
    }
}

/// Direction bits for normal commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandFlags(u32);

impl CommandFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The caller reads the command's output.
    pub const IN: Self = Self(1);
    /// The caller writes the command's input.
    pub const OUT: Self = Self(1 << 1);

    /// Returns the raw bit set.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags selecting the given stream direction.
    #[must_use]
    pub const fn for_direction(input: bool) -> Self {
        if input { Self::IN } else { Self::OUT }
    }
}

/// Identity the peer adopts when executing a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// User id to run as.
    pub uid: u32,
    /// Group id to run as.
    pub gid: u32,
    /// Mandatory access control label.
    pub label: String,
}

impl SecurityContext {
    /// Builds a context from its parts.
    #[must_use]
    pub fn new(uid: u32, gid: u32, label: impl Into<String>) -> Self {
        Self {
            uid,
            gid,
            label: label.into(),
        }
    }
}

/// Selector placed in the command line of an `Info` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    /// Look the service up by its registered name.
    ByName,
    /// Look the service up by its label.
    ByLabel,
}

impl InfoQuery {
    /// Wire spelling of the selector.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ByName => "name",
            Self::ByLabel => "label",
        }
    }
}

/// A request for the privileged peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Namespace the command targets.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Requested operation.
    pub sub_command: SubCommand,
    /// Direction bits for normal commands.
    #[serde(default)]
    pub flags: CommandFlags,
    /// Service or event name, or the cleanup key for `Destroy`.
    #[serde(default)]
    pub name: String,
    /// Command line to execute, or an [`InfoQuery`] selector.
    #[serde(default)]
    pub command_line: String,
    /// Identity to execute under.
    #[serde(default)]
    pub params: SecurityContext,
    /// Label of the operation this command refers to.
    #[serde(default)]
    pub label: Label,
    /// Sequence number issued by the sender.
    #[serde(default)]
    pub sequence: u32,
    /// Opaque payload bounded by [`MAX_EXTRA_LEN`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<u8>,
}

impl Command {
    /// Creates a command with empty fields.
    #[must_use]
    pub fn new(command_type: CommandType, sub_command: SubCommand) -> Self {
        Self {
            command_type,
            sub_command,
            flags: CommandFlags::NONE,
            name: String::new(),
            command_line: String::new(),
            params: SecurityContext::default(),
            label: Label::ZERO,
            sequence: 0,
            extra: Vec::new(),
        }
    }

    /// Builds the cleanup command posted when a client disconnects or dies.
    ///
    /// The name `"<pid>:0"` asks the dispatcher to tear down every
    /// outstanding operation owned by that process.
    #[must_use]
    pub fn destroy_client(client: &ClientIdentifier) -> Self {
        Self::new(CommandType::Normal, SubCommand::Destroy).with_name(format!("{}:0", client.pid))
    }

    /// Sets the direction flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the command line.
    #[must_use]
    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    /// Sets the execution identity.
    #[must_use]
    pub fn with_params(mut self, params: SecurityContext) -> Self {
        self.params = params;
        self
    }

    /// Sets the label.
    #[must_use]
    pub const fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    /// Sets the sequence number.
    #[must_use]
    pub const fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Attaches an extra payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ExtraTooLarge`] when the payload exceeds
    /// [`MAX_EXTRA_LEN`].
    pub fn with_extra(mut self, extra: Vec<u8>) -> Result<Self, ProtocolError> {
        if extra.len() > MAX_EXTRA_LEN {
            return Err(ProtocolError::ExtraTooLarge {
                len: extra.len(),
                limit: MAX_EXTRA_LEN,
            });
        }
        self.extra = extra;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, SubCommand::Start)]
    #[case(4, SubCommand::Info)]
    #[case(8, SubCommand::Delete)]
    #[case(9, SubCommand::Unknown)]
    #[case(200, SubCommand::Unknown)]
    fn sub_commands_decode_with_fallback(#[case] code: u8, #[case] expected: SubCommand) {
        assert_eq!(SubCommand::from(code), expected);
    }

    #[test]
    fn unknown_type_decodes_without_failing_the_record() {
        let json = r#"{"type":42,"sub_command":0,"name":"x"}"#;
        let command: Command = serde_json::from_str(json).expect("decode command");
        assert_eq!(command.command_type, CommandType::Unknown);
        assert_eq!(command.sub_command, SubCommand::Start);
        assert_eq!(command.name, "x");
    }

    #[rstest]
    #[case(300, -1)]
    #[case(-1, 300)]
    fn out_of_range_codes_fall_back(#[case] kind: i64, #[case] sub: i64) {
        let json = format!(r#"{{"type":{kind},"sub_command":{sub},"name":"x"}}"#);
        let command: Command = serde_json::from_str(&json).expect("decode command");
        assert_eq!(command.command_type, CommandType::Unknown);
        assert_eq!(command.sub_command, SubCommand::Unknown);
    }

    #[test]
    fn destroy_client_names_the_departed_pid() {
        let command = Command::destroy_client(&ClientIdentifier::new(1000, 4321));
        assert_eq!(command.command_type, CommandType::Normal);
        assert_eq!(command.sub_command, SubCommand::Destroy);
        assert_eq!(command.name, "4321:0");
        assert_eq!(command.sequence, 0);
        assert!(command.label.is_zero());
    }

    #[test]
    fn oversized_extra_is_rejected() {
        let command = Command::new(CommandType::Event, SubCommand::Delete);
        let error = command
            .with_extra(vec![0; MAX_EXTRA_LEN + 1])
            .expect_err("payload over the limit");
        assert!(matches!(error, ProtocolError::ExtraTooLarge { .. }));
    }

    #[test]
    fn direction_flags_are_distinct() {
        assert!(CommandFlags::for_direction(true).contains(CommandFlags::IN));
        assert!(!CommandFlags::for_direction(false).contains(CommandFlags::IN));
        assert!(CommandFlags::for_direction(false).contains(CommandFlags::OUT));
    }
}
