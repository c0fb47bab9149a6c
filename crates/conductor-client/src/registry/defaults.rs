//! Default security contexts attached to caller-initiated operations.

use conductor_protocol::SecurityContext;

/// User id normal commands run as when the caller supplies none.
pub const DEFAULT_COMMAND_UID: u32 = 1000;
/// Group id normal commands run as when the caller supplies none.
pub const DEFAULT_COMMAND_GID: u32 = 1000;
/// Security label for normal commands.
pub const DEFAULT_COMMAND_LABEL: &str = "conductor:command";

/// User id services and events run as when the caller supplies none.
pub const DEFAULT_SERVICE_UID: u32 = 1000;
/// Group id services and events run as when the caller supplies none.
pub const DEFAULT_SERVICE_GID: u32 = 1000;
/// Security label for services and events.
pub const DEFAULT_SERVICE_LABEL: &str = "conductor:service";

/// Security contexts used when an issuing call passes `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDefaults {
    /// Context for `run_command`.
    pub command: SecurityContext,
    /// Context for services started by `check_service`.
    pub service: SecurityContext,
    /// Context for `add_event`.
    pub event: SecurityContext,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        let service = SecurityContext::new(
            DEFAULT_SERVICE_UID,
            DEFAULT_SERVICE_GID,
            DEFAULT_SERVICE_LABEL,
        );
        Self {
            command: SecurityContext::new(
                DEFAULT_COMMAND_UID,
                DEFAULT_COMMAND_GID,
                DEFAULT_COMMAND_LABEL,
            ),
            event: service.clone(),
            service,
        }
    }
}
