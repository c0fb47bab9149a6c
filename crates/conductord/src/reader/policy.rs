use std::collections::BTreeSet;

use conductor_config::Config;
use conductor_protocol::ClientIdentifier;

/// User id of the superuser.
pub const ROOT_UID: u32 = 0;

/// Allow-set of user ids whose commands are forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    trusted: BTreeSet<u32>,
}

impl AccessPolicy {
    /// Trusts exactly the given user ids.
    #[must_use]
    pub fn new(trusted: impl IntoIterator<Item = u32>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }

    /// Trusts root and the administrative `system_uid`.
    #[must_use]
    pub fn system(system_uid: u32) -> Self {
        Self::new([ROOT_UID, system_uid])
    }

    /// Builds the policy from the configured administrative identity.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::system(config.system_uid())
    }

    /// Returns true when `client` may issue commands.
    #[must_use]
    pub fn allows(&self, client: ClientIdentifier) -> bool {
        self.trusted.contains(&client.uid)
    }

    /// Trusted user ids in ascending order.
    pub fn trusted_uids(&self) -> impl Iterator<Item = u32> + '_ {
        self.trusted.iter().copied()
    }
}
