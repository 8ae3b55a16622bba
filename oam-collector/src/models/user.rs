use super::session::Session;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::RwLock;

/// Authentication scheme of a tenant account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// Direct password session.
    #[serde(rename = "RBAC")]
    Rbac,
    /// Federated org/account-scoped token, no interactive login.
    #[serde(rename = "ADTOKEN", alias = "ABAC")]
    AdToken,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Rbac => "RBAC",
            AuthMode::AdToken => "ADTOKEN",
        }
    }
}

/// Organization/account identity pair of a federated user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrgAccount {
    pub org_uuid: String,
    pub account_uuid: String,
}

/// Network groups a user may poll, replaced wholesale by group discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembership {
    /// RBAC groups.
    pub nhg_ids: BTreeSet<String>,
    /// Federated groups and the identity they are reachable through.
    pub nhg_ids_abac: BTreeMap<String, OrgAccount>,
    /// Hardware ids per group.
    pub hw_ids: BTreeMap<String, BTreeSet<String>>,
    /// Slice id per group, when the listing reports one.
    pub slice_ids: BTreeMap<String, String>,
}

impl GroupMembership {
    pub fn len(&self) -> usize {
        self.nhg_ids.len() + self.nhg_ids_abac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct hardware units across all groups.
    pub fn hardware_count(&self) -> usize {
        self.hw_ids.values().flatten().collect::<BTreeSet<_>>().len()
    }

    /// A group is skipped when its slice is known and not allow-listed.
    /// An empty allow-list admits everything.
    fn slice_allowed(&self, nhg_id: &str, allowed_slices: &HashSet<String>) -> bool {
        if allowed_slices.is_empty() {
            return true;
        }
        match self.slice_ids.get(nhg_id) {
            Some(slice) => allowed_slices.contains(slice),
            None => true,
        }
    }
}

/// One fan-out target of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub nhg_id: String,
    pub identity: Option<OrgAccount>,
}

impl Target {
    /// Identifier used in output file names and log fields.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(id) => format!("{}_{}_{}", id.org_uuid, id.account_uuid, self.nhg_id),
            None => self.nhg_id.clone(),
        }
    }
}

/// One tenant account, shared by the scheduler, orchestrator and session manager.
#[derive(Debug)]
pub struct User {
    pub email: String,
    pub mode: AuthMode,
    password: SecretString,
    /// Identities used to list federated network groups.
    pub org_accounts: Vec<OrgAccount>,
    pub session: Session,
    groups: RwLock<GroupMembership>,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        mode: AuthMode,
        password: SecretString,
        org_accounts: Vec<OrgAccount>,
    ) -> Self {
        Self {
            email: email.into(),
            mode,
            password,
            org_accounts,
            session: Session::new(),
            groups: RwLock::new(GroupMembership::default()),
        }
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Swap in a freshly listed membership under the write lock.
    pub async fn replace_groups(&self, groups: GroupMembership) {
        *self.groups.write().await = groups;
    }

    pub async fn groups(&self) -> GroupMembership {
        self.groups.read().await.clone()
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn hardware_count(&self) -> usize {
        self.groups.read().await.hardware_count()
    }

    /// Targets for one fetch, after the slice allow-list.
    pub async fn targets(&self, allowed_slices: &HashSet<String>) -> Vec<Target> {
        let groups = self.groups.read().await;
        match self.mode {
            AuthMode::Rbac => groups
                .nhg_ids
                .iter()
                .filter(|nhg| groups.slice_allowed(nhg, allowed_slices))
                .map(|nhg| Target {
                    nhg_id: nhg.clone(),
                    identity: None,
                })
                .collect(),
            AuthMode::AdToken => groups
                .nhg_ids_abac
                .iter()
                .filter(|(nhg, _)| groups.slice_allowed(nhg, allowed_slices))
                .map(|(nhg, identity)| Target {
                    nhg_id: nhg.clone(),
                    identity: Some(identity.clone()),
                })
                .collect(),
        }
    }
}
