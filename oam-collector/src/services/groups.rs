use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::error::ApiError;
use super::oam_client::{ApiRequest, OamClient};
use crate::config::NetworkApis;
use crate::models::{AuthMode, GroupMembership, NhgRecord, User};

/// Lists the network groups each user may poll and swaps them into the
/// user's membership sets.
#[derive(Clone)]
pub struct GroupDiscovery {
    client: OamClient,
    apis: NetworkApis,
    page_limit: u32,
    page_retries: u32,
}

impl GroupDiscovery {
    pub fn new(client: OamClient, apis: NetworkApis, page_limit: u32, page_retries: u32) -> Self {
        Self {
            client,
            apis,
            page_limit,
            page_retries,
        }
    }

    pub fn interval_minutes(&self) -> u32 {
        self.apis.interval_minutes
    }

    /// Replace the user's membership with a fresh listing. On failure the
    /// previous membership stays; a rejected token wakes the session's
    /// refresh loop.
    #[instrument(skip_all, fields(user = %user.email, mode = user.mode.as_str()))]
    pub async fn refresh_groups(&self, user: &User) -> Result<usize, ApiError> {
        let listed = match user.mode {
            AuthMode::Rbac => self.list_nhgs(user).await,
            AuthMode::AdToken => self.list_network_groups(user).await,
        };

        match listed {
            Ok(groups) => {
                let count = groups.len();
                user.replace_groups(groups).await;
                info!(groups = count, "Group membership refreshed");
                Ok(count)
            }
            Err(e) => {
                if e.is_auth_failure() {
                    warn!(error = %e, "Group listing rejected the session token, forcing re-authentication");
                    user.session.invalidate().await;
                }
                Err(e)
            }
        }
    }

    async fn list_nhgs(&self, user: &User) -> Result<GroupMembership, ApiError> {
        let request = ApiRequest::new(&self.apis.nhg_list_path).param("limit", self.page_limit);
        let listing = self
            .client
            .fetch_all_pages(user, &request, self.page_retries)
            .await?;

        let mut groups = GroupMembership::default();
        for record in decode_groups(&listing.records) {
            groups.nhg_ids.insert(record.nhg_id.clone());
            add_details(&mut groups, record);
        }
        Ok(groups)
    }

    async fn list_network_groups(&self, user: &User) -> Result<GroupMembership, ApiError> {
        let mut groups = GroupMembership::default();

        for identity in &user.org_accounts {
            let request = ApiRequest::new(&self.apis.network_group_path)
                .param("org_uuid", &identity.org_uuid)
                .param("account_uuid", &identity.account_uuid)
                .param("limit", self.page_limit);
            let listing = self
                .client
                .fetch_all_pages(user, &request, self.page_retries)
                .await?;

            for record in decode_groups(&listing.records) {
                groups
                    .nhg_ids_abac
                    .insert(record.nhg_id.clone(), identity.clone());
                add_details(&mut groups, record);
            }
        }
        Ok(groups)
    }
}

fn decode_groups(records: &[serde_json::Value]) -> Vec<NhgRecord> {
    records
        .iter()
        .filter_map(|record| match NhgRecord::deserialize(record) {
            Ok(group) => Some(group),
            Err(e) => {
                warn!(error = %e, "Skipping malformed group record");
                None
            }
        })
        .collect()
}

fn add_details(groups: &mut GroupMembership, record: NhgRecord) {
    if let Some(slice) = record.slice_id {
        groups.slice_ids.insert(record.nhg_id.clone(), slice);
    }
    if !record.hw_ids.is_empty() {
        groups
            .hw_ids
            .entry(record.nhg_id)
            .or_default()
            .extend(record.hw_ids);
    }
}
