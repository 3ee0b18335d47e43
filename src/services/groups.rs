use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::group::{is_valid_join_code, Group, JOIN_CODE_LEN},
    services::{notifier::Notifier, store::TripStore},
};

const CODE_ATTEMPTS: usize = 5;

fn generate_join_code() -> String {
    Uuid::new_v4().simple().to_string()[..JOIN_CODE_LEN].to_string()
}

#[derive(Clone)]
pub struct GroupService {
    store: TripStore,
    notifier: Notifier,
}

impl GroupService {
    pub fn new(store: TripStore, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn create_group(&self, user_id: &str, name: &str) -> Result<Group, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("group name is required"));
        }
        for _ in 0..CODE_ATTEMPTS {
            match self
                .store
                .create_group(name, &generate_join_code(), user_id)
                .await
            {
                Ok(group) => {
                    info!(group_id = group.group_id, "group created");
                    return Ok(group);
                }
                Err(AppError::Database(sqlx::Error::Database(db)))
                    if db.is_unique_violation() =>
                {
                    warn!("join code collision, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(AppError::conflict("could not allocate a join code"))
    }

    pub async fn join_group(&self, group_id: i64, user_id: &str) -> Result<Group, AppError> {
        let group = self.store.group(group_id).await?.ok_or(AppError::NotFound)?;
        self.add_member(group, user_id).await
    }

    pub async fn join_by_code(&self, code: &str, user_id: &str) -> Result<Group, AppError> {
        if !is_valid_join_code(code) {
            return Err(AppError::bad_request("invalid code"));
        }
        let group = self
            .store
            .group_by_code(code.trim())
            .await?
            .ok_or(AppError::NotFound)?;
        self.add_member(group, user_id).await
    }

    async fn add_member(&self, group: Group, user_id: &str) -> Result<Group, AppError> {
        if !self.store.add_group_member(group.group_id, user_id).await? {
            return Err(AppError::conflict("already a member of this group"));
        }
        info!(group_id = group.group_id, "member joined group");
        let joiner = self.store.recipient(user_id).await?;
        if let Err(err) = self.notifier.group_joined(group.group_id, &joiner).await {
            warn!(group_id = group.group_id, error = %err, "group joined email failed");
        }
        Ok(group)
    }
}
