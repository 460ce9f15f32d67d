// ============================================
// Profile Updater
// ============================================
//
// Loads a user's prior profile and new events from the store, makes sure
// the referenced vectors are fresh, then either folds the new events into
// the prior profile or rebuilds it from the full history when the prior
// was built under another scheme.

use super::ProfileBuilder;
use crate::db::SharedStore;
use crate::error::Result;
use crate::models::{InteractionEvent, UserProfile};
use crate::services::features::CatalogService;
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Full,
    Incremental,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub profile: UserProfile,
    pub mode: UpdateMode,
    /// False when a newer profile was already stored
    pub written: bool,
}

pub struct ProfileUpdater {
    store: SharedStore,
    catalog: CatalogService,
    builder: ProfileBuilder,
    commit_lag: Duration,
}

impl ProfileUpdater {
    pub fn new(store: SharedStore, catalog: CatalogService, builder: ProfileBuilder) -> Self {
        Self {
            store,
            catalog,
            builder,
            commit_lag: Duration::zero(),
        }
    }

    /// Leave events appended within `lag` for a later fold.
    pub fn with_commit_lag(mut self, lag: Duration) -> Self {
        self.commit_lag = lag;
        self
    }

    pub fn builder(&self) -> &ProfileBuilder {
        &self.builder
    }

    /// Highest log sequence that is safe to fold: no lower sequence can
    /// still show up later.
    pub async fn settled_head(&self) -> Result<i64> {
        self.store.settled_seq(Utc::now() - self.commit_lag).await
    }

    /// Bring one user's profile up to `up_to_seq` (inclusive).
    pub async fn refresh_profile(&self, user_id: Uuid, up_to_seq: i64) -> Result<ProfileUpdate> {
        let prior = self
            .store
            .get_profile(user_id)
            .await?
            .filter(|p| self.builder.is_compatible(p));

        let after_seq = prior.as_ref().map(|p| p.last_event_seq).unwrap_or(0);
        let events = self
            .store
            .events_for_user_after(user_id, after_seq, up_to_seq)
            .await?;

        let (profile, mode) = match prior {
            Some(prior) if events.is_empty() => (prior, UpdateMode::Unchanged),
            Some(prior) => {
                let vectors = self.catalog.fresh_vectors(&content_ids(&events)).await?;
                let profile = self.builder.update_profile(prior, &events, &vectors)?;
                (profile, UpdateMode::Incremental)
            }
            None => {
                let vectors = self.catalog.fresh_vectors(&content_ids(&events)).await?;
                let profile = self.builder.build_profile(user_id, &events, &vectors)?;
                (profile, UpdateMode::Full)
            }
        };

        if mode == UpdateMode::Unchanged {
            return Ok(ProfileUpdate {
                profile,
                mode,
                written: false,
            });
        }

        let written = self.store.put_profile(profile.clone()).await?;
        if written {
            debug!(
                user_id = %user_id,
                mode = ?mode,
                events = events.len(),
                last_event_seq = profile.last_event_seq,
                "Profile updated"
            );
        } else {
            info!(user_id = %user_id, "Newer profile already stored, update dropped");
        }

        Ok(ProfileUpdate {
            profile,
            mode,
            written,
        })
    }

    /// Stored profile for serving. One built under another feature scheme
    /// is rebuilt from the full settled history before it is returned.
    pub async fn current_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let stored = match self.store.get_profile(user_id).await? {
            Some(profile) if !self.builder.is_compatible(&profile) => profile,
            other => return Ok(other),
        };

        let head = self.settled_head().await?;
        let update = self.refresh_profile(user_id, head).await?;
        info!(
            user_id = %user_id,
            from_scheme = %stored.scheme_version,
            to_scheme = %update.profile.scheme_version,
            written = update.written,
            "Rebuilt profile under the current feature scheme"
        );
        if update.written {
            return Ok(Some(update.profile));
        }
        // Lost the race to a concurrent writer; serve what they stored.
        Ok(self
            .store
            .get_profile(user_id)
            .await?
            .filter(|p| self.builder.is_compatible(p)))
    }
}

fn content_ids(events: &[InteractionEvent]) -> Vec<Uuid> {
    events
        .iter()
        .map(|e| e.content_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
