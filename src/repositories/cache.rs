//! Read-through cache of projects keyed by public id.
//!
//! The ingestion endpoint resolves a project on every request; entries are
//! reused until they are older than the configured TTL. Misses for unknown
//! public ids are not cached.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;

use crate::clock::{Clock, system_clock};

use super::{ProjectRepository, ProjectWithKeys, RepositoryError};

struct CachedProject {
    project: ProjectWithKeys,
    fetched_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ProjectCache {
    repository: ProjectRepository,
    entries: Arc<Mutex<LruCache<String, CachedProject>>>,
    ttl: chrono::Duration,
    clock: Clock,
}

impl ProjectCache {
    pub fn new(repository: ProjectRepository, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            repository,
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the project for `public_id`, loading it on a miss or an expired entry.
    pub async fn get(&self, public_id: &str) -> Result<Option<ProjectWithKeys>, RepositoryError> {
        let now = (self.clock)();

        {
            let mut entries = self.entries.lock().await;
            match entries.get(public_id) {
                Some(cached) if now - cached.fetched_at < self.ttl => {
                    return Ok(Some(cached.project.clone()));
                }
                Some(_) => {
                    entries.pop(public_id);
                }
                None => {}
            }
        }

        let Some(project) = self.repository.find_by_public_id(public_id).await? else {
            return Ok(None);
        };

        tracing::debug!(public_id, project_id = project.project.id, "Project cached");
        self.entries.lock().await.put(
            public_id.to_string(),
            CachedProject {
                project: project.clone(),
                fetched_at: now,
            },
        );
        Ok(Some(project))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
