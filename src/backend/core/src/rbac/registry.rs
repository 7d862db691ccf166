//! Process-wide read-through cache of role and permission rows.
//!
//! The registry is the single place that answers "which roles/permissions
//! exist" and the single invalidation point for every write path. Entries are
//! immutable `Arc` snapshots keyed by the bound model and the lookup
//! parameters; invalidation is coarse and drops everything. Rebinding a model
//! changes which rows the store is asked for.

use dashmap::DashMap;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{Permission, Role};
use super::store::{AuthorizationStore, RecordFilter};
use crate::config::{ModelBindings, RegistryCacheConfig};
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache entries
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum CachedRows {
    Permissions(Arc<Vec<Permission>>),
    Roles(Arc<Vec<Role>>),
}

#[derive(Debug, Clone)]
struct CachedEntry {
    rows: CachedRows,
    cached_at: Instant,
}

/// Registry cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

pub struct PermissionRegistry {
    store: Arc<dyn AuthorizationStore>,
    config: RegistryCacheConfig,
    defaults: ModelBindings,
    bindings: RwLock<ModelBindings>,
    entries: DashMap<String, CachedEntry>,
    /// Bumped on every invalidation; a miss only populates if it is unchanged.
    generation: AtomicU64,
    /// Held across the generation check and insert of a fill, and across the
    /// bump and clear of an invalidation.
    fill_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl PermissionRegistry {
    pub fn new(
        store: Arc<dyn AuthorizationStore>,
        config: RegistryCacheConfig,
        bindings: ModelBindings,
    ) -> Self {
        Self {
            store,
            config,
            defaults: bindings.clone(),
            bindings: RwLock::new(bindings),
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            fill_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Permission rows of the bound model matching `filter`, served from
    /// cache when fresh.
    pub async fn get_permissions(&self, filter: &RecordFilter) -> Result<Arc<Vec<Permission>>> {
        let model = self.bindings.read().permission.clone();
        let key = self.cache_key("permissions", &model, filter);
        if let Some(CachedRows::Permissions(rows)) = self.lookup(&key) {
            return Ok(rows);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let rows = Arc::new(self.store.find_permissions(&model, filter).await?);
        self.populate(key, generation, CachedRows::Permissions(Arc::clone(&rows)));
        Ok(rows)
    }

    /// Role rows of the bound model matching `filter`, served from cache
    /// when fresh.
    pub async fn get_roles(&self, filter: &RecordFilter) -> Result<Arc<Vec<Role>>> {
        let model = self.bindings.read().role.clone();
        let key = self.cache_key("roles", &model, filter);
        if let Some(CachedRows::Roles(rows)) = self.lookup(&key) {
            return Ok(rows);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let rows = Arc::new(self.store.find_roles(&model, filter).await?);
        self.populate(key, generation, CachedRows::Roles(Arc::clone(&rows)));
        Ok(rows)
    }

    fn cache_key(&self, kind: &str, model: &str, filter: &RecordFilter) -> String {
        format!("{}:{}:{}:{}", self.config.key, kind, model, filter)
    }

    fn lookup(&self, key: &str) -> Option<CachedRows> {
        let fresh = self.entries.get(key).and_then(|entry| {
            (entry.cached_at.elapsed() < self.config.expiration_time).then(|| entry.rows.clone())
        });

        match fresh {
            Some(rows) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("warrant_registry_lookups_total", "result" => "hit").increment(1);
                Some(rows)
            }
            None => {
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("warrant_registry_lookups_total", "result" => "miss").increment(1);
                None
            }
        }
    }

    fn populate(&self, key: String, generation: u64, rows: CachedRows) -> bool {
        let _guard = self.fill_lock.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(key = %key, "Skipping cache fill after concurrent invalidation");
            return false;
        }
        self.entries.insert(
            key,
            CachedEntry {
                rows,
                cached_at: Instant::now(),
            },
        );
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invalidation and bindings
    // ─────────────────────────────────────────────────────────────────────────

    /// Drop every cached lookup.
    pub fn forget_cached_permissions(&self) {
        let dropped = {
            let _guard = self.fill_lock.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            let dropped = self.entries.len();
            self.entries.clear();
            dropped
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        counter!("warrant_registry_invalidations_total").increment(1);
        debug!(dropped, "Forgot cached permissions");
    }

    /// Bind lookups and creations to a different permission model.
    pub fn set_permission_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!(model = %model, "Binding permission model");
        self.bindings.write().permission = model;
        self.forget_cached_permissions();
    }

    /// Bind lookups and creations to a different role model.
    pub fn set_role_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!(model = %model, "Binding role model");
        self.bindings.write().role = model;
        self.forget_cached_permissions();
    }

    /// Restore the configured model bindings.
    pub fn clear_model_bindings(&self) {
        *self.bindings.write() = self.defaults.clone();
        self.forget_cached_permissions();
    }

    pub fn bindings(&self) -> ModelBindings {
        self.bindings.read().clone()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        }
    }
}

impl std::fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRegistry")
            .field("store", &self.store.name())
            .field("bindings", &*self.bindings.read())
            .field("entries", &self.entries.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
