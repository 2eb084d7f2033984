//! Partitioned credential store
//!
//! Credentials are grouped by category, one JSON document per category
//! (`<dir>/<category>.json`). Each partition sits behind its own tokio Mutex,
//! so read-modify-write cycles in one category never wait on another.
//!
//! Every mutation is applied to a copy, persisted with an atomic temp-file +
//! rename, and only then committed in memory. A failed write leaves both the
//! file and the in-memory state as they were.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Records of one category, keyed by credential id.
type Partition = BTreeMap<String, Credential>;

#[derive(Default)]
struct Index {
    partitions: HashMap<String, Arc<Mutex<Partition>>>,
    /// credential id → category
    owners: HashMap<String, String>,
}

/// Thread-safe credential store.
///
/// The index lock is only held to find a partition or to claim an id; it is
/// never held across a file write, and never awaited while a partition lock
/// is held.
pub struct CredentialStore {
    dir: Option<PathBuf>,
    index: RwLock<Index>,
}

impl CredentialStore {
    /// Load every `<category>.json` document from `dir`.
    ///
    /// A missing directory is created (cold start with zero credentials).
    pub async fn load(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::Io(format!("creating store directory: {e}")))?;
            info!(path = %dir.display(), "store directory not found, starting with empty store");
        }

        let mut index = Index::default();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Io(format!("listing store directory: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Io(format!("listing store directory: {e}")))?
        {
            let path = entry.path();
            let Some(category) = category_from_path(&path) else {
                continue;
            };
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading {}: {e}", path.display())))?;
            let records: Partition = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing {}: {e}", path.display())))?;

            for (key, credential) in &records {
                if *key != credential.id || credential.category != category {
                    return Err(Error::Parse(format!(
                        "{}: record {key} does not belong to category {category}",
                        path.display()
                    )));
                }
                if index.owners.insert(key.clone(), category.clone()).is_some() {
                    return Err(Error::Parse(format!(
                        "credential {key} appears in more than one category"
                    )));
                }
            }

            info!(category, credentials = records.len(), "loaded category");
            index
                .partitions
                .insert(category, Arc::new(Mutex::new(records)));
        }

        Ok(Self {
            dir: Some(dir),
            index: RwLock::new(index),
        })
    }

    /// A store that keeps everything in memory. Same atomicity, no durability.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            index: RwLock::new(Index::default()),
        }
    }

    /// Add a new credential and persist its category.
    ///
    /// The id is reserved under the index lock; the write happens outside it.
    pub async fn insert(&self, credential: Credential) -> Result<()> {
        validate_category(&credential.category)?;

        let id = credential.id.clone();
        let category = credential.category.clone();
        let partition = {
            let mut index = self.index.write().await;
            if index.owners.contains_key(&id) {
                return Err(Error::Duplicate(id));
            }
            index.owners.insert(id.clone(), category.clone());
            index
                .partitions
                .entry(category.clone())
                .or_default()
                .clone()
        };

        let persisted = {
            let mut records = partition.lock().await;
            records.insert(id.clone(), credential);
            let persisted = self.persist(&category, &records).await;
            if persisted.is_err() {
                records.remove(&id);
            }
            persisted
        };
        if let Err(e) = persisted {
            self.index.write().await.owners.remove(&id);
            return Err(e);
        }
        debug!(credential_id = id, category, "inserted credential");
        Ok(())
    }

    /// Remove a credential. Returns it if it existed.
    pub async fn remove(&self, id: &str) -> Result<Option<Credential>> {
        let Some((category, partition)) = self.locate(id).await else {
            return Ok(None);
        };

        let removed = {
            let mut records = partition.lock().await;
            let Some(removed) = records.remove(id) else {
                return Ok(None);
            };
            if let Err(e) = self.persist(&category, &records).await {
                records.insert(id.to_string(), removed);
                return Err(e);
            }
            removed
        };
        self.index.write().await.owners.remove(id);
        debug!(credential_id = id, category, "removed credential");
        Ok(Some(removed))
    }

    /// Clone of a single credential.
    pub async fn get(&self, id: &str) -> Option<Credential> {
        let (_, partition) = self.locate(id).await?;
        let records = partition.lock().await;
        records.get(id).cloned()
    }

    /// Clones of every credential, ordered by category then id.
    pub async fn list(&self) -> Vec<Credential> {
        let mut out = Vec::new();
        for category in self.categories().await {
            if let Some(partition) = self.partition(&category).await {
                out.extend(partition.lock().await.values().cloned());
            }
        }
        out
    }

    /// Categories that hold (or have held) credentials, sorted.
    pub async fn categories(&self) -> Vec<String> {
        let index = self.index.read().await;
        let mut categories: Vec<String> = index.partitions.keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Atomic read-modify-write of one credential.
    ///
    /// Returns `Ok(None)` if `id` is unknown. Changes to `id` or `category`
    /// inside `f` are discarded.
    pub async fn modify<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Credential) -> R,
    ) -> Result<Option<R>> {
        let Some((category, partition)) = self.locate(id).await else {
            return Ok(None);
        };
        let mut records = partition.lock().await;
        let Some(current) = records.get(id) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        let out = f(&mut updated);
        updated.id = current.id.clone();
        updated.category = current.category.clone();
        if updated == *current {
            return Ok(Some(out));
        }

        let previous = records.insert(id.to_string(), updated);
        if let Err(e) = self.persist(&category, &records).await {
            if let Some(previous) = previous {
                records.insert(id.to_string(), previous);
            }
            return Err(e);
        }
        Ok(Some(out))
    }

    /// Atomic read-modify-write over every credential in `category`.
    ///
    /// `f` sees the records ordered by id and may reorder them. Records are
    /// written back under their own id; one whose `id` was changed inside `f`
    /// is left as it was, and changes to `category` are discarded. Returns
    /// `Ok(None)` if the category has never held a credential.
    pub async fn modify_category<R>(
        &self,
        category: &str,
        f: impl FnOnce(&mut [Credential]) -> R,
    ) -> Result<Option<R>> {
        let Some(partition) = self.partition(category).await else {
            return Ok(None);
        };
        let mut records = partition.lock().await;

        let mut working: Vec<Credential> = records.values().cloned().collect();
        let out = f(&mut working);

        let mut next = records.clone();
        for mut updated in working {
            let Some(slot) = next.get_mut(&updated.id) else {
                continue;
            };
            updated.category = category.to_string();
            *slot = updated;
        }

        if next != *records {
            self.persist(category, &next).await?;
            *records = next;
        }
        Ok(Some(out))
    }

    async fn partition(&self, category: &str) -> Option<Arc<Mutex<Partition>>> {
        self.index.read().await.partitions.get(category).cloned()
    }

    async fn locate(&self, id: &str) -> Option<(String, Arc<Mutex<Partition>>)> {
        let index = self.index.read().await;
        let category = index.owners.get(id)?;
        let partition = index.partitions.get(category)?.clone();
        Some((category.clone(), partition))
    }

    async fn persist(&self, category: &str, records: &Partition) -> Result<()> {
        match &self.dir {
            Some(dir) => write_atomic(dir, category, records).await,
            None => Ok(()),
        }
    }
}

/// Category names double as file names.
fn validate_category(category: &str) -> Result<()> {
    let valid = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidCategory(category.to_string()))
    }
}

fn category_from_path(path: &Path) -> Option<String> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_category(stem).ok()?;
    Some(stem.to_string())
}

/// Write one category document atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 since the file holds session cookies.
async fn write_atomic(dir: &Path, category: &str, records: &Partition) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| Error::Parse(format!("serializing {category}: {e}")))?;

    let path = dir.join(format!("{category}.json"));
    let tmp_path = dir.join(format!(".{category}.json.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp file for {category}: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting permissions for {category}: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp file for {category}: {e}")))?;

    debug!(path = %path.display(), "persisted category");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::SessionCookie;

    fn credential(id: &str, category: &str) -> Credential {
        Credential::new(id, category)
            .with_username(format!("user_{id}"))
            .with_session(vec![SessionCookie::new("sessionid", format!("s_{id}"))])
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.insert(credential("1", "instagram")).await.unwrap();
        store.insert(credential("2", "linkedin")).await.unwrap();
        store
            .modify("1", |c| {
                c.active = true;
                c.last_released_at = Some(1_700_000_000_000);
            })
            .await
            .unwrap();

        let reloaded = CredentialStore::load(path).await.unwrap();
        let c = reloaded.get("1").await.unwrap();
        assert!(c.active);
        assert_eq!(c.last_released_at, Some(1_700_000_000_000));
        assert_eq!(c.session[0].value, "s_1");
        assert_eq!(reloaded.categories().await, vec!["instagram", "linkedin"]);
    }

    #[tokio::test]
    async fn cold_start_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store");

        assert!(!path.exists());
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(path.is_dir());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_rejected_across_categories() {
        let store = CredentialStore::in_memory();
        store.insert(credential("1", "instagram")).await.unwrap();

        let err = store.insert(credential("1", "twitter")).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(id) if id == "1"));
    }

    #[tokio::test]
    async fn invalid_category_rejected() {
        let store = CredentialStore::in_memory();
        for bad in ["", "Instagram", "../etc", "a b"] {
            let err = store.insert(credential("x", bad)).await.unwrap_err();
            assert!(matches!(err, Error::InvalidCategory(_)), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn modify_unknown_returns_none() {
        let store = CredentialStore::in_memory();
        let out = store.modify("ghost", |c| c.active = true).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn modify_cannot_move_a_record() {
        let store = CredentialStore::in_memory();
        store.insert(credential("1", "instagram")).await.unwrap();

        store
            .modify("1", |c| {
                c.id = "2".into();
                c.category = "twitter".into();
                c.active = true;
            })
            .await
            .unwrap();

        let c = store.get("1").await.unwrap();
        assert_eq!(c.category, "instagram");
        assert!(c.active);
        assert!(store.get("2").await.is_none());
    }

    #[tokio::test]
    async fn modify_category_sees_only_its_partition() {
        let store = CredentialStore::in_memory();
        store.insert(credential("b", "instagram")).await.unwrap();
        store.insert(credential("a", "instagram")).await.unwrap();
        store.insert(credential("c", "linkedin")).await.unwrap();

        let seen = store
            .modify_category("instagram", |records| {
                for r in records.iter_mut() {
                    r.active = true;
                }
                records.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(seen, vec!["a", "b"]);
        assert!(store.get("a").await.unwrap().active);
        assert!(!store.get("c").await.unwrap().active);
    }

    #[tokio::test]
    async fn modify_category_writes_back_by_id_after_reorder() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().to_path_buf()).await.unwrap();
        store
            .insert(credential("a", "instagram").with_username("alice"))
            .await
            .unwrap();
        store
            .insert(credential("b", "instagram").with_username("bob"))
            .await
            .unwrap();

        store
            .modify_category("instagram", |records| {
                records.sort_by(|x, y| y.id.cmp(&x.id));
                records[0].active = true;
            })
            .await
            .unwrap();

        let reloaded = CredentialStore::load(dir.path().to_path_buf()).await.unwrap();
        for s in [&store, &reloaded] {
            let a = s.get("a").await.unwrap();
            let b = s.get("b").await.unwrap();
            assert_eq!(a.username, "alice");
            assert!(!a.active);
            assert_eq!(b.username, "bob");
            assert!(b.active);
            assert_eq!(b.session[0].value, "s_b");
        }
    }

    #[tokio::test]
    async fn modify_category_ignores_renamed_record() {
        let store = CredentialStore::in_memory();
        store.insert(credential("a", "instagram")).await.unwrap();

        store
            .modify_category("instagram", |records| {
                records[0].id = "z".into();
                records[0].active = true;
            })
            .await
            .unwrap();

        assert!(!store.get("a").await.unwrap().active);
        assert!(store.get("z").await.is_none());
    }

    #[tokio::test]
    async fn modify_category_unknown_returns_none() {
        let store = CredentialStore::in_memory();
        let out = store.modify_category("twitter", |r| r.len()).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn failed_write_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.insert(credential("1", "instagram")).await.unwrap();

        // Pull the directory out from under the store so the next write fails
        std::fs::remove_dir_all(&path).unwrap();

        let result = store.modify("1", |c| c.leased = true).await;
        assert!(result.is_err());
        assert!(!store.get("1").await.unwrap().leased);

        let result = store
            .modify_category("instagram", |records| records[0].leased = true)
            .await;
        assert!(result.is_err());
        assert!(!store.get("1").await.unwrap().leased);
    }

    #[tokio::test]
    async fn pending_insert_does_not_block_other_categories() {
        let store = Arc::new(CredentialStore::in_memory());
        store.insert(credential("ig-1", "instagram")).await.unwrap();
        store.insert(credential("li-1", "linkedin")).await.unwrap();

        // Hold the instagram partition so the insert below parks on it
        let partition = store.partition("instagram").await.unwrap();
        let guard = partition.lock().await;

        let insert = tokio::spawn({
            let store = store.clone();
            async move { store.insert(credential("ig-2", "instagram")).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!insert.is_finished());

        let other = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            store
                .modify("li-1", |c| c.active = true)
                .await
                .unwrap()
                .unwrap();
            store.get("li-1").await.unwrap()
        })
        .await
        .expect("linkedin must not wait on the instagram insert");
        assert!(other.active);

        drop(guard);
        insert.await.unwrap().unwrap();
        assert!(store.get("ig-2").await.is_some());
    }

    #[tokio::test]
    async fn failed_insert_releases_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        std::fs::remove_dir_all(&path).unwrap();

        assert!(store.insert(credential("1", "instagram")).await.is_err());
        assert!(store.get("1").await.is_none());

        std::fs::create_dir_all(&path).unwrap();
        store.insert(credential("1", "instagram")).await.unwrap();
        assert!(store.get("1").await.is_some());
    }

    #[tokio::test]
    async fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.insert(credential("1", "instagram")).await.unwrap();
        store.insert(credential("2", "instagram")).await.unwrap();

        let removed = store.remove("1").await.unwrap();
        assert_eq!(removed.unwrap().id, "1");
        assert!(store.remove("1").await.unwrap().is_none());

        let reloaded = CredentialStore::load(path).await.unwrap();
        let ids: Vec<String> = reloaded.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[tokio::test]
    async fn load_rejects_misfiled_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("instagram.json"),
            r#"{"1":{"id":"1","category":"twitter"}}"#,
        )
        .unwrap();

        let result = CredentialStore::load(dir.path().to_path_buf()).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn load_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a category").unwrap();
        std::fs::write(dir.path().join(".instagram.json.tmp.1"), "{").unwrap();

        let store = CredentialStore::load(dir.path().to_path_buf()).await.unwrap();
        assert!(store.categories().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().to_path_buf()).await.unwrap();
        store.insert(credential("1", "instagram")).await.unwrap();

        let metadata = tokio::fs::metadata(dir.path().join("instagram.json"))
            .await
            .unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "category file must be 0600, got {mode:o}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_modifies_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path().to_path_buf()).await.unwrap());
        store.insert(credential("1", "instagram")).await.unwrap();

        let mut handles = vec![];
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .modify("1", |c| c.consecutive_failures += 1)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.get("1").await.unwrap().consecutive_failures, 20);
        let reloaded = CredentialStore::load(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.get("1").await.unwrap().consecutive_failures, 20);
    }
}
