use crate::core::error::DubError;
use crate::core::io::Storage;
use crate::core::state::ProjectData;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// On-disk project layout: `<root>/<name>/project.json` plus an `output/`
/// directory for generated artifacts.
#[derive(Clone)]
pub struct ProjectStore {
    storage: Arc<dyn Storage>,
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(storage: Arc<dyn Storage>, root: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            root: root.into(),
        }
    }

    fn project_dir(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().into_owned()
    }

    fn project_file(&self, name: &str) -> String {
        self.root
            .join(name)
            .join("project.json")
            .to_string_lossy()
            .into_owned()
    }

    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.root.join(name).join("output")
    }

    pub async fn list(&self) -> Result<Vec<String>, DubError> {
        let root = self.root.to_string_lossy().into_owned();
        let entries = self
            .storage
            .list(&root)
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = PathBuf::from(&entry);
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let has_manifest = self
                .storage
                .exists(&self.project_file(&name))
                .await
                .map_err(|e| DubError::Storage(e.to_string()))?;
            if has_manifest {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn create(&self, name: &str) -> Result<ProjectData, DubError> {
        let file = self.project_file(name);
        let exists = self
            .storage
            .exists(&file)
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;
        if exists {
            return Err(DubError::ProjectExists(name.to_string()));
        }

        let data = ProjectData::new(name);
        self.save(&data).await?;
        info!("created project \"{}\"", name);
        Ok(data)
    }

    /// Load a project, applying crash recovery: lines persisted mid-run as
    /// `generating` come back as `pending`.
    pub async fn load(&self, name: &str) -> Result<ProjectData, DubError> {
        let file = self.project_file(name);
        let exists = self
            .storage
            .exists(&file)
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;
        if !exists {
            return Err(DubError::ProjectNotFound(name.to_string()));
        }

        let bytes = self
            .storage
            .read(&file)
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;
        let mut data: ProjectData = serde_json::from_slice(&bytes)
            .map_err(|e| DubError::Storage(format!("corrupt project file: {}", e)))?;
        data.normalize();
        Ok(data)
    }

    pub async fn save(&self, data: &ProjectData) -> Result<(), DubError> {
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| DubError::Storage(e.to_string()))?;
        self.storage
            .write(&self.project_file(&data.name), &bytes)
            .await
            .map_err(|e| DubError::Storage(e.to_string()))
    }

    /// Rename a project directory wholesale, artifacts included.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), DubError> {
        let mut data = self.load(old).await?;
        let new_exists = self
            .storage
            .exists(&self.project_file(new))
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;
        if new_exists {
            return Err(DubError::ProjectExists(new.to_string()));
        }

        self.storage
            .rename(&self.project_dir(old), &self.project_dir(new))
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;

        data.name = new.to_string();
        self.save(&data).await?;
        info!("renamed project \"{}\" to \"{}\"", old, new);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), DubError> {
        self.storage
            .delete(&self.project_dir(name))
            .await
            .map_err(|e| DubError::Storage(e.to_string()))?;
        info!("deleted project \"{}\"", name);
        Ok(())
    }
}

/// Debounced, fire-and-forget persistence of live project state.
///
/// Mutations nudge the channel; the writer waits until the nudges go quiet
/// for the debounce window, then snapshots and saves. A failed save logs a
/// warning and never disturbs the run.
pub struct Autosaver {
    tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl Autosaver {
    pub fn spawn<F>(store: ProjectStore, debounce: Duration, snapshot: F) -> Self
    where
        F: Fn() -> ProjectData + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Restart the timer while changes keep arriving.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        more = rx.recv() => {
                            if more.is_none() {
                                break;
                            }
                        }
                    }
                }

                let data = snapshot();
                if let Err(e) = store.save(&data).await {
                    warn!("autosave of \"{}\" failed: {}", data.name, e);
                }
            }
        });
        Self { tx, handle }
    }

    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    /// Sender handle for wiring into the engine.
    pub fn sender(&self) -> mpsc::UnboundedSender<()> {
        self.tx.clone()
    }

    /// Flush any pending save and stop the writer task.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!("autosaver task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{Line, LineStatus, RoleConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store(dir: &tempfile::TempDir) -> ProjectStore {
        ProjectStore::new(Arc::new(NativeStorage::new()), dir.path().join("projects"))
    }

    #[tokio::test]
    async fn create_load_round_trip() -> Result<(), DubError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut data = store.create("demo").await?;
        data.lines.push(Line::new(0, "hero", "hello"));
        let mut config = RoleConfig::new("hero");
        config.reference_voice = Some("voices/hero.wav".to_string());
        data.role_configs.insert("hero".to_string(), config);
        store.save(&data).await?;

        let loaded = store.load("demo").await?;
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.lines.len(), 1);
        assert_eq!(
            loaded.role_configs["hero"].reference_voice.as_deref(),
            Some("voices/hero.wav")
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.create("demo").await.unwrap();
        assert!(matches!(
            store.create("demo").await,
            Err(DubError::ProjectExists(_))
        ));
    }

    #[tokio::test]
    async fn load_resets_lines_stuck_in_generating() -> Result<(), DubError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut data = store.create("crashy").await?;
        let mut line = Line::new(0, "hero", "hello");
        line.status = LineStatus::Generating;
        data.lines.push(line);
        store.save(&data).await?;

        let loaded = store.load("crashy").await?;
        assert_eq!(loaded.lines[0].status, LineStatus::Pending);
        assert!(loaded.lines[0].output_artifact.is_none());
        assert!(loaded.lines[0].last_error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.load("nope").await,
            Err(DubError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_rename_delete() -> Result<(), DubError> {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.create("alpha").await?;
        store.create("beta").await?;
        assert_eq!(store.list().await?, vec!["alpha", "beta"]);

        store.rename("alpha", "gamma").await?;
        assert_eq!(store.list().await?, vec!["beta", "gamma"]);
        assert_eq!(store.load("gamma").await?.name, "gamma");

        store.delete("beta").await?;
        assert_eq!(store.list().await?, vec!["gamma"]);
        Ok(())
    }

    #[tokio::test]
    async fn rename_onto_existing_project_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.create("alpha").await.unwrap();
        store.create("beta").await.unwrap();
        assert!(matches!(
            store.rename("alpha", "beta").await,
            Err(DubError::ProjectExists(_))
        ));
    }

    #[tokio::test]
    async fn autosaver_coalesces_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create("auto").await.unwrap();

        let saves = Arc::new(AtomicUsize::new(0));
        let counter = saves.clone();
        let autosaver = Autosaver::spawn(store.clone(), Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ProjectData::new("auto")
        });

        for _ in 0..10 {
            autosaver.notify();
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(saves.load(Ordering::SeqCst), 1, "burst must coalesce");

        autosaver.notify();
        autosaver.shutdown().await;
        assert_eq!(saves.load(Ordering::SeqCst), 2, "shutdown flushes the tail");
    }

    #[tokio::test]
    async fn autosaver_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // Point the store at a path that is actually a file, so saves fail.
        let bogus = dir.path().join("not-a-dir");
        std::fs::write(&bogus, b"x").unwrap();
        let store = ProjectStore::new(Arc::new(NativeStorage::new()), &bogus);

        let autosaver = Autosaver::spawn(store, Duration::from_millis(10), || {
            ProjectData::new("doomed")
        });
        autosaver.notify();
        autosaver.shutdown().await;
    }
}
