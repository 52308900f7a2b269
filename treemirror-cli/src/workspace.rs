//! The `.treemirror/` directory: config, cache file and item snapshot

use std::fs;
use std::path::{Path, PathBuf};
use treemirror_core::config::DEFAULT_CONFIG;
use treemirror_core::{Config, ContentFetcher, Item, Mirror, MirrorError, PersistentCache};

pub const WORKSPACE_DIR: &str = ".treemirror";
const CONFIG_FILE: &str = "config.toml";
const SNAPSHOT_FILE: &str = "items.json";

/// An initialized workspace and its loaded configuration
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
}

impl Workspace {
    /// Create `.treemirror/config.toml` and ignore the directory in git
    pub fn init(root: &Path) -> treemirror_core::Result<PathBuf> {
        let dir = root.join(WORKSPACE_DIR);
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(MirrorError::ConfigExists(config_path));
        }

        fs::create_dir_all(&dir)?;
        fs::write(&config_path, DEFAULT_CONFIG)?;
        update_gitignore(root)?;
        Ok(config_path)
    }

    pub fn open(root: PathBuf) -> treemirror_core::Result<Self> {
        let dir = root.join(WORKSPACE_DIR);
        if !dir.is_dir() {
            return Err(MirrorError::NotInitialized);
        }
        let config_path = dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            Config::default()
        };
        Ok(Self { root, config })
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }

    /// Cache file; relative paths resolve inside `.treemirror/`
    pub fn cache_path(&self) -> PathBuf {
        self.dir().join(&self.config.cache.path)
    }

    pub fn snapshot_path(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.root.join(path),
            None => self.dir().join(SNAPSHOT_FILE),
        }
    }

    /// Mirror over this workspace's cache, with an empty item store
    pub fn mirror<F: ContentFetcher>(&self, fetcher: F) -> treemirror_core::Result<Mirror<F>> {
        let cache = PersistentCache::open(&self.cache_path())?;
        Ok(Mirror::new(self.config.clone(), cache, fetcher))
    }
}

/// Read a JSON array of items
pub fn load_snapshot(path: &Path) -> treemirror_core::Result<Vec<Item>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MirrorError::SnapshotNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    let items: Vec<Item> = serde_json::from_str(&raw)?;
    tracing::debug!(path = %path.display(), items = items.len(), "snapshot loaded");
    Ok(items)
}

/// Walk up from the working directory looking for `.treemirror` or `.git`
pub fn detect_root(override_path: Option<PathBuf>) -> treemirror_core::Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    let start = std::env::current_dir()?;
    let mut current = start.clone();
    loop {
        if current.join(WORKSPACE_DIR).exists() || current.join(".git").exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Ok(start);
        }
    }
}

fn update_gitignore(root: &Path) -> treemirror_core::Result<()> {
    let gitignore_path = root.join(".gitignore");

    if gitignore_path.exists() {
        let content = fs::read_to_string(&gitignore_path)?;
        if !content
            .lines()
            .any(|line| line.trim() == WORKSPACE_DIR || line.trim() == ".treemirror/")
        {
            use std::io::Write;
            let mut file = fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Treemirror cache\n.treemirror/")?;
        }
    } else {
        fs::write(&gitignore_path, "# Treemirror cache\n.treemirror/\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_config_and_gitignore() {
        let dir = TempDir::new().unwrap();
        let config_path = Workspace::init(dir.path()).unwrap();
        assert!(config_path.ends_with(".treemirror/config.toml"));

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".treemirror/"));

        let err = Workspace::init(dir.path()).unwrap_err();
        assert!(matches!(err, MirrorError::ConfigExists(_)));
    }

    #[test]
    fn test_init_appends_to_existing_gitignore_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n.treemirror/\n").unwrap();
        Workspace::init(dir.path()).unwrap();

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.matches(".treemirror").count(), 1);
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        let err = Workspace::open(dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, MirrorError::NotInitialized));

        Workspace::init(dir.path()).unwrap();
        let ws = Workspace::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(ws.cache_path(), dir.path().join(".treemirror/cache.db"));
        assert_eq!(
            ws.snapshot_path(None),
            dir.path().join(".treemirror/items.json")
        );
        assert_eq!(
            ws.snapshot_path(Some(Path::new("export/items.json"))),
            dir.path().join("export/items.json")
        );
    }

    #[test]
    fn test_load_snapshot_parses_camel_case_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        fs::write(
            &path,
            r#"[
                {"id": "root", "title": "Handbook", "lastModified": "2024-03-01T10:00:00Z"},
                {"id": "p1", "title": "Onboarding", "lastModified": "2024-03-02T08:30:00+02:00",
                 "parentId": "root", "attributes": {"tags": ["hr", "new"], "status": "Draft", "points": 3}}
            ]"#,
        )
        .unwrap();

        let items = load_snapshot(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].parent_id(), Some("root"));
        assert_eq!(items[1].attributes.len(), 3);
        assert!(items[0].content.is_none());
    }

    #[test]
    fn test_load_snapshot_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_snapshot(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, MirrorError::SnapshotNotFound(_)));
    }

    #[test]
    fn test_load_snapshot_rejects_bad_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        fs::write(
            &path,
            r#"[{"id": "a", "title": "A", "lastModified": "yesterday"}]"#,
        )
        .unwrap();
        assert!(matches!(
            load_snapshot(&path).unwrap_err(),
            MirrorError::Serialization(_)
        ));
    }
}
