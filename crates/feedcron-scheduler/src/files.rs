//! Filesystem collaborators: write-permission checks and temporary feed cleanup.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use feedcron_core::config::FilesConfig;
use feedcron_core::TenantKey;
use tracing::{debug, warn};

/// Can the feed for a tenant be written right now?
pub trait PermissionChecker: Send + Sync {
    fn can_write(&self, tenant: &TenantKey) -> bool;
}

/// What happened to a tenant's leftover temporary feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purge {
    Removed(PathBuf),
    /// There was nothing to remove.
    Absent,
    Failed { path: PathBuf, reason: String },
}

/// Removes half-written feeds left behind by an interrupted cycle.
pub trait ArtifactCleaner: Send + Sync {
    fn remove_temporary_artifact(&self, tenant: &TenantKey) -> Purge;
}

/// Feed file layout on disk.
///
/// The finished feed for tenant `es` lives at `{feed_dir}/{prefix}-es.xml`;
/// while a cycle is in progress the generator writes
/// `{tmp_dir}/{prefix}-es.xml.tmp`.
#[derive(Debug, Clone)]
pub struct FeedFiles {
    feed_dir: PathBuf,
    tmp_dir: PathBuf,
    prefix: String,
}

impl FeedFiles {
    pub fn new(feed_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            feed_dir: feed_dir.into(),
            tmp_dir: tmp_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &FilesConfig) -> Self {
        Self::new(&config.feed_dir, &config.tmp_dir, config.prefix.clone())
    }

    pub fn feed_filename(&self, tenant: &TenantKey) -> String {
        format!("{}-{}.xml", self.prefix, tenant)
    }

    pub fn tmp_filename(&self, tenant: &TenantKey) -> String {
        format!("{}.tmp", self.feed_filename(tenant))
    }

    pub fn feed_path(&self, tenant: &TenantKey) -> PathBuf {
        self.feed_dir.join(self.feed_filename(tenant))
    }

    pub fn tmp_path(&self, tenant: &TenantKey) -> PathBuf {
        self.tmp_dir.join(self.tmp_filename(tenant))
    }
}

impl PermissionChecker for FeedFiles {
    fn can_write(&self, tenant: &TenantKey) -> bool {
        location_writable(&self.feed_dir, &self.feed_path(tenant))
            && location_writable(&self.tmp_dir, &self.tmp_path(tenant))
    }
}

impl ArtifactCleaner for FeedFiles {
    fn remove_temporary_artifact(&self, tenant: &TenantKey) -> Purge {
        let path = self.tmp_path(tenant);
        if !path.exists() {
            return Purge::Absent;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "temporary feed removed");
                Purge::Removed(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not remove temporary feed");
                Purge::Failed {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Writable if the file exists and opens for appending, or is absent and a
/// file can be created next to it. The directory is created when missing.
fn location_writable(dir: &Path, file: &Path) -> bool {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "could not create feed directory");
        return false;
    }
    let check = if file.exists() {
        OpenOptions::new().append(true).open(file).map(drop)
    } else {
        tempfile::NamedTempFile::new_in(dir).map(drop)
    };
    match check {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %file.display(), error = %e, "feed location is not writable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(root: &Path) -> FeedFiles {
        FeedFiles::new(root.join("feeds"), root.join("tmp"), "feed")
    }

    #[test]
    fn names_follow_prefix_and_tenant() {
        let f = FeedFiles::new("/srv/feeds", "/srv/tmp", "doofeed");
        let tenant = TenantKey::from("es");
        assert_eq!(f.feed_filename(&tenant), "doofeed-es.xml");
        assert_eq!(f.tmp_path(&tenant), PathBuf::from("/srv/tmp/doofeed-es.xml.tmp"));
    }

    #[test]
    fn missing_directories_are_created_and_writable() {
        let root = tempfile::tempdir().unwrap();
        let f = files(root.path());
        assert!(f.can_write(&TenantKey::from("default")));
        assert!(root.path().join("feeds").is_dir());
        assert!(root.path().join("tmp").is_dir());
    }

    #[test]
    fn read_only_feed_file_blocks_writing() {
        let root = tempfile::tempdir().unwrap();
        let f = files(root.path());
        let tenant = TenantKey::from("default");
        fs::create_dir_all(root.path().join("feeds")).unwrap();
        let feed = f.feed_path(&tenant);
        fs::write(&feed, "<feed/>").unwrap();
        let mut perms = fs::metadata(&feed).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&feed, perms).unwrap();

        // Privileged users write through the mode bits.
        if OpenOptions::new().append(true).open(&feed).is_ok() {
            return;
        }
        assert!(!f.can_write(&tenant));
        assert!(f.can_write(&TenantKey::from("other")));
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_blocks_new_feeds() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let f = files(root.path());
        let tenant = TenantKey::from("default");
        let feeds = root.path().join("feeds");
        fs::create_dir_all(&feeds).unwrap();
        fs::set_permissions(&feeds, fs::Permissions::from_mode(0o555)).unwrap();

        let enforced = fs::File::create(feeds.join("check")).is_err();
        let writable = f.can_write(&tenant);
        fs::set_permissions(&feeds, fs::Permissions::from_mode(0o755)).unwrap();

        if enforced {
            assert!(!writable);
            assert!(fs::read_dir(&feeds).unwrap().next().is_none());
        }
    }

    #[test]
    fn purge_reports_removed_and_absent() {
        let root = tempfile::tempdir().unwrap();
        let f = files(root.path());
        let tenant = TenantKey::from("default");
        assert_eq!(f.remove_temporary_artifact(&tenant), Purge::Absent);

        fs::create_dir_all(root.path().join("tmp")).unwrap();
        fs::write(f.tmp_path(&tenant), "partial").unwrap();
        assert_eq!(f.remove_temporary_artifact(&tenant), Purge::Removed(f.tmp_path(&tenant)));
        assert!(!f.tmp_path(&tenant).exists());
    }
}
