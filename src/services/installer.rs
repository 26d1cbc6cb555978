//! Self-update: version check and staged installation of a release archive.
//!
//! The archive is unpacked into a fresh staging directory and verified before
//! anything in the install directory is touched. Files are then copied next to
//! their targets and swapped in by rename, skipping the preserved files (the
//! persisted state among them). A failure while swapping restores the previous
//! files from their backups.

use crate::{
    config::{PathConfig, UpdateConfig},
    http_client::FetchError,
    services::release::{CheckOutcome, ReleaseSource, ReleaseVersion, UpdateFailure, parse_tags},
};
use anyhow::{Context, Result, bail, ensure};
use log::{error, info, warn};
use std::{
    fs,
    io::{self, Cursor, ErrorKind},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub struct Installer<S> {
    source: S,
    install_dir: PathBuf,
    staging_dir: PathBuf,
    required_entry: String,
    preserved: Vec<PathBuf>,
}

impl<S: ReleaseSource> Installer<S> {
    pub fn new(source: S, update: &UpdateConfig, paths: &PathConfig) -> Self {
        Self {
            source,
            install_dir: paths.install_dir.clone(),
            staging_dir: paths.staging_dir.clone(),
            required_entry: update.required_entry.clone(),
            preserved: update.preserved.iter().map(PathBuf::from).collect(),
        }
    }

    /// Ask the source for the released versions
    pub async fn check(&self) -> CheckOutcome {
        match self.source.list_tags().await {
            Ok(tags) => {
                let versions = parse_tags(&tags);
                info!("found {} release versions", versions.len());
                if versions.is_empty() {
                    CheckOutcome::NoVersions
                } else {
                    CheckOutcome::Available(versions)
                }
            }
            Err(FetchError::RateLimited) => {
                warn!("release source rate limited");
                CheckOutcome::RateLimited
            }
            Err(FetchError::Failed(e)) => {
                error!("failed to list releases: {e:#}");
                CheckOutcome::NoVersions
            }
        }
    }

    /// Download, verify and install `version`
    ///
    /// # Arguments
    /// * `version` - The release to install
    /// * `on_staged` - Called once the archive is unpacked and verified, right
    ///   before files in the install directory are replaced
    ///
    /// # Returns
    /// * `Ok(())` - All files are in place, a restart activates the release
    /// * `Err(UpdateFailure)` - Nothing was replaced unless the failure is `Install`
    pub async fn install<F>(&self, version: &ReleaseVersion, on_staged: F) -> Result<(), UpdateFailure>
    where
        F: FnOnce() + Send,
    {
        let archive = match self.source.download(version.tag().to_string()).await {
            Ok(archive) => archive,
            Err(FetchError::RateLimited) => return Err(UpdateFailure::RateLimited),
            Err(FetchError::Failed(e)) => {
                error!("failed to download {version}: {e:#}");
                return Err(UpdateFailure::Download);
            }
        };

        let staging = self.staging_dir.join(Uuid::new_v4().to_string());
        let required_entry = self.required_entry.clone();
        let unpack_into = staging.clone();

        let staged = tokio::task::spawn_blocking(move || stage(&archive, &unpack_into, &required_entry))
            .await
            .context("staging task failed")
            .and_then(|r| r);

        let result = match staged {
            Ok(root) => {
                on_staged();
                let install_dir = self.install_dir.clone();
                let preserved = self.preserved.clone();

                tokio::task::spawn_blocking(move || replace_files(&root, &install_dir, &preserved))
                    .await
                    .context("install task failed")
                    .and_then(|r| r)
                    .map(|count| info!("installed {version}: {count} files replaced"))
                    .map_err(|e| {
                        error!("failed to install {version}: {e:#}");
                        UpdateFailure::Install
                    })
            }
            Err(e) => {
                error!("release archive of {version} rejected: {e:#}");
                Err(UpdateFailure::CorruptArchive)
            }
        };

        if let Err(e) = remove_dir_if_exists(&staging) {
            warn!("failed to clean up staging directory: {e:#}");
        }

        result
    }
}

/// Unpack `archive` into `dest` and return the release root inside it
fn stage(archive: &[u8], dest: &Path, required_entry: &str) -> Result<PathBuf> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).context("failed to open release archive")?;
    ensure!(zip.len() > 0, "release archive is empty");

    fs::create_dir_all(dest).context(format!("failed to create staging directory: {dest:?}"))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("failed to read archive entry")?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            bail!("archive entry escapes the release root: {}", entry.name());
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).context(format!("failed to create {target:?}"))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context(format!("failed to create {parent:?}"))?;
        }
        let mut file = fs::File::create(&target).context(format!("failed to create {target:?}"))?;
        io::copy(&mut entry, &mut file).context(format!("failed to unpack {}", entry.name()))?;

        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                .context(format!("failed to set permissions of {target:?}"))?;
        }
    }

    let root = release_root(dest)?;
    ensure!(
        root.join(required_entry).exists(),
        "release archive does not contain {required_entry}"
    );

    Ok(root)
}

/// Tag archives wrap everything in one top-level directory; unwrap it.
fn release_root(dest: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dest)
        .context(format!("failed to read {dest:?}"))?
        .collect::<io::Result<Vec<_>>>()
        .context("failed to list staged files")?;

    match entries.as_slice() {
        [only] if only.path().is_dir() => Ok(only.path()),
        _ => Ok(dest.to_path_buf()),
    }
}

/// Relative paths of every file below `src` that is not preserved
fn release_files(src: &Path, preserved: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let dir = src.join(&relative);
        for entry in fs::read_dir(&dir).context(format!("failed to read {dir:?}"))? {
            let entry = entry.context("failed to read directory entry")?;
            let rel = relative.join(entry.file_name());

            if preserved.iter().any(|p| *p == rel) {
                info!("keep preserved file {rel:?}");
                continue;
            }

            if entry.file_type().context("failed to get file type")?.is_dir() {
                pending.push(rel);
            } else {
                files.push(rel);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Undo log of a running replacement
#[derive(Debug, Default)]
struct Journal {
    created_dirs: Vec<PathBuf>,
    staged: Vec<PathBuf>,
    /// Replaced targets with the backup of their previous content
    committed: Vec<(PathBuf, Option<PathBuf>)>,
}

impl Journal {
    fn create_dirs(&mut self, dir: &Path) -> Result<()> {
        let missing = dir.ancestors().take_while(|p| !p.exists()).collect::<Vec<_>>();
        for d in missing.into_iter().rev() {
            fs::create_dir(d).context(format!("failed to create {d:?}"))?;
            self.created_dirs.push(d.to_path_buf());
        }
        ensure!(dir.is_dir(), "install target is not a directory: {dir:?}");
        Ok(())
    }

    /// Drop the backups of a completed replacement
    fn finish(self) {
        for backup in self.committed.into_iter().filter_map(|(_, backup)| backup) {
            if let Err(e) = remove_file_if_exists(&backup) {
                warn!("failed to remove backup: {e:#}");
            }
        }
    }

    /// Put back every replaced file and remove whatever was added
    fn roll_back(self) {
        for (target, backup) in self.committed.into_iter().rev() {
            if let Err(e) = remove_file_if_exists(&target) {
                error!("failed to roll back {target:?}: {e:#}");
                continue;
            }
            if let Some(backup) = backup {
                if let Err(e) = fs::rename(&backup, &target) {
                    error!("failed to restore {target:?} from {backup:?}: {e:#}");
                }
            }
        }
        for tmp in self.staged {
            if let Err(e) = remove_file_if_exists(&tmp) {
                warn!("failed to remove {tmp:?}: {e:#}");
            }
        }
        for dir in self.created_dirs.into_iter().rev() {
            if let Err(e) = fs::remove_dir(&dir) {
                warn!("failed to remove {dir:?}: {e:#}");
            }
        }
    }
}

/// Install every file below `src` into `dest`, returning the number replaced
///
/// All files are first copied next to their targets, then swapped in by
/// rename with the previous content kept as a backup. The first error rolls
/// back everything done so far, leaving `dest` as it was.
fn replace_files(src: &Path, dest: &Path, preserved: &[PathBuf]) -> Result<usize> {
    let files = release_files(src, preserved)?;
    let mut journal = Journal::default();

    match swap_in(src, dest, &files, &mut journal) {
        Ok(()) => {
            journal.finish();
            Ok(files.len())
        }
        Err(e) => {
            warn!("rolling back {} replaced files", journal.committed.len());
            journal.roll_back();
            Err(e)
        }
    }
}

fn swap_in(src: &Path, dest: &Path, files: &[PathBuf], journal: &mut Journal) -> Result<()> {
    let mut ready = Vec::with_capacity(files.len());

    for rel in files {
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            journal.create_dirs(parent)?;
        }
        ensure!(!target.is_dir(), "install target is a directory: {target:?}");

        let tmp = sibling(&target, "new")?;
        journal.staged.push(tmp.clone());
        fs::copy(src.join(rel), &tmp).context(format!("failed to copy {rel:?} to {tmp:?}"))?;
        ready.push((target, tmp));
    }

    for (target, tmp) in ready {
        let backup = if target.exists() {
            let backup = sibling(&target, "bak")?;
            fs::rename(&target, &backup).context(format!("failed to back up {target:?}"))?;
            Some(backup)
        } else {
            None
        };
        journal.committed.push((target.clone(), backup));
        fs::rename(&tmp, &target).context(format!("failed to rename {tmp:?} to {target:?}"))?;
    }

    Ok(())
}

/// Hidden file next to `target`, e.g. `.panel-menu.new`
fn sibling(target: &Path, suffix: &str) -> Result<PathBuf> {
    let file_name = target
        .file_name()
        .context(format!("invalid install target: {target:?}"))?
        .to_string_lossy();
    Ok(target.with_file_name(format!(".{file_name}.{suffix}")))
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(format!("failed to remove {dir:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::release::MockReleaseSource;
    use anyhow::anyhow;
    use std::{
        io::Write,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    };
    use tempfile::TempDir;
    use zip::write::FileOptions;

    struct Fixture {
        _dir: TempDir,
        install: PathBuf,
        staging: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().expect("should create temp dir");
            let install = dir.path().join("install");
            let staging = dir.path().join("staging");
            fs::create_dir_all(&install).expect("should create install dir");
            Self {
                _dir: dir,
                install,
                staging,
            }
        }

        fn installer(&self, source: MockReleaseSource) -> Installer<MockReleaseSource> {
            self.installer_preserving(source, &["state.json"])
        }

        fn installer_preserving(&self, source: MockReleaseSource, preserved: &[&str]) -> Installer<MockReleaseSource> {
            Installer {
                source,
                install_dir: self.install.clone(),
                staging_dir: self.staging.clone(),
                required_entry: "panel-menu".to_string(),
                preserved: preserved.iter().map(PathBuf::from).collect(),
            }
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.install.join(rel)).expect("should read installed file")
        }
    }

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, content) in entries {
                writer
                    .start_file(*name, FileOptions::default())
                    .expect("should start entry");
                writer.write_all(content.as_bytes()).expect("should write entry");
            }
            writer.finish().expect("should finish archive");
        }
        buf.into_inner()
    }

    fn source_serving(bytes: Vec<u8>) -> MockReleaseSource {
        let mut source = MockReleaseSource::new();
        source.expect_download().returning(move |_| {
            let bytes = bytes.clone();
            Box::pin(async move { Ok(bytes) })
        });
        source
    }

    fn v(tag: &str) -> ReleaseVersion {
        tag.parse().expect("valid version")
    }

    mod check {
        use super::*;

        #[tokio::test]
        async fn lists_versions() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source
                .expect_list_tags()
                .returning(|| Box::pin(async { Ok(vec!["V3.5.0".to_string(), "docs".to_string()]) }));

            let outcome = fixture.installer(source).check().await;

            assert_eq!(outcome, CheckOutcome::Available(vec![v("V3.5.0")]));
        }

        #[tokio::test]
        async fn unreachable_source_means_no_versions() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source
                .expect_list_tags()
                .returning(|| Box::pin(async { Err(FetchError::Failed(anyhow!("offline"))) }));

            assert_eq!(fixture.installer(source).check().await, CheckOutcome::NoVersions);
        }

        #[tokio::test]
        async fn empty_listing_means_no_versions() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source.expect_list_tags().returning(|| Box::pin(async { Ok(vec![]) }));

            assert_eq!(fixture.installer(source).check().await, CheckOutcome::NoVersions);
        }

        #[tokio::test]
        async fn rate_limit_is_distinct() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source
                .expect_list_tags()
                .returning(|| Box::pin(async { Err(FetchError::RateLimited) }));

            assert_eq!(fixture.installer(source).check().await, CheckOutcome::RateLimited);
        }
    }

    mod install {
        use super::*;

        #[tokio::test]
        async fn replaces_files_and_keeps_state() {
            let fixture = Fixture::new();
            fs::write(fixture.install.join("panel-menu"), "old").expect("should write");
            fs::write(fixture.install.join("state.json"), r#"{"service":"B"}"#).expect("should write");
            let bytes = archive(&[
                ("panel-menu-V3.5.0/panel-menu", "new"),
                ("panel-menu-V3.5.0/state.json", "{}"),
                ("panel-menu-V3.5.0/assets/font.txt", "glyphs"),
            ]);
            let staged = Arc::new(AtomicBool::new(false));
            let flag = staged.clone();

            fixture
                .installer(source_serving(bytes))
                .install(&v("V3.5.0"), move || flag.store(true, Ordering::SeqCst))
                .await
                .expect("install should succeed");

            assert!(staged.load(Ordering::SeqCst));
            assert_eq!(fs::read_to_string(fixture.install.join("panel-menu")).expect("read"), "new");
            assert_eq!(
                fs::read_to_string(fixture.install.join("state.json")).expect("read"),
                r#"{"service":"B"}"#
            );
            assert_eq!(
                fs::read_to_string(fixture.install.join("assets/font.txt")).expect("read"),
                "glyphs"
            );
            assert_eq!(fs::read_dir(&fixture.staging).expect("staging").count(), 0);
        }

        #[tokio::test]
        async fn corrupt_archive_leaves_install_untouched() {
            let fixture = Fixture::new();
            fs::write(fixture.install.join("panel-menu"), "old").expect("should write");

            let result = fixture
                .installer(source_serving(b"not a zip".to_vec()))
                .install(&v("V3.5.0"), || panic!("must not stage"))
                .await;

            assert_eq!(result, Err(UpdateFailure::CorruptArchive));
            assert_eq!(fs::read_to_string(fixture.install.join("panel-menu")).expect("read"), "old");
        }

        #[tokio::test]
        async fn archive_without_binary_is_rejected() {
            let fixture = Fixture::new();
            let bytes = archive(&[("release/README.md", "hello")]);

            let result = fixture
                .installer(source_serving(bytes))
                .install(&v("V3.5.0"), || {})
                .await;

            assert_eq!(result, Err(UpdateFailure::CorruptArchive));
            assert!(!fixture.install.join("README.md").exists());
        }

        #[tokio::test]
        async fn escaping_entry_is_rejected() {
            let fixture = Fixture::new();
            let bytes = archive(&[("panel-menu", "bin"), ("../outside.txt", "x")]);

            let result = fixture
                .installer(source_serving(bytes))
                .install(&v("V3.5.0"), || {})
                .await;

            assert_eq!(result, Err(UpdateFailure::CorruptArchive));
            assert!(!fixture.install.join("panel-menu").exists());
        }

        #[tokio::test]
        async fn rate_limited_download() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source
                .expect_download()
                .returning(|_| Box::pin(async { Err(FetchError::RateLimited) }));

            let result = fixture.installer(source).install(&v("V3.5.0"), || {}).await;

            assert_eq!(result, Err(UpdateFailure::RateLimited));
        }

        #[tokio::test]
        async fn failed_download() {
            let fixture = Fixture::new();
            let mut source = MockReleaseSource::new();
            source
                .expect_download()
                .returning(|_| Box::pin(async { Err(FetchError::Failed(anyhow!("404"))) }));

            let result = fixture.installer(source).install(&v("V3.5.0"), || {}).await;

            assert_eq!(result, Err(UpdateFailure::Download));
        }
    }

    mod rollback {
        use super::*;

        #[tokio::test]
        async fn conflicting_release_leaves_install_untouched() {
            let fixture = Fixture::new();
            let mut entries = vec![("panel-menu-V3.5.0/panel-menu".to_string(), "new")];
            for i in 0..18 {
                fs::write(fixture.install.join(format!("f{i:02}")), "old").expect("should write");
                entries.push((format!("panel-menu-V3.5.0/f{i:02}"), "new"));
            }
            entries.push(("panel-menu-V3.5.0/m/inner.txt".to_string(), "new"));
            fs::write(fixture.install.join("panel-menu"), "old").expect("should write");
            fs::write(fixture.install.join("m"), "plain file").expect("should write");
            let entries = entries.iter().map(|(n, c)| (n.as_str(), *c)).collect::<Vec<_>>();

            let result = fixture
                .installer(source_serving(archive(&entries)))
                .install(&v("V3.5.0"), || {})
                .await;

            assert_eq!(result, Err(UpdateFailure::Install));
            assert_eq!(fixture.read("panel-menu"), "old");
            for i in 0..18 {
                assert_eq!(fixture.read(&format!("f{i:02}")), "old");
            }
            assert_eq!(fixture.read("m"), "plain file");
            let leftovers = fs::read_dir(&fixture.install)
                .expect("should list install dir")
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
                .count();
            assert_eq!(leftovers, 0);
        }

        #[test]
        fn journal_restores_replaced_and_removes_added() {
            let dir = TempDir::new().expect("should create temp dir");
            let replaced = dir.path().join("panel-menu");
            let backup = dir.path().join(".panel-menu.bak");
            let added_dir = dir.path().join("assets");
            let added = added_dir.join("font.txt");
            let staged = dir.path().join(".extra.new");
            fs::write(&replaced, "new").expect("should write");
            fs::write(&backup, "old").expect("should write");
            fs::create_dir(&added_dir).expect("should create dir");
            fs::write(&added, "new").expect("should write");
            fs::write(&staged, "new").expect("should write");

            Journal {
                created_dirs: vec![added_dir.clone()],
                staged: vec![staged.clone()],
                committed: vec![(replaced.clone(), Some(backup.clone())), (added, None)],
            }
            .roll_back();

            assert_eq!(fs::read_to_string(&replaced).expect("read"), "old");
            assert!(!backup.exists());
            assert!(!added_dir.exists());
            assert!(!staged.exists());
        }

        #[test]
        fn finished_journal_drops_backups() {
            let dir = TempDir::new().expect("should create temp dir");
            let src = dir.path().join("release");
            let dest = dir.path().join("install");
            fs::create_dir_all(src.join("lib")).expect("should create dir");
            fs::create_dir_all(&dest).expect("should create dir");
            fs::write(src.join("panel-menu"), "new").expect("should write");
            fs::write(src.join("lib/helper"), "new").expect("should write");
            fs::write(dest.join("panel-menu"), "old").expect("should write");

            let count = replace_files(&src, &dest, &[]).expect("replace should succeed");

            assert_eq!(count, 2);
            assert_eq!(fs::read_to_string(dest.join("panel-menu")).expect("read"), "new");
            assert_eq!(fs::read_to_string(dest.join("lib/helper")).expect("read"), "new");
            assert!(!dest.join(".panel-menu.bak").exists());
        }
    }

    mod preserved {
        use super::*;

        #[tokio::test]
        async fn nested_state_file_survives_update() {
            let fixture = Fixture::new();
            fs::create_dir_all(fixture.install.join("data")).expect("should create dir");
            fs::write(fixture.install.join("data/state.json"), r#"{"service":"B"}"#).expect("should write");
            let bytes = archive(&[
                ("panel-menu-V3.5.0/panel-menu", "new"),
                ("panel-menu-V3.5.0/data/state.json", "{}"),
            ]);

            fixture
                .installer_preserving(source_serving(bytes), &["data/state.json"])
                .install(&v("V3.5.0"), || {})
                .await
                .expect("install should succeed");

            assert_eq!(fixture.read("panel-menu"), "new");
            assert_eq!(fixture.read("data/state.json"), r#"{"service":"B"}"#);
        }

        #[test]
        fn only_exact_relative_paths_are_kept() {
            let dir = TempDir::new().expect("should create temp dir");
            fs::create_dir_all(dir.path().join("data")).expect("should create dir");
            fs::write(dir.path().join("state.json"), "{}").expect("should write");
            fs::write(dir.path().join("data/state.json"), "{}").expect("should write");

            let files = release_files(dir.path(), &[PathBuf::from("data/state.json")]).expect("should list");

            assert_eq!(files, vec![PathBuf::from("state.json")]);
        }
    }
}
