use crate::progress::{ProgressEvent, ProgressSink};
use eyre::{eyre, WrapErr};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A local path to pack, with the dir its files get inside the archive
#[derive(Clone, Debug)]
pub struct ArchiveSource {
    pub path: PathBuf,

    // Empty prefix puts the files in the root of the archive
    pub prefix: String,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }
}

/// What a walked path becomes in the archive
enum EntryKind {
    File,

    // Stored as a link entry, the target is kept as is
    Symlink(PathBuf),
}

/// A file or a link found in one of the sources
struct Entry {
    path: PathBuf,
    name: String,
    kind: EntryKind,
}

/// Pack all files from the sources into a zip at the destination
///
/// Resolves only when the archive is completely written and the file is closed.
/// The archive is written next to the destination and moved over it at the end,
/// so a failed run leaves the previous archive untouched.
/// Zip crate doesn't have async support, so the work runs in a blocking task.
pub async fn create_archive(
    sources: Vec<ArchiveSource>,
    destination: PathBuf,
    progress: Arc<dyn ProgressSink>,
) -> eyre::Result<()> {
    tokio::task::spawn_blocking(move || write_archive(&sources, &destination, progress.as_ref()))
        .await
        .wrap_err("Failed to spawn the blocking task")?
}

fn write_archive(
    sources: &[ArchiveSource],
    destination: &Path,
    progress: &dyn ProgressSink,
) -> eyre::Result<()> {
    let create_error = format!("Failed to create zip file {destination:?}");
    let write_error = format!("Failed to write zip file {destination:?}");

    let temp = NamedTempFile::new_in(parent_dir(destination)).wrap_err(create_error.clone())?;

    // The archive may be created inside one of the sources, it must not pack itself
    let skipped = [
        resolve(destination).wrap_err(create_error.clone())?,
        resolve(temp.path()).wrap_err(create_error)?,
    ];

    let entries = collect_entries(sources, &skipped)?;
    let total = entries.len() as u64;
    log::debug!("Packing {total} entries into {destination:?}");

    let mut zip = ZipWriter::new(BufWriter::new(temp));

    for (index, entry) in entries.iter().enumerate() {
        add_entry(&mut zip, entry)?;
        progress.progress(ProgressEvent::new(index as u64 + 1, total));
    }

    if entries.is_empty() {
        progress.progress(ProgressEvent::new(0, 0));
    }

    let mut writer = zip
        .finish()
        .wrap_err(format!("Failed to finalize zip file {destination:?}"))?;

    writer.flush().wrap_err(write_error.clone())?;

    let temp = writer
        .into_inner()
        .map_err(|error| eyre!("{}", error.error()))
        .wrap_err(write_error.clone())?;

    // Temp files are private to the user, the archive is not
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .wrap_err(write_error.clone())?;
    }

    temp.as_file().sync_all().wrap_err(write_error.clone())?;

    temp.persist(destination)
        .map_err(|error| error.error)
        .wrap_err(write_error)?;

    Ok(())
}

/// Directory a path lives in, a bare file name lives in the current one
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Absolute path with the dir resolved, the file itself may not exist yet
///
/// The last component is not followed, so a link is never taken for its target.
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;

    Ok(parent_dir(path).canonicalize()?.join(file_name))
}

/// Walk all sources and list the files and links in a stable order
fn collect_entries(sources: &[ArchiveSource], skipped: &[PathBuf]) -> eyre::Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for source in sources {
        for entry in WalkDir::new(&source.path).sort_by_file_name() {
            let entry = entry.wrap_err(format!("Failed to read {:?}", source.path))?;
            let file_type = entry.file_type();

            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())
                    .wrap_err(format!("Failed to read link {:?}", entry.path()))?;

                EntryKind::Symlink(target)
            } else {
                continue;
            };

            let is_skipped = resolve(entry.path())
                .map(|path| skipped.contains(&path))
                .unwrap_or(false);

            if is_skipped {
                continue;
            }

            // Strip leading path from source to create relative path in the archive
            let relative = entry
                .path()
                .strip_prefix(&source.path)
                .unwrap_or_else(|_| entry.path());

            entries.push(Entry {
                path: entry.path().to_path_buf(),
                name: entry_name(&source.prefix, relative),
                kind,
            });
        }
    }

    Ok(entries)
}

/// Name of the file inside the archive, zip always uses forward slashes
fn entry_name(prefix: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    }
}

fn add_entry<W: Write + Seek>(zip: &mut ZipWriter<W>, entry: &Entry) -> eyre::Result<()> {
    match &entry.kind {
        EntryKind::File => add_file(zip, entry),

        EntryKind::Symlink(target) => zip
            .add_symlink(
                entry.name.as_str(),
                target.to_string_lossy().into_owned(),
                SimpleFileOptions::default(),
            )
            .wrap_err(format!("Failed to write zip entry {}", entry.name)),
    }
}

fn add_file<W: Write + Seek>(zip: &mut ZipWriter<W>, entry: &Entry) -> eyre::Result<()> {
    let mut file =
        File::open(&entry.path).wrap_err(format!("Failed to read {:?}", entry.path))?;

    let metadata = file
        .metadata()
        .wrap_err(format!("Failed to read {:?}", entry.path))?;

    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= u32::MAX as u64);

    // Keep the executable bit, e.g. for the bootstrap of a custom runtime
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode());
    }

    zip.start_file(entry.name.as_str(), options)
        .wrap_err(format!("Failed to write zip entry {}", entry.name))?;

    std::io::copy(&mut file, zip).wrap_err(format!("Failed to write zip entry {}", entry.name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Mutex;

    fn names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn tree(dir: &Path) {
        std::fs::create_dir_all(dir.join("src/nested")).unwrap();
        std::fs::write(dir.join("bootstrap"), b"binary").unwrap();
        std::fs::write(dir.join("src/lib.rs"), b"pub fn f() {}").unwrap();
        std::fs::write(dir.join("src/nested/mod.rs"), b"").unwrap();
    }

    #[tokio::test]
    async fn empty_prefix_puts_files_in_root() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        tree(src.path());
        let destination = out.path().join("code.zip");

        create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await
        .unwrap();

        assert_eq!(
            names(&destination),
            vec!["bootstrap", "src/lib.rs", "src/nested/mod.rs"]
        );

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("src/lib.rs")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        assert_eq!(content, "pub fn f() {}");
    }

    #[tokio::test]
    async fn prefix_nests_files() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        tree(src.path());
        let destination = out.path().join("code.zip");

        create_archive(
            vec![ArchiveSource::new(src.path(), "/app/")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await
        .unwrap();

        assert_eq!(
            names(&destination),
            vec!["app/bootstrap", "app/src/lib.rs", "app/src/nested/mod.rs"]
        );
    }

    #[tokio::test]
    async fn destination_inside_source_is_skipped() {
        let src = tempfile::tempdir().unwrap();
        tree(src.path());
        let destination = src.path().join("code.zip");

        // Leftover from a previous run gets replaced, not packed
        std::fs::write(&destination, b"stale").unwrap();

        create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await
        .unwrap();

        assert_eq!(
            names(&destination),
            vec!["bootstrap", "src/lib.rs", "src/nested/mod.rs"]
        );
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        tree(src.path());
        let events = Arc::new(Mutex::new(Vec::new()));
        let collected = events.clone();

        create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            out.path().join("code.zip"),
            Arc::new(move |event: ProgressEvent| collected.lock().unwrap().push(event)),
        )
        .await
        .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert_eq!(events.last(), Some(&ProgressEvent::new(3, 3)));
    }

    #[tokio::test]
    async fn missing_source_fails() {
        let out = tempfile::tempdir().unwrap();

        let result = create_archive(
            vec![ArchiveSource::new(out.path().join("missing"), "")],
            out.path().join("code.zip"),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unwritable_destination_fails() {
        let src = tempfile::tempdir().unwrap();
        tree(src.path());

        let result = create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            src.path().join("no/such/dir/code.zip"),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await;

        let error = result.unwrap_err();
        assert!(error.to_string().starts_with("Failed to create zip file"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executable_bit_is_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        tree(src.path());

        std::fs::set_permissions(
            src.path().join("bootstrap"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let destination = out.path().join("code.zip");

        create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await
        .unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mode = archive.by_name("bootstrap").unwrap().unix_mode().unwrap();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_kept_as_links() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("lib")).unwrap();
        std::fs::create_dir_all(src.path().join("bin")).unwrap();
        std::fs::write(src.path().join("lib/real.js"), b"module.exports = 1").unwrap();
        std::os::unix::fs::symlink("../lib/real.js", src.path().join("bin/tool")).unwrap();
        let destination = out.path().join("code.zip");

        create_archive(
            vec![ArchiveSource::new(src.path(), "")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await
        .unwrap();

        assert_eq!(names(&destination), vec!["bin/tool", "lib/real.js"]);

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mut link = archive.by_name("bin/tool").unwrap();
        assert!(link.is_symlink());

        let mut target = String::new();
        link.read_to_string(&mut target).unwrap();
        assert_eq!(target, "../lib/real.js");
    }

    #[tokio::test]
    async fn failed_run_keeps_previous_archive() {
        let out = tempfile::tempdir().unwrap();
        let destination = out.path().join("code.zip");
        std::fs::write(&destination, b"previous").unwrap();

        let result = create_archive(
            vec![ArchiveSource::new(out.path().join("missing"), "")],
            destination.clone(),
            Arc::new(|_: ProgressEvent| {}),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&destination).unwrap(), b"previous");

        // No leftovers next to the archive
        let files: Vec<_> = std::fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn entry_names_use_forward_slashes() {
        assert_eq!(entry_name("", Path::new("a/b.txt")), "a/b.txt");
        assert_eq!(entry_name("lib", Path::new("a/b.txt")), "lib/a/b.txt");
    }
}
