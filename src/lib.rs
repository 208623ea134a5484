use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Core library functions used by `main` and by tests.

/// Bold ANSI codes for terminal output
const BOLD_START: &str = "\x1b[1;34m";
const BOLD_END: &str = "\x1b[0m";

/// Bucket size for the date-stamped destination subdirectories.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
    Yearly,
}

impl Granularity {
    /// strftime-style layout of the destination subpath for this bucket size.
    fn date_format(self) -> &'static str {
        match self {
            Granularity::Daily => "%Y/%m/%d",
            Granularity::Monthly => "%Y/%m",
            Granularity::Yearly => "%Y",
        }
    }
}

/// Options for one sorting run. Built once from the command line and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub granularity: Granularity,
    pub ignore_dirs: bool,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub copy: bool,
    pub force: bool,
    pub dry_run: bool,
}

/// What is about to happen to one entry, as reported through the progress
/// callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Action {
    Move,
    Copy,
}

impl Action {
    pub fn verb(self) -> &'static str {
        match self {
            Action::Move => "Moving",
            Action::Copy => "Copying",
        }
    }
}

/// One entry of the source listing, captured with the single metadata query
/// the enumeration pass performs per entry.
#[derive(Debug, Clone)]
struct SourceEntry {
    path: PathBuf,
    modified: SystemTime,
    is_dir: bool,
}

/// Public API: run the sort, reporting progress on stdout.
pub fn run(config: &Config) -> Result<()> {
    if config.dry_run {
        let mut planned: Vec<(PathBuf, String)> = Vec::new();
        sort_entries(config, &mut |_, name, dest_dir| {
            planned.push((dest_dir.to_path_buf(), name.to_string_lossy().into_owned()));
        })?;

        if planned.is_empty() {
            println!("Nothing to relocate.");
        } else {
            print_dry_run_preview(&config.destination, &planned);
        }
        Ok(())
    } else {
        sort_entries(config, &mut |action, name, dest_dir| {
            println!(
                "{} {} to {}",
                action.verb(),
                name.to_string_lossy(),
                dest_dir.display()
            );
        })
    }
}

/// Enumerate the immediate children of the source directory and relocate
/// each of them into its date bucket. The callback fires once per planned
/// relocation, before the filesystem is touched for that entry.
pub fn sort_entries(config: &Config, notify: &mut dyn FnMut(Action, &OsStr, &Path)) -> Result<()> {
    let source = config.source.as_path();
    if !source.exists() {
        return Err(anyhow!("Source '{}' does not exist", source.display()));
    }
    if !source.is_dir() {
        return Err(anyhow!("Source '{}' is not a directory", source.display()));
    }

    // Snapshot the listing up front so directories created under the
    // destination mid-run can never show up as new entries of this run.
    let listing: Vec<fs::DirEntry> = fs::read_dir(source)
        .with_context(|| format!("Failed to read directory {}", source.display()))?
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("Failed listing entries of {}", source.display()))?;

    for entry in listing {
        // A single metadata query covers both the timestamp and the
        // file/directory classification.
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let modified = metadata
            .modified()
            .with_context(|| format!("No modification time for {}", entry.path().display()))?;
        let item = SourceEntry {
            path: entry.path(),
            modified,
            is_dir: metadata.is_dir(),
        };

        if item.is_dir && config.ignore_dirs {
            continue;
        }

        let dest_dir = config
            .destination
            .join(date_subpath(config.granularity, item.modified));
        relocate(&item, &dest_dir, config, notify)?;
    }

    Ok(())
}

/// Destination subpath for one modification time, e.g. `2023/07/04` at daily
/// granularity. Rendered in local time.
fn date_subpath(granularity: Granularity, modified: SystemTime) -> PathBuf {
    let stamp: DateTime<Local> = modified.into();
    let rendered = stamp.format(granularity.date_format()).to_string();
    rendered.split('/').collect()
}

/// Move or copy a single entry into `dest_dir`, creating the date bucket on
/// demand. Every entry ends up exactly one of moved, copied, or refused with
/// an error.
fn relocate(
    entry: &SourceEntry,
    dest_dir: &Path,
    config: &Config,
    notify: &mut dyn FnMut(Action, &OsStr, &Path),
) -> Result<()> {
    let name = entry
        .path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid filename for {}", entry.path.display()))?;
    let action = if config.copy { Action::Copy } else { Action::Move };

    notify(action, name, dest_dir);

    if config.dry_run {
        return Ok(());
    }

    // The existence probe costs one extra stat per entry.
    if dest_dir.exists() {
        if !dest_dir.is_dir() {
            return Err(anyhow!(
                "Destination path {} exists and is not a directory",
                dest_dir.display()
            ));
        }
    } else {
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;
    }

    let target = dest_dir.join(name);
    if target.exists() {
        if !config.force {
            return Err(anyhow!(
                "Destination {} already exists (use --force to overwrite)",
                target.display()
            ));
        }
        remove_existing(&target)?;
    }

    match action {
        Action::Copy if entry.is_dir => copy_tree(&entry.path, &target),
        Action::Copy => copy_file(&entry.path, &target, entry.modified),
        Action::Move => move_entry(entry, &target),
    }
}

fn remove_existing(target: &Path) -> Result<()> {
    if target.is_dir() {
        fs::remove_dir_all(target).with_context(|| {
            format!(
                "Failed removing existing destination directory {}",
                target.display()
            )
        })
    } else {
        fs::remove_file(target).with_context(|| {
            format!(
                "Failed removing existing destination file {}",
                target.display()
            )
        })
    }
}

/// Rename the entry into place, falling back to copy + delete when rename
/// fails (typically a cross-device destination).
fn move_entry(entry: &SourceEntry, target: &Path) -> Result<()> {
    match fs::rename(&entry.path, target) {
        Ok(()) => Ok(()),
        Err(rename_err) if entry.is_dir => {
            copy_tree(&entry.path, target).with_context(|| {
                format!(
                    "Failed copying {} to {}: {}",
                    entry.path.display(),
                    target.display(),
                    rename_err
                )
            })?;
            fs::remove_dir_all(&entry.path).with_context(|| {
                format!(
                    "Failed removing original directory {}",
                    entry.path.display()
                )
            })
        }
        Err(rename_err) => {
            copy_file(&entry.path, target, entry.modified).with_context(|| {
                format!(
                    "Failed copying {} to {}: {}",
                    entry.path.display(),
                    target.display(),
                    rename_err
                )
            })?;
            fs::remove_file(&entry.path)
                .with_context(|| format!("Failed removing original file {}", entry.path.display()))
        }
    }
}

/// Byte copy of a single file, keeping permissions and the modification
/// timestamp. The source is left untouched.
fn copy_file(src: &Path, target: &Path, modified: SystemTime) -> Result<()> {
    fs::copy(src, target)
        .with_context(|| format!("Failed copying {} to {}", src.display(), target.display()))?;

    // fs::copy carries permissions over but not timestamps.
    let copied = fs::File::options()
        .write(true)
        .open(target)
        .with_context(|| format!("Failed reopening {}", target.display()))?;
    copied
        .set_modified(modified)
        .with_context(|| format!("Failed setting modification time on {}", target.display()))?;
    Ok(())
}

/// Recursive deep copy of a directory. Symbolic links are recreated as links
/// rather than followed; file timestamps travel with their files.
fn copy_tree(src: &Path, target: &Path) -> Result<()> {
    let src_meta =
        fs::metadata(src).with_context(|| format!("Failed to stat {}", src.display()))?;
    fs::create_dir_all(target)
        .with_context(|| format!("Failed to create directory {}", target.display()))?;

    let listing =
        fs::read_dir(src).with_context(|| format!("Failed to read directory {}", src.display()))?;
    for entry in listing {
        let entry = entry.with_context(|| format!("Failed listing entries of {}", src.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let child_target = target.join(entry.file_name());

        if file_type.is_dir() {
            copy_tree(&entry.path(), &child_target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &child_target)?;
        } else {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            copy_file(&entry.path(), &child_target, modified)?;
        }
    }

    // Restore the directory timestamp last; the writes above keep bumping it.
    // Skipped quietly where the platform can't reopen a directory handle.
    if let Ok(modified) = src_meta.modified() {
        if let Ok(dir) = fs::File::open(target) {
            let _ = dir.set_modified(modified);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(src)
        .with_context(|| format!("Failed to read link {}", src.display()))?;
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("Failed to link {} -> {}", target.display(), link.display()))?;
    Ok(())
}

#[cfg(windows)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(src)
        .with_context(|| format!("Failed to read link {}", src.display()))?;
    // metadata() follows the link; a dangling target is linked as a file.
    let links_to_dir = src.metadata().map(|m| m.is_dir()).unwrap_or(false);
    let made = if links_to_dir {
        std::os::windows::fs::symlink_dir(&link, target)
    } else {
        std::os::windows::fs::symlink_file(&link, target)
    };
    made.with_context(|| format!("Failed to link {} -> {}", target.display(), link.display()))?;
    Ok(())
}

/// Print the planned relocations as a tree grouped by date bucket, with a
/// short summary. Folder labels are shown relative to the destination root.
pub fn print_dry_run_preview(destination: &Path, planned: &[(PathBuf, String)]) {
    let mut folders: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (dest_dir, name) in planned {
        let label = dest_dir
            .strip_prefix(destination)
            .unwrap_or(dest_dir)
            .to_string_lossy()
            .to_string();
        folders.entry(label).or_default().push(name.clone());
    }

    println!(".");
    let total_folders = folders.len();

    for (i, (folder, names)) in folders.iter().enumerate() {
        let is_last_folder = i + 1 == total_folders;
        let prefix_folder = if is_last_folder {
            "└── "
        } else {
            "├── "
        };

        // Wrap folder name in bold ANSI codes
        println!("{}{}{}{}", prefix_folder, BOLD_START, folder, BOLD_END);

        let mut names = names.clone();
        names.sort();
        let last_name_idx = names.len().saturating_sub(1);

        for (j, name) in names.into_iter().enumerate() {
            let prefix_file = if j == last_name_idx {
                if is_last_folder {
                    "    └── "
                } else {
                    "│   └── "
                }
            } else {
                if is_last_folder {
                    "    ├── "
                } else {
                    "│   ├── "
                }
            };
            println!("{}{}", prefix_file, name);
        }
    }

    println!("\nSummary:");
    println!("  Total folders: {}", total_folders);
    let total_entries: usize = folders.values().map(|v| v.len()).sum();
    println!("  Total entries: {}", total_entries);
    println!("  Mode:          dry-run (no changes made)");
}
