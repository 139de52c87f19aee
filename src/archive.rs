//! Archives around the working directory: numbered backups taken before a
//! correction rewrites files, checkpoints taken after a job advances, and
//! the optional gzip pass over final outputs.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use glob::Pattern;
use tar::{Archive, Builder, Header};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::SupervisorError;
use crate::scratch::SCRATCH_LINK;
use crate::state_machine::RunState;

/// Default prefix for backups taken before a correction.
pub const BACKUP_PREFIX: &str = "error";

/// Checkpoints are named `custodian.chk.<completed jobs>.tar.gz`.
pub const CHECKPOINT_PREFIX: &str = "custodian.chk";

/// Archive member holding the serialized run state.
pub const STATE_FILE: &str = "custodian.state.json";

/// Archive the files in `directory` matching any of `patterns` into the next
/// free `<prefix>.<N>.tar.gz`.
///
/// Both `<prefix>.<N>.tar.gz` and `<prefix>.<N>.tar` count as taken, so a
/// pipeline restarted on an old directory never clobbers earlier backups.
/// Members are stored as `<prefix>.<N>/<file name>`. Patterns use shell
/// syntax (`*`, `?`, `[...]`); an invalid one is a configuration error.
pub fn backup<S: AsRef<str>>(
    patterns: &[S],
    prefix: &str,
    directory: &Path,
) -> Result<PathBuf, SupervisorError> {
    let patterns = compile_patterns(patterns)?;
    let index = next_backup_index(prefix, directory)?;
    let stem = format!("{prefix}.{index}");
    let files = matching_files(directory, &patterns)?;

    let path = directory.join(format!("{stem}.tar.gz"));
    info!(path = %path.display(), files = files.len(), "backing up run");

    let mut builder = Builder::new(GzEncoder::new(File::create(&path)?, Compression::default()));
    for name in &files {
        builder.append_path_with_name(directory.join(name), Path::new(&stem).join(name))?;
    }
    builder.into_inner()?.finish()?;
    Ok(path)
}

/// One past the highest backup number already present for `prefix`.
pub fn next_backup_index(prefix: &str, directory: &Path) -> io::Result<u32> {
    let lead = format!("{prefix}.");
    let mut highest = 0;
    for entry in fs::read_dir(directory)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&lead) else {
            continue;
        };
        let number = rest
            .strip_suffix(".tar.gz")
            .or_else(|| rest.strip_suffix(".tar"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(number) = number {
            highest = highest.max(number);
        }
    }
    Ok(highest + 1)
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>, SupervisorError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p.as_ref())
                .map_err(|e| SupervisorError::Config(format!("invalid backup pattern {:?}: {e}", p.as_ref())))
        })
        .collect()
}

fn matching_files(directory: &Path, patterns: &[Pattern]) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if patterns.iter().any(|p| p.matches(&name)) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

fn checkpoint_index(name: &OsStr) -> Option<usize> {
    name.to_str()?
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(".tar.gz")?
        .parse()
        .ok()
}

fn excluded_from_checkpoint(name: &OsStr) -> bool {
    name == SCRATCH_LINK || name == STATE_FILE || checkpoint_index(name).is_some()
}

/// The most recent checkpoint in `directory`, if any.
pub fn latest_checkpoint(directory: &Path) -> io::Result<Option<(usize, PathBuf)>> {
    let mut latest: Option<(usize, PathBuf)> = None;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if let Some(index) = checkpoint_index(&entry.file_name())
            && latest.as_ref().is_none_or(|(best, _)| index > *best)
        {
            latest = Some((index, entry.path()));
        }
    }
    Ok(latest)
}

pub fn delete_checkpoints(directory: &Path) -> io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if checkpoint_index(&entry.file_name()).is_some() {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Snapshot `source` plus the run state into a checkpoint under
/// `destination`, replacing any older checkpoint there.
pub fn save_checkpoint(
    destination: &Path,
    source: &Path,
    state: &RunState,
) -> Result<PathBuf, SupervisorError> {
    delete_checkpoints(destination)?;
    let path = destination.join(format!(
        "{CHECKPOINT_PREFIX}.{}.tar.gz",
        state.completed_jobs
    ));

    let mut builder = Builder::new(GzEncoder::new(File::create(&path)?, Compression::new(3)));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !excluded_from_checkpoint(e.file_name()));
    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| SupervisorError::Checkpoint(e.to_string()))?;
        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), relative)?;
        }
    }

    let state_json = serde_json::to_vec_pretty(state)?;
    let mut header = Header::new_gnu();
    header.set_size(state_json.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder.append_data(&mut header, STATE_FILE, state_json.as_slice())?;
    builder.into_inner()?.finish()?;

    info!(path = %path.display(), "checkpoint written");
    Ok(path)
}

/// Unpack the most recent checkpoint into `directory` and return the run
/// state stored with it. Members that would land outside `directory` are
/// skipped by the unpacker.
pub fn restore_checkpoint(directory: &Path) -> Result<Option<RunState>, SupervisorError> {
    let Some((index, path)) = latest_checkpoint(directory)? else {
        return Ok(None);
    };
    info!(path = %path.display(), "loading from checkpoint");

    let mut archive = Archive::new(GzDecoder::new(File::open(&path)?));
    archive.unpack(directory)?;

    let state_path = directory.join(STATE_FILE);
    if !state_path.exists() {
        return Err(SupervisorError::Checkpoint(format!(
            "{} holds no run state",
            path.display()
        )));
    }
    let state: RunState = serde_json::from_reader(BufReader::new(File::open(&state_path)?))?;
    fs::remove_file(&state_path)?;

    if state.completed_jobs != index {
        warn!(
            archive_index = index,
            completed_jobs = state.completed_jobs,
            "checkpoint name and run state disagree; trusting run state"
        );
    }
    Ok(Some(state))
}

/// Replace every regular file in `directory` (not recursive) by a gzipped
/// copy, skipping files that are already `.gz`. Returns how many files were
/// compressed.
pub fn gzip_dir(directory: &Path) -> Result<usize, SupervisorError> {
    let mut compressed = 0;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "gz") {
            continue;
        }

        let mut target = path.clone().into_os_string();
        target.push(".gz");
        let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
        io::copy(&mut File::open(&path)?, &mut encoder)?;
        encoder.finish()?;
        fs::remove_file(&path)?;
        compressed += 1;
    }
    Ok(compressed)
}
