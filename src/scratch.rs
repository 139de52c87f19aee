//! Optional scratch copy of the working directory for I/O locality.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

use crate::error::SupervisorError;

/// Link left in the original directory while a scratch copy is active, so
/// output can be inspected mid-run.
pub const SCRATCH_LINK: &str = "scratch_link";

/// A temporary copy of the working directory under a scratch root.
///
/// Created with [`ScratchSpace::enter`]; results are copied back and the
/// copy removed by [`ScratchSpace::leave`]. If a `ScratchSpace` is dropped
/// without `leave`, the copy is removed and nothing is copied back.
#[derive(Debug)]
pub struct ScratchSpace {
    origin: PathBuf,
    temp: TempDir,
}

impl ScratchSpace {
    pub fn enter(root: &Path, origin: &Path) -> Result<Self, SupervisorError> {
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        let origin = fs::canonicalize(origin)?;
        let temp = tempfile::Builder::new()
            .prefix("custodian.")
            .tempdir_in(&root)?;
        copy_tree(&origin, temp.path())?;

        let link = origin.join(SCRATCH_LINK);
        remove_link(&link)?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(temp.path(), &link)?;

        info!(
            origin = %origin.display(),
            scratch = %temp.path().display(),
            "running in scratch directory"
        );
        Ok(Self { origin, temp })
    }

    /// The directory jobs and handlers should work in.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Copy everything back to the original directory and remove the copy.
    pub fn leave(self) -> Result<(), SupervisorError> {
        copy_tree(self.temp.path(), &self.origin)?;
        remove_link(&self.origin.join(SCRATCH_LINK))?;
        info!(origin = %self.origin.display(), "copied scratch results back");
        self.temp.close()?;
        Ok(())
    }
}

fn remove_link(link: &Path) -> std::io::Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    Ok(())
}

/// Copy the contents of `src` into `dst`, overwriting existing files. The
/// scratch link and `dst` itself (when nested inside `src`) are skipped.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), SupervisorError> {
    let nested = dst.starts_with(src);
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|e| {
        !(e.depth() == 1 && e.file_name() == SCRATCH_LINK) && !(nested && e.path().starts_with(dst))
    });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            #[cfg(unix)]
            {
                let link_target = fs::read_link(entry.path())?;
                remove_link(&target)?;
                std::os::unix::fs::symlink(link_target, &target)?;
            }
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
