use crate::models::{FileChange, FilesChanged, FilesChangedMode};

/// Line and file statistics derived from a commit's file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStats {
    pub lines_added: u32,
    pub lines_deleted: u32,
    pub files_changed: FilesChanged,
}

pub fn aggregate(files: &[FileChange], mode: FilesChangedMode) -> CommitStats {
    let lines_added = files.iter().fold(0u32, |acc, f| acc.saturating_add(f.additions));
    let lines_deleted = files.iter().fold(0u32, |acc, f| acc.saturating_add(f.deletions));

    let files_changed = match mode {
        FilesChangedMode::List => FilesChanged::Files(files.to_vec()),
        FilesChangedMode::Count => {
            FilesChanged::Count(u32::try_from(files.len()).unwrap_or(u32::MAX))
        }
    };

    CommitStats {
        lines_added,
        lines_deleted,
        files_changed,
    }
}
