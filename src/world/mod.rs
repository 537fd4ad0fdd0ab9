//! World reset: back up the world directories, rewrite `level-seed`, then
//! delete the worlds so the next start generates a fresh one.
//!
//! The backup and the seed rewrite must both succeed before anything is
//! deleted. Deletion itself is best-effort.

pub mod properties;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::supervisor::error::SupervisorError;
use properties::{ServerProperties, LEVEL_SEED_KEY};

/// World directories of a Paper/Spigot server, in processing order.
pub const WORLD_DIRS: [&str; 3] = ["world", "world_nether", "world_the_end"];
pub const BACKUP_PREFIX: &str = "world_backup_";
/// `yyyy-MM-dd_HH-mm-ss`
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// One world backup. Never modified or removed after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Timestamp id, with a `_N` suffix if an earlier backup took the same second
    pub id: String,
    pub root: PathBuf,
    /// World directories that existed and were copied
    pub copied: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteStats {
    pub removed: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReport {
    pub snapshot: WorldSnapshot,
    /// Seed written to the properties file (trimmed; empty means random)
    pub seed: String,
    /// World directories that existed and went through deletion
    pub deleted: Vec<String>,
    /// Entries that could not be removed
    pub delete_failures: usize,
}

/// Run the whole procedure. Blocking; call from a worker thread.
///
/// The caller checks that no server is running in `working_dir`.
pub fn reset_world(
    working_dir: &Path,
    properties_file: &Path,
    seed: &str,
) -> Result<ResetReport, SupervisorError> {
    tracing::info!("Resetting world in {}", working_dir.display());

    let snapshot = backup_worlds(working_dir, Local::now())?;
    let seed = rewrite_seed(properties_file, seed)?;

    let mut deleted = Vec::new();
    let mut delete_failures = 0;
    for name in WORLD_DIRS {
        let dir = working_dir.join(name);
        // links count too, dangling or not; delete_tree never follows them
        if fs::symlink_metadata(&dir).is_err() {
            continue;
        }
        let stats = delete_tree(&dir);
        tracing::info!("Deleted {} ({} entries, {} failures)", name, stats.removed, stats.failures);
        delete_failures += stats.failures;
        deleted.push(name.to_string());
    }

    if delete_failures > 0 {
        tracing::warn!("World reset finished with {} entries left behind", delete_failures);
    } else {
        tracing::info!("World reset complete, backup at {}", snapshot.root.display());
    }

    Ok(ResetReport {
        snapshot,
        seed,
        deleted,
        delete_failures,
    })
}

/// Copy every existing world directory into a new `world_backup_<timestamp>`
/// directory inside `working_dir`.
pub fn backup_worlds(working_dir: &Path, now: DateTime<Local>) -> Result<WorldSnapshot, SupervisorError> {
    let stamp = now.format(BACKUP_TIMESTAMP_FORMAT).to_string();
    let (id, root) = unique_backup_root(working_dir, &stamp);

    fs::create_dir_all(&root).map_err(|source| SupervisorError::BackupIo {
        path: root.clone(),
        source,
    })?;

    let mut copied = Vec::new();
    for name in WORLD_DIRS {
        let src = working_dir.join(name);
        if !src.is_dir() {
            tracing::debug!("No {} directory, skipping backup", name);
            continue;
        }
        let dst = root.join(name);
        copy_dir_all(&src, &dst).map_err(|source| SupervisorError::BackupIo {
            path: dst.clone(),
            source,
        })?;
        tracing::info!("Backed up {} to {}", name, dst.display());
        copied.push(name.to_string());
    }

    Ok(WorldSnapshot { id, root, copied })
}

/// `world_backup_<stamp>`, or `world_backup_<stamp>_2`, `_3`, … when taken.
fn unique_backup_root(working_dir: &Path, stamp: &str) -> (String, PathBuf) {
    let mut id = stamp.to_string();
    let mut n = 1;
    loop {
        let root = working_dir.join(format!("{}{}", BACKUP_PREFIX, id));
        if !root.exists() {
            return (id, root);
        }
        n += 1;
        id = format!("{}_{}", stamp, n);
    }
}

/// Set `level-seed` to the trimmed seed and write the file back.
pub fn rewrite_seed(properties_file: &Path, seed: &str) -> Result<String, SupervisorError> {
    let config_err = |source| SupervisorError::ConfigIo {
        path: properties_file.to_path_buf(),
        source,
    };
    let mut props = ServerProperties::load(properties_file).map_err(config_err)?;
    let seed = seed.trim().to_string();
    props.set(LEVEL_SEED_KEY, &seed);
    props.save(properties_file).map_err(config_err)?;
    tracing::info!(
        "Set {} to {} in {}",
        LEVEL_SEED_KEY,
        if seed.is_empty() { "<random>" } else { seed.as_str() },
        properties_file.display()
    );
    Ok(seed)
}

/// 디렉토리 전체 복사 헬퍼 (기존 파일은 덮어씀)
fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Delete `dir` and everything below it, files first, then directories,
/// deepest path first. Failures are logged and counted, never fatal.
///
/// When `dir` itself is a symlink only the link is removed; its target is
/// left alone.
pub fn delete_tree(dir: &Path) -> DeleteStats {
    let mut stats = DeleteStats::default();
    if fs::symlink_metadata(dir).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        match remove_link(dir) {
            Ok(()) => stats.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to delete link {}: {}", dir.display(), e);
                stats.failures += 1;
            }
        }
        return stats;
    }
    let mut files = Vec::new();
    let mut dirs = vec![dir.to_path_buf()];
    collect_entries(dir, &mut files, &mut dirs, &mut stats);

    // 역순 정렬 → 자식 경로가 부모보다 먼저 옴
    files.sort_unstable_by(|a, b| b.cmp(a));
    dirs.sort_unstable_by(|a, b| b.cmp(a));

    for file in &files {
        match fs::remove_file(file) {
            Ok(()) => stats.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}", file.display(), e);
                stats.failures += 1;
            }
        }
    }
    for d in &dirs {
        match fs::remove_dir(d) {
            Ok(()) => stats.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}", d.display(), e);
                stats.failures += 1;
            }
        }
    }
    stats
}

/// Windows directory links are removed as directories.
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link).or_else(|e| {
        if cfg!(windows) {
            fs::remove_dir(link)
        } else {
            Err(e)
        }
    })
}

fn collect_entries(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>, stats: &mut DeleteStats) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to list {}: {}", dir.display(), e);
            stats.failures += 1;
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to read entry in {}: {}", dir.display(), e);
                stats.failures += 1;
                continue;
            }
        };
        let path = entry.path();
        // symlink은 따라가지 않고 링크 자체만 삭제
        match entry.file_type() {
            Ok(ty) if ty.is_dir() => {
                collect_entries(&path, files, dirs, stats);
                dirs.push(path);
            }
            _ => files.push(path),
        }
    }
}
