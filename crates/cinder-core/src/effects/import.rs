//! Import effect — turn files and directories into ingestion entries.
//!
//! Tags come from lofty; a file without a title tag falls back to its stem
//! and a missing artist becomes "Local Device". Only audio extensions the
//! decoder understands are picked up.

use std::path::{Path, PathBuf};

use lofty::prelude::*;
use lofty::probe::Probe;

use crate::models::TrackEntry;

/// Artist shown for files without an artist tag.
pub const FALLBACK_ARTIST: &str = "Local Device";

/// Supported audio extensions.
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "wav", "opus", "aiff", "alac",
];

const MAX_SCAN_DEPTH: usize = 32;

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Build the entry for one file, or `None` if it is missing or not audio.
pub fn entry_for_file(path: &Path) -> Option<TrackEntry> {
    if !path.is_file() || !is_audio_file(path) {
        return None;
    }
    let locator = path.to_str()?.to_string();
    let (title, artist) = read_tags(path);
    Some(TrackEntry {
        title,
        artist,
        locator,
    })
}

/// Entries for a mix of files and directories, in the order given.
/// Directories are walked recursively, files sorted by path.
pub fn entries_for_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<TrackEntry> {
    let mut entries = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            entries.extend(scan_directory(path));
        } else if let Some(entry) = entry_for_file(path) {
            entries.push(entry);
        } else {
            log::warn!("cinder: skipping {}", path.display());
        }
    }
    entries
}

/// Every recognised audio file under `dir`.
pub fn scan_directory(dir: &Path) -> Vec<TrackEntry> {
    let mut files = Vec::new();
    collect_files(dir, 0, &mut files);
    files.sort();
    log::info!("cinder: found {} audio files in {}", files.len(), dir.display());
    files.iter().filter_map(|p| entry_for_file(p)).collect()
}

fn collect_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > MAX_SCAN_DEPTH {
        log::warn!("cinder: scan depth limit reached at {}", dir.display());
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cinder: cannot read {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        // Directory symlinks can loop.
        let is_symlink = std::fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if path.is_file() {
            if is_audio_file(&path) {
                out.push(path);
            }
        } else if path.is_dir() && !is_symlink {
            collect_files(&path, depth + 1, out);
        }
    }
}

fn read_tags(path: &Path) -> (String, String) {
    let fallback_title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string();

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(e) => {
            log::debug!("cinder: no tags in {}: {}", path.display(), e);
            return (fallback_title, FALLBACK_ARTIST.to_string());
        }
    };
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    let title = tag
        .and_then(|t| t.title().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_title);
    let artist = tag
        .and_then(|t| t.artist().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_ARTIST.to_string());
    (title, artist)
}
