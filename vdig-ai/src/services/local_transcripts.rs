//! Lookup of transcripts already present in a workspace

use std::path::{Path, PathBuf};

use crate::models::Transcript;

/// Characters not allowed in file names on common filesystems
const FORBIDDEN: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Make a title usable as a file or directory name
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Where remote and ASR transcripts are saved
pub fn transcript_path(workspace_dir: &Path, title: &str) -> PathBuf {
    let name = sanitize_title(title);
    workspace_dir.join(&name).join(format!("{}.srt", name))
}

/// `{title}.srt` or `{title}_{suffix}.srt`, e.g. a language tag
fn stem_matches(stem: &str, title: &str) -> bool {
    stem.strip_prefix(title)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
}

fn srt_candidates(dir: &Path, title: &str) -> std::io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_srt = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("srt"));
        let matches_title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| stem_matches(s, title));
        if is_srt && matches_title && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// First `.srt` file for `title`, searching the video directory then the workspace root
pub fn find_transcript(workspace_dir: &Path, title: &str) -> std::io::Result<Option<PathBuf>> {
    let name = sanitize_title(title);
    for dir in [workspace_dir.join(&name), workspace_dir.to_path_buf()] {
        if let Some(path) = srt_candidates(&dir, &name)?.into_iter().next() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Read and parse an SRT file
pub fn load_transcript(path: &Path) -> std::io::Result<Transcript> {
    let content = std::fs::read_to_string(path)?;
    Transcript::from_srt(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Save a transcript as SRT, creating the video directory
pub fn save_transcript(
    workspace_dir: &Path,
    title: &str,
    transcript: &Transcript,
) -> std::io::Result<PathBuf> {
    let path = transcript_path(workspace_dir, title);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, transcript.to_srt())?;
    Ok(path)
}
