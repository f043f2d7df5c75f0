//! Path aliases, lexical normalization and screenshot baseline locations.
//!
//! All paths handled by the harness are plain strings with `/` separators.
//! Derivations are string transforms; nothing here touches the filesystem.

use std::path::{Path, PathBuf};

use crate::config::{
    Config, LOCAL_BASELINE_FOLDER, OFFICIAL_BASELINE_FOLDER, SCREENSHOTS_FOLDER,
};

/// Alias for the per-user writable folder
pub const USER_ALIAS: &str = "@user@";

/// Alias for the source asset root
pub const DEVASSETS_ALIAS: &str = "@devassets@";

const SCREENSHOTS_SEGMENT: &str = "scripts/screenshots";
const EXPECTED_SCREENSHOTS_SEGMENT: &str = "scripts/expectedscreenshots";

/// Normalize a path lexically.
///
/// Backslashes become `/`, repeated separators collapse, `.` segments are
/// dropped and `..` removes the preceding normal segment. A `..` with nothing
/// to remove is kept. The result never ends with `/` unless it is the root.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." && !is_drive(last) => {
                    segments.pop();
                }
                _ if absolute && segments.is_empty() => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() && !unified.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn is_drive(segment: &str) -> bool {
    segment.len() == 2 && segment.ends_with(':')
}

/// Returns true if `file` is lexically inside `folder` (case-insensitive).
pub fn is_file_under_folder(file: &str, folder: &str) -> bool {
    let file = normalize_path(file).to_lowercase();
    let folder = normalize_path(folder).to_lowercase();

    if folder == "/" {
        return file.starts_with('/') && file.len() > 1;
    }
    match file.strip_prefix(&folder) {
        Some(rest) => rest.starts_with('/') && rest.len() > 1,
        None => false,
    }
}

/// Replace the first occurrence of `from` in `path`, returning `None` when absent
fn replace_first(path: &str, from: &str, to: &str) -> Option<String> {
    path.find(from)
        .map(|idx| format!("{}{}{}", &path[..idx], to, &path[idx + from.len()..]))
}

/// Expands `@user@` and `@devassets@` prefixes into configured directories
#[derive(Debug, Clone)]
pub struct PathResolver {
    user_dir: String,
    devassets_dir: String,
}

impl PathResolver {
    /// Create a resolver for the two alias roots
    pub fn new(user_dir: impl AsRef<Path>, devassets_dir: impl AsRef<Path>) -> Self {
        Self {
            user_dir: normalize_path(&user_dir.as_ref().to_string_lossy()),
            devassets_dir: normalize_path(&devassets_dir.as_ref().to_string_lossy()),
        }
    }

    /// Create a resolver from the configured folder layout
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.paths.user_dir, &config.paths.devassets_dir)
    }

    /// The resolved `@user@` directory
    pub fn user_dir(&self) -> &str {
        &self.user_dir
    }

    /// The resolved `@devassets@` directory
    pub fn devassets_dir(&self) -> &str {
        &self.devassets_dir
    }

    /// Expand a leading alias and normalize the result
    pub fn resolve(&self, path: &str) -> String {
        let expanded = if let Some(rest) = strip_alias(path, USER_ALIAS) {
            format!("{}/{}", self.user_dir, rest)
        } else if let Some(rest) = strip_alias(path, DEVASSETS_ALIAS) {
            format!("{}/{}", self.devassets_dir, rest)
        } else {
            path.to_string()
        };
        normalize_path(&expanded)
    }

    /// Resolve into a filesystem path
    pub fn resolve_path_buf(&self, path: &str) -> PathBuf {
        PathBuf::from(self.resolve(path))
    }
}

fn strip_alias<'a>(path: &'a str, alias: &str) -> Option<&'a str> {
    let head = path.get(..alias.len())?;
    if head.eq_ignore_ascii_case(alias) {
        Some(&path[alias.len()..])
    } else {
        None
    }
}

/// Screenshot, local baseline and official baseline locations
#[derive(Debug, Clone)]
pub struct ScreenshotPaths {
    resolver: PathResolver,
    render_api: String,
}

impl ScreenshotPaths {
    pub fn new(resolver: PathResolver, render_api: impl Into<String>) -> Self {
        Self {
            resolver,
            render_api: render_api.into(),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn render_api(&self) -> &str {
        &self.render_api
    }

    /// Folder every capture must land in
    pub fn screenshots_folder(&self, resolve: bool) -> String {
        if resolve {
            self.resolver.resolve(SCREENSHOTS_FOLDER)
        } else {
            SCREENSHOTS_FOLDER.to_string()
        }
    }

    /// Folder holding this machine's previous captures for the active render API
    pub fn local_baseline_folder(&self, resolve: bool) -> String {
        let path = format!("{}/{}", LOCAL_BASELINE_FOLDER, self.render_api);
        if resolve {
            self.resolver.resolve(&path)
        } else {
            path
        }
    }

    /// Folder holding checked-in expected screenshots
    pub fn official_baseline_folder(&self, resolve: bool) -> String {
        if resolve {
            self.resolver
                .resolve(&format!("{}/{}", DEVASSETS_ALIAS, OFFICIAL_BASELINE_FOLDER))
        } else {
            OFFICIAL_BASELINE_FOLDER.to_string()
        }
    }

    /// Local baseline for a captured screenshot, or an empty string when the
    /// path does not contain the screenshots segment
    pub fn local_baseline_for(&self, screenshot: &str) -> String {
        let folder = self.local_baseline_folder(false);
        let relative_folder = folder
            .strip_prefix(&format!("{}/", USER_ALIAS))
            .unwrap_or(&folder);
        replace_first(&normalize_path(screenshot), SCREENSHOTS_SEGMENT, relative_folder)
            .unwrap_or_default()
    }

    /// Official baseline for a captured screenshot, or an empty string when the
    /// screenshot is not under the user folder or the screenshots segment
    pub fn official_baseline_for(&self, screenshot: &str) -> String {
        let screenshot = normalize_path(screenshot);
        let Some(relative) = replace_first(&screenshot, self.resolver.user_dir(), "") else {
            return String::new();
        };
        let Some(relative) =
            replace_first(&relative, SCREENSHOTS_SEGMENT, EXPECTED_SCREENSHOTS_SEGMENT)
        else {
            return String::new();
        };
        let relative = relative.trim_start_matches('/');
        self.resolver.resolve(&format!("{}/{}", DEVASSETS_ALIAS, relative))
    }
}
