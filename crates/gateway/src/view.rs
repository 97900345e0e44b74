//! Page models built from backend listings.

use std::cmp::Ordering;

use protocol::{InfoData, ListEntry};
use time::OffsetDateTime;
use url::form_urlencoded;

/// One row of a directory page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Browser path of the entry, percent-encoded.
    pub path: String,
    pub is_file: bool,
    pub last_editor: String,
    pub last_edited: OffsetDateTime,
}

/// A directory page: subdirectories first, then files, each sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryView {
    pub current_path: String,
    /// Browser path of the parent directory.
    pub previous: String,
    pub dirs: Vec<DirEntry>,
    pub files: Vec<DirEntry>,
}

/// The page listing the backend's drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveListView {
    pub server: String,
    pub name: String,
    pub version: String,
    pub drives: Vec<DriveLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLink {
    pub name: String,
    pub path: String,
}

/// The login page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginView {
    pub error: Option<String>,
    pub redirect: Option<String>,
}

impl DirectoryView {
    /// Build the view for a listing of `current_path` (the browser path as
    /// requested, still percent-encoded).
    pub fn build(entries: &[ListEntry], current_path: &str) -> Self {
        let (mut files, mut dirs): (Vec<_>, Vec<_>) = entries
            .iter()
            .map(|entry| DirEntry {
                name: entry.name.clone(),
                path: join_url_path(current_path, &entry.name),
                is_file: entry.isfile,
                last_editor: entry.lasteditor.clone(),
                last_edited: OffsetDateTime::from_unix_timestamp(entry.lastedittime)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH),
            })
            .partition(|entry| entry.is_file);

        dirs.sort_by(|a, b| compare_names(&a.name, &b.name));
        files.sort_by(|a, b| compare_names(&a.name, &b.name));

        Self {
            current_path: current_path.to_string(),
            previous: parent_path(current_path),
            dirs,
            files,
        }
    }
}

impl DriveListView {
    /// Drives keep the order the backend reported them in.
    pub fn build(info: &InfoData, server: &str, drive_root: &str) -> Self {
        Self {
            server: server.to_string(),
            name: info.name.clone(),
            version: info.version.clone(),
            drives: info
                .drives
                .iter()
                .map(|name| DriveLink {
                    name: name.clone(),
                    path: join_url_path(drive_root, name),
                })
                .collect(),
        }
    }
}

/// Name ordering used on every listing.
///
/// Names compare case-insensitively first. Names equal up to case are then
/// ordered character by character with lowercase ahead of uppercase, so the
/// result is a total order: `apple < Apple < Banana < banana2`.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.chars().map(case_key).cmp(b.chars().map(case_key)))
}

fn case_key(c: char) -> (bool, char) {
    (!c.is_lowercase(), c)
}

/// Append one name to a browser path as an encoded segment.
pub fn join_url_path(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode_segment(name))
}

/// The parent of a browser path. The root is its own parent.
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

fn encode_segment(name: &str) -> String {
    // Form encoding escapes a literal '+' as %2B, so every remaining '+' is a space.
    form_urlencoded::byte_serialize(name.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, isfile: bool) -> ListEntry {
        ListEntry {
            name: name.to_string(),
            isfile,
            lasteditor: "alice".to_string(),
            lastedittime: 1_700_000_000,
        }
    }

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.sort_by(|a, b| compare_names(a, b));
        names
    }

    #[test]
    fn test_compare_names_ordering() {
        assert_eq!(
            sorted(&["Banana", "apple", "Apple", "banana2"]),
            vec!["apple", "Apple", "Banana", "banana2"]
        );
        assert_eq!(sorted(&["b", "A", "c"]), vec!["A", "b", "c"]);
        assert_eq!(compare_names("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_compare_names_is_antisymmetric() {
        let names = ["a", "A", "ab", "aB", "Ab", "AB", "b", "", "ä", "Ä", "a1"];
        for x in names {
            for y in names {
                assert_eq!(compare_names(x, y), compare_names(y, x).reverse(), "{x} vs {y}");
                assert_eq!(compare_names(x, y) == Ordering::Equal, x == y, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn test_build_partitions_and_sorts() {
        let entries = vec![
            entry("zeta.txt", true),
            entry("Docs", false),
            entry("alpha.txt", true),
            entry("archive", false),
        ];

        let view = DirectoryView::build(&entries, "/drive/home/work");

        let dirs: Vec<_> = view.dirs.iter().map(|e| e.name.as_str()).collect();
        let files: Vec<_> = view.files.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(dirs, vec!["archive", "Docs"]);
        assert_eq!(files, vec!["alpha.txt", "zeta.txt"]);
        assert_eq!(view.previous, "/drive/home");
        assert_eq!(view.files[0].path, "/drive/home/work/alpha.txt");
        assert_eq!(view.files[0].last_edited.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_build_is_deterministic() {
        let entries = vec![entry("b", true), entry("B", true), entry("a", false)];
        assert_eq!(
            DirectoryView::build(&entries, "/drive/x"),
            DirectoryView::build(&entries, "/drive/x")
        );
    }

    #[test]
    fn test_empty_listing() {
        let view = DirectoryView::build(&[], "/drive/home/");
        assert!(view.dirs.is_empty());
        assert!(view.files.is_empty());
        assert_eq!(view.previous, "/drive");
    }

    #[test]
    fn test_entry_paths_are_encoded() {
        assert_eq!(
            join_url_path("/drive/home/", "my notes+1.txt"),
            "/drive/home/my%20notes%2B1.txt"
        );
        assert_eq!(join_url_path("/drive", "a/b"), "/drive/a%2Fb");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/drive/home/docs"), "/drive/home");
        assert_eq!(parent_path("/drive/home/docs/"), "/drive/home");
        assert_eq!(parent_path("/drive"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(parent_path(""), "/");
    }

    #[test]
    fn test_drive_list_view() {
        let info = InfoData {
            name: "files".to_string(),
            version: "1.2.0".to_string(),
            drives: vec!["work".to_string(), "Home".to_string()],
        };

        let view = DriveListView::build(&info, "0.0.0.0:8443", "/drive/");

        assert_eq!(view.server, "0.0.0.0:8443");
        assert_eq!(
            view.drives,
            vec![
                DriveLink {
                    name: "work".to_string(),
                    path: "/drive/work".to_string()
                },
                DriveLink {
                    name: "Home".to_string(),
                    path: "/drive/Home".to_string()
                },
            ]
        );
    }
}
