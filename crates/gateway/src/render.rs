//! HTML rendering of the gateway pages.
//!
//! Pages are small and fixed, so they are assembled with `format!` around a
//! shared layout. Every interpolated value goes through [`escape`].

use std::fmt::Write;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::view::{DirEntry, DirectoryView, DriveListView, LoginView};

const STYLE: &str = "body{font-family:sans-serif;margin:2em auto;max-width:56em;padding:0 1em}\
table{border-collapse:collapse;width:100%}\
td,th{padding:.3em .6em;text-align:left;border-bottom:1px solid #ddd}\
.error{color:#b00020}\
nav{margin-bottom:1em}";

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape(title),
        STYLE,
        body
    )
}

fn timestamp(when: &OffsetDateTime) -> String {
    when.format(&Rfc3339)
        .unwrap_or_else(|_| when.unix_timestamp().to_string())
}

pub fn drive_list_page(view: &DriveListView) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<nav><a href=\"/logout\">Log out</a></nav>\n<h1>{}</h1>\n<p>{} &middot; version {}</p>",
        escape(&view.name),
        escape(&view.server),
        escape(&view.version)
    );

    if view.drives.is_empty() {
        body.push_str("<p>No drives available.</p>\n");
    } else {
        body.push_str("<ul>\n");
        for drive in &view.drives {
            let _ = writeln!(
                body,
                "<li><a href=\"{}\">{}</a></li>",
                escape(&drive.path),
                escape(&drive.name)
            );
        }
        body.push_str("</ul>\n");
    }

    layout(&format!("{} drives", view.name), &body)
}

fn entry_row(body: &mut String, entry: &DirEntry) {
    let label = if entry.is_file {
        escape(&entry.name)
    } else {
        format!("{}/", escape(&entry.name))
    };
    let _ = writeln!(
        body,
        "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
        escape(&entry.path),
        label,
        escape(&entry.last_editor),
        timestamp(&entry.last_edited)
    );
}

pub fn directory_page(view: &DirectoryView) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<nav><a href=\"{}\">Up</a> &middot; <a href=\"/drive/\">Drives</a> &middot; \
<a href=\"/logout\">Log out</a></nav>\n<h1>{}</h1>",
        escape(&view.previous),
        escape(&view.current_path)
    );

    if view.dirs.is_empty() && view.files.is_empty() {
        body.push_str("<p>This directory is empty.</p>\n");
    } else {
        body.push_str(
            "<table>\n<tr><th>Name</th><th>Last editor</th><th>Last edited</th></tr>\n",
        );
        for entry in view.dirs.iter().chain(&view.files) {
            entry_row(&mut body, entry);
        }
        body.push_str("</table>\n");
    }

    layout(&view.current_path, &body)
}

pub fn login_page(view: &LoginView) -> String {
    let mut body = String::from("<h1>Log in</h1>\n");
    if let Some(error) = view.error.as_deref().filter(|e| !e.is_empty()) {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
    }

    let action = match view.redirect.as_deref().filter(|r| !r.is_empty()) {
        Some(redirect) => crate::interpret::login_redirect(redirect, None),
        None => crate::interpret::LOGIN_PATH.to_string(),
    };
    let _ = writeln!(
        body,
        "<form method=\"post\" action=\"{}\">\n\
<p><label>Username <input name=\"username\" autocomplete=\"username\" required></label></p>\n\
<p><label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\" required></label></p>\n\
<p><button type=\"submit\">Log in</button></p>\n</form>",
        escape(&action)
    );

    layout("Log in", &body)
}

/// Plain error page used for failures shown to the browser.
pub fn error_page(status: u16, message: &str) -> String {
    layout(
        "Error",
        &format!(
            "<h1>{}</h1>\n<p class=\"error\">{}</p>\n<p><a href=\"/drive/\">Back to drives</a></p>\n",
            status,
            escape(message)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::DriveLink;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_drive_list_shows_drives_and_version() {
        let view = DriveListView {
            server: "gw.local:8443".to_string(),
            name: "srv".to_string(),
            version: "1.0".to_string(),
            drives: vec![
                DriveLink {
                    name: "a".to_string(),
                    path: "/drive/a".to_string(),
                },
                DriveLink {
                    name: "b".to_string(),
                    path: "/drive/b".to_string(),
                },
            ],
        };

        let html = drive_list_page(&view);
        assert!(html.contains("<a href=\"/drive/a\">a</a>"));
        assert!(html.contains("<a href=\"/drive/b\">b</a>"));
        assert!(html.contains("version 1.0"));
        assert!(html.contains("gw.local:8443"));
    }

    #[test]
    fn test_directory_page_lists_dirs_before_files() {
        let when = OffsetDateTime::from_unix_timestamp(0).unwrap();
        let entry = |name: &str, is_file: bool| DirEntry {
            name: name.to_string(),
            path: format!("/drive/d/{}", name),
            is_file,
            last_editor: "<bob>".to_string(),
            last_edited: when,
        };
        let view = DirectoryView {
            current_path: "/drive/d".to_string(),
            previous: "/drive".to_string(),
            dirs: vec![entry("sub", false)],
            files: vec![entry("a.txt", true)],
        };

        let html = directory_page(&view);
        let dir_at = html.find("sub/").unwrap();
        let file_at = html.find("a.txt").unwrap();
        assert!(dir_at < file_at);
        assert!(html.contains("&lt;bob&gt;"));
        assert!(html.contains("1970-01-01T00:00:00Z"));
        assert!(html.contains("<a href=\"/drive\">Up</a>"));
    }

    #[test]
    fn test_empty_directory() {
        let view = DirectoryView {
            current_path: "/drive/d".to_string(),
            previous: "/drive".to_string(),
            dirs: vec![],
            files: vec![],
        };
        assert!(directory_page(&view).contains("This directory is empty."));
    }

    #[test]
    fn test_login_page_carries_error_and_redirect() {
        let html = login_page(&LoginView {
            error: Some("bad <password>".to_string()),
            redirect: Some("/drive/home".to_string()),
        });

        assert!(html.contains("bad &lt;password&gt;"));
        assert!(html.contains("action=\"/login?redirect=%2Fdrive%2Fhome\""));
    }

    #[test]
    fn test_login_page_without_query() {
        let html = login_page(&LoginView::default());
        assert!(html.contains("action=\"/login\""));
        assert!(!html.contains("class=\"error\""));
    }
}
