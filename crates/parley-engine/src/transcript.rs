//! Markdown export of the conversation log.

use crate::message::{Message, Role};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Render `messages` as a Markdown document.
pub fn render_markdown(
    messages: &[Message],
    user_id: Option<&str>,
    exported_at: DateTime<Utc>,
) -> String {
    let mut content = String::new();
    content.push_str("# Parley Transcript\n\n");
    let _ = writeln!(
        content,
        "Exported: {}",
        exported_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(user_id) = user_id {
        let _ = writeln!(content, "User ID: {user_id}");
    }
    content.push_str("\n---\n\n");

    if messages.is_empty() {
        content.push_str("_No messages._\n");
        return content;
    }

    for msg in messages {
        let heading = match msg.role {
            Role::User => "**You**",
            Role::Assistant => "**AI**",
        };
        let _ = write!(content, "### {heading}\n\n");
        content.push_str(&msg.content);
        content.push_str("\n\n");
    }
    content
}

/// File name for an export taken at `at` (`parley-YYYYMMDD-HHMMSS.md`).
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("parley-{}.md", at.format("%Y%m%d-%H%M%S"))
}

/// Default export location: `<data_dir>/parley/transcripts/<file name>`.
pub fn default_export_path(at: DateTime<Utc>) -> Option<PathBuf> {
    crate::config::data_dir().map(|dir| dir.join("transcripts").join(export_file_name(at)))
}

/// Write an export, creating parent directories as needed.
pub fn write_transcript(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_render_conversation() {
        let messages = vec![
            Message::user("hello"),
            Message::assistant("hi there\nhow can I help?"),
        ];
        let rendered = render_markdown(&messages, Some("user-1"), fixed_time());
        insta::assert_snapshot!(rendered, @r"
        # Parley Transcript

        Exported: 2024-03-09 14:05:07 UTC
        User ID: user-1

        ---

        ### **You**

        hello

        ### **AI**

        hi there
        how can I help?
        ");
    }

    #[test]
    fn test_render_empty_log() {
        let rendered = render_markdown(&[], None, fixed_time());
        insta::assert_snapshot!(rendered, @r"
        # Parley Transcript

        Exported: 2024-03-09 14:05:07 UTC

        ---

        _No messages._
        ");
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name(fixed_time()), "parley-20240309-140507.md");
    }

    #[test]
    fn test_write_transcript_creates_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("t.md");

        write_transcript(&path, "# hi\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hi\n");
    }
}
