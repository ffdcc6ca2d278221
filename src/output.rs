use std::collections::{BTreeMap, HashMap};
use std::io::IsTerminal;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::cli::OutputFormat;
use crate::git::diff::{FileDiff, LineKind};
use crate::git::log::RevisionSummary;
use crate::git::status::FileStatus;
use crate::record::ChangeRecord;

fn short_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn short_rev(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn status_str(status: FileStatus) -> &'static str {
    match status {
        FileStatus::Modified => "modified",
        FileStatus::Added => "added",
        FileStatus::Deleted => "deleted",
        FileStatus::Untracked => "untracked",
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialise output"),
    }
}

fn header(columns: &str) {
    if std::io::stdout().is_terminal() {
        println!("\x1b[1m{columns}\x1b[0m");
    } else {
        println!("{columns}");
    }
}

/// Print the recently-changed feed.
pub fn print_recent(records: &[ChangeRecord], format: OutputFormat) {
    match format {
        OutputFormat::Compact => {
            for r in records {
                let marker = if r.tracked { "T" } else { "U" };
                if r.tracked {
                    println!(
                        "{} {marker} {} {} {}",
                        short_time(&r.timestamp),
                        r.path,
                        short_rev(&r.revision_id),
                        r.message
                    );
                } else {
                    println!("{} {marker} {}", short_time(&r.timestamp), r.path);
                }
            }
            println!("{} files", records.len());
        }

        OutputFormat::Table => {
            let path_w = records.iter().map(|r| r.path.len()).max().unwrap_or(4).max(4);
            let author_w = records.iter().map(|r| r.author.len()).max().unwrap_or(6).max(6);
            header(&format!(
                "{:<20}  {:<path_w$}  {:<8}  {:<author_w$}  MESSAGE",
                "MODIFIED", "PATH", "REV", "AUTHOR"
            ));
            println!("{}", "-".repeat(20 + path_w + 8 + author_w + 15));
            for r in records {
                println!(
                    "{:<20}  {:<path_w$}  {:<8}  {:<author_w$}  {}",
                    short_time(&r.timestamp),
                    r.path,
                    if r.tracked { short_rev(&r.revision_id) } else { "-" },
                    r.author,
                    r.message,
                );
            }
        }

        OutputFormat::Json => print_json(records),
    }
}

/// Print the revisions of one file, newest first.
pub fn print_history(revisions: &[RevisionSummary], format: OutputFormat) {
    match format {
        OutputFormat::Compact => {
            for rev in revisions {
                println!(
                    "{} {} {} {}",
                    short_rev(&rev.revision_id),
                    short_time(&rev.timestamp),
                    rev.author,
                    rev.message
                );
            }
            println!("{} revisions", revisions.len());
        }

        OutputFormat::Table => {
            let author_w = revisions
                .iter()
                .map(|r| r.author.len())
                .max()
                .unwrap_or(6)
                .max(6);
            header(&format!(
                "{:<8}  {:<20}  {:<author_w$}  MESSAGE",
                "REV", "DATE", "AUTHOR"
            ));
            println!("{}", "-".repeat(8 + 20 + author_w + 13));
            for rev in revisions {
                println!(
                    "{:<8}  {:<20}  {:<author_w$}  {}",
                    short_rev(&rev.revision_id),
                    short_time(&rev.timestamp),
                    rev.author,
                    rev.message,
                );
            }
        }

        OutputFormat::Json => print_json(revisions),
    }
}

/// Print the latest revision of each requested file, in request order.
pub fn print_last(files: &[String], found: &HashMap<String, RevisionSummary>, format: OutputFormat) {
    match format {
        OutputFormat::Compact => {
            for file in files {
                match found.get(file) {
                    Some(rev) => println!(
                        "{file} {} {} {} {}",
                        short_rev(&rev.revision_id),
                        short_time(&rev.timestamp),
                        rev.author,
                        rev.message
                    ),
                    None => println!("{file} -"),
                }
            }
        }

        OutputFormat::Table => {
            let path_w = files.iter().map(|f| f.len()).max().unwrap_or(4).max(4);
            header(&format!("{:<path_w$}  {:<8}  {:<20}  MESSAGE", "PATH", "REV", "DATE"));
            println!("{}", "-".repeat(path_w + 8 + 20 + 13));
            for file in files {
                match found.get(file) {
                    Some(rev) => println!(
                        "{file:<path_w$}  {:<8}  {:<20}  {}",
                        short_rev(&rev.revision_id),
                        short_time(&rev.timestamp),
                        rev.message,
                    ),
                    None => println!("{file:<path_w$}  {:<8}  {:<20}", "-", "-"),
                }
            }
        }

        OutputFormat::Json => {
            let entries: BTreeMap<&str, Option<&RevisionSummary>> = files
                .iter()
                .map(|file| (file.as_str(), found.get(file)))
                .collect();
            print_json(&entries);
        }
    }
}

fn diff_line(kind: LineKind, content: &str) -> String {
    match kind {
        LineKind::Header => content.to_string(),
        LineKind::Add => format!("+{content}"),
        LineKind::Delete => format!("-{content}"),
        LineKind::Context => format!(" {content}"),
    }
}

/// Print the change one revision made to a file.
pub fn print_diff(diff: &FileDiff, format: OutputFormat) {
    match format {
        OutputFormat::Compact | OutputFormat::Table => {
            println!(
                "{} {} {} {}",
                short_rev(&diff.revision_id),
                short_time(&diff.timestamp),
                diff.author,
                diff.message
            );
            for hunk in &diff.hunks {
                for line in &hunk.lines {
                    println!("{}", diff_line(line.kind, &line.content));
                }
            }
        }

        OutputFormat::Json => print_json(diff),
    }
}

/// Print working-directory status. `head` is `None` outside git or before the
/// first commit; `dirty` covers the whole work tree.
pub fn print_status(
    status: &BTreeMap<String, FileStatus>,
    head: Option<&str>,
    dirty: bool,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Compact => {
            println!("head {}{}", head.unwrap_or("-"), if dirty { " dirty" } else { "" });
            for (path, state) in status {
                println!("{} {path}", status_str(*state));
            }
            println!("{} changed", status.len());
        }

        OutputFormat::Table => {
            println!("HEAD: {}{}", head.unwrap_or("-"), if dirty { " (dirty)" } else { "" });
            header(&format!("{:<10}  PATH", "STATUS"));
            println!("{}", "-".repeat(16));
            for (path, state) in status {
                println!("{:<10}  {path}", status_str(*state));
            }
        }

        OutputFormat::Json => print_json(&serde_json::json!({
            "head": head,
            "dirty": dirty,
            "files": status,
        })),
    }
}
