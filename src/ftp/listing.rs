//! Parsing of Unix-style `LIST` output and `MDTM` timestamps.

use crate::{DirectoryEntry, EntryType, Metadata, Visibility};

/// One parsed `LIST` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedEntry {
    /// Entry name (symlink targets stripped).
    pub name: String,
    /// Entry type from the mode character.
    pub entry_type: EntryType,
    /// Size field; meaningful for files only.
    pub size: u64,
    /// Visibility derived from the permission string (`0o044` test).
    pub visibility: Visibility,
}

impl ParsedEntry {
    /// Metadata for a single-path probe. File timestamps come from a
    /// separate `MDTM` round trip, so they are injected here.
    pub fn into_metadata(self, timestamp: Option<i64>) -> Metadata {
        match self.entry_type {
            EntryType::Directory => Metadata::directory(),
            _ => Metadata::file(self.size, timestamp, Some(self.visibility)),
        }
    }
}

/// Parse one line of Unix `LIST` output.
///
/// Expected shape: `-rw-r--r-- 1 owner group 1234 Jan 01 12:34 name`.
/// Returns `None` for blank lines, `total N` headers, and anything that does
/// not carry the nine expected fields.
pub(crate) fn parse_unix_line(line: &str) -> Option<ParsedEntry> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with("total ") || line == "total" {
        return None;
    }

    // Eight whitespace-separated fields, then the name (which may itself
    // contain spaces).
    let mut rest = line;
    let mut fields = [""; 8];
    for field in &mut fields {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        *field = &rest[..end];
        rest = &rest[end..];
    }
    let name = rest.trim_start();
    if name.is_empty() {
        return None;
    }

    let perms = fields[0];
    let entry_type = match perms.chars().next()? {
        'd' => EntryType::Directory,
        'l' => EntryType::Symlink,
        _ => EntryType::File,
    };

    let name = match entry_type {
        EntryType::Symlink => name.split(" -> ").next().unwrap_or(name),
        _ => name,
    };

    let size: u64 = fields[4].parse().ok()?;
    let visibility = visibility_from_perms(perms);

    Some(ParsedEntry {
        name: name.to_string(),
        entry_type,
        size,
        visibility,
    })
}

/// Group-read or other-read set means public; the permission-string
/// equivalent of the `0o044` mode test.
fn visibility_from_perms(perms: &str) -> Visibility {
    let bytes = perms.as_bytes();
    let group_read = bytes.get(4) == Some(&b'r');
    let other_read = bytes.get(7) == Some(&b'r');
    if group_read || other_read {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

/// Normalize a raw listing into directory entries with full logical paths.
///
/// Handles the sectioned output of a server-side recursive `LIST -R`: a line
/// ending in `:` switches the base directory for the entries that follow.
/// `.` and `..` entries are dropped.
pub(crate) fn normalize_listing(lines: &[String], prefix: &str) -> Vec<DirectoryEntry> {
    let mut base = prefix.trim_matches('/').to_string();
    let mut entries = Vec::new();

    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(section) = line.strip_suffix(':') {
            if parse_unix_line(line).is_none() {
                base = section
                    .trim_start_matches("./")
                    .trim_matches('/')
                    .to_string();
                continue;
            }
        }

        let Some(parsed) = parse_unix_line(line) else {
            continue;
        };
        if parsed.name == "." || parsed.name == ".." {
            continue;
        }

        let path = if base.is_empty() {
            parsed.name.clone()
        } else {
            format!("{base}/{}", parsed.name)
        };
        let size = match parsed.entry_type {
            EntryType::File => Some(parsed.size),
            _ => None,
        };
        entries.push(DirectoryEntry {
            path,
            entry_type: parsed.entry_type,
            size,
            timestamp: None,
        });
    }

    entries
}

/// Convert an `MDTM` payload (`YYYYMMDDHHMMSS`) to epoch seconds.
pub(crate) fn mdtm_to_epoch(payload: &str) -> Option<i64> {
    let payload = payload.trim();
    if payload.len() < 14 || !payload.as_bytes()[..14].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let num = |range: std::ops::Range<usize>| -> i64 { payload[range].parse().unwrap_or(0) };
    let (year, month, day) = (num(0..4), num(4..6), num(6..8));
    let (hour, minute, second) = (num(8..10), num(10..12), num(12..14));
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    Some(days_from_civil(year, month, day) * 86_400 + hour * 3_600 + minute * 60 + second)
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_line() {
        let entry = parse_unix_line("-rw-r--r-- 1 user group 1234 Jan 01 12:34 report.txt").unwrap();
        assert_eq!(entry.name, "report.txt");
        assert_eq!(entry.entry_type, EntryType::File);
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.visibility, Visibility::Public);
    }

    #[test]
    fn parses_directory_line() {
        let entry = parse_unix_line("drwxr-xr-x 2 user group 4096 Jan 01 12:34 docs").unwrap();
        assert_eq!(entry.entry_type, EntryType::Directory);
        assert_eq!(entry.name, "docs");
    }

    #[test]
    fn parses_name_with_spaces() {
        let entry =
            parse_unix_line("-rw-r--r-- 1 user group 10 Jan 01 12:34 annual report.txt").unwrap();
        assert_eq!(entry.name, "annual report.txt");
    }

    #[test]
    fn strips_symlink_target() {
        let entry =
            parse_unix_line("lrwxrwxrwx 1 user group 4 Jan 01 12:34 link -> target").unwrap();
        assert_eq!(entry.entry_type, EntryType::Symlink);
        assert_eq!(entry.name, "link");
    }

    #[test]
    fn private_permissions() {
        let entry = parse_unix_line("-rw------- 1 user group 10 Jan 01 12:34 secret").unwrap();
        assert_eq!(entry.visibility, Visibility::Private);
    }

    #[test]
    fn skips_total_and_blank_lines() {
        assert!(parse_unix_line("total 12").is_none());
        assert!(parse_unix_line("").is_none());
    }

    #[test]
    fn normalize_listing_prefixes_paths() {
        let lines = vec![
            "total 4".to_string(),
            "drwxr-xr-x 2 u g 4096 Jan 01 12:34 sub".to_string(),
            "-rw-r--r-- 1 u g 7 Jan 01 12:34 a.txt".to_string(),
        ];
        let entries = normalize_listing(&lines, "base");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "base/sub");
        assert_eq!(entries[1].path, "base/a.txt");
        assert_eq!(entries[1].size, Some(7));
        assert_eq!(entries[0].size, None);
    }

    #[test]
    fn normalize_listing_follows_sections() {
        let lines = vec![
            "d:".to_string(),
            "-rw-r--r-- 1 u g 1 Jan 01 12:34 a.txt".to_string(),
            "".to_string(),
            "d/sub:".to_string(),
            "-rw-r--r-- 1 u g 2 Jan 01 12:34 b.txt".to_string(),
        ];
        let entries = normalize_listing(&lines, "d");
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["d/a.txt", "d/sub/b.txt"]);
    }

    #[test]
    fn normalize_listing_drops_dot_entries() {
        let lines = vec![
            "drwxr-xr-x 2 u g 4096 Jan 01 12:34 .".to_string(),
            "drwxr-xr-x 2 u g 4096 Jan 01 12:34 ..".to_string(),
            "-rw-r--r-- 1 u g 1 Jan 01 12:34 a".to_string(),
        ];
        let entries = normalize_listing(&lines, "");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a");
    }

    #[test]
    fn mdtm_epoch_conversion() {
        // 1970-01-01 00:00:00
        assert_eq!(mdtm_to_epoch("19700101000000"), Some(0));
        // 2009-02-13 23:31:30 is the well-known 1234567890.
        assert_eq!(mdtm_to_epoch("20090213233130"), Some(1_234_567_890));
    }

    #[test]
    fn mdtm_rejects_garbage() {
        assert!(mdtm_to_epoch("not a date").is_none());
        assert!(mdtm_to_epoch("20091320000000").is_none());
    }
}
