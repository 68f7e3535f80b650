use regex::Regex;

pub const DAILY_SECTION_HEADER: &str = "## Daily";
pub const NO_EVENTS_SENTINEL: &str = "No events scheduled for this day.";

const OBJECT_REPLACEMENT_CHARACTER: char = '\u{FFFC}';

/// Bear hands back attachments as U+FFFC placeholders; they must not be
/// written back into the note.
pub fn clean_note_content(content: &str) -> String {
    content.replace(OBJECT_REPLACEMENT_CHARACTER, "")
}

/// Replaces the first section headed by `header_line` (followed by any run of
/// checklist lines or the no-events sentinel) with `new_body`. Appends the
/// section when the header is absent.
pub fn replace_section(content: &str, header_line: &str, new_body: &str) -> String {
    let header_line = header_line.trim_end();
    if header_line.trim().is_empty() {
        log::warn!("refusing to patch a section with an empty header");
        return content.to_string();
    }

    let pattern = format!(
        r"(?m)^{header}[ \t]*(?:\n|\z)(?:(?:- \[[ xX]\] [^\n]*|{sentinel}[ \t]*)(?:\n|\z))*",
        header = regex::escape(header_line),
        sentinel = regex::escape(NO_EVENTS_SENTINEL),
    );
    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(error) => {
            log::error!("section pattern for '{header_line}' failed to compile: {error}");
            return content.to_string();
        }
    };

    match regex.find(content) {
        Some(found) => {
            let mut updated = String::with_capacity(content.len() + new_body.len());
            updated.push_str(&content[..found.start()]);
            updated.push_str(header_line);
            updated.push('\n');
            if !new_body.is_empty() {
                updated.push_str(new_body);
                if !new_body.ends_with('\n') {
                    updated.push('\n');
                }
            }
            updated.push_str(&content[found.end()..]);
            updated
        }
        None => {
            let mut updated = String::with_capacity(content.len() + header_line.len() + new_body.len() + 2);
            updated.push_str(content);
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(header_line);
            updated.push('\n');
            updated.push_str(new_body);
            updated
        }
    }
}

/// Points the `## Daily` wiki-link at `date_string`, appending the block when
/// the note has none. An existing link keeps its bullet.
pub fn replace_daily_link(content: &str, date_string: &str) -> String {
    let entry = format!("{DAILY_SECTION_HEADER}\n- [[{date_string}]]");
    let pattern = format!(
        r"(?m)^{header}[ \t]*\n[-*] {{1,2}}\[\[(?P<date>\d{{4}}-\d{{2}}-\d{{2}})\]\][ \t]*$",
        header = regex::escape(DAILY_SECTION_HEADER),
    );
    let regex = match Regex::new(&pattern) {
        Ok(regex) => regex,
        Err(error) => {
            log::error!("daily link pattern failed to compile: {error}");
            return content.to_string();
        }
    };

    if let Some(date) = regex.captures(content).and_then(|captures| captures.name("date")) {
        let mut updated = String::with_capacity(content.len());
        updated.push_str(&content[..date.start()]);
        updated.push_str(date_string);
        updated.push_str(&content[date.end()..]);
        return updated;
    }

    let separator = if content.is_empty() || content.ends_with("\n\n") {
        ""
    } else if content.ends_with('\n') {
        "\n"
    } else {
        "\n\n"
    };
    format!("{content}{separator}{entry}")
}
