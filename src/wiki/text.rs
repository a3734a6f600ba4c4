//! Minimal wikitext scanning helpers.
//!
//! Just enough structure-aware scanning for the clerking tasks: heading
//! sections, top-level templates, list entries, local links and signature
//! timestamps. This is deliberately not a general wikitext parser; nothing
//! here understands comments, nowiki or parser functions.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// A page split at headings of at most a target level.
///
/// `lead` is everything before the first boundary heading. Concatenating
/// `lead` with every section's `text` reproduces the input byte for byte,
/// so edits can be made by replacing individual section texts.
#[derive(Debug, Clone)]
pub struct Sections {
    pub lead: String,
    pub sections: Vec<Section>,
}

/// One section: its boundary heading plus everything up to the next
/// boundary. `text` is the exact source slice including the heading line.
#[derive(Debug, Clone)]
pub struct Section {
    pub level: usize,
    pub heading: String,
    pub text: String,
}

impl Sections {
    /// Reassemble the page text.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.lead.len() + self.sections.iter().map(|s| s.text.len()).sum::<usize>(),
        );
        out.push_str(&self.lead);
        for section in &self.sections {
            out.push_str(&section.text);
        }
        out
    }
}

/// Parse a heading line, returning `(level, inner_text)`.
///
/// MediaWiki takes the level as the smaller of the leading and trailing
/// `=` runs, capped at 6.
pub fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_end();
    if !trimmed.starts_with('=') || !trimmed.ends_with('=') {
        return None;
    }
    let leading = trimmed.bytes().take_while(|b| *b == b'=').count();
    let trailing = trimmed.bytes().rev().take_while(|b| *b == b'=').count();
    if leading + trailing >= trimmed.len() {
        return None;
    }
    let inner = trimmed[leading..trimmed.len() - trailing].trim();
    if inner.is_empty() {
        return None;
    }
    Some((leading.min(trailing).min(6), inner))
}

/// Split a page at headings of level `max_level` or shallower.
///
/// Deeper headings stay inside their parent section. Callers usually
/// filter `sections` down to the exact level they clerk.
pub fn split_sections(text: &str, max_level: usize) -> Sections {
    let mut lead = String::new();
    let mut sections: Vec<Section> = Vec::new();

    for line in split_inclusive_lines(text) {
        match heading_level(line) {
            Some((level, inner)) if level <= max_level => {
                sections.push(Section {
                    level,
                    heading: inner.to_owned(),
                    text: line.to_owned(),
                });
            }
            _ => match sections.last_mut() {
                Some(section) => section.text.push_str(line),
                None => lead.push_str(line),
            },
        }
    }

    Sections { lead, sections }
}

/// Like `str::split_inclusive('\n')` but stable about the final fragment:
/// yields nothing for an empty input.
fn split_inclusive_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive('\n')
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A top-level template occurrence (`{{...}}`) in a page.
///
/// `start..end` is the byte span of the whole source including braces.
/// Nested templates inside parameter values are left as raw text.
#[derive(Debug, Clone)]
pub struct Template {
    pub start: usize,
    pub end: usize,
    pub name: String,
    params: Vec<Param>,
}

#[derive(Debug, Clone)]
struct Param {
    name: Option<String>,
    value: String,
}

impl Template {
    /// The exact source slice of this template.
    pub fn source<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    /// Case- and underscore-insensitive name comparison against candidates.
    pub fn name_matches(&self, candidates: &[&str]) -> bool {
        let own = normalize_template_name(&self.name);
        candidates
            .iter()
            .any(|c| normalize_template_name(c) == own)
    }

    /// Value of a named parameter, trimmed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.as_deref() == Some(key))
            .map(|p| p.value.as_str())
    }

    /// All positional (unnamed) parameter values, trimmed, empties dropped.
    pub fn positional(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.name.is_none() && !p.value.is_empty())
            .map(|p| p.value.as_str())
            .collect()
    }

    /// First positional parameter, if any.
    pub fn first_positional(&self) -> Option<&str> {
        self.positional().first().copied()
    }

    /// Render a copy of this template with a single positional parameter,
    /// keeping the name as written.
    pub fn with_sole_positional(&self, value: &str) -> String {
        format!("{{{{{}|{}}}}}", self.name, value)
    }
}

fn normalize_template_name(name: &str) -> String {
    name.trim().replace('_', " ").to_lowercase()
}

/// Find every top-level template in `text`, in source order.
///
/// Unclosed `{{` runs to end of text and is skipped.
pub fn find_templates(text: &str) -> Vec<Template> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if let Some(template) = parse_template_at(text, i) {
                i = template.end;
                out.push(template);
                continue;
            }
        }
        i += 1;
    }
    out
}

fn parse_template_at(text: &str, start: usize) -> Option<Template> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut link_depth = 0usize;
    let mut i = start;
    // (start, end, first top-level '=' position) per pipe-separated segment.
    let mut segments: Vec<(usize, usize, Option<usize>)> = Vec::new();
    let mut segment_start = start + 2;
    let mut eq_pos: Option<usize> = None;

    while i < bytes.len() {
        if i + 1 < bytes.len() {
            match (bytes[i], bytes[i + 1]) {
                (b'{', b'{') => {
                    depth += 1;
                    i += 2;
                    continue;
                }
                (b'}', b'}') => {
                    depth -= 1;
                    if depth == 0 {
                        segments.push((segment_start, i, eq_pos));
                        return Some(build_template(text, start, i + 2, segments));
                    }
                    i += 2;
                    continue;
                }
                (b'[', b'[') => {
                    link_depth += 1;
                    i += 2;
                    continue;
                }
                (b']', b']') => {
                    link_depth = link_depth.saturating_sub(1);
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        if depth == 1 && link_depth == 0 {
            match bytes[i] {
                b'|' => {
                    segments.push((segment_start, i, eq_pos));
                    segment_start = i + 1;
                    eq_pos = None;
                }
                b'=' if eq_pos.is_none() => eq_pos = Some(i),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn build_template(
    text: &str,
    start: usize,
    end: usize,
    segments: Vec<(usize, usize, Option<usize>)>,
) -> Template {
    let mut iter = segments.into_iter();
    let name = iter
        .next()
        .map(|(s, e, _)| text[s..e].trim().to_owned())
        .unwrap_or_default();

    let params = iter
        .map(|(s, e, eq)| match eq {
            Some(pos) if pos > s => Param {
                name: Some(text[s..pos].trim().to_owned()),
                value: text[pos + 1..e].trim().to_owned(),
            },
            _ => Param {
                name: None,
                value: text[s..e].trim().to_owned(),
            },
        })
        .collect();

    Template {
        start,
        end,
        name,
        params,
    }
}

/// Append a named parameter to a template's source text, keeping the
/// one-param-per-line layout of multiline templates.
pub fn append_named_param(template_source: &str, name: &str, value: &str) -> String {
    let trimmed = template_source.trim_end();
    let Some(body) = trimmed.strip_suffix("}}") else {
        return template_source.to_owned();
    };
    if body.contains('\n') {
        format!("{}\n|{} = {}\n}}}}", body.trim_end(), name, value)
    } else {
        format!("{}|{}={}}}}}", body, name, value)
    }
}

// ---------------------------------------------------------------------------
// Links, list entries, titles
// ---------------------------------------------------------------------------

/// First local article link, with any label stripped.
///
/// Links containing `:` are skipped (other namespaces and interwikis are
/// never article requests).
pub fn first_local_link(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("]]") else {
            return None;
        };
        let inner = &after[..close];
        if !inner.contains(':') {
            let target = inner.split('|').next().unwrap_or("").trim();
            if !target.is_empty() {
                return Some(target.to_owned());
            }
        }
        rest = &after[close + 2..];
    }
    None
}

/// Content of a list entry line (`* foo`, `:** foo`), or `None` for
/// non-entry lines.
pub fn list_entry_text(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches(':');
    let stripped = rest.trim_start_matches('*');
    if stripped.len() == rest.len() {
        return None;
    }
    Some(stripped.trim_start())
}

/// Canonical page title form: underscores to spaces, first letter
/// uppercased, surrounding whitespace dropped.
pub fn normalize_title(title: &str) -> String {
    let replaced = title.trim().replace('_', " ");
    let mut chars = replaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => replaced,
    }
}

// ---------------------------------------------------------------------------
// Signature timestamps
// ---------------------------------------------------------------------------

/// Most recent signature timestamp in a discussion text.
///
/// Recognizes the standard `HH:MM, D Month YYYY (UTC)` form produced by
/// `~~~~`. Returns the latest timestamp found, not the last in source
/// order.
pub fn latest_signature_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let mut latest: Option<DateTime<Utc>> = None;
    for (idx, _) in text.match_indices("(UTC)") {
        let head = &text[..idx];
        let tokens: Vec<&str> = head.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        let candidate = tokens[tokens.len() - 4..].join(" ");
        let Ok(naive) = NaiveDateTime::parse_from_str(&candidate, "%H:%M, %d %B %Y") else {
            continue;
        };
        let parsed = Utc.from_utc_datetime(&naive);
        if latest.is_none_or(|prev| parsed > prev) {
            latest = Some(parsed);
        }
    }
    latest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
