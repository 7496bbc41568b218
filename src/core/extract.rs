//! CK-003: Design-document fact extraction.
//!
//! Heuristic, text-only. Modules come from recognized section headers, with a
//! separator-split fallback when no header matches. Tables come from
//! `CREATE TABLE` statements, with a `Table: name (a, b)` fallback.

use super::types::{FunctionalModule, SqlColumn, SqlTable};
use regex::Regex;
use std::sync::OnceLock;

fn module_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?(?:module|feature)[ \t]*\d*[ \t]*[:.\-–][ \t]*(.+?)(?:\*\*)?[ \t]*$",
        )
        .expect("valid module header regex")
    })
}

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*#{2,4}[ \t]*\d+[.)][ \t]+(.+?)[ \t]*$")
            .expect("valid numbered heading regex")
    })
}

fn any_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+\S").expect("valid heading regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:-{3,}|\*{3,}|={3,})[ \t]*$|\n[ \t]*\n")
            .expect("valid separator regex")
    })
}

fn create_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)create\s+table\s+(?:if\s+not\s+exists\s+)?[`"\[]?(\w+)[`"\]]?\s*\((.*?)\)\s*;"#,
        )
        .expect("valid create table regex")
    })
}

fn table_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*[-*]?[ \t]*(?:table|entity)[ \t]*[:\-][ \t]*`?(\w+)`?[ \t]*(?:\((.*)\))?")
            .expect("valid table line regex")
    })
}

fn references_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)references\s+[`']?(\w+)[`']?\s*(?:\(\s*[`']?(\w+)[`']?\s*\))?")
            .expect("valid references regex")
    })
}

/// Extract functional modules from a design document.
pub fn extract_modules(doc: &str) -> Vec<FunctionalModule> {
    let headers = find_module_headers(doc);
    if headers.is_empty() {
        return split_fallback(doc);
    }

    let mut modules = Vec::new();
    for (i, (title, body_start)) in headers.iter().enumerate() {
        let body_end = headers
            .get(i + 1)
            .map(|(_, next_start)| line_start_before(doc, *next_start))
            .unwrap_or(doc.len());
        let body = section_body(&doc[*body_start..body_end]);
        if looks_like_schema(body) {
            continue;
        }
        modules.push(parse_module_body(title, body));
    }
    modules
}

/// Headers as (title, byte offset just past the header line).
fn find_module_headers(doc: &str) -> Vec<(String, usize)> {
    let mut headers: Vec<(String, usize)> = module_header_re()
        .captures_iter(doc)
        .chain(numbered_heading_re().captures_iter(doc))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = clean_title(caps.get(1)?.as_str());
            if title.is_empty() {
                return None;
            }
            Some((title, whole.end()))
        })
        .collect();
    headers.sort_by_key(|(_, end)| *end);
    headers.dedup_by_key(|(_, end)| *end);
    headers
}

fn line_start_before(doc: &str, pos: usize) -> usize {
    doc[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Cut a section body at the next unrelated markdown heading.
fn section_body(body: &str) -> &str {
    let body = body.trim_start_matches(['\r', '\n']);
    match any_heading_re().find(body) {
        Some(m) if m.start() > 0 => &body[..m.start()],
        Some(_) => "",
        None => body,
    }
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '*' || c == '#' || c == '`')
        .trim()
        .to_string()
}

fn looks_like_schema(body: &str) -> bool {
    body.to_ascii_lowercase().contains("create table")
}

fn parse_module_body(title: &str, body: &str) -> FunctionalModule {
    let mut description = Vec::new();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for line in body.lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']).trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = strip_label(line, &lower, &["inputs", "input"]) {
            inputs.extend(split_list(rest));
        } else if let Some(rest) = strip_label(line, &lower, &["outputs", "output"]) {
            outputs.extend(split_list(rest));
        } else if let Some(rest) = strip_label(line, &lower, &["description"]) {
            description.push(rest.trim().to_string());
        } else {
            description.push(line.to_string());
        }
    }

    FunctionalModule {
        title: title.to_string(),
        description: description.join(" "),
        inputs,
        outputs,
    }
}

/// If `line` starts with one of `labels` followed by `:`, return the rest.
fn strip_label<'a>(line: &'a str, lower: &str, labels: &[&str]) -> Option<&'a str> {
    for label in labels {
        if let Some(after) = lower.strip_prefix(label) {
            let after = after.trim_start_matches(['*', ' ']);
            if let Some(value) = after.strip_prefix(':') {
                let offset = line.len() - value.len();
                return Some(line[offset..].trim_start_matches(['*', ' ']));
            }
        }
    }
    None
}

fn split_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(|p| p.trim().trim_end_matches('.').trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Separator-split fallback: each block's first line becomes the title.
fn split_fallback(doc: &str) -> Vec<FunctionalModule> {
    separator_re()
        .split(doc)
        .map(str::trim)
        .filter(|block| block.len() >= 8 && !looks_like_schema(block))
        .filter_map(|block| {
            let mut lines = block.lines();
            let title = clean_title(lines.next()?);
            if title.is_empty() {
                return None;
            }
            let rest: Vec<&str> = lines.collect();
            Some(parse_module_body(&title, &rest.join("\n")))
        })
        .collect()
}

/// Extract schema tables from a design document.
pub fn extract_tables(doc: &str) -> Vec<SqlTable> {
    let mut tables: Vec<SqlTable> = create_table_re()
        .captures_iter(doc)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let body = caps.get(2)?.as_str();
            Some(parse_create_body(name, body))
        })
        .collect();

    if tables.is_empty() {
        tables = table_line_re()
            .captures_iter(doc)
            .filter_map(|caps| {
                let name = caps.get(1)?.as_str().to_string();
                let columns = caps
                    .get(2)
                    .map(|m| {
                        split_list(m.as_str())
                            .into_iter()
                            .map(|c| parse_loose_column(&c))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(SqlTable { name, columns })
            })
            .collect();
    }

    tables.dedup_by(|a, b| a.name.eq_ignore_ascii_case(&b.name));
    tables
}

fn parse_create_body(name: String, body: &str) -> SqlTable {
    let mut columns: Vec<SqlColumn> = Vec::new();
    let mut table_pks: Vec<String> = Vec::new();
    let mut table_fks: Vec<(String, String)> = Vec::new();

    for part in split_top_level(body) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let lower = part.to_ascii_lowercase();
        if lower.starts_with("primary key") {
            table_pks.extend(paren_list(part));
        } else if lower.starts_with("foreign key") {
            if let (Some(col), Some(target)) = (paren_list(part).into_iter().next(), reference_of(part)) {
                table_fks.push((col, target));
            }
        } else if lower.starts_with("constraint")
            || lower.starts_with("unique")
            || lower.starts_with("index")
            || lower.starts_with("key ")
            || lower.starts_with("check")
        {
            continue;
        } else {
            let Some((col_name, rest)) = part.split_once(char::is_whitespace) else {
                continue;
            };
            let data_type = leading_type(rest.trim_start());
            columns.push(SqlColumn {
                name: unquote(col_name),
                data_type,
                primary_key: lower.contains("primary key"),
                references: reference_of(part),
            });
        }
    }

    for col in &mut columns {
        if table_pks.iter().any(|pk| pk.eq_ignore_ascii_case(&col.name)) {
            col.primary_key = true;
        }
        if let Some((_, target)) = table_fks.iter().find(|(c, _)| c.eq_ignore_ascii_case(&col.name)) {
            col.references = Some(target.clone());
        }
    }

    SqlTable { name, columns }
}

/// The column type at the start of `rest`, keeping `(p, s)` arguments intact.
fn leading_type(rest: &str) -> String {
    let mut depth = 0i32;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c.is_whitespace() && depth <= 0 => return rest[..i].to_string(),
            _ => {}
        }
    }
    rest.to_string()
}

/// Split on commas that are not inside parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Identifiers inside the first parenthesized group.
fn paren_list(s: &str) -> Vec<String> {
    let Some(open) = s.find('(') else {
        return Vec::new();
    };
    let Some(close) = s[open..].find(')') else {
        return Vec::new();
    };
    s[open + 1..open + close]
        .split(',')
        .map(unquote)
        .filter(|c| !c.is_empty())
        .collect()
}

fn reference_of(s: &str) -> Option<String> {
    let caps = references_re().captures(s)?;
    let table = caps.get(1)?.as_str();
    Some(match caps.get(2) {
        Some(col) => format!("{}({})", table, col.as_str()),
        None => table.to_string(),
    })
}

fn unquote(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '[' || c == ']')
        .to_string()
}

/// `id PK`, `email: string`, `user_id -> users` style column notes.
fn parse_loose_column(raw: &str) -> SqlColumn {
    let lower = raw.to_ascii_lowercase();
    let (head, references) = match raw.split_once("->") {
        Some((h, target)) => (h, Some(target.trim().to_string())),
        None => (raw, None),
    };
    let mut tokens = head.split([' ', ':']).filter(|t| !t.is_empty());
    let name = tokens.next().map(unquote).unwrap_or_default();
    let data_type = tokens
        .find(|t| !t.eq_ignore_ascii_case("pk"))
        .unwrap_or_default()
        .to_string();
    SqlColumn {
        name,
        data_type,
        primary_key: lower.split_whitespace().any(|t| t == "pk") || lower.contains("primary key"),
        references,
    }
}
