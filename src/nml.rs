//! Minimal Fortran namelist reading and patching.
//!
//! Covers the subset of namelist syntax the preparation pipeline needs:
//! `&group` blocks terminated by `/`, scalar and comma-separated array
//! values, single-quoted strings, `.true.`/`.false.` logicals, and `!`
//! comments. Group and parameter names are case-insensitive.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum NmlValue {
    Str(String),
    Int(i64),
    Float(f64),
    Logical(bool),
}

impl NmlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NmlValue::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NmlValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NmlValue::Float(x) => Some(*x),
            NmlValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NmlValue::Logical(flag) => Some(*flag),
            _ => None,
        }
    }
}

type GroupEntries = HashMap<String, Vec<NmlValue>>;

#[derive(Debug, Default)]
pub struct Namelist {
    groups: HashMap<String, GroupEntries>,
}

impl Namelist {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read namelist {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut groups: HashMap<String, GroupEntries> = HashMap::new();
        let mut current_group: Option<String> = None;
        let mut current_key: Option<String> = None;
        for raw_line in text.lines() {
            let line = strip_comment(raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('&') {
                let name = name.split_whitespace().next().unwrap_or_default();
                current_group = Some(name.to_lowercase());
                current_key = None;
                groups.entry(name.to_lowercase()).or_default();
                continue;
            }
            if line.starts_with('/') {
                current_group = None;
                current_key = None;
                continue;
            }
            let Some(group) = current_group.as_ref() else {
                continue;
            };
            if let Some((key, rest)) = split_assignment(line) {
                let values = parse_values(rest);
                let entry = groups.entry(group.clone()).or_default();
                entry.insert(key.clone(), values);
                current_key = Some(key);
            } else if let Some(key) = current_key.as_ref() {
                // Continuation of the previous parameter's value list.
                let values = parse_values(line);
                if let Some(existing) = groups
                    .get_mut(group)
                    .and_then(|entries| entries.get_mut(key))
                {
                    existing.extend(values);
                }
            }
        }
        Self { groups }
    }

    /// First value of a parameter, for scalar parameters.
    pub fn scalar(&self, group: &str, key: &str) -> Option<&NmlValue> {
        self.values(group, key).and_then(<[NmlValue]>::first)
    }

    pub fn values(&self, group: &str, key: &str) -> Option<&[NmlValue]> {
        self.groups
            .get(&group.to_lowercase())
            .and_then(|entries| entries.get(&key.to_lowercase()))
            .map(Vec::as_slice)
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '!' if !in_quote => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn split_assignment(line: &str) -> Option<(String, &str)> {
    let (key, rest) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains('\'') || key.contains(',') {
        return None;
    }
    Some((key.to_lowercase(), rest.trim()))
}

fn parse_values(text: &str) -> Vec<NmlValue> {
    split_value_items(text)
        .into_iter()
        .map(|item| parse_value(&item))
        .collect()
}

fn split_value_items(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for ch in text.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            ',' if !in_quote => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || items.is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn parse_value(item: &str) -> NmlValue {
    let trimmed = item.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return NmlValue::Str(trimmed[1..trimmed.len() - 1].to_string());
    }
    match trimmed.to_lowercase().as_str() {
        ".true." | ".t." | "t" => return NmlValue::Logical(true),
        ".false." | ".f." | "f" => return NmlValue::Logical(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return NmlValue::Int(n);
    }
    let float_text = trimmed.replace(['d', 'D'], "e");
    if let Ok(x) = float_text.parse::<f64>() {
        return NmlValue::Float(x);
    }
    NmlValue::Str(trimmed.to_string())
}

/// Set `jpni`, `jpnj`, and `jpnij` in the `&nammpp` group of a namelist
/// file, preserving all other content byte for byte.
///
/// Parameters absent from the group are inserted directly after the group
/// header; a file with no `&nammpp` group gets one appended.
pub fn patch_nammpp(path: &Path, jpni: u32, jpnj: u32, jpnij: u32) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read namelist {}", path.display()))?;
    let patched = patch_nammpp_text(&text, jpni, jpnj, jpnij);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("stage patched namelist in {}", parent.display()))?;
    staged
        .write_all(patched.as_bytes())
        .context("write patched namelist")?;
    staged
        .persist(path)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn patch_nammpp_text(text: &str, jpni: u32, jpnj: u32, jpnij: u32) -> String {
    let patch = [
        ("jpni", jpni),
        ("jpnj", jpnj),
        ("jpnij", jpnij),
    ];
    let lines: Vec<&str> = text.lines().collect();
    let group_bounds = nammpp_bounds(&lines);
    let Some((start, end)) = group_bounds else {
        let mut out = text.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("&nammpp\n");
        for (key, value) in patch {
            out.push_str(&format!("   {key} = {value}\n"));
        }
        out.push_str("/\n");
        return out;
    };

    let present: Vec<&str> = patch
        .iter()
        .filter(|(key, _)| {
            lines[start + 1..end]
                .iter()
                .any(|line| assignment_key(line).as_deref() == Some(*key))
        })
        .map(|(key, _)| *key)
        .collect();

    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        if idx == start {
            out.push_str(line);
            out.push('\n');
            for (key, value) in patch {
                if !present.contains(&key) {
                    out.push_str(&format!("   {key} = {value}\n"));
                }
            }
            continue;
        }
        if idx > start && idx < end {
            if let Some(key) = assignment_key(line) {
                if let Some((name, value)) = patch.iter().find(|(name, _)| *name == key) {
                    let indent: String = line
                        .chars()
                        .take_while(|ch| ch.is_whitespace())
                        .collect();
                    out.push_str(&format!("{indent}{name} = {value}\n"));
                    continue;
                }
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    if !text.ends_with('\n') {
        out.pop();
    }
    out
}

fn nammpp_bounds(lines: &[&str]) -> Option<(usize, usize)> {
    let start = lines
        .iter()
        .position(|line| line.trim_start().to_lowercase().starts_with("&nammpp"))?;
    let end = lines[start + 1..]
        .iter()
        .position(|line| line.trim_start().starts_with('/'))
        .map_or(lines.len(), |offset| start + 1 + offset);
    Some((start, end))
}

fn assignment_key(line: &str) -> Option<String> {
    let stripped = strip_comment(line);
    let (key, _) = split_assignment(stripped.trim())?;
    Some(key)
}
