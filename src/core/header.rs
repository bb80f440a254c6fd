use crate::{
    constants::{FIXED_COLUMNS, FORMAT_COLUMN, SAMPLE_COLUMN_OFFSET},
    core::field_types::{FieldKind, FieldRegistry, FieldSpec},
    error::VcxResult,
    vcx_header_error,
};
use once_cell::unsync::OnceCell;
use std::collections::HashMap;

/// Ordered key/value properties of one structured metaheader entry.
///
/// Quoted values keep their surrounding double quotes, so entries re-render
/// byte for byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaProps {
    entries: Vec<(String, String)>,
}

impl MetaProps {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or overwrite, keeping first-seen position on overwrite.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetaProps {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = MetaProps::default();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// One metadata slot: either structured `##TYPE=<ID=...>` declarations keyed
/// by ID (a list per ID, duplicate declarations append), or plain
/// `##key=value` string values.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaEntry {
    Structured(HashMap<String, Vec<MetaProps>>),
    Simple(Vec<String>),
}

/// Discovered CSQ/ANN annotation layout: the INFO label carrying the
/// annotations and the pipe-delimited field names, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CsqFormat {
    pub label: String,
    pub fields: Vec<String>,
}

/// Value for [`VcfHeader::add_header_field`].
#[derive(Debug)]
pub enum HeaderFieldValue<'a> {
    Simple(&'a str),
    Structured {
        field_type: &'a str,
        props: MetaProps,
    },
}

/// Parsed VCF header: metaheader lines, structured metadata, column and
/// sample bookkeeping, and the per-field type registries shared with every
/// record built against this header.
#[derive(Debug)]
pub struct VcfHeader {
    meta_lines: Vec<String>,
    sorted_meta: bool,
    columns: Vec<String>,
    samples: Vec<String>,
    sample_cols: HashMap<String, usize>,
    pub metadata: HashMap<String, MetaEntry>,
    pub fileformat: String,
    info_registry: FieldRegistry,
    format_registry: FieldRegistry,
    csq: OnceCell<CsqFormat>,
}

impl VcfHeader {
    pub fn new(meta_lines: Vec<String>, columns: Vec<String>) -> VcxResult<Self> {
        if columns.len() < FIXED_COLUMNS.len() {
            return Err(vcx_header_error!(
                "Expected at least {} header columns, got {}",
                FIXED_COLUMNS.len(),
                columns.len()
            ));
        }
        for (expected, got) in FIXED_COLUMNS.iter().zip(&columns) {
            if got != expected {
                return Err(vcx_header_error!(
                    "Invalid column name. Expected {expected}, got {got}"
                ));
            }
        }
        // ninth column is optional but must be FORMAT when present
        if columns.len() > FIXED_COLUMNS.len() && columns[8] != FORMAT_COLUMN {
            return Err(vcx_header_error!(
                "Invalid column name. Expected {FORMAT_COLUMN}, got {}",
                columns[8]
            ));
        }
        let samples: Vec<String> = columns
            .get(SAMPLE_COLUMN_OFFSET..)
            .unwrap_or_default()
            .to_vec();
        let sample_cols = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i + SAMPLE_COLUMN_OFFSET))
            .collect();

        let fileformat = match meta_lines.first().map(String::as_str).and_then(parse_simple_line) {
            Some((key, value)) if key == "fileformat" => value.to_string(),
            _ => {
                return Err(vcx_header_error!(
                    "First line of VCF must be a fileformat metaheader (e.g. ##fileformat=VCFv4.2)"
                ));
            }
        };

        let mut metadata = HashMap::new();
        for line in &meta_lines {
            parse_meta_line(&mut metadata, line)?;
        }

        let header = Self {
            meta_lines,
            sorted_meta: true,
            columns,
            samples,
            sample_cols,
            metadata,
            fileformat,
            info_registry: FieldRegistry::new(FieldKind::Info),
            format_registry: FieldRegistry::new(FieldKind::Format),
            csq: OnceCell::new(),
        };
        header.seed_registry(FieldKind::Format)?;
        header.seed_registry(FieldKind::Info)?;
        Ok(header)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn sample_column(&self, sample: &str) -> Option<usize> {
        self.sample_cols.get(sample).copied()
    }

    pub fn meta_lines(&self) -> &[String] {
        &self.meta_lines
    }

    pub fn registry(&self, kind: FieldKind) -> &FieldRegistry {
        match kind {
            FieldKind::Info => &self.info_registry,
            FieldKind::Format => &self.format_registry,
        }
    }

    /// Declarations for one structured ID, in header order.
    pub fn declarations(&self, field_type: &str, id: &str) -> Option<&[MetaProps]> {
        match self.metadata.get(field_type)? {
            MetaEntry::Structured(map) => map.get(id).map(Vec::as_slice),
            MetaEntry::Simple(_) => None,
        }
    }

    /// CSQ/ANN field layout, discovered on first request. Looks for an INFO
    /// declaration named CSQ, then ANN, and parses the "Format: a|b|c"
    /// clause of its Description.
    pub fn csq_format(&self) -> VcxResult<&CsqFormat> {
        self.csq.get_or_try_init(|| {
            let info = match self.metadata.get("INFO") {
                Some(MetaEntry::Structured(map)) => map,
                _ => {
                    return Err(vcx_header_error!(
                        "No CSQ or ANN field in INFO header: unable to retrieve consequence fields"
                    ));
                }
            };
            let (label, entries) = ["CSQ", "ANN"]
                .iter()
                .find_map(|label| info.get(*label).map(|entries| (*label, entries)))
                .ok_or_else(|| {
                    vcx_header_error!(
                        "No CSQ or ANN field in INFO header: unable to retrieve consequence fields"
                    )
                })?;
            let description = entries
                .first()
                .and_then(|props| props.get("Description"))
                .ok_or_else(|| {
                    vcx_header_error!("{label} INFO declaration has no Description")
                })?;
            let fields = parse_format_clause(description).ok_or_else(|| {
                vcx_header_error!(
                    "Could not parse {label} Format in header: unable to retrieve consequence annotations"
                )
            })?;
            Ok(CsqFormat {
                label: label.to_string(),
                fields,
            })
        })
    }

    /// Append a metaheader field. Structured values must carry the required
    /// keys for their type; new INFO/FORMAT declarations also extend the
    /// type registry. The rendered line order is restored on the next
    /// serialization.
    pub fn add_header_field(&mut self, name: &str, value: HeaderFieldValue) -> VcxResult<()> {
        let line = match value {
            HeaderFieldValue::Simple(string) => {
                let entry = self
                    .metadata
                    .entry(name.to_string())
                    .or_insert_with(|| MetaEntry::Simple(Vec::new()));
                match entry {
                    MetaEntry::Simple(values) => values.push(string.to_string()),
                    MetaEntry::Structured(_) => {
                        return Err(vcx_header_error!(
                            "Metaheader type {name} holds structured declarations, not string values"
                        ));
                    }
                }
                format!("##{name}={string}")
            }
            HeaderFieldValue::Structured { field_type, props } => {
                let required = required_keys(field_type);
                let mut rendered = Vec::with_capacity(props.entries.len());
                for key in required {
                    let value = props.get(key).ok_or_else(|| {
                        vcx_header_error!("Header type '{field_type}' requires '{key}' field")
                    })?;
                    rendered.push(format!("{key}={value}"));
                }
                for (key, value) in props.iter() {
                    if !required.contains(&key) {
                        rendered.push(format!("{key}={value}"));
                    }
                }

                let is_new = match self.metadata.get(field_type) {
                    Some(MetaEntry::Simple(_)) => {
                        return Err(vcx_header_error!(
                            "Metaheader type {field_type} holds string values, not structured declarations"
                        ));
                    }
                    Some(MetaEntry::Structured(map)) => !map.contains_key(name),
                    None => true,
                };
                if is_new && matches!(field_type, "INFO" | "FORMAT") {
                    let spec = declaration_spec(field_type, name, &props)?;
                    let kind = if field_type == "INFO" {
                        FieldKind::Info
                    } else {
                        FieldKind::Format
                    };
                    self.registry(kind).insert(name, spec);
                }
                let entry = self
                    .metadata
                    .entry(field_type.to_string())
                    .or_insert_with(|| MetaEntry::Structured(HashMap::new()));
                if let MetaEntry::Structured(map) = entry {
                    map.entry(name.to_string()).or_default().push(props);
                }

                let mut pieces = vec![format!("##{field_type}=<ID={name}")];
                pieces.extend(rendered);
                format!("{}>", pieces.join(","))
            }
        };
        self.meta_lines.push(line);
        self.sorted_meta = false;
        Ok(())
    }

    /// Render the header back to text. Structured FORMAT/FILTER/INFO lines
    /// are kept contiguous and alphabetically sorted; the block itself does
    /// not move relative to the other lines.
    pub fn to_vcf_string(&mut self) -> String {
        if !self.sorted_meta {
            self.sort_meta_lines();
        }
        format!("{}\n{}\n", self.meta_lines.join("\n"), self.columns.join("\t"))
    }

    fn sort_meta_lines(&mut self) {
        let mut pre = Vec::new();
        let mut block = Vec::new();
        let mut post = Vec::new();
        for line in self.meta_lines.drain(..) {
            let is_block = ["##FORMAT", "##FILTER", "##INFO"]
                .iter()
                .any(|prefix| line.starts_with(prefix));
            if is_block {
                block.push(line);
            } else if block.is_empty() {
                pre.push(line);
            } else {
                post.push(line);
            }
        }
        block.sort();
        self.meta_lines = pre;
        self.meta_lines.extend(block);
        self.meta_lines.extend(post);
        self.sorted_meta = true;
    }

    fn seed_registry(&self, kind: FieldKind) -> VcxResult<()> {
        let field_type = kind.to_string();
        let map = match self.metadata.get(&field_type) {
            Some(MetaEntry::Structured(map)) => map,
            _ => {
                // sites-only VCFs commonly omit FORMAT declarations
                if kind == FieldKind::Info {
                    log::warn!("No {field_type} field declarations in header");
                }
                return Ok(());
            }
        };
        for (id, entries) in map {
            let props = match entries.first() {
                Some(props) => props,
                None => continue,
            };
            let spec = declaration_spec(&field_type, id, props)?;
            self.registry(kind).insert(id, spec);
        }
        Ok(())
    }
}

fn declaration_spec(field_type: &str, id: &str, props: &MetaProps) -> VcxResult<FieldSpec> {
    let number = props.get("Number").ok_or_else(|| {
        vcx_header_error!("Missing required key 'Number' in {field_type} declaration '{id}'")
    })?;
    let type_name = props.get("Type").ok_or_else(|| {
        vcx_header_error!("Missing required key 'Type' in {field_type} declaration '{id}'")
    })?;
    FieldSpec::from_declaration(number, type_name)
}

fn required_keys(field_type: &str) -> &'static [&'static str] {
    match field_type {
        "INFO" | "FORMAT" => &["Number", "Type", "Description"],
        "FILTER" | "ALT" => &["Description"],
        _ => &[],
    }
}

fn parse_meta_line(metadata: &mut HashMap<String, MetaEntry>, line: &str) -> VcxResult<()> {
    if let Some((field, id, props)) = parse_structured_line(line) {
        let entry = metadata
            .entry(field.clone())
            .or_insert_with(|| MetaEntry::Structured(HashMap::new()));
        match entry {
            MetaEntry::Structured(map) => {
                // repeated IDs (e.g. duplicate contig lines) extend the list
                map.entry(id.clone()).or_default().push(props);
                for key in required_keys(&field) {
                    let last = map
                        .get(&id)
                        .and_then(|entries| entries.last())
                        .filter(|props| props.get(key).is_some());
                    if last.is_none() {
                        return Err(vcx_header_error!(
                            "Missing required key '{key}' in metaheader line: {line}"
                        ));
                    }
                }
            }
            MetaEntry::Simple(_) => {
                return Err(vcx_header_error!(
                    "Metaheader line redeclares simple field '{field}' as structured: {line}"
                ));
            }
        }
        return Ok(());
    }
    if let Some((key, value)) = parse_simple_line(line) {
        // a required-key field that failed the structured grammar cannot
        // satisfy its key checks, so reject it outright
        if !required_keys(key).is_empty() {
            return Err(vcx_header_error!("Invalid metaheader line: {line}"));
        }
        let entry = metadata
            .entry(key.to_string())
            .or_insert_with(|| MetaEntry::Simple(Vec::new()));
        match entry {
            MetaEntry::Simple(values) => values.push(value.to_string()),
            MetaEntry::Structured(_) => {
                return Err(vcx_header_error!(
                    "Metaheader line redeclares structured field '{key}' as simple: {line}"
                ));
            }
        }
        return Ok(());
    }
    Err(vcx_header_error!("Invalid metaheader line: {line}"))
}

/// `##key=value` where the key holds no whitespace.
fn parse_simple_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("##")?;
    let (key, value) = rest.split_once('=')?;
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}

/// `##TYPE=<ID=name,K1=V1,K2=V2,...>` where values are either double-quoted
/// (quotes kept, commas allowed inside) or bare tokens up to the next comma.
fn parse_structured_line(line: &str) -> Option<(String, String, MetaProps)> {
    let rest = line.strip_prefix("##")?;
    let (field, value) = rest.split_once('=')?;
    if field.is_empty() || field.chars().any(char::is_whitespace) {
        return None;
    }
    let body = value.strip_prefix("<ID=")?.strip_suffix('>')?;
    let (id, mut tail) = match body.find(',') {
        Some(idx) => (&body[..idx], &body[idx..]),
        None => (body, ""),
    };
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        return None;
    }

    let mut props = MetaProps::default();
    while !tail.is_empty() {
        tail = tail.strip_prefix(',')?;
        let eq = tail.find('=')?;
        let key = &tail[..eq];
        if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == ',') {
            return None;
        }
        let after = &tail[eq + 1..];
        let (value, rest) = if after.starts_with('"') {
            let close = after[1..].find('"')? + 1;
            (&after[..close + 1], &after[close + 1..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            let bare = &after[..end];
            if bare.is_empty() || bare.chars().any(char::is_whitespace) {
                return None;
            }
            (bare, &after[end..])
        };
        props.insert(key, value);
        tail = rest;
    }
    Some((field.to_string(), id.to_string(), props))
}

/// Extract the pipe-delimited field list of a "Format: a|b|c" clause from a
/// (quote-retaining) Description value. The list must run to the closing
/// quote; later clauses win, matching greedy left-context scanning.
fn parse_format_clause(description: &str) -> Option<Vec<String>> {
    for (idx, needle) in description.match_indices("Format:").collect::<Vec<_>>().into_iter().rev() {
        let after = description[idx + needle.len()..].trim_start();
        let end = after
            .find(|c: char| c.is_whitespace() || c == '"')
            .unwrap_or(after.len());
        if end == 0 || !after[end..].starts_with('"') {
            continue;
        }
        return Some(after[..end].split('|').map(str::to_string).collect());
    }
    None
}
