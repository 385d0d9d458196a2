//! Systemd unit-name handling: name splitting, escape decoding,
//! `%`-specifier expansion, and unit-file deserialization.

/// A single option read from a unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOption {
    /// Section the option appears in, without brackets.
    pub section: String,
    /// Option key.
    pub name: String,
    /// Option value, trimmed.
    pub value: String,
}

/// Identity variables available for `%`-specifier expansion in a unit's
/// option values.
#[derive(Debug, Clone, Default)]
pub struct UnitVars {
    /// Full unit file name, e.g. `web@blue.service`.
    pub unit_name: String,
    /// Prefix portion of the unit name.
    pub prefix_name: String,
    /// Instance portion of the unit name; empty for non-template units.
    pub instance_name: String,
    /// Id of the machine the unit is placed on.
    pub machine_id: String,
    /// Address of the machine as reported by the cluster registry.
    pub host_name: String,
}

/// Split a unit file name into `(prefix, instance, unit_type)`.
///
/// The last `.` separates the base from the type (the type keeps its
/// leading dot). Within the base, the first `@` separates prefix from
/// instance; everything after it belongs to the instance. No unescaping
/// is performed.
pub fn parse_unit_name(name: &str) -> (&str, &str, &str) {
    let Some(dot) = name.rfind('.') else {
        return (name, "", "");
    };
    let (base, unit_type) = name.split_at(dot);
    match base.find('@') {
        None => (base, "", unit_type),
        Some(at) => (&base[..at], &base[at + 1..], unit_type),
    }
}

/// Decode a systemd-escaped string: `-` becomes `/`, and every well-formed
/// `\xHH` becomes the byte 0xHH. A malformed escape leaves the `\` in the
/// output verbatim.
pub fn systemd_unescape(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' => {
                out.push(b'/');
                i += 1;
            }
            b'\\'
                if i + 3 < bytes.len()
                    && bytes[i + 1] == b'x'
                    && bytes[i + 2].is_ascii_hexdigit()
                    && bytes[i + 3].is_ascii_hexdigit() =>
            {
                let hex = &escaped[i + 2..i + 4];
                // both digits checked above
                let val = u8::from_str_radix(hex, 16).unwrap_or(b'?');
                out.push(val);
                i += 4;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl UnitVars {
    /// Build variables for a unit placed on a machine.
    pub fn new(unit_name: &str, machine_id: &str, host_name: &str) -> Self {
        let (prefix, instance, _) = parse_unit_name(unit_name);
        Self {
            unit_name: unit_name.to_string(),
            prefix_name: prefix.to_string(),
            instance_name: instance.to_string(),
            machine_id: machine_id.to_string(),
            host_name: host_name.to_string(),
        }
    }

    /// Substitute `%`-prefixed specifiers in a value.
    ///
    /// Supported: `%n`/`%N` unit name (raw/unescaped), `%p`/`%P` prefix,
    /// `%i`/`%I` instance, `%m` machine id, `%H` host name, `%%` a literal
    /// percent. Unknown specifiers and a trailing lone `%` pass through
    /// verbatim.
    pub fn expand_value(&self, val: &str) -> String {
        let mut out = String::with_capacity(val.len());
        let mut chars = val.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                None => out.push('%'),
                Some('n') => out.push_str(&self.unit_name),
                Some('N') => out.push_str(&systemd_unescape(&self.unit_name)),
                Some('p') => out.push_str(&self.prefix_name),
                Some('P') => out.push_str(&systemd_unescape(&self.prefix_name)),
                Some('i') => out.push_str(&self.instance_name),
                Some('I') => out.push_str(&systemd_unescape(&self.instance_name)),
                Some('m') => out.push_str(&self.machine_id),
                Some('H') => out.push_str(&self.host_name),
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
            }
        }
        out
    }
}

/// Deserialize a unit file into its ordered options.
///
/// Recognizes `[Section]` headers, `Key=Value` lines, `#`/`;` comments and
/// trailing-`\` line continuations. Lines outside any section and lines
/// without a `=` are ignored.
pub fn parse_unit_file(raw: &str) -> Vec<UnitOption> {
    let mut options = Vec::new();
    let mut section = String::new();
    let mut pending: Option<String> = None;

    for line in raw.lines() {
        let line = match pending.take() {
            Some(prev) => prev + line,
            None => line.to_string(),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            pending = Some(stripped.to_string());
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed[1..trimmed.len() - 1].to_string();
            continue;
        }
        if section.is_empty() {
            continue;
        }
        if let Some((name, value)) = trimmed.split_once('=') {
            options.push(UnitOption {
                section: section.clone(),
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }
    options
}
