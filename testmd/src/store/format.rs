//! Markers and escaping shared by the accepted-file reader and writer

pub const WARNING: &str =
    "**NOTE: This output is generated and parsed by TestMD. Please read it, but DO NOT EDIT MANUALLY**";

pub const SEPARATOR: &str = "---------------------------------------";
pub const NO_PERMUTATIONS: &str = "**NO PERMUTATIONS**";
pub const NOTES_HEADER: &str = "#### Notes ####";
pub const RESULTS_HEADER: &str = "#### Results ####";
pub const VERIFIED_MARKER: &str = "(verified)";
pub const NOT_VERIFIED_MARKER: &str = "_NOT VERIFIED";

pub const PERMUTATION_COLUMN: &str = "Permutation";
pub const VERIFIED_COLUMN: &str = "Verified";
pub const DETAILS_COLUMN: &str = "RESULTS";

/// Prefix of every line of a multi-line value
pub const INDENT: &str = "    ";

const LINE_BREAK: &str = "<br>";

const DECODE_TOKENS: [(&str, char); 3] = [(LINE_BREAK, '\n'), ("&lt;", '<'), ("&amp;", '&')];

fn numeric_entity(c: char) -> String {
    format!("&#{};", u32::from(c))
}

/// Decode a leading `&#NNN;` entity, returning the character and the entity length.
fn decode_numeric_entity(value: &str) -> Option<(char, usize)> {
    let digits = value.strip_prefix("&#")?;
    let end = digits.find(';')?;
    if end == 0 || !digits[..end].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let c = digits[..end].parse::<u32>().ok().and_then(char::from_u32)?;
    Some((c, end + 3))
}

/// Escape a value for a single-line, pipe-delimited context.
///
/// Reversed exactly by [`unescape_cell`]. Spaces at either end are escaped so trimming
/// table cells never loses them.
pub fn escape_cell(value: &str) -> String {
    let first_content = value.find(|c: char| c != ' ');
    let last_content = value.rfind(|c: char| c != ' ');

    let mut out = String::with_capacity(value.len());
    for (index, c) in value.char_indices() {
        match c {
            '&' => out.push_str("&amp;"),
            '|' => out.push_str(&numeric_entity('|')),
            '\n' => out.push_str(LINE_BREAK),
            '<' if value[index..].starts_with(LINE_BREAK) => out.push_str("&lt;"),
            ' ' if first_content.map_or(true, |first| index < first)
                || last_content.map_or(true, |last| index > last) =>
            {
                out.push_str(&numeric_entity(' '))
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape a key of a `- **key:** value` entry or a details cell.
///
/// Keys additionally never contain `*` or `:`, so the markers around them stay
/// unambiguous whatever the value holds.
pub fn escape_key(key: &str) -> String {
    escape_cell(key)
        .chars()
        .map(|c| match c {
            '*' | ':' => numeric_entity(c),
            c => c.to_string(),
        })
        .collect()
}

/// Escape a not-verified message for the `Verified` table column, where the bare
/// words `true` and `false` mark the status itself.
pub fn escape_verified_message(message: &str) -> String {
    let escaped = escape_cell(message);
    match escaped.chars().next() {
        Some(first) if escaped == "true" || escaped == "false" => {
            format!("{}{}", numeric_entity(first), &escaped[first.len_utf8()..])
        }
        _ => escaped,
    }
}

/// Reverse [`escape_cell`], [`escape_key`] and [`escape_verified_message`].
pub fn unescape_cell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(c) = rest.chars().next() {
        if let Some((decoded, length)) = decode_numeric_entity(rest) {
            out.push(decoded);
            rest = &rest[length..];
            continue;
        }
        match DECODE_TOKENS.iter().find(|(token, _)| rest.starts_with(token)) {
            Some((token, decoded)) => {
                out.push(*decoded);
                rest = &rest[token.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}
