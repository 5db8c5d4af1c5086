use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Line,
    Word,
    Char,
}

pub const DEFAULT_UNITS: [Unit; 3] = [Unit::Line, Unit::Word, Unit::Char];

const MAX_NUMBERING_PASSES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("header and part numbering leave no room for text within {limit} chars")]
    HeaderTooLong { limit: usize },
    #[error("a {unit:?} unit of {length} chars does not fit into the {available} chars left")]
    UnitTooLong {
        unit: Unit,
        length: usize,
        available: usize,
    },
    #[error("part numbering did not settle")]
    Unsettled,
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub header_separator: String,
    pub include_part_numbers: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            header_separator: "\n".to_string(),
            include_part_numbers: true,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Units keep their trailing separator so that joining them gives the body back.
fn tokenize(body: &str, unit: Unit) -> Vec<&str> {
    match unit {
        Unit::Line => body.split_inclusive('\n').collect(),
        Unit::Word => body.split_inclusive(' ').collect(),
        Unit::Char => body
            .char_indices()
            .map(|(start, c)| &body[start..start + c.len_utf8()])
            .collect(),
    }
}

/// Prefix of fragment `index` out of `total`, e.g. `Report (2/3)\n` or `(2/3)\n`.
pub fn part_prefix(header: &str, options: &SplitOptions, index: usize, total: usize) -> String {
    let separator = &options.header_separator;
    match (options.include_part_numbers, header.is_empty()) {
        (true, false) => format!("{} ({}/{}){}", header, index, total, separator),
        (true, true) => format!("({}/{}){}", index, total, separator),
        (false, false) => format!("{}{}", header, separator),
        (false, true) => String::new(),
    }
}

fn pack<F>(units: &[&str], unit: Unit, max_len: usize, prefix: F) -> Result<Vec<String>, SplitError>
where
    F: Fn(usize) -> String,
{
    let mut parts = Vec::new();
    let mut next = 0;
    while next < units.len() {
        let mut part = prefix(parts.len() + 1);
        let prefix_len = char_len(&part);
        if prefix_len >= max_len {
            return Err(SplitError::HeaderTooLong { limit: max_len });
        }
        let budget = max_len - prefix_len;
        let mut used = 0;
        while let Some(piece) = units.get(next) {
            let length = char_len(piece);
            if used + length > budget {
                break;
            }
            part.push_str(piece);
            used += length;
            next += 1;
        }
        if used == 0 {
            return Err(SplitError::UnitTooLong {
                unit,
                length: char_len(units[next]),
                available: budget,
            });
        }
        parts.push(part);
    }
    Ok(parts)
}

/// Splits `body` into fragments of at most `max_len` chars cutting only at `unit`
/// boundaries. Every fragment of a split text starts with the header and, when
/// enabled, its `(i/n)` number.
pub fn split_text(
    header: &str,
    body: &str,
    max_len: usize,
    unit: Unit,
    options: &SplitOptions,
) -> Result<Vec<String>, SplitError> {
    let whole = if header.is_empty() {
        body.to_string()
    } else {
        format!("{}{}{}", header, options.header_separator, body)
    };
    if char_len(&whole) <= max_len {
        return Ok(vec![whole]);
    }
    let units = tokenize(body, unit);
    if units.is_empty() {
        return Err(SplitError::HeaderTooLong { limit: max_len });
    }
    if !options.include_part_numbers {
        return pack(&units, unit, max_len, |index| {
            part_prefix(header, options, index, 0)
        });
    }
    // Prefix width depends on the digit count of the total, so pack until the
    // total used in the prefixes matches the number of parts produced.
    let mut total = 1;
    for _ in 0..MAX_NUMBERING_PASSES {
        let parts = pack(&units, unit, max_len, |index| {
            part_prefix(header, options, index, total)
        })?;
        if parts.len() == total {
            return Ok(parts);
        }
        total = parts.len();
    }
    Err(SplitError::Unsettled)
}

/// Tries each unit in turn, moving to a finer one only when a single unit of the
/// current kind cannot fit into a fragment.
pub fn split_text_by_units(
    header: &str,
    body: &str,
    max_len: usize,
    units: &[Unit],
    options: &SplitOptions,
) -> Result<Vec<String>, SplitError> {
    let mut last_error = SplitError::HeaderTooLong { limit: max_len };
    for unit in units {
        match split_text(header, body, max_len, *unit, options) {
            Ok(parts) => return Ok(parts),
            Err(err @ SplitError::UnitTooLong { .. }) => last_error = err,
            Err(err) => return Err(err),
        }
    }
    Err(last_error)
}
