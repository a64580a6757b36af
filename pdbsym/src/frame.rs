//! Parsing of raw `module+offset` frame strings.

use crate::error::{Error, ErrorKind};

/// Extensions accepted on the module side of a frame.
const IMAGE_EXTENSIONS: &[&str] = &[".dll", ".exe"];
const PDB_EXTENSION: &str = ".pdb";

/// A frame string split into module name and offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsedFrame<'a> {
    /// The module name or path, with surrounding whitespace and quotes removed.
    pub image: &'a str,
    /// The offset from the module base.
    pub offset: u64,
    /// Whether the module names a PDB rather than an image.
    pub is_pdb: bool,
}

fn parse_error(input: &str, reason: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::Parse,
        format!("failed to parse call stack string {input:?}: {reason}"),
    )
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '"')
}

fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.is_char_boundary(s.len() - suffix.len())
        && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Parses a frame of the form `<module> + <offset>`.
///
/// The string is split at the first `+`. The module must end in `.dll`, `.exe` or `.pdb` in any
/// casing; the offset is evaluated with [`parse_number`].
///
/// # Example
///
/// ```
/// let frame = pdbsym::parse_frame("\"mylib.dll\" + 0x1A4").unwrap();
/// assert_eq!(frame.image, "mylib.dll");
/// assert_eq!(frame.offset, 0x1a4);
/// assert!(!frame.is_pdb);
/// ```
pub fn parse_frame(input: &str) -> Result<ParsedFrame<'_>, Error> {
    let (image, offset) = input
        .split_once('+')
        .ok_or_else(|| parse_error(input, "no `+` in the string"))?;

    let image = strip_quotes(image);
    if image.is_empty() {
        return Err(parse_error(input, "empty image name"));
    }

    let offset = strip_quotes(offset);
    if offset.is_empty() {
        return Err(parse_error(input, "empty offset"));
    }

    let is_pdb = ends_with_ignore_case(image, PDB_EXTENSION);
    if !is_pdb
        && !IMAGE_EXTENSIONS
            .iter()
            .any(|ext| ends_with_ignore_case(image, ext))
    {
        return Err(parse_error(
            input,
            format_args!("{image:?} must end with \".dll\", \".exe\" or \".pdb\""),
        ));
    }

    let offset = parse_number(offset)
        .map_err(|_| parse_error(input, format_args!("{offset:?} is not a valid number")))?;

    Ok(ParsedFrame {
        image,
        offset,
        is_pdb,
    })
}

fn parse_literal(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u64::from_str_radix(hex, 16).ok()
        }
        Some(_) => None,
        None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
        None => None,
    }
}

/// Evaluates an offset expression.
///
/// Literals are decimal, or hexadecimal with a `0x` prefix. Literals may be joined with `+` and
/// `-`. The expression is split at the first operator and the right-hand side is evaluated
/// recursively, so `a-b-c` evaluates as `a-(b-c)`. Mixed operators follow the same rule, so
/// `10-4+1` is `10-(4+1)`. Arithmetic wraps around at 2^64.
///
/// ```
/// assert_eq!(pdbsym::parse_number("0x10+0x4-0x1").unwrap(), 0x13);
/// assert_eq!(pdbsym::parse_number("10-4-1").unwrap(), 7);
/// ```
pub fn parse_number(s: &str) -> Result<u64, Error> {
    let invalid = || Error::new(ErrorKind::Parse, format!("invalid number {s:?}"));

    let Some(pos) = s.find(['+', '-']) else {
        return parse_literal(s).ok_or_else(invalid);
    };

    let left = parse_literal(&s[..pos]).ok_or_else(invalid)?;
    let right = parse_number(&s[pos + 1..])?;

    Ok(match s.as_bytes()[pos] {
        b'+' => left.wrapping_add(right),
        _ => left.wrapping_sub(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_parse_happy_path() {
        let frame = parse_frame("mylib.dll+0x1A4").unwrap();
        assert_eq!(
            frame,
            ParsedFrame {
                image: "mylib.dll",
                offset: 0x1a4,
                is_pdb: false,
            }
        );
    }

    #[test]
    fn test_parse_arithmetic_offset() {
        let frame = parse_frame("a.exe+0x10+0x4-0x1").unwrap();
        assert_eq!(frame.image, "a.exe");
        assert_eq!(frame.offset, 0x13);
    }

    #[test]
    fn test_parse_pdb_any_case() {
        let frame = parse_frame("C:\\sym\\MyLib.PDB + 4096").unwrap();
        assert_eq!(frame.image, "C:\\sym\\MyLib.PDB");
        assert_eq!(frame.offset, 4096);
        assert!(frame.is_pdb);
    }

    #[test]
    fn test_parse_quoted_path_with_spaces() {
        let frame = parse_frame("  \"C:\\Program Files\\app\\app.exe\" +0x20 ").unwrap();
        assert_eq!(frame.image, "C:\\Program Files\\app\\app.exe");
        assert_eq!(frame.offset, 0x20);
    }

    #[test]
    fn test_parse_bad_extension() {
        let err = parse_frame("notes.txt+0x10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_parse_missing_parts() {
        assert!(parse_frame("mylib.dll").is_err());
        assert!(parse_frame("+0x10").is_err());
        assert!(parse_frame("mylib.dll+").is_err());
        assert!(parse_frame("mylib.dll+ \"\" ").is_err());
        assert!(parse_frame("mylib.dll+0xZZ").is_err());
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(parse_number("0").unwrap(), 0);
        assert_eq!(parse_number(" 42 ").unwrap(), 42);
        assert_eq!(parse_number("0xffffffffffffffff").unwrap(), u64::MAX);
        assert_eq!(parse_number("0xAbC").unwrap(), 0xabc);
        assert!(parse_number("0x").is_err());
        assert!(parse_number("").is_err());
        assert!(parse_number("0x1g").is_err());
        assert!(parse_number("0x10000000000000000").is_err());
    }

    #[test]
    fn test_number_is_right_associative() {
        assert_eq!(parse_number("10-4-1").unwrap(), 10 - (4 - 1));
        assert_eq!(parse_number("10-4+1").unwrap(), 10 - (4 + 1));
    }

    #[test]
    fn test_number_mixed_operators() {
        assert_eq!(parse_number("10-4+1").unwrap(), 5);
        assert_eq!(parse_number("10+4-1").unwrap(), 13);
        assert_eq!(parse_number("0x10-0x4+0x1").unwrap(), 0xb);

        let frame = parse_frame("app.exe+10-4+1").unwrap();
        assert_eq!(frame.offset, 5);
    }

    #[test]
    fn test_number_wraps() {
        assert_eq!(parse_number("0xffffffffffffffff+2").unwrap(), 1);
        assert_eq!(parse_number("1-2").unwrap(), u64::MAX);
    }

    #[test]
    fn test_number_sum_property() {
        for (a, b) in [(0u64, 0u64), (1, u64::MAX), (0x1234, 0x10), (u64::MAX, u64::MAX)] {
            let expr = format!("{a:#x}+{b:#x}");
            assert_eq!(parse_number(&expr).unwrap(), a.wrapping_add(b), "{expr}");
        }
    }
}
