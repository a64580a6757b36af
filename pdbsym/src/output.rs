//! Rendering of resolved frames, as text for humans or as a JSON dump of the [`Context`].

use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::{Context, ModuleFrame, ResolvedFrame};
use crate::error::Error;

/// The first line of the human-readable output.
pub const READABLE_HEADER: &str = "--- Resolved Callstacks ---";

/// Serialized form of a [`ResolvedFrame`].
///
/// Offsets are hex strings with a `0x` prefix and line numbers are decimal strings. Absent fields
/// are omitted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct FrameRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdb: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdb_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_offset: Option<String>,
}

fn hex(value: u64) -> String {
    format!("{value:#x}")
}

fn parse_hex(field: &str, value: Option<String>) -> Result<Option<u64>, String> {
    let Some(value) = value else {
        return Ok(None);
    };

    value
        .strip_prefix("0x")
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .map(Some)
        .ok_or_else(|| format!("invalid hex number {value:?} in {field:?}"))
}

impl From<ResolvedFrame> for FrameRepr {
    fn from(frame: ResolvedFrame) -> Self {
        match frame {
            ResolvedFrame::Comment(raw) => FrameRepr {
                comment: Some(raw),
                ..FrameRepr::default()
            },
            ResolvedFrame::Module(frame) => FrameRepr {
                comment: None,
                image: frame.image,
                pdb: frame.pdb,
                pdb_signature: frame.pdb_signature.map(|s| s.to_string()),
                image_offset: Some(hex(frame.image_offset)),
                function: frame.function,
                function_offset: frame.function_offset.map(hex),
                line: frame.file,
                line_no: frame.line.map(|line| line.to_string()),
                line_offset: frame.line_offset.map(hex),
            },
        }
    }
}

impl TryFrom<FrameRepr> for ResolvedFrame {
    type Error = String;

    fn try_from(repr: FrameRepr) -> Result<Self, Self::Error> {
        if let Some(raw) = repr.comment {
            return Ok(ResolvedFrame::Comment(raw));
        }

        let pdb_signature = repr
            .pdb_signature
            .map(|s| s.parse().map_err(|e| format!("{e} {s:?}")))
            .transpose()?;
        let line = repr
            .line_no
            .map(|s| s.parse().map_err(|_| format!("invalid line number {s:?}")))
            .transpose()?;

        Ok(ResolvedFrame::Module(ModuleFrame {
            image: repr.image,
            pdb: repr.pdb,
            pdb_signature,
            image_offset: parse_hex("image_offset", repr.image_offset)?
                .ok_or("missing \"image_offset\"")?,
            function: repr.function,
            function_offset: parse_hex("function_offset", repr.function_offset)?,
            file: repr.line,
            line,
            line_offset: parse_hex("line_offset", repr.line_offset)?,
        }))
    }
}

/// Formats a frame as a single line of human-readable output.
///
/// ```text
/// mylib.dll!foo + 0x24 [src.c @ 17] + 0x4
/// mylib.dll!0x1a4
/// ```
pub struct ReadableFrame<'a>(pub &'a ResolvedFrame);

impl fmt::Display for ReadableFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = match self.0 {
            ResolvedFrame::Comment(raw) => return f.write_str(raw),
            ResolvedFrame::Module(frame) => frame,
        };

        write!(f, "{}!", frame.module_name())?;
        match frame.function {
            Some(ref function) => write!(
                f,
                "{} + {:#x}",
                function,
                frame.function_offset.unwrap_or_default()
            )?,
            None => write!(f, "{:#x}", frame.image_offset)?,
        }

        if let (Some(_), Some(file), Some(line)) = (&frame.function, &frame.file, frame.line) {
            write!(
                f,
                " [{file} @ {line}] + {:#x}",
                frame.line_offset.unwrap_or_default()
            )?;
        }

        Ok(())
    }
}

/// Writes the human-readable output: a header followed by one line per frame.
pub fn write_readable<W: Write>(context: &Context, mut writer: W) -> Result<(), Error> {
    writeln!(writer, "{READABLE_HEADER}")?;
    for frame in context.resolved() {
        writeln!(writer, "{}", ReadableFrame(frame))?;
    }
    Ok(())
}

/// Writes the full context as pretty-printed JSON.
pub fn write_json<W: Write>(context: &Context, mut writer: W) -> Result<(), Error> {
    serde_json::to_writer_pretty(&mut writer, context)?;
    writeln!(writer)?;
    Ok(())
}

/// Renders the full context as pretty-printed JSON.
pub fn to_json(context: &Context) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(context)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use similar_asserts::assert_eq;

    fn resolved() -> ModuleFrame {
        ModuleFrame {
            image: Some(PathBuf::from("/app/mylib.dll")),
            pdb: Some(PathBuf::from("/c/mylib.pdb/ABCDEF0123456789ABCDEF01234567802/mylib.pdb")),
            pdb_signature: "ABCDEF0123456789ABCDEF01234567802".parse().ok(),
            image_offset: 0x1024,
            function: Some("foo".into()),
            function_offset: Some(0x24),
            file: Some("src.c".into()),
            line: Some(17),
            line_offset: Some(0x4),
        }
    }

    #[test]
    fn test_readable_resolved() {
        let frame = ResolvedFrame::Module(resolved());
        assert_eq!(
            ReadableFrame(&frame).to_string(),
            "mylib.dll!foo + 0x24 [src.c @ 17] + 0x4"
        );
    }

    #[test]
    fn test_readable_unresolved() {
        let frame = ResolvedFrame::Module(ModuleFrame {
            image: Some(PathBuf::from("/app/mylib.dll")),
            image_offset: 0x1a4,
            ..Default::default()
        });
        assert_eq!(ReadableFrame(&frame).to_string(), "mylib.dll!0x1a4");
    }

    #[test]
    fn test_readable_without_line() {
        let frame = ResolvedFrame::Module(ModuleFrame {
            file: None,
            line: None,
            line_offset: None,
            ..resolved()
        });
        assert_eq!(ReadableFrame(&frame).to_string(), "mylib.dll!foo + 0x24");
    }

    #[test]
    fn test_readable_comment() {
        let frame = ResolvedFrame::Comment("notes.txt+0x10".into());
        assert_eq!(ReadableFrame(&frame).to_string(), "notes.txt+0x10");
    }

    #[test]
    fn test_frame_json() {
        let json = serde_json::to_value(ResolvedFrame::Module(resolved())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "image": "/app/mylib.dll",
                "pdb": "/c/mylib.pdb/ABCDEF0123456789ABCDEF01234567802/mylib.pdb",
                "pdb_signature": "ABCDEF0123456789ABCDEF01234567802",
                "image_offset": "0x1024",
                "function": "foo",
                "function_offset": "0x24",
                "line": "src.c",
                "line_no": "17",
                "line_offset": "0x4",
            })
        );
    }

    #[test]
    fn test_frame_json_read_back() {
        let frame = ResolvedFrame::Module(resolved());
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: ResolvedFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);

        let comment: ResolvedFrame = serde_json::from_str(r#"{"comment": "junk"}"#).unwrap();
        assert_eq!(comment, ResolvedFrame::Comment("junk".into()));
    }

    #[test]
    fn test_frame_json_invalid_offset() {
        let result = serde_json::from_str::<ResolvedFrame>(r#"{"image_offset": "12"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_windows_paths_are_escaped() {
        let frame = ResolvedFrame::Module(ModuleFrame {
            image: Some(PathBuf::from("C:\\app\\mylib.dll")),
            image_offset: 0x10,
            ..Default::default()
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"image":"C:\\app\\mylib.dll","image_offset":"0x10"}"#);
        assert_eq!(
            serde_json::from_str::<ResolvedFrame>(&json)
                .unwrap()
                .as_module()
                .and_then(|f| f.image.as_deref()),
            Some(Path::new("C:\\app\\mylib.dll"))
        );
    }
}
