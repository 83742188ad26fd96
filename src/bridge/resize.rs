//! Terminal resize control messages.
//!
//! A text frame whose payload is a JSON object with positive integer `rows`
//! and `cols` is a resize request. Anything else is terminal input, so a
//! user typing something that merely looks like JSON is never rejected.
//!
//! Keys match case-insensitively and a repeated key overrides the earlier
//! one. A `null` value leaves the field unset. Unknown keys are ignored.

use std::fmt;

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;

/// A decoded, validated resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeCommand {
    pub rows: u32,
    pub cols: u32,
}

/// Raw window size as sent by the client. Missing fields stay zero.
#[derive(Default)]
struct WindowSize {
    rows: i64,
    cols: i64,
}

impl<'de> Deserialize<'de> for WindowSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Objects only; the sequence form a derived impl would accept is input.
        deserializer.deserialize_map(WindowSizeVisitor)
    }
}

struct WindowSizeVisitor;

impl<'de> Visitor<'de> for WindowSizeVisitor {
    type Value = WindowSize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object with integer rows and cols")
    }

    fn visit_map<A>(self, mut map: A) -> Result<WindowSize, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut size = WindowSize::default();
        while let Some(key) = map.next_key::<String>()? {
            let field = if key.eq_ignore_ascii_case("rows") {
                &mut size.rows
            } else if key.eq_ignore_ascii_case("cols") {
                &mut size.cols
            } else {
                map.next_value::<IgnoredAny>()?;
                continue;
            };
            if let Some(value) = map.next_value::<Option<i64>>()? {
                *field = value;
            }
        }
        Ok(size)
    }
}

/// Decode a text payload as a resize request.
///
/// Returns `None` for malformed JSON, anything but an object, missing
/// fields, non-integer values, values `<= 0`, and values that do not fit in
/// a `u32`.
pub fn decode(text: &str) -> Option<ResizeCommand> {
    let size: WindowSize = serde_json::from_str(text).ok()?;
    if size.rows <= 0 || size.cols <= 0 {
        return None;
    }
    Some(ResizeCommand {
        rows: u32::try_from(size.rows).ok()?,
        cols: u32::try_from(size.cols).ok()?,
    })
}
