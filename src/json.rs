use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

/// Pretty JSON with 4-space indentation. Maps backed by `BTreeMap` (and
/// `serde_json::Map` without `preserve_order`) come out key-sorted.
pub(crate) fn to_pretty_bytes<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    out.push(b'\n');
    Ok(out)
}
