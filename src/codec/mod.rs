// The index file is one line of comma-separated slots. An empty field is an
// empty slot. A freshly bootstrapped file is just the bare key, which is the
// same thing as a one-slot tree.

use crate::{
    error::{Error, Result},
    tree::SlotTree,
};

pub const DELIMITER: char = ',';

pub fn encode(tree: &SlotTree) -> String {
    let mut out = String::new();
    for (i, slot) in tree.slots().iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        if let Some(key) = slot {
            out.push_str(key);
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<SlotTree> {
    let contents = std::str::from_utf8(bytes)
        .map_err(|e| Error::corrupt(format!("not valid UTF-8: {}", e)))?;

    if let Some(pos) = contents.find(['\n', '\r']) {
        return Err(Error::corrupt(format!("line break at byte {}", pos)));
    }

    let slots: Vec<Option<String>> = contents
        .split(DELIMITER)
        .map(|s| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_owned())
            }
        })
        .collect();

    // Nothing ever writes below an empty slot.
    for (i, slot) in slots.iter().enumerate().skip(1) {
        if slot.is_some() && slots[(i - 1) / 2].is_none() {
            return Err(Error::corrupt(format!(
                "slot {} is occupied but its parent slot {} is empty",
                i,
                (i - 1) / 2
            )));
        }
    }

    Ok(SlotTree::from_slots(slots))
}

/// Keys have to survive a round trip through the file format.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains([DELIMITER, '\n', '\r']) {
        return Err(Error::InvalidKey(key.to_owned()));
    }
    Ok(())
}

#[test]
fn test_decode_bootstrap_form() {
    let t = decode(b"alice").unwrap();
    assert_eq!(vec!["alice"], t.keys().collect::<Vec<_>>());
    assert_eq!(1, t.len());
}

#[test]
fn test_decode_holes() {
    let t = decode(b"m,b,,t").unwrap();
    assert_eq!(
        &[
            Some("m".to_owned()),
            Some("b".to_owned()),
            None,
            Some("t".to_owned())
        ],
        t.slots()
    );
    assert!(t.contains("m"));
    assert!(t.contains("t"));
    assert!(!t.contains(""));
}

#[test]
fn test_decode_empty_file() {
    let t = decode(b"").unwrap();
    assert_eq!(1, t.len());
    assert!(!t.is_empty());
    assert!(t.has_no_keys());
}

#[test]
fn test_trailing_holes_survive() {
    let t = decode(b"z,m,,b,,,,a,,").unwrap();
    assert_eq!(10, t.len());
    assert_eq!("z,m,,b,,,,a,,", encode(&t));
}

#[test]
fn test_decode_rejects_garbage() {
    let cases: [&[u8]; 5] = [b"m,\xff", b"m,b\n", b"m\r\n", b",b", b"m,,,,x"];
    for bad in cases {
        match decode(bad) {
            Err(Error::CorruptIndex { .. }) => {}
            other => panic!("expected corruption for {:?}, got {:?}", bad, other),
        }
    }
}

#[test]
fn test_validate_key() {
    assert!(validate_key("alice").is_ok());
    assert!(validate_key("").is_err());
    assert!(validate_key("a,b").is_err());
    assert!(validate_key("a\n").is_err());
}
