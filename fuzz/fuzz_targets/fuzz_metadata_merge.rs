#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;

use chatmeta::metadata::{merge_at, Document, KeyPath, MergeError};

// Input layout: `<key path>\n<existing document JSON>\n<incoming value JSON>`
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let mut parts = text.splitn(3, '\n');
    let (Some(path), Some(existing), Some(incoming)) = (parts.next(), parts.next(), parts.next())
    else {
        return;
    };
    let Ok(Value::Object(existing)) = serde_json::from_str::<Value>(existing) else {
        return;
    };
    let Ok(incoming) = serde_json::from_str::<Value>(incoming) else {
        return;
    };

    let path = KeyPath::parse(path);
    let mut document: Document = existing.clone();
    match merge_at(&mut document, &path, incoming.clone()) {
        Ok(()) => {
            if path.is_root() {
                assert!(incoming.is_object());
                return;
            }
            // The terminal entry holds the incoming value, or a superset of
            // it when both sides were objects.
            let mut node = &document;
            let (terminal, parents) = path.segments().split_last().unwrap();
            for segment in parents {
                node = node[segment].as_object().expect("intermediate must be an object");
            }
            match (&node[terminal], &incoming) {
                (Value::Object(merged), Value::Object(incoming)) => {
                    for (key, value) in incoming {
                        assert_eq!(merged.get(key), Some(value));
                    }
                }
                (stored, incoming) => assert_eq!(stored, incoming),
            }
        }
        Err(MergeError::TypeMismatch { .. }) => {
            assert!(path.is_root());
            assert_eq!(document, existing);
        }
        Err(MergeError::PathConflict { .. }) => {
            assert_eq!(document, existing);
        }
    }
});
