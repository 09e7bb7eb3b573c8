use std::path::PathBuf;

use warehouse_core::import::ImportInput;

/// Map command-line input arguments to batch inputs: `-` means standard
/// input, anything else is a file path.
pub fn to_import_inputs(args: &[String]) -> Vec<ImportInput> {
    args.iter()
        .map(|arg| {
            if arg == "-" {
                ImportInput::Stdin
            } else {
                ImportInput::Path(PathBuf::from(arg))
            }
        })
        .collect()
}

/// Shorten a content hash for human-readable listings.
pub fn short_hash(hash: &str) -> &str {
    if hash.len() > 12 {
        &hash[..12]
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_maps_to_stdin() {
        let inputs =
            to_import_inputs(&["a.xml".to_string(), "-".to_string(), "b.xml".to_string()]);
        assert_eq!(inputs.len(), 3);
        assert!(matches!(inputs[1], ImportInput::Stdin));
        assert_eq!(inputs[0].label(), "a.xml");
    }

    #[test]
    fn short_hash_truncates_long_digests() {
        assert_eq!(short_hash("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
