//! Sort keys for the listing.

use std::cmp::Ordering;

use miette::{miette, Result};

use crate::list::ListEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Archive,
    Crc32,
    Offset,
    Size,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

/// Parse a comma separated key list (`a|archive`, `c|crc32`, `o|offset`,
/// `s|size`, `n|name`; `-` prefix for descending, `+` accepted). When no
/// name key is present, `name` is appended as an ascending tiebreaker.
pub fn parse_sort_keys(spec: &str) -> Result<Vec<SortKey>> {
    let mut keys = Vec::new();
    let mut by_name = false;

    for part in spec.split(',') {
        let lower = part.to_ascii_lowercase();
        let (key, descending) = match lower.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (lower.strip_prefix('+').unwrap_or(&lower), false),
        };

        let field = match key {
            "a" | "archive" => SortField::Archive,
            "c" | "crc32" => SortField::Crc32,
            "o" | "offset" => SortField::Offset,
            "s" | "size" => SortField::Size,
            "n" | "name" => {
                by_name = true;
                SortField::Name
            }
            _ => return Err(miette!("illegal sort key: \"{part}\"")),
        };
        keys.push(SortKey { field, descending });
    }

    if !by_name {
        keys.push(SortKey {
            field: SortField::Name,
            descending: false,
        });
    }
    Ok(keys)
}

/// Compare two listing entries by a key chain.
pub fn compare(a: &ListEntry, b: &ListEntry, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match key.field {
            SortField::Archive => a.archive_index.cmp(&b.archive_index),
            SortField::Crc32 => a.crc32.cmp(&b.crc32),
            SortField::Offset => a.offset.cmp(&b.offset),
            SortField::Size => a.size.cmp(&b.size),
            SortField::Name => a.path.cmp(&b.path),
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{parse_sort_keys, SortField, SortKey};

    #[test]
    fn short_and_long_keys_parse() {
        let keys = parse_sort_keys("a,crc32,-s").unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey {
                    field: SortField::Archive,
                    descending: false
                },
                SortKey {
                    field: SortField::Crc32,
                    descending: false
                },
                SortKey {
                    field: SortField::Size,
                    descending: true
                },
                // Appended tiebreaker
                SortKey {
                    field: SortField::Name,
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn explicit_name_key_is_not_duplicated() {
        let keys = parse_sort_keys("-n").unwrap();
        assert_eq!(
            keys,
            vec![SortKey {
                field: SortField::Name,
                descending: true
            }]
        );
    }

    #[test]
    fn illegal_keys_are_rejected() {
        assert!(parse_sort_keys("bogus").is_err());
        assert!(parse_sort_keys("a,,s").is_err());
    }
}
