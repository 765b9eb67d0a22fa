//! Drive database preset parser (spec §4.H).
//!
//! Ported from `drivedb-parser.c`: a table of `(model_family, model_regexp,
//! firmware_regexp, presets)` records, where `presets` is a
//! smartmontools-style switch string (only `-v id,format[,name[,HDD|SSD]]`
//! entries are meaningful here; everything else, like `-F` quirks, is
//! ignored). `DEFAULTS` entries apply unconditionally and are overlaid
//! first; model-specific entries whose regexes match the queried
//! model/firmware string are applied after, last write wins per id.
//!
//! The full upstream `drivedb.h` is a vendored, independently-maintained
//! data file of several thousand entries; this module seeds a small
//! representative set (a `DEFAULTS` block plus a couple of real entries)
//! rather than vendoring that file wholesale -- see DESIGN.md.

use regex::Regex;
use std::collections::HashMap;

struct DriveSetting {
    model_family: &'static str,
    model_regexp: &'static str,
    firmware_regexp: &'static str,
    presets: &'static str,
}

const BUILTIN_KNOWN_DRIVES: &[DriveSetting] = &[
    DriveSetting {
        model_family: "DEFAULT",
        model_regexp: "",
        firmware_regexp: "",
        presets: "-v 9,minutes -v 192,emergencyretractcyclect",
    },
    DriveSetting {
        model_family: "Samsung based SSDs",
        model_regexp: "SAMSUNG SSD 8[46]0 (PRO|EVO).*",
        firmware_regexp: "",
        presets: "-v 5,raw48,Reallocated_Sector_Ct -v 9,raw48,Power_On_Hours -v 177,raw48,Wear_Leveling_Count",
    },
    DriveSetting {
        model_family: "USB: ...",
        model_regexp: ".*",
        firmware_regexp: "",
        presets: "-v 9,minutes",
    },
    DriveSetting {
        model_family: "VERSION: ...",
        model_regexp: ".*",
        firmware_regexp: "",
        presets: "-v 9,minutes",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveDbAttr {
    pub id: u8,
    pub name: String,
}

/// Parses `"id,format[,name[,HDD|SSD]]"`. Entries beginning with `N` (no id)
/// are ignored, as are malformed/out-of-range ids or empty names.
fn parse_attribute_def(arg: &str) -> Option<(u8, String)> {
    if arg.starts_with('N') {
        return None;
    }
    let mut parts = arg.splitn(4, ',');
    let id: u8 = parts.next()?.parse().ok().filter(|id| (1..=255u16).contains(&(*id as u16)))?;
    let _format = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() {
        return None;
    }
    Some((id, name.to_string()))
}

/// Scans a presets string for `-v <arg>` switches, ignoring all others.
fn parse_presets_str(presets: &str, attrs: &mut HashMap<u8, String>) {
    let mut tokens = presets.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "-v" {
            if let Some(arg) = tokens.next() {
                if let Some((id, name)) = parse_attribute_def(arg) {
                    attrs.insert(id, name);
                }
            }
        }
    }
}

/// Builds the `{attribute id -> overriding name}` map for `model`/`fw`:
/// `DEFAULTS` presets first (if `include_defaults`), then any
/// model-specific entry whose model (and, if present and `fw` given,
/// firmware) regex matches, later matches overwriting earlier ones for the
/// same id. `VERSION`/`USB` pseudo-families are always skipped, matching
/// the original's "assuming modelfamily=ATA from now on" comment.
pub fn drivedb_lookup(model: &str, fw: Option<&str>, include_defaults: bool) -> Vec<DriveDbAttr> {
    let mut attrs = HashMap::new();

    if include_defaults {
        for drive in BUILTIN_KNOWN_DRIVES {
            if drive.model_family.eq_ignore_ascii_case("DEFAULT") {
                parse_presets_str(drive.presets, &mut attrs);
            }
        }
    }

    for drive in BUILTIN_KNOWN_DRIVES {
        let family_lower = drive.model_family.to_ascii_lowercase();
        if drive.presets.len() < 5
            || family_lower.starts_with("version")
            || family_lower.starts_with("usb")
            || family_lower.starts_with("default")
        {
            continue;
        }
        let Ok(model_re) = Regex::new(drive.model_regexp) else {
            continue;
        };
        if !model_re.is_match(model) {
            continue;
        }
        if !drive.firmware_regexp.is_empty() {
            if let Some(fw) = fw.filter(|f| !f.is_empty()) {
                let Ok(fw_re) = Regex::new(drive.firmware_regexp) else {
                    continue;
                };
                if !fw_re.is_match(fw) {
                    continue;
                }
            }
        }
        parse_presets_str(drive.presets, &mut attrs);
    }

    let mut result: Vec<DriveDbAttr> = attrs
        .into_iter()
        .map(|(id, name)| DriveDbAttr { id, name })
        .collect();
    result.sort_by_key(|a| a.id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_model_matches() {
        let attrs = drivedb_lookup("Some Unknown Drive", None, true);
        assert!(attrs.iter().any(|a| a.id == 9 && a.name == "Power_On_Hours"));
    }

    #[test]
    fn model_specific_overrides_default() {
        let attrs = drivedb_lookup("SAMSUNG SSD 860 EVO 500GB", None, true);
        let nine = attrs.iter().find(|a| a.id == 9).unwrap();
        assert_eq!(nine.name, "Power_On_Hours");
        assert!(attrs.iter().any(|a| a.id == 177));
    }

    #[test]
    fn excluding_defaults_skips_default_block() {
        let attrs = drivedb_lookup("Completely Unmatched Model XYZ", None, false);
        assert!(attrs.is_empty());
    }

    #[test]
    fn parse_attribute_def_rejects_bad_input() {
        assert!(parse_attribute_def("N,raw48").is_none());
        assert!(parse_attribute_def("9").is_none());
        assert!(parse_attribute_def("9,raw48,").is_none());
        assert_eq!(
            parse_attribute_def("9,raw48,Power_On_Hours"),
            Some((9, "Power_On_Hours".to_string()))
        );
    }
}
