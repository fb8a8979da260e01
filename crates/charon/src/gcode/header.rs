//! The structured semicolon-comment header at the top of a g-code stream.
//!
//! Header lines look like `;KEY:value`, with `.`-separated nested keys. Two
//! dialects are recognised: "Griffin" with strict validation of required
//! fields, and "UltiGCode" which only pins the machine type. Anything else
//! is rejected.

use serde_json::Value;

use super::lines::LineRead;
use crate::error::{Error, Result};
use crate::metadata::{self, MetadataMap, Variant};

/// Headers never extend past this many lines; anything after is toolpath.
pub const MAX_HEADER_LINES: usize = 100;

/// Reads the header from `source` and returns the validated metadata as a
/// flat map, each key re-prefixed with `prefix`. Seekable sources are
/// rewound afterwards so they remain usable as the toolpath body.
#[tracing::instrument(level = "debug", skip(source))]
pub fn parse_header(source: &mut dyn LineRead, prefix: &str) -> Result<MetadataMap> {
    let mut flat = MetadataMap::new();
    let mut line = String::new();

    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if source.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if text.starts_with(";START_OF_HEADER") {
            continue;
        }
        if text.starts_with(";LAYER") || text.starts_with(";END_OF_HEADER") {
            break;
        }
        let Some(comment) = text.strip_prefix(';') else {
            continue;
        };
        let Some((raw_key, raw_value)) = comment.split_once(':') else {
            continue;
        };
        let key = raw_key.trim().to_lowercase();
        let value = raw_value.trim();
        // The header version is compared verbatim, never parsed.
        let parsed = if key == "header_version" {
            Variant::String(value.to_string())
        } else {
            Variant::parse_literal(value)
        };
        flat.insert(key, parsed);
    }

    source.rewind()?;

    let mut document = metadata::unfold(&flat, '.')?;
    validate_dialect(&mut document)?;

    let mut result = MetadataMap::new();
    metadata::fold(&document, "", &mut result)?;
    if prefix.is_empty() {
        return Ok(result);
    }
    let base = prefix.trim_end_matches('/');
    Ok(result
        .into_iter()
        .map(|(key, value)| (format!("{}{}", base, key), value))
        .collect())
}

fn validate_dialect(document: &mut Value) -> Result<()> {
    let flavor = lookup(document, "flavor")
        .and_then(Value::as_str)
        .map(str::to_string);
    match flavor.as_deref() {
        Some("Griffin") => validate_griffin(document),
        Some("UltiGCode") => {
            if let Some(root) = document.as_object_mut() {
                root.insert(
                    "machine_type".to_string(),
                    Value::String("ultimaker2".to_string()),
                );
            }
            Ok(())
        }
        Some(other) => Err(Error::InvalidHeader(format!(
            "unsupported g-code flavor {:?}",
            other
        ))),
        None => Err(Error::InvalidHeader(
            "the header does not declare a FLAVOR".to_string(),
        )),
    }
}

fn validate_griffin(document: &mut Value) -> Result<()> {
    match lookup(document, "header_version").and_then(Value::as_str) {
        Some("0.1") => {}
        _ => {
            return Err(Error::InvalidHeader(
                "unsupported HEADER_VERSION, expected \"0.1\"".to_string(),
            ))
        }
    }

    require_non_empty(document, "target_machine.name")?;
    require_non_empty(document, "generator.name")?;
    require_non_empty(document, "generator.version")?;
    require_non_empty(document, "generator.build_date")?;
    require_positive(document, "build_plate.initial_temperature")?;
    for bound in ["min", "max"] {
        for axis in ["x", "y", "z"] {
            require_number(document, &format!("print.size.{}.{}", bound, axis))?;
        }
    }

    match lookup(document, "print.time").or_else(|| lookup(document, "time")) {
        Some(value) if value.as_i64().map_or(false, |time| time >= 0) => {}
        Some(_) => {
            return Err(Error::InvalidHeader(
                "PRINT.TIME must be a non-negative integer".to_string(),
            ))
        }
        None => return Err(missing("print.time")),
    }

    for index in 0..10 {
        let train = format!("extruder_train.{}", index);
        if lookup(document, &train).is_none() {
            continue;
        }
        require_positive(document, &format!("{}.nozzle.diameter", train))?;
        require_positive(document, &format!("{}.material.volume_used", train))?;
        require_positive(document, &format!("{}.initial_temperature", train))?;
    }

    restructure_griffin(document);
    Ok(())
}

/// Renames the validated fields into their public shape: the machine type is
/// hoisted out of `target_machine`, the print volume collapses into
/// `min_size`/`max_size`, and extruder trains are re-keyed as `extruders`.
fn restructure_griffin(document: &mut Value) {
    let root = match document.as_object_mut() {
        Some(map) => map,
        None => return,
    };

    if let Some(Value::Object(mut target_machine)) = root.remove("target_machine") {
        if let Some(name) = target_machine.remove("name") {
            root.insert("machine_type".to_string(), name);
        }
        if !target_machine.is_empty() {
            root.insert("target_machine".to_string(), Value::Object(target_machine));
        }
    }

    if let Some(Value::Object(print)) = root.get_mut("print") {
        if let Some(Value::Object(mut size)) = print.remove("size") {
            if let Some(min) = size.remove("min") {
                print.insert("min_size".to_string(), min);
            }
            if let Some(max) = size.remove("max") {
                print.insert("max_size".to_string(), max);
            }
            if !size.is_empty() {
                print.insert("size".to_string(), Value::Object(size));
            }
        }
    }

    if let Some(train) = root.remove("extruder_train") {
        root.insert("extruders".to_string(), train);
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = document;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn missing(path: &str) -> Error {
    Error::InvalidHeader(format!(
        "missing or empty required header field {}",
        path.to_uppercase()
    ))
}

fn require_non_empty(document: &Value, path: &str) -> Result<()> {
    let value = lookup(document, path).ok_or_else(|| missing(path))?;
    let empty = match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        Err(missing(path))
    } else {
        Ok(())
    }
}

fn require_number(document: &Value, path: &str) -> Result<()> {
    match lookup(document, path).and_then(Value::as_f64) {
        Some(_) => Ok(()),
        None => Err(missing(path)),
    }
}

fn require_positive(document: &Value, path: &str) -> Result<()> {
    match lookup(document, path).and_then(Value::as_f64) {
        Some(number) if number > 0.0 => Ok(()),
        Some(_) => Err(Error::InvalidHeader(format!(
            "{} must be a positive number",
            path.to_uppercase()
        ))),
        None => Err(missing(path)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gcode::lines::SeekableLines;
    use std::io::Cursor;

    const GRIFFIN_HEADER: &str = "\
;START_OF_HEADER
;HEADER_VERSION:0.1
;FLAVOR:Griffin
;GENERATOR.NAME:Cura_SteamEngine
;GENERATOR.VERSION:4.13.0
;GENERATOR.BUILD_DATE:2022-01-01
;TARGET_MACHINE.NAME:Ultimaker S5
;BUILD_PLATE.INITIAL_TEMPERATURE:60
;PRINT.TIME:5400
;PRINT.SIZE.MIN.X:0
;PRINT.SIZE.MIN.Y:0
;PRINT.SIZE.MIN.Z:0.27
;PRINT.SIZE.MAX.X:215
;PRINT.SIZE.MAX.Y:215
;PRINT.SIZE.MAX.Z:200
;EXTRUDER_TRAIN.0.NOZZLE.DIAMETER:0.4
;EXTRUDER_TRAIN.0.MATERIAL.VOLUME_USED:1242
;EXTRUDER_TRAIN.0.INITIAL_TEMPERATURE:205
;END_OF_HEADER
G0 X0 Y0
";

    fn parse(content: &str, prefix: &str) -> Result<MetadataMap> {
        let mut lines = SeekableLines::new(Cursor::new(content.as_bytes().to_vec()));
        parse_header(&mut lines, prefix)
    }

    #[test]
    fn griffin_header_is_parsed_and_restructured() {
        let header = parse(GRIFFIN_HEADER, "/toolpath/default/").unwrap();
        assert_eq!(
            Some(&Variant::String("Ultimaker S5".to_string())),
            header.get("/toolpath/default/machine_type")
        );
        assert_eq!(
            Some(&Variant::Int(5400)),
            header.get("/toolpath/default/print/time")
        );
        assert_eq!(
            Some(&Variant::Float(0.27)),
            header.get("/toolpath/default/print/min_size/z")
        );
        assert_eq!(
            Some(&Variant::Float(0.4)),
            header.get("/toolpath/default/extruders/0/nozzle/diameter")
        );
        // The header version is a verbatim string, never a float.
        assert_eq!(
            Some(&Variant::String("0.1".to_string())),
            header.get("/toolpath/default/header_version")
        );
        // The renamed subtrees are gone.
        assert!(header.get("/toolpath/default/target_machine/name").is_none());
        assert!(header
            .keys()
            .all(|key| !key.starts_with("/toolpath/default/extruder_train")));
    }

    #[test]
    fn missing_generator_name_is_reported_by_name() {
        let content = GRIFFIN_HEADER.replace(";GENERATOR.NAME:Cura_SteamEngine\n", "");
        let err = parse(&content, "").unwrap_err();
        match err {
            Error::InvalidHeader(message) => assert!(message.contains("GENERATOR.NAME")),
            other => panic!("expected InvalidHeader, got {:?}", other),
        }
    }

    #[test]
    fn wrong_header_version_is_rejected() {
        let content = GRIFFIN_HEADER.replace(";HEADER_VERSION:0.1\n", ";HEADER_VERSION:0.2\n");
        assert!(matches!(
            parse(&content, ""),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn ultigcode_pins_the_machine_type() {
        let header = parse(";FLAVOR:UltiGCode\n;TIME:100\nG0 X0\n", "").unwrap();
        assert_eq!(
            Some(&Variant::String("ultimaker2".to_string())),
            header.get("/machine_type")
        );
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        assert!(matches!(
            parse(";FLAVOR:Marlin\n", ""),
            Err(Error::InvalidHeader(_))
        ));
        assert!(matches!(parse("G0 X0\n", ""), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn header_reading_stops_at_the_line_limit() {
        // The flavor line is the 101st line and must never be classified as
        // header.
        let mut content = String::new();
        for index in 0..MAX_HEADER_LINES {
            content.push_str(&format!("; filler {}\n", index));
        }
        content.push_str(";FLAVOR:UltiGCode\n");
        assert!(matches!(
            parse(&content, ""),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn seekable_sources_are_rewound() {
        let mut lines =
            SeekableLines::new(Cursor::new(b";FLAVOR:UltiGCode\nG0 X0\n".to_vec()));
        parse_header(&mut lines, "").unwrap();
        let mut first = String::new();
        lines.read_line(&mut first).unwrap();
        assert_eq!(";FLAVOR:UltiGCode\n", first);
    }

    #[test]
    fn negative_print_time_is_rejected() {
        let content = GRIFFIN_HEADER.replace(";PRINT.TIME:5400\n", ";PRINT.TIME:-1\n");
        assert!(matches!(
            parse(&content, ""),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn extruder_validation_only_applies_to_present_trains() {
        // Drop the whole extruder train; the header is still valid.
        let content = GRIFFIN_HEADER
            .replace(";EXTRUDER_TRAIN.0.NOZZLE.DIAMETER:0.4\n", "")
            .replace(";EXTRUDER_TRAIN.0.MATERIAL.VOLUME_USED:1242\n", "")
            .replace(";EXTRUDER_TRAIN.0.INITIAL_TEMPERATURE:205\n", "");
        assert!(parse(&content, "").is_ok());

        // A present train with a missing field fails, naming the field.
        let content = GRIFFIN_HEADER.replace(";EXTRUDER_TRAIN.0.NOZZLE.DIAMETER:0.4\n", "");
        match parse(&content, "").unwrap_err() {
            Error::InvalidHeader(message) => {
                assert!(message.contains("EXTRUDER_TRAIN.0.NOZZLE.DIAMETER"))
            }
            other => panic!("expected InvalidHeader, got {:?}", other),
        }
    }

    #[test]
    fn filler_comment_lines_are_ignored() {
        let content = ";Generated with Cura\n;FLAVOR:UltiGCode\nG0 X0\n";
        // ";Generated with Cura" has no colon and is skipped...
        let header = parse(content, "").unwrap();
        assert_eq!(
            Some(&Variant::String("ultimaker2".to_string())),
            header.get("/machine_type")
        );
    }
}
