//! The `[Content_Types].xml` manifest: a flat set of default extension →
//! MIME-type mappings, plus any `Override` entries carried through from an
//! existing archive.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

/// Virtual path of the content types document.
pub const CONTENT_TYPES_FILE: &str = "/[Content_Types].xml";

/// MIME type of relationship documents. A writable container always carries
/// a default mapping `rels` → this type.
pub const RELATIONSHIPS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.relationships+xml";

const CONTENT_TYPES_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/content-types";

#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    /// `(extension, mime-type)` defaults in insertion order.
    defaults: Vec<(String, String)>,
    /// `(part-name, mime-type)` overrides, preserved for round-trips.
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a content types document. Unknown elements are ignored;
    /// `Default` and `Override` entries missing a required attribute are
    /// skipped.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut content_types = ContentTypes::new();
        loop {
            match reader.read_event()? {
                Event::Start(element) | Event::Empty(element) => {
                    match element.local_name().as_ref() {
                        b"Default" => {
                            let (mut extension, mut mime) = (None, None);
                            for attribute in element.attributes() {
                                let attribute = attribute?;
                                match attribute.key.local_name().as_ref() {
                                    b"Extension" => {
                                        extension = Some(attribute.unescape_value()?.into_owned())
                                    }
                                    b"ContentType" => {
                                        mime = Some(attribute.unescape_value()?.into_owned())
                                    }
                                    _ => {}
                                }
                            }
                            if let (Some(extension), Some(mime)) = (extension, mime) {
                                content_types.defaults.push((extension, mime));
                            }
                        }
                        b"Override" => {
                            let (mut part_name, mut mime) = (None, None);
                            for attribute in element.attributes() {
                                let attribute = attribute?;
                                match attribute.key.local_name().as_ref() {
                                    b"PartName" => {
                                        part_name = Some(attribute.unescape_value()?.into_owned())
                                    }
                                    b"ContentType" => {
                                        mime = Some(attribute.unescape_value()?.into_owned())
                                    }
                                    _ => {}
                                }
                            }
                            if let (Some(part_name), Some(mime)) = (part_name, mime) {
                                content_types.overrides.push((part_name, mime));
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(content_types)
    }

    pub fn contains_extension(&self, extension: &str) -> bool {
        self.defaults.iter().any(|(ext, _)| ext == extension)
    }

    /// Adds a default entry. Fails when a default for `extension` already
    /// exists.
    pub fn add_default(&mut self, extension: &str, mime: &str) -> Result<()> {
        if self.contains_extension(extension) {
            return Err(Error::Duplicate(format!(
                "content type for extension {:?} already exists",
                extension
            )));
        }
        self.defaults
            .push((extension.to_string(), mime.to_string()));
        Ok(())
    }

    /// Guarantees the default entry for relationship documents.
    pub fn ensure_relationships_default(&mut self) {
        if !self.contains_extension("rels") {
            self.defaults
                .push(("rels".to_string(), RELATIONSHIPS_CONTENT_TYPE.to_string()));
        }
    }

    /// Emits the document with the standard processing-instruction header,
    /// pretty-printed with two-space indentation. Round-trips are structural,
    /// not byte-identical.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut types = BytesStart::new("Types");
        types.push_attribute(("xmlns", CONTENT_TYPES_NAMESPACE));
        writer.write_event(Event::Start(types))?;

        for (extension, mime) in &self.defaults {
            let mut element = BytesStart::new("Default");
            element.push_attribute(("Extension", extension.as_str()));
            element.push_attribute(("ContentType", mime.as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        for (part_name, mime) in &self.overrides {
            let mut element = BytesStart::new("Override");
            element.push_attribute(("PartName", part_name.as_str()));
            element.push_attribute(("ContentType", mime.as_str()));
            writer.write_event(Event::Empty(element))?;
        }

        writer.write_event(Event::End(BytesEnd::new("Types")))?;
        Ok(writer.into_inner())
    }
}
