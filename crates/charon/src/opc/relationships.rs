//! OPC relationship documents, grouped by origin.
//!
//! The origin is the virtual path of the document the relationships are
//! about; the empty string denotes the archive root. Each origin maps to one
//! `Relationships` XML document stored at `<dir>/_rels/<name>.rels`, or
//! `/_rels/.rels` for the root.

use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};

const RELATIONSHIPS_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: String,
    pub target: String,
    pub rel_type: String,
}

/// The relationships of a single origin document.
#[derive(Debug, Clone, Default)]
pub struct RelationSet {
    relations: Vec<Relation>,
}

impl RelationSet {
    /// Parses one relationships document. Entries missing any of the three
    /// required attributes are skipped.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut set = RelationSet::default();
        loop {
            match reader.read_event()? {
                Event::Start(element) | Event::Empty(element) => {
                    if element.local_name().as_ref() != b"Relationship" {
                        continue;
                    }
                    let (mut id, mut target, mut rel_type) = (None, None, None);
                    for attribute in element.attributes() {
                        let attribute = attribute?;
                        match attribute.key.local_name().as_ref() {
                            b"Id" => id = Some(attribute.unescape_value()?.into_owned()),
                            b"Target" => target = Some(attribute.unescape_value()?.into_owned()),
                            b"Type" => rel_type = Some(attribute.unescape_value()?.into_owned()),
                            _ => {}
                        }
                    }
                    match (id, target, rel_type) {
                        (Some(id), Some(target), Some(rel_type)) => {
                            set.relations.push(Relation {
                                id,
                                target,
                                rel_type,
                            });
                        }
                        _ => tracing::debug!("skipping relationship with missing attributes"),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Adds a relation for `target`, allocating the smallest unused `rel<n>`
    /// id. Fails when a relation for the same target already exists in this
    /// document.
    pub fn add(&mut self, target: &str, rel_type: &str) -> Result<&Relation> {
        if self.relations.iter().any(|rel| rel.target == target) {
            return Err(Error::Duplicate(format!(
                "relation for virtual path {:?} already exists",
                target
            )));
        }

        let mut unique_id = 0usize;
        loop {
            let candidate = format!("rel{}", unique_id);
            if !self.relations.iter().any(|rel| rel.id == candidate) {
                self.relations.push(Relation {
                    id: candidate,
                    target: target.to_string(),
                    rel_type: rel_type.to_string(),
                });
                // Just pushed, so `last` is the new relation.
                return Ok(self.relations.last().unwrap_or_else(|| unreachable!()));
            }
            unique_id += 1;
        }
    }

    /// Emits the document with the standard processing-instruction header and
    /// two-space indentation.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("Relationships");
        root.push_attribute(("xmlns", RELATIONSHIPS_NAMESPACE));
        writer.write_event(Event::Start(root))?;

        for relation in &self.relations {
            let mut element = BytesStart::new("Relationship");
            element.push_attribute(("Id", relation.id.as_str()));
            element.push_attribute(("Target", relation.target.as_str()));
            element.push_attribute(("Type", relation.rel_type.as_str()));
            writer.write_event(Event::Empty(element))?;
        }

        writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
        Ok(writer.into_inner())
    }
}

/// All relationship documents of a container, keyed by origin.
#[derive(Debug, Default)]
pub struct Relationships {
    by_origin: BTreeMap<String, RelationSet>,
}

impl Relationships {
    /// A fresh set of relationships. The root document always exists.
    pub fn new() -> Self {
        let mut relationships = Relationships::default();
        relationships.by_origin.insert(String::new(), RelationSet::default());
        relationships
    }

    pub fn origins(&self) -> impl Iterator<Item = (&str, &RelationSet)> {
        self.by_origin.iter().map(|(origin, set)| (origin.as_str(), set))
    }

    pub fn get(&self, origin: &str) -> Option<&RelationSet> {
        self.by_origin.get(origin)
    }

    pub fn insert(&mut self, origin: String, set: RelationSet) {
        self.by_origin.insert(origin, set);
    }

    /// Adds a relation under `origin`, creating the origin document if
    /// needed.
    pub fn add(&mut self, target: &str, rel_type: &str, origin: &str) -> Result<()> {
        self.by_origin
            .entry(origin.to_string())
            .or_default()
            .add(target, rel_type)?;
        Ok(())
    }

    /// The virtual path of the `.rels` file storing `origin`'s document:
    /// `d/_rels/f.rels` for an origin `d/f`, `/_rels/.rels` for the root.
    pub fn rels_file_for_origin(origin: &str) -> String {
        match origin.rfind('/') {
            Some(split) => format!("{}/_rels/{}.rels", &origin[..split], &origin[split + 1..]),
            None => format!("/_rels/{}.rels", origin),
        }
    }

    /// The origin addressed by a `.rels` file, or `None` when the path does
    /// not name a relationships document.
    pub fn origin_for_rels_file(virtual_path: &str) -> Option<String> {
        let directory = &virtual_path[..virtual_path.rfind('/')?];
        if directory != "_rels" && !directory.ends_with("/_rels") {
            return None;
        }
        let file_name = &virtual_path[directory.len() + 1..];
        let origin_name = file_name.strip_suffix(".rels")?;
        let origin_directory = directory.strip_suffix("/_rels").unwrap_or("");
        if origin_directory.is_empty() {
            Some(origin_name.to_string())
        } else {
            Some(format!("{}/{}", origin_directory, origin_name))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_the_smallest_unused() {
        let mut set = RelationSet::default();
        assert_eq!("rel0", set.add("/a.json", "meta").unwrap().id);
        assert_eq!("rel1", set.add("/b.json", "meta").unwrap().id);

        // Parse a document with a gap and check the gap is filled.
        let mut sparse = RelationSet::default();
        sparse.relations.push(Relation {
            id: "rel1".to_string(),
            target: "/x.json".to_string(),
            rel_type: "meta".to_string(),
        });
        assert_eq!("rel0", sparse.add("/y.json", "meta").unwrap().id);
        assert_eq!("rel2", sparse.add("/z.json", "meta").unwrap().id);
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let mut set = RelationSet::default();
        set.add("/a.json", "meta").unwrap();
        let err = set.add("/a.json", "other").unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[test]
    fn ids_stay_unique_within_an_origin() {
        let mut set = RelationSet::default();
        for index in 0..10 {
            set.add(&format!("/file{}.json", index), "meta").unwrap();
        }
        let mut ids: Vec<_> = set.iter().map(|rel| rel.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(10, ids.len());
    }

    #[test]
    fn rels_file_layout() {
        assert_eq!("/_rels/.rels", Relationships::rels_file_for_origin(""));
        assert_eq!(
            "/3D/_rels/model.gcode.rels",
            Relationships::rels_file_for_origin("/3D/model.gcode")
        );
    }

    #[test]
    fn origin_from_rels_file() {
        assert_eq!(
            Some(String::new()),
            Relationships::origin_for_rels_file("/_rels/.rels")
        );
        assert_eq!(
            Some("/3D/model.gcode".to_string()),
            Relationships::origin_for_rels_file("/3D/_rels/model.gcode.rels")
        );
        assert_eq!(None, Relationships::origin_for_rels_file("/3D/model.gcode"));
        assert_eq!(None, Relationships::origin_for_rels_file("/nested/file.rels"));
    }

    #[test]
    fn structural_round_trip() {
        let mut set = RelationSet::default();
        set.add("/Metadata/UFP_Global.json", "ufp_metadata").unwrap();
        set.add("/3D/model.gcode", "toolpath").unwrap();

        let xml = String::from_utf8(set.to_xml().unwrap()).unwrap();
        assert!(xml.starts_with("<?xml"));

        let parsed = RelationSet::parse(&xml).unwrap();
        assert_eq!(set.relations, parsed.relations);
    }
}
