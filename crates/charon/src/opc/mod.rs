//! The Open Packaging Convention container engine.
//!
//! A container is a read/write façade over a ZIP archive: a content-types
//! manifest, a graph of relationship documents, hierarchical metadata stored
//! in JSON sidecars, and regex-driven path aliases, all addressed through
//! virtual paths. The product profiles (UFP, Cura package) differ only in
//! constants; see [`OpcProfile`].

mod content_types;
mod relationships;

pub use self::content_types::{ContentTypes, CONTENT_TYPES_FILE, RELATIONSHIPS_CONTENT_TYPE};
pub use self::relationships::{Relation, RelationSet, Relationships};

use std::collections::BTreeMap;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::dispatch::{EntryStream, EntryWriter, OpenMode};
use crate::error::{Error, Result};
use crate::gcode::{self, PlainLines};
use crate::metadata::{self, DataMap, MetadataMap, Variant};
use crate::paths::{
    self, ensure_leading_slash, validate_metadata_key, virtual_to_zip_name, zip_name_to_virtual,
    AliasTable, METADATA_PREFIX, RELS_PREFIX,
};
use crate::scale::{self, PngScaler};

lazy_static! {
    /// The `<W>x<H>` suffix of an image resize request, e.g. `300x300`.
    static ref RESIZE_SPEC: Regex = Regex::new(r"^\s*(\d+)\s*x\s*(\d+)\s*$").unwrap();
}

/// The constants that distinguish one product profile from another: MIME
/// type, global metadata sidecar, metadata relationship type, path aliases,
/// extra write-mode content types, and the optional g-code header fallback.
#[derive(Debug, Clone)]
pub struct OpcProfile {
    pub mime_type: &'static str,
    pub global_metadata_file: &'static str,
    pub metadata_relationship_type: &'static str,
    /// Alias rewrite rules, applied in declaration order.
    pub aliases: AliasTable,
    /// Content types guaranteed present when the container is writable.
    pub write_content_types: &'static [(&'static str, &'static str)],
    /// Archive entry whose g-code header supplies metadata when the relation
    /// walk yields none for it.
    pub gcode_fallback: Option<&'static str>,
}

impl OpcProfile {
    /// The bare OPC profile, without aliases or a fallback.
    pub fn opc() -> Self {
        OpcProfile {
            mime_type: "application/x-opc",
            global_metadata_file: "/Metadata/OPC_Global.json",
            metadata_relationship_type:
                "http://schemas.ultimaker.org/package/2018/relationships/opc_metadata",
            aliases: AliasTable::default(),
            write_content_types: &[],
            gcode_fallback: None,
        }
    }

    /// The Ultimaker Format Package profile.
    pub fn ufp() -> Self {
        OpcProfile {
            mime_type: "application/x-ufp",
            global_metadata_file: "/Metadata/UFP_Global.json",
            metadata_relationship_type:
                "http://schemas.ultimaker.org/package/2018/relationships/ufp_metadata",
            aliases: AliasTable::new(&[
                ("/preview/default", "/Metadata/thumbnail.png"),
                ("/preview", "/Metadata/thumbnail.png"),
                ("/toolpath/default", "/3D/model.gcode"),
                ("/toolpath", "/3D/model.gcode"),
            ]),
            write_content_types: &[],
            gcode_fallback: Some("/3D/model.gcode"),
        }
    }

    /// The Cura package profile, used to distribute materials, qualities,
    /// machine definitions and plugins.
    pub fn cura_package() -> Self {
        OpcProfile {
            mime_type: "application/x-curapackage",
            global_metadata_file: "/Metadata/package.json",
            metadata_relationship_type:
                "http://schemas.ultimaker.org/package/2018/relationships/curapackage_metadata",
            aliases: AliasTable::new(&[
                ("/materials", "/files/resources/materials"),
                ("/qualities", "/files/resources/qualities"),
                ("/definitions", "/files/resources/definitions"),
                ("/plugins", "/files/plugins"),
            ]),
            write_content_types: &[
                ("xml.fdm_material", "application/x-ultimaker-material-profile"),
                ("xml.fdm_material.sig", "application/x-ultimaker-material-sig"),
                ("inst.cfg", "application/x-ultimaker-quality-profile"),
                ("definition.json", "application/x-ultimaker-machine-profile"),
            ],
            gcode_fallback: None,
        }
    }

    pub fn for_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/x-opc" => Some(Self::opc()),
            "application/x-ufp" => Some(Self::ufp()),
            "application/x-curapackage" => Some(Self::cura_package()),
            _ => None,
        }
    }
}

enum Backing<S: Read + Write + Seek> {
    Read(ZipArchive<S>),
    Write(ZipWriter<S>),
}

#[derive(Debug, Clone)]
struct EntryInfo {
    zip_name: String,
    size: u64,
}

struct PendingEntry {
    virtual_path: String,
    buffer: Vec<u8>,
}

/// A container owns exactly one underlying byte stream and one ZIP view over
/// it, from open to [`close`](OpcContainer::close). Manifests and metadata
/// are read eagerly on open; in write mode they are regenerated and written
/// out on flush.
pub struct OpcContainer<S: Read + Write + Seek> {
    profile: OpcProfile,
    mode: OpenMode,
    backing: Option<Backing<S>>,
    content_types: ContentTypes,
    relations: Relationships,
    metadata: MetadataMap,
    scaler: Option<Box<dyn PngScaler>>,
    /// Read mode: every archive entry, keyed by canonical virtual path.
    entries: BTreeMap<String, EntryInfo>,
    /// Write mode: virtual paths of entries committed to the writer so far.
    written: Vec<String>,
    /// The single open writable entry stream, if any. Opening a new entry
    /// stream commits this one.
    pending: Option<PendingEntry>,
}

impl<S: Read + Write + Seek> OpcContainer<S> {
    /// Associates the underlying byte stream, opens the ZIP view in the
    /// requested mode, and eagerly loads content types, relations and
    /// metadata.
    #[tracing::instrument(level = "debug", skip(stream, profile), fields(mime = profile.mime_type))]
    pub fn open_stream(stream: S, profile: OpcProfile, mode: OpenMode) -> Result<Self> {
        let (backing, entries) = match mode {
            OpenMode::ReadOnly => {
                let mut archive = ZipArchive::new(stream)?;
                let mut entries = BTreeMap::new();
                for index in 0..archive.len() {
                    let file = archive.by_index(index)?;
                    entries.insert(
                        zip_name_to_virtual(file.name()),
                        EntryInfo {
                            zip_name: file.name().to_string(),
                            size: file.size(),
                        },
                    );
                }
                (Backing::Read(archive), entries)
            }
            OpenMode::WriteOnly => (Backing::Write(ZipWriter::new(stream)), BTreeMap::new()),
        };

        let mut container = OpcContainer {
            profile,
            mode,
            backing: Some(backing),
            content_types: ContentTypes::new(),
            relations: Relationships::new(),
            metadata: MetadataMap::new(),
            scaler: scale::default_scaler(),
            entries,
            written: Vec::new(),
            pending: None,
        };
        container.read_content_types()?;
        container.read_relationships()?;
        container.read_metadata()?;
        Ok(container)
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn mime_type(&self) -> &'static str {
        self.profile.mime_type
    }

    /// Replaces the injected PNG scaling capability.
    pub fn set_png_scaler(&mut self, scaler: Option<Box<dyn PngScaler>>) {
        self.scaler = scaler;
    }

    /// Flushes pending writes and releases the ZIP view. Write mode: the
    /// metadata sidecars, content types and relationship documents are
    /// written, in that order, and the central directory is finalised.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        if let Some(Backing::Write(writer)) = self.backing.take() {
            writer.finish()?;
        }
        Ok(())
    }

    /// Commits the open entry stream and regenerates the archive manifests.
    /// Metadata must be written first: it adds relations and a content type.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        self.commit_pending()?;
        self.write_metadata_sidecars()?;
        self.write_content_types()?;
        self.write_relationships()?;
        Ok(())
    }

    /// The union of metadata keys and canonicalised zip entry names.
    pub fn list_paths(&self) -> Vec<String> {
        let mut result: Vec<String> = self.metadata.keys().cloned().collect();
        match self.mode {
            OpenMode::ReadOnly => result.extend(self.entries.keys().cloned()),
            OpenMode::WriteOnly => result.extend(self.written.iter().cloned()),
        }
        result
    }

    /// Returns the metadata subtree for `/metadata/...` paths, or the
    /// resource bytes keyed by the requested path. A name clash resolves in
    /// favour of the resource.
    pub fn get_data(&mut self, virtual_path: &str) -> Result<DataMap> {
        if self.mode == OpenMode::WriteOnly {
            return Err(Error::WriteOnly);
        }
        if let Some(stripped) = virtual_path.strip_prefix(METADATA_PREFIX) {
            return self.get_metadata(stripped);
        }

        let canonical = self.canonicalize(virtual_path);
        let mut result = DataMap::new();
        if self.resource_exists(&canonical) {
            let bytes = self.read_resource(&canonical)?;
            result.insert(virtual_path.to_string(), Variant::Bytes(bytes));
        }
        Ok(result)
    }

    /// Writes each entry: metadata-prefixed keys are merged into the
    /// metadata store, everything else is streamed into the named resource.
    pub fn set_data(&mut self, data: DataMap) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            let path = data.keys().next().cloned().unwrap_or_default();
            return Err(Error::ReadOnly(path));
        }
        for (virtual_path, value) in data {
            if let Some(stripped) = virtual_path.strip_prefix(METADATA_PREFIX) {
                let mut update = MetadataMap::new();
                update.insert(stripped.to_string(), value);
                self.set_metadata(update)?;
                continue;
            }
            let bytes = match value {
                Variant::Bytes(bytes) => bytes,
                Variant::String(text) => text.into_bytes(),
                other => {
                    return Err(Error::InvalidMetadata(format!(
                        "resource {:?} requires bytes, got {:?}",
                        virtual_path, other
                    )))
                }
            };
            match self.get_stream(&virtual_path)? {
                EntryStream::Writer(mut writer) => writer.write_all(&bytes)?,
                EntryStream::Reader(_) => unreachable!("write-only container returned a reader"),
            }
        }
        Ok(())
    }

    /// Returns entries exactly matching the canonical path plus everything
    /// beneath it. Keys in the result carry the `/metadata` prefix and the
    /// *originally requested* (aliased) path, not the canonical one. A path
    /// ending in `/size` additionally reports the size of the underlying
    /// resource, if present.
    pub fn get_metadata(&self, virtual_path: &str) -> Result<MetadataMap> {
        if self.mode == OpenMode::WriteOnly {
            return Err(Error::WriteOnly);
        }
        let canonical = self.canonicalize(virtual_path);

        let mut result = MetadataMap::new();
        if let Some(value) = self.metadata.get(&canonical) {
            result.insert(
                format!("{}{}", METADATA_PREFIX, virtual_path),
                value.clone(),
            );
        }
        // Only subtrees match: a request for "/foo" must not pick up
        // "/foobar", so the prefix includes the separating slash.
        let child_prefix = format!("{}/", canonical);
        for (key, value) in &self.metadata {
            if let Some(suffix) = key.strip_prefix(child_prefix.as_str()) {
                result.insert(
                    format!("{}{}/{}", METADATA_PREFIX, virtual_path, suffix),
                    value.clone(),
                );
            }
        }

        if let Some(resource) = canonical.strip_suffix("/size") {
            if let Some(info) = self.entries.get(resource) {
                result.insert(
                    format!("{}{}", METADATA_PREFIX, virtual_path),
                    Variant::Int(info.size as i64),
                );
            }
        }
        Ok(result)
    }

    /// Canonicalises keys, validates them, and merges into the metadata
    /// store.
    pub fn set_metadata(&mut self, update: MetadataMap) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::ReadOnly("set_metadata".to_string()));
        }
        for (key, value) in update {
            let canonical = self.canonicalize(&key);
            validate_metadata_key(&canonical)?;
            self.metadata.insert(canonical, value);
        }
        Ok(())
    }

    /// Opens an entry stream in the container's mode.
    ///
    /// `/metadata/...` yields a read-only buffer with the serialised
    /// metadata subtree; `/_rels/...` is forbidden; `<png-path>/<W>x<H>` in
    /// read mode yields a freshly scaled PNG. Only one writable entry stream
    /// may be open at a time: opening a new one commits the previous.
    pub fn get_stream(&mut self, virtual_path: &str) -> Result<EntryStream<'_>> {
        if virtual_path.starts_with(RELS_PREFIX) {
            return Err(Error::ReservedPath(virtual_path.to_string()));
        }
        if let Some(stripped) = virtual_path.strip_prefix(METADATA_PREFIX) {
            let subtree = self.get_metadata(stripped)?;
            let mut object = serde_json::Map::new();
            for (key, value) in &subtree {
                object.insert(key.clone(), value.to_json()?);
            }
            let encoded = serde_json::to_vec(&Value::Object(object))?;
            return Ok(EntryStream::Reader(Box::new(Cursor::new(encoded))));
        }

        let canonical = self.canonicalize(virtual_path);
        match self.mode {
            OpenMode::WriteOnly => {
                self.commit_pending()?;
                self.pending = Some(PendingEntry {
                    virtual_path: canonical,
                    buffer: Vec::new(),
                });
                match &mut self.pending {
                    Some(entry) => Ok(EntryStream::Writer(EntryWriter::new(&mut entry.buffer))),
                    None => unreachable!(),
                }
            }
            OpenMode::ReadOnly => {
                if !self.resource_exists(&canonical) {
                    return Err(Error::NotFound(canonical));
                }
                if let Some((png_path, width, height)) = parse_resize_request(&canonical) {
                    let scaled = self.scaled_png(&png_path, width, height)?;
                    return Ok(EntryStream::Reader(Box::new(Cursor::new(scaled))));
                }
                let zip_name = match self.entries.get(&canonical) {
                    Some(info) => info.zip_name.clone(),
                    None => return Err(Error::NotFound(canonical)),
                };
                let archive = self.reader()?;
                let file = archive.by_name(&zip_name).map_err(|err| match err {
                    zip::result::ZipError::FileNotFound => Error::NotFound(canonical),
                    other => Error::Zip(other),
                })?;
                Ok(EntryStream::Reader(Box::new(file)))
            }
        }
    }

    /// Finalises the ZIP view, reads a slice of the underlying stream, and
    /// re-opens the ZIP for continued operation. `count: None` reads to the
    /// end of the stream.
    pub fn to_byte_array(&mut self, offset: u64, count: Option<u64>) -> Result<Vec<u8>> {
        if self.mode == OpenMode::WriteOnly {
            return Err(Error::WriteOnly);
        }
        let archive = match self.backing.take() {
            Some(Backing::Read(archive)) => archive,
            other => {
                self.backing = other;
                return Err(backing_unavailable());
            }
        };

        let mut stream = archive.into_inner();
        stream.seek(SeekFrom::Start(offset))?;
        let mut result = Vec::new();
        match count {
            Some(limit) => {
                std::io::Read::by_ref(&mut stream)
                    .take(limit)
                    .read_to_end(&mut result)?;
            }
            None => {
                stream.read_to_end(&mut result)?;
            }
        }
        self.backing = Some(Backing::Read(ZipArchive::new(stream)?));
        Ok(result)
    }

    /// Adds a default content type for `extension`. Fails with `Duplicate`
    /// when one already exists.
    pub fn add_content_type(&mut self, extension: &str, mime: &str) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::ReadOnly(format!("content type {:?}", extension)));
        }
        self.content_types.add_default(extension, mime)
    }

    /// Adds a relation about `origin` (the empty string denotes the archive
    /// root). Fails with `Duplicate` when a relation for the same target
    /// already exists within the origin.
    pub fn add_relation(&mut self, virtual_path: &str, rel_type: &str, origin: &str) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::ReadOnly(virtual_path.to_string()));
        }
        let canonical = self.canonicalize(virtual_path);
        self.relations.add(&canonical, rel_type, origin)
    }

    /// Adds a relation unless an equivalent one already exists.
    pub fn ensure_relation(&mut self, virtual_path: &str, rel_type: &str, origin: &str) -> Result<()> {
        match self.add_relation(virtual_path, rel_type, origin) {
            Err(Error::Duplicate(_)) => Ok(()),
            other => other,
        }
    }

    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    pub fn relations(&self) -> &Relationships {
        &self.relations
    }

    fn canonicalize(&self, virtual_path: &str) -> String {
        paths::canonicalize(virtual_path, &self.profile.aliases)
    }

    /// Whether a *resource* (not metadata) exists for the canonical path.
    /// Resize requests against an existing PNG count as existing.
    fn resource_exists(&self, canonical: &str) -> bool {
        if self.entries.contains_key(canonical) {
            return true;
        }
        self.entries.keys().any(|entry| {
            entry.ends_with(".png")
                && canonical
                    .strip_prefix(entry.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .is_some_and(|spec| RESIZE_SPEC.is_match(spec))
        })
    }

    /// Reads the full contents of a resource, scaling PNG resize requests.
    fn read_resource(&mut self, canonical: &str) -> Result<Vec<u8>> {
        if let Some((png_path, width, height)) = parse_resize_request(canonical) {
            return self.scaled_png(&png_path, width, height);
        }
        let zip_name = match self.entries.get(canonical) {
            Some(info) => info.zip_name.clone(),
            None => return Err(Error::NotFound(canonical.to_string())),
        };
        let archive = self.reader()?;
        let mut file = archive.by_name(&zip_name).map_err(|err| match err {
            zip::result::ZipError::FileNotFound => Error::NotFound(canonical.to_string()),
            other => Error::Zip(other),
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_resource_text(&mut self, canonical: &str) -> Result<String> {
        let bytes = self.read_resource(canonical)?;
        String::from_utf8(bytes).map_err(|err| {
            Error::InvalidMetadata(format!("{} is not valid UTF-8: {}", canonical, err))
        })
    }

    fn scaled_png(&mut self, png_path: &str, width: u32, height: u32) -> Result<Vec<u8>> {
        let png = self.read_resource(png_path)?;
        let scaler = self
            .scaler
            .as_ref()
            .ok_or_else(|| Error::Scaling("no png scaler is installed".to_string()))?;
        scaler.scale(&png, width, height)
    }

    fn reader(&mut self) -> Result<&mut ZipArchive<S>> {
        match &mut self.backing {
            Some(Backing::Read(archive)) => Ok(archive),
            _ => Err(backing_unavailable()),
        }
    }

    /// Commits the open entry stream, writing its buffered bytes into the
    /// archive.
    fn commit_pending(&mut self) -> Result<()> {
        if let Some(entry) = self.pending.take() {
            self.write_entry(&entry.virtual_path, &entry.buffer)?;
        }
        Ok(())
    }

    fn write_entry(&mut self, virtual_path: &str, bytes: &[u8]) -> Result<()> {
        let writer = match &mut self.backing {
            Some(Backing::Write(writer)) => writer,
            _ => return Err(backing_unavailable()),
        };
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(virtual_to_zip_name(virtual_path), options)?;
        writer.write_all(bytes)?;
        self.written.push(virtual_path.to_string());
        Ok(())
    }

    /// Loads the content-types manifest, or prepares a fresh one with the
    /// mandatory defaults in write mode.
    fn read_content_types(&mut self) -> Result<()> {
        match self.mode {
            OpenMode::ReadOnly => {
                if self.entries.contains_key(CONTENT_TYPES_FILE) {
                    let xml = self.read_resource_text(CONTENT_TYPES_FILE)?;
                    self.content_types = ContentTypes::parse(&xml)?;
                }
            }
            OpenMode::WriteOnly => {
                self.content_types.ensure_relationships_default();
                for (extension, mime) in self.profile.write_content_types {
                    self.content_types.add_default(extension, mime)?;
                }
            }
        }
        Ok(())
    }

    /// Loads every relationship document from the archive. The root document
    /// always exists, even when the archive carries none.
    fn read_relationships(&mut self) -> Result<()> {
        if self.mode != OpenMode::ReadOnly {
            return Ok(());
        }
        let rels_files: Vec<(String, String)> = self
            .entries
            .keys()
            .filter_map(|virtual_path| {
                Relationships::origin_for_rels_file(virtual_path)
                    .map(|origin| (origin, virtual_path.clone()))
            })
            .collect();
        for (origin, virtual_path) in rels_files {
            let xml = self.read_resource_text(&virtual_path)?;
            let set = RelationSet::parse(&xml)?;
            self.relations.insert(origin, set);
        }
        Ok(())
    }

    /// Walks the relationship graph for metadata sidecars and folds them
    /// into the metadata store. Depends on the relations: read those first.
    fn read_metadata(&mut self) -> Result<()> {
        if self.mode == OpenMode::WriteOnly {
            return Ok(());
        }

        let rel_type = self.profile.metadata_relationship_type;
        let mut sidecars: Vec<(String, String)> = Vec::new();
        for (_origin, set) in self.relations.origins() {
            for relation in set.iter() {
                if relation.rel_type != rel_type {
                    continue;
                }
                let target = ensure_leading_slash(&relation.target);
                if !self.entries.contains_key(&target) {
                    // The sidecar this relation points at is unknown to us.
                    continue;
                }
                let base = if target == self.profile.global_metadata_file {
                    String::new()
                } else {
                    target
                        .strip_suffix(".json")
                        .unwrap_or(target.as_str())
                        .to_string()
                };
                sidecars.push((target, base));
            }
        }

        for (target, base) in sidecars {
            let text = self.read_resource_text(&target)?;
            let document: Value = serde_json::from_str(&text)?;
            metadata::fold(&document, &base, &mut self.metadata)?;
        }

        if let Some(fallback) = self.profile.gcode_fallback {
            let child_prefix = format!("{}/", fallback);
            let has_metadata = self.metadata.contains_key(fallback)
                || self.metadata.keys().any(|key| key.starts_with(&child_prefix));
            if !has_metadata && self.entries.contains_key(fallback) {
                tracing::debug!(path = fallback, "no sidecar metadata, parsing g-code header");
                let zip_name = match self.entries.get(fallback) {
                    Some(info) => info.zip_name.clone(),
                    None => unreachable!(),
                };
                let header = {
                    let archive = self.reader()?;
                    let file = archive.by_name(&zip_name)?;
                    let mut lines = PlainLines::new(BufReader::new(file));
                    gcode::parse_header(&mut lines, &child_prefix)?
                };
                self.metadata.extend(header);
            }
        }
        Ok(())
    }

    /// Serialises the metadata store to JSON sidecars: one global document,
    /// plus one `<resource>.json` next to each resource with metadata of its
    /// own. Adds the metadata relations and the `json` content type.
    fn write_metadata_sidecars(&mut self) -> Result<()> {
        if self.metadata.is_empty() {
            return Ok(());
        }
        let rel_type = self.profile.metadata_relationship_type;
        let global_file = self.profile.global_metadata_file;

        let mut remaining = self.metadata.clone();
        let mut per_resource: Vec<(String, MetadataMap)> = Vec::new();
        for resource in self.written.clone() {
            let prefix = format!("{}/", resource);
            let mut own = MetadataMap::new();
            remaining.retain(|key, value| match key.strip_prefix(prefix.as_str()) {
                Some(suffix) => {
                    own.insert(suffix.to_string(), value.clone());
                    false
                }
                None => true,
            });
            if !own.is_empty() {
                per_resource.push((resource, own));
            }
        }

        if !remaining.is_empty() {
            self.write_sidecar(global_file, &remaining)?;
            self.ensure_relation(global_file, rel_type, "")?;
        }
        for (resource, own) in per_resource {
            let sidecar = format!("{}.json", resource);
            self.write_sidecar(&sidecar, &own)?;
            self.ensure_relation(&sidecar, rel_type, "")?;
        }

        match self.content_types.add_default("json", "text/json") {
            // The container author may have registered this type already.
            Err(Error::Duplicate(_)) | Ok(()) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn write_sidecar(&mut self, virtual_path: &str, flat: &MetadataMap) -> Result<()> {
        let document = metadata::unfold(flat, '/')?;
        let encoded = metadata::to_sidecar_json(&document)?;
        self.write_entry(virtual_path, &encoded)
    }

    fn write_content_types(&mut self) -> Result<()> {
        let xml = self.content_types.to_xml()?;
        self.write_entry(CONTENT_TYPES_FILE, &xml)
    }

    fn write_relationships(&mut self) -> Result<()> {
        let documents: Vec<(String, Vec<u8>)> = self
            .relations
            .origins()
            .map(|(origin, set)| Ok((Relationships::rels_file_for_origin(origin), set.to_xml()?)))
            .collect::<Result<_>>()?;
        for (virtual_path, xml) in documents {
            self.write_entry(&virtual_path, &xml)?;
        }
        Ok(())
    }
}

/// Splits a canonical path of the form `<png-path>/<W>x<H>` into its resize
/// request, if it is one.
fn parse_resize_request(canonical: &str) -> Option<(String, u32, u32)> {
    let split = canonical.find(".png/")?;
    let png_path = &canonical[..split + ".png".len()];
    let spec = &canonical[split + ".png/".len()..];
    let captures = RESIZE_SPEC.captures(spec)?;
    let width = captures.get(1)?.as_str().parse().ok()?;
    let height = captures.get(2)?.as_str().parse().ok()?;
    Some((png_path.to_string(), width, height))
}

fn backing_unavailable() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::Other,
        "the archive backing is unavailable",
    ))
}
