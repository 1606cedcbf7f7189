//! OOXML (DOCX) marker placement.
//!
//! The marker is stored as the `meve_marker` custom document property in
//! `docProps/custom.xml`. Word shows it under File > Properties and carries it
//! through ordinary saves. The package is patched through [`ArchivePart`] so
//! the document body and every other part are copied as-is.

pub mod xml;

use std::io::Cursor;

use tracing::{debug, instrument};
use zip::ZipArchive;

use super::archive::{ArchivePart, ZipArchivePart};
use super::{ContainerCodec, ContainerFormat};
use crate::error::{MeveError, Result};
use crate::marker::{self, WatermarkPayload};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const CUSTOM_PART: &str = "docProps/custom.xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub struct DocxCodec;

/// Zip archive containing `[Content_Types].xml`.
pub(crate) fn is_ooxml(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
        && ZipArchive::new(Cursor::new(bytes))
            .map(|archive| archive.index_for_name(CONTENT_TYPES_PART).is_some())
            .unwrap_or(false)
}

fn utf8_part(path: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| MeveError::MalformedContainer(format!("{path} is not UTF-8")))
}

fn malformed(e: MeveError) -> MeveError {
    match e {
        MeveError::Archive(inner) => MeveError::MalformedContainer(inner.to_string()),
        other => other,
    }
}

impl DocxCodec {
    /// Patch the package parts in `archive` to carry `token`.
    fn patch<A: ArchivePart>(archive: &mut A, token: &str) -> Result<()> {
        let content_types = archive
            .read(CONTENT_TYPES_PART)?
            .ok_or_else(|| MeveError::MalformedContainer("missing [Content_Types].xml".into()))?;
        let content_types = utf8_part(CONTENT_TYPES_PART, content_types)?;

        let custom = match archive.read(CUSTOM_PART)? {
            Some(bytes) => utf8_part(CUSTOM_PART, bytes)?,
            None => {
                debug!("Creating docProps/custom.xml");
                xml::empty_custom_properties()
            }
        };

        archive.write(
            CUSTOM_PART,
            xml::upsert_marker_property(&custom, token)?.into_bytes(),
        );
        archive.write(
            CONTENT_TYPES_PART,
            xml::ensure_content_type_override(&content_types)?.into_bytes(),
        );

        if let Some(rels) = archive.read(PACKAGE_RELS_PART)? {
            let rels = utf8_part(PACKAGE_RELS_PART, rels)?;
            archive.write(
                PACKAGE_RELS_PART,
                xml::ensure_custom_relationship(&rels)?.into_bytes(),
            );
        }
        Ok(())
    }
}

impl ContainerCodec for DocxCodec {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Docx
    }

    #[instrument(level = "debug", skip_all, fields(format = "docx", bytes = original.len()))]
    fn embed(&self, original: &[u8], payload: &WatermarkPayload) -> Result<Vec<u8>> {
        let token = marker::encode(payload)?;
        let mut archive = ZipArchivePart::open(original).map_err(malformed)?;
        Self::patch(&mut archive, &token).map_err(malformed)?;
        archive.finish().map_err(malformed)
    }

    fn extract(&self, bytes: &[u8]) -> Option<WatermarkPayload> {
        let mut archive = ZipArchivePart::open(bytes).ok()?;
        let custom = archive.read(CUSTOM_PART).ok()??;
        let custom = String::from_utf8_lossy(&custom);
        match xml::marker_property(&custom) {
            Some(property) => marker::decode(property),
            None => marker::decode(&custom),
        }
    }
}
