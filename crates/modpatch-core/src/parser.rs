//! Parser turning an add-on's LSX documents into entity model instances

use crate::error::{Error, Result};
use crate::lsx::{LsxDocument, LsxNode};
use crate::model::{AddonIdentity, AddonMetadata, ProgressionEntry, Progressions, StringSet, SubClass};
use crate::scanner::AddonFiles;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Parse an add-on from the text of its documents
///
/// A progressions document that fails to parse turns the whole progression
/// list into `Progressions::Skipped`; no partial list is ever returned. The
/// metadata document has to parse for the add-on to be identified at all.
pub fn parse_addon(
    meta: &str,
    progressions: Option<&str>,
    class_descriptions: Option<&str>,
) -> Result<AddonMetadata> {
    let identity = parse_meta(meta)?;

    let progressions = match progressions {
        None => Progressions::Skipped {
            reason: "no progression table".to_string(),
        },
        Some(text) => {
            let names = match class_descriptions.map(parse_class_descriptions) {
                Some(Ok(names)) => names,
                Some(Err(e)) => {
                    warn!("{}: ignoring class descriptions: {}", identity.name, e);
                    HashMap::new()
                }
                None => HashMap::new(),
            };
            match parse_progressions(text, &names) {
                Ok(entries) => Progressions::Parsed { entries },
                Err(e) => {
                    debug!("{}: progression table rejected: {}", identity.name, e);
                    Progressions::Skipped {
                        reason: e.to_string(),
                    }
                }
            }
        }
    };

    Ok(AddonMetadata {
        identity,
        progressions,
    })
}

/// Load an add-on from the documents located in its unpacked tree
pub fn load_addon(files: &AddonFiles) -> Result<AddonMetadata> {
    let meta = read(&files.meta)?;
    let progressions = files.progressions.as_deref().map(read).transpose()?;
    let class_descriptions = match files.class_descriptions.as_deref().map(read) {
        Some(Ok(text)) => Some(text),
        Some(Err(e)) => {
            warn!("ignoring class descriptions: {}", e);
            None
        }
        None => None,
    };

    parse_addon(
        &meta,
        progressions.as_deref(),
        class_descriptions.as_deref(),
    )
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse the `ModuleInfo` node of a metadata document
pub fn parse_meta(text: &str) -> Result<AddonIdentity> {
    let doc = LsxDocument::parse(text, "meta.lsx")?;
    let info = doc.first("ModuleInfo").ok_or_else(|| Error::MissingNode {
        document: "meta.lsx".to_string(),
        node: "ModuleInfo".to_string(),
    })?;

    let name = info.required("Name")?.to_string();
    Ok(AddonIdentity {
        uuid: info.required("UUID")?.to_string(),
        author: info.attribute("Author").unwrap_or_default().to_string(),
        folder: info
            .attribute("Folder")
            .filter(|f| !f.is_empty())
            .unwrap_or(name.as_str())
            .to_string(),
        description: info.attribute("Description").unwrap_or_default().to_string(),
        name,
    })
}

/// Parse every `Progression` node of a progressions document
///
/// `class_names` maps class UUIDs to display names and is used to replace the
/// placeholder name of matching subclass references.
pub fn parse_progressions(
    text: &str,
    class_names: &HashMap<String, String>,
) -> Result<Vec<ProgressionEntry>> {
    let doc = LsxDocument::parse(text, "Progressions.lsx")?;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for node in doc.nodes("Progression") {
        let entry = parse_progression(node, class_names)?;
        if !seen.insert(entry.uuid.clone()) {
            return Err(Error::DuplicateProgression(entry.uuid));
        }
        entries.push(entry);
    }

    Ok(entries)
}

fn parse_progression(
    node: &LsxNode,
    class_names: &HashMap<String, String>,
) -> Result<ProgressionEntry> {
    let mut entry = ProgressionEntry::new(
        node.required("UUID")?,
        node.required("Name")?,
        node.required("TableUUID")?,
        parse_u8(node, "Level")?,
        parse_u8(node, "ProgressionType")?,
    );

    entry.boosts = optional_set(node, "Boosts");
    entry.passives_added = optional_set(node, "PassivesAdded");
    entry.passives_removed = optional_set(node, "PassivesRemoved");
    entry.selectors = optional_set(node, "Selectors");
    entry.allow_improvement = optional_bool(node, "AllowImprovement")?;
    entry.is_multiclass = optional_bool(node, "IsMulticlass")?;

    for sub in node.descendants("SubClass") {
        let uuid = sub.required("Object")?;
        if entry.find_subclass(uuid).is_some() {
            continue;
        }
        let subclass = match class_names.get(uuid) {
            Some(name) => SubClass::named(uuid, name.as_str()),
            None => SubClass::new(uuid),
        };
        entry.subclasses.push(subclass);
    }

    Ok(entry)
}

fn parse_u8(node: &LsxNode, id: &str) -> Result<u8> {
    let raw = node.required(id)?;
    raw.trim().parse::<u8>().map_err(|e| Error::InvalidValue {
        attribute: id.to_string(),
        value: raw.to_string(),
        message: e.to_string(),
    })
}

fn optional_set(node: &LsxNode, id: &str) -> StringSet {
    node.attribute(id).map(StringSet::parse).unwrap_or_default()
}

fn optional_bool(node: &LsxNode, id: &str) -> Result<Option<bool>> {
    let Some(raw) = node.attribute(id) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(Error::InvalidValue {
            attribute: id.to_string(),
            value: raw.to_string(),
            message: "expected a boolean".to_string(),
        }),
    }
}

/// A class or subclass declared in a class-descriptions document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescription {
    pub uuid: String,
    pub name: String,
    /// Set for subclasses, pointing at their parent class
    pub parent_guid: Option<String>,
}

/// Parse every `ClassDescription` node; nodes without UUID or Name are skipped
pub fn parse_class_description_list(text: &str) -> Result<Vec<ClassDescription>> {
    let doc = LsxDocument::parse(text, "ClassDescriptions.lsx")?;
    Ok(doc
        .nodes("ClassDescription")
        .into_iter()
        .filter_map(|node| {
            Some(ClassDescription {
                uuid: node.attribute("UUID")?.to_string(),
                name: node.attribute("Name")?.to_string(),
                parent_guid: node
                    .attribute("ParentGuid")
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            })
        })
        .collect())
}

/// UUID to class name lookup built from a class-descriptions document
pub fn parse_class_descriptions(text: &str) -> Result<HashMap<String, String>> {
    Ok(parse_class_description_list(text)?
        .into_iter()
        .map(|desc| (desc.uuid, desc.name))
        .collect())
}
