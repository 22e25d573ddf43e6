//! Registering the patch in the game's installed-mods list (`modsettings.lsx`)
//!
//! Insertion is idempotent: a fragment is only added when no node with the
//! same id and UUID exists yet. The file is rewritten atomically so a failed
//! run never leaves a half-written list behind.

use crate::error::{Error, Result};
use crate::lsx::{read_attrs, LsxDocument};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const DOCUMENT: &str = "modsettings.lsx";

/// Where anchor nodes end and whether the UUID is already present
struct AnchorScan {
    last_end: Option<usize>,
    present: bool,
}

fn scan_anchors(document: &str, anchor: &str, uuid: &str) -> Result<AnchorScan> {
    let mut reader = Reader::from_str(document);
    let mut open: Vec<String> = Vec::new();
    let mut scan = AnchorScan {
        last_end: None,
        present: false,
    };

    loop {
        let event = reader.read_event().map_err(|e| Error::Xml {
            document: DOCUMENT.to_string(),
            message: format!("at byte {}: {}", reader.buffer_position(), e),
        })?;

        match event {
            Event::Start(e) if e.name().as_ref() == b"node" => {
                open.push(node_id(&read_attrs(&e, DOCUMENT)?));
            }
            Event::Empty(e) if e.name().as_ref() == b"node" => {
                if node_id(&read_attrs(&e, DOCUMENT)?) == anchor {
                    scan.last_end = Some(reader.buffer_position() as usize);
                }
            }
            Event::End(e) if e.name().as_ref() == b"node" => {
                if open.pop().as_deref() == Some(anchor) {
                    scan.last_end = Some(reader.buffer_position() as usize);
                }
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"attribute" => {
                if open.last().map(String::as_str) == Some(anchor) {
                    let attrs = read_attrs(&e, DOCUMENT)?;
                    let is_uuid = attrs.iter().any(|(k, v)| k == "id" && v == "UUID");
                    let matches = attrs.iter().any(|(k, v)| k == "value" && v == uuid);
                    if is_uuid && matches {
                        scan.present = true;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(scan)
}

fn node_id(attrs: &[(String, String)]) -> String {
    attrs
        .iter()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

/// Insert `fragment` after the last `anchor` node of `document`
///
/// The fragment must be a single node carrying a `UUID` attribute. Returns
/// `None` when a node with id `anchor` and that UUID already exists.
pub fn insert_if_absent(document: &str, anchor: &str, fragment: &str) -> Result<Option<String>> {
    let parsed = LsxDocument::parse(fragment, "fragment")?;
    let node = parsed.roots.first().ok_or_else(|| Error::MissingNode {
        document: "fragment".to_string(),
        node: anchor.to_string(),
    })?;
    let uuid = node.required("UUID")?;

    let scan = scan_anchors(document, anchor, uuid)?;
    if scan.present {
        debug!("{} node {} already present", anchor, uuid);
        return Ok(None);
    }

    let at = scan.last_end.ok_or_else(|| {
        Error::tool(DOCUMENT, format!("no '{}' node to insert after", anchor))
    })?;

    let mut patched = String::with_capacity(document.len() + fragment.len() + 1);
    patched.push_str(&document[..at]);
    patched.push('\n');
    patched.push_str(fragment.trim_end());
    patched.push_str(&document[at..]);
    Ok(Some(patched))
}

/// Apply every `(anchor, fragment)` insertion to the file at `path`
///
/// All insertions are computed in memory first; the file is only replaced,
/// atomically, when at least one of them changed the document. A copy of the
/// original is kept next to it with a `.bak` suffix. Returns whether the file
/// changed.
pub fn patch_file(path: &Path, insertions: &[(&str, &str)]) -> Result<bool> {
    let original = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut current = original.clone();
    let mut changed = false;
    for (anchor, fragment) in insertions {
        if let Some(next) = insert_if_absent(&current, anchor, fragment)? {
            current = next;
            changed = true;
        }
    }

    if !changed {
        info!("{} already lists the patch", path.display());
        return Ok(false);
    }

    fs::write(backup_path(path), &original)?;
    write_atomic(path, &current)?;
    info!("registered patch in {}", path.display());
    Ok(true)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Replace `path` with `contents` via a temporary file in the same directory
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SETTINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<save>
  <version major="4" minor="0" revision="9" build="331"/>
  <region id="ModuleSettings">
    <node id="root">
      <children>
        <node id="ModOrder">
          <children>
            <node id="Module">
              <attribute id="UUID" value="gustav" type="FixedString"/>
            </node>
          </children>
        </node>
        <node id="Mods">
          <children>
            <node id="ModuleShortDesc">
              <attribute id="Folder" value="GustavDev" type="LSString"/>
              <attribute id="UUID" value="gustav" type="FixedString"/>
            </node>
          </children>
        </node>
      </children>
    </node>
  </region>
</save>"#;

    const MODULE: &str = "<node id=\"Module\">\n<attribute id=\"UUID\" value=\"patch-1\" type=\"FixedString\"/>\n</node>\n";

    #[test]
    fn test_insert_after_last_anchor() {
        let patched = insert_if_absent(SETTINGS, "Module", MODULE).unwrap().unwrap();

        let doc = LsxDocument::parse(&patched, DOCUMENT).unwrap();
        let modules = doc.nodes("Module");
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[1].attribute("UUID"), Some("patch-1"));
        // inserted inside ModOrder, not after ModuleShortDesc
        assert_eq!(doc.first("ModOrder").unwrap().descendants("Module").len(), 2);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let once = insert_if_absent(SETTINGS, "Module", MODULE).unwrap().unwrap();
        assert!(insert_if_absent(&once, "Module", MODULE).unwrap().is_none());
    }

    #[test]
    fn test_existing_uuid_under_other_node_does_not_count() {
        let fragment = "<node id=\"Module\"><attribute id=\"UUID\" value=\"gustav\" type=\"FixedString\"/></node>";
        assert!(insert_if_absent(SETTINGS, "Module", fragment).unwrap().is_none());

        let short_desc_only = SETTINGS.replace(
            "<attribute id=\"UUID\" value=\"gustav\" type=\"FixedString\"/>\n            </node>\n          </children>\n        </node>\n        <node id=\"Mods\">",
            "<attribute id=\"UUID\" value=\"other\" type=\"FixedString\"/>\n            </node>\n          </children>\n        </node>\n        <node id=\"Mods\">",
        );
        assert!(insert_if_absent(&short_desc_only, "Module", fragment).unwrap().is_some());
    }

    #[test]
    fn test_missing_anchor_fails() {
        let err = insert_if_absent(SETTINGS, "Nope", "<node id=\"Nope\"><attribute id=\"UUID\" value=\"x\" type=\"FixedString\"/></node>")
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fragment_without_uuid() {
        let err = insert_if_absent(SETTINGS, "Module", "<node id=\"Module\"/>").unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { .. }));
    }

    #[test]
    fn test_patch_file_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DOCUMENT);
        fs::write(&path, SETTINGS).unwrap();

        let desc = "<node id=\"ModuleShortDesc\"><attribute id=\"UUID\" value=\"patch-1\" type=\"FixedString\"/></node>";
        let insertions = [("Module", MODULE), ("ModuleShortDesc", desc)];

        assert!(patch_file(&path, &insertions).unwrap());
        let first = fs::read_to_string(&path).unwrap();
        assert!(!patch_file(&path, &insertions).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), first);

        assert_eq!(
            fs::read_to_string(dir.path().join("modsettings.lsx.bak")).unwrap(),
            SETTINGS
        );
        let doc = LsxDocument::parse(&first, DOCUMENT).unwrap();
        assert_eq!(doc.nodes("ModuleShortDesc").len(), 2);
    }
}
