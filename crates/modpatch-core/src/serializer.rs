//! Rendering of the merged patch back into LSX documents
//!
//! Attribute values are written verbatim. Values read by the parser are kept
//! raw (entity references undecoded), so text that came from a well-formed
//! document stays well-formed.

use crate::model::{AddonMetadata, ProgressionEntry, StringSet};

/// `Version64` written into the patch's module info
pub const MODULE_VERSION64: &str = "72057594037927936";
/// `Version64` written into the installed-mods list entry
pub const SHORT_DESC_VERSION64: &str = "36028797018963968";
/// `PublishVersion` written into the patch's module info
pub const PUBLISH_VERSION: &str = "268435456";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Indenting line writer for LSX output
struct LsxWriter {
    out: String,
    depth: usize,
}

impl LsxWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, tag: &str) {
        self.line(tag);
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(tag);
    }

    fn open_node(&mut self, id: &str) {
        self.open(&format!(r#"<node id="{}">"#, id));
    }

    fn close_node(&mut self) {
        self.close("</node>");
    }

    fn empty_node(&mut self, id: &str) {
        self.line(&format!(r#"<node id="{}"/>"#, id));
    }

    fn attribute(&mut self, id: &str, kind: &str, value: &str) {
        self.line(&format!(
            r#"<attribute id="{}" type="{}" value="{}"/>"#,
            id, kind, value
        ));
    }

    fn comment(&mut self, text: &str) {
        self.line(&format!("<!-- {} -->", text.replace("--", "- -")));
    }

    fn finish(self) -> String {
        self.out
    }
}

fn set_attribute(w: &mut LsxWriter, id: &str, set: &StringSet) {
    if !set.is_empty() {
        w.attribute(id, "LSString", &set.join());
    }
}

fn flag_attribute(w: &mut LsxWriter, id: &str, flag: Option<bool>) {
    if let Some(value) = flag {
        w.attribute(id, "bool", if value { "true" } else { "false" });
    }
}

fn write_progression(w: &mut LsxWriter, entry: &ProgressionEntry) {
    w.comment(&entry.name);
    w.open_node("Progression");
    w.attribute("UUID", "guid", &entry.uuid);
    w.attribute("Name", "LSString", &entry.name);
    w.attribute("TableUUID", "guid", &entry.table_uuid);
    w.attribute("Level", "uint8", &entry.level.to_string());
    w.attribute("ProgressionType", "uint8", &entry.progression_type.to_string());
    set_attribute(w, "Boosts", &entry.boosts);
    set_attribute(w, "PassivesAdded", &entry.passives_added);
    set_attribute(w, "PassivesRemoved", &entry.passives_removed);
    set_attribute(w, "Selectors", &entry.selectors);
    flag_attribute(w, "AllowImprovement", entry.allow_improvement);
    flag_attribute(w, "IsMulticlass", entry.is_multiclass);

    if !entry.subclasses.is_empty() {
        w.open("<children>");
        w.open_node("SubClasses");
        w.open("<children>");
        for sub in &entry.subclasses {
            w.comment(&sub.name);
            w.open_node("SubClass");
            w.attribute("Object", "guid", &sub.uuid);
            w.close_node();
        }
        w.close("</children>");
        w.close_node();
        w.close("</children>");
    }

    w.close_node();
}

/// Render a single progression entry as a `Progression` node
pub fn render_progression(entry: &ProgressionEntry) -> String {
    let mut w = LsxWriter::new();
    write_progression(&mut w, entry);
    w.finish()
}

/// Render the progression-table document of a patch
pub fn render_progressions(patch: &AddonMetadata) -> String {
    let mut w = LsxWriter::new();
    w.line(XML_DECLARATION);
    w.open("<save>");
    w.line(r#"<version major="4" minor="0" revision="9" build="330"/>"#);
    w.open(r#"<region id="Progressions">"#);
    w.open_node("root");
    w.open("<children>");
    for entry in patch.entries() {
        write_progression(&mut w, entry);
    }
    w.close("</children>");
    w.close_node();
    w.close("</region>");
    w.close("</save>");
    w.finish()
}

/// Render the module-metadata document of a patch
pub fn render_metadata(patch: &AddonMetadata) -> String {
    let id = &patch.identity;
    let mut w = LsxWriter::new();
    w.line(XML_DECLARATION);
    w.open("<save>");
    w.line(r#"<version major="4" minor="0" revision="0" build="49"/>"#);
    w.open(r#"<region id="Config">"#);
    w.open_node("root");
    w.open("<children>");
    w.empty_node("Dependencies");
    w.open_node("ModuleInfo");
    w.attribute("Author", "LSWString", &id.author);
    w.attribute("CharacterCreationLevelName", "FixedString", "");
    w.attribute("Description", "LSWString", &id.description);
    w.attribute("Folder", "LSWString", &id.folder);
    w.attribute("GMTemplate", "FixedString", "");
    w.attribute("LobbyLevelName", "FixedString", "");
    w.attribute("MD5", "LSString", "");
    w.attribute("MainMenuBackgroundVideo", "FixedString", "");
    w.attribute("MenuLevelName", "FixedString", "");
    w.attribute("Name", "FixedString", &id.name);
    w.attribute("NumPlayers", "uint8", "4");
    w.attribute("PhotoBooth", "FixedString", "");
    w.attribute("StartupLevelName", "FixedString", "");
    w.attribute("Tags", "LSWString", "");
    w.attribute("Type", "FixedString", "Add-on");
    w.attribute("UUID", "FixedString", &id.uuid);
    w.attribute("Version64", "int64", MODULE_VERSION64);
    w.open("<children>");
    w.open_node("PublishVersion");
    w.attribute("Version", "int32", PUBLISH_VERSION);
    w.close_node();
    w.empty_node("Scripts");
    w.open_node("TargetModes");
    w.open("<children>");
    w.open_node("Target");
    w.attribute("Object", "FixedString", "Story");
    w.close_node();
    w.close("</children>");
    w.close_node();
    w.close("</children>");
    w.close_node();
    w.close("</children>");
    w.close_node();
    w.close("</region>");
    w.close("</save>");
    w.finish()
}

/// `Module` node registering the patch in the load order
pub fn render_module_reference(patch: &AddonMetadata) -> String {
    let mut w = LsxWriter::new();
    w.open_node("Module");
    w.attribute("UUID", "FixedString", &patch.identity.uuid);
    w.close_node();
    w.finish()
}

/// `ModuleShortDesc` node describing the patch in the installed-mods list
pub fn render_module_short_desc(patch: &AddonMetadata) -> String {
    let id = &patch.identity;
    let mut w = LsxWriter::new();
    w.open_node("ModuleShortDesc");
    w.attribute("Folder", "LSString", &id.folder);
    w.attribute("MD5", "LSString", "");
    w.attribute("Name", "LSString", &id.name);
    w.attribute("UUID", "FixedString", &id.uuid);
    w.attribute("Version64", "int64", SHORT_DESC_VERSION64);
    w.close_node();
    w.finish()
}
