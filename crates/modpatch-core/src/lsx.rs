//! Minimal reader for Larian LSX documents
//!
//! Only the shapes this crate needs are modelled: `node` elements carrying
//! `attribute` elements and nested `node` children. Wrapper elements (`save`,
//! `region`, `children`, `version`) are walked through and otherwise ignored.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// An `<attribute id=".." type=".." value=".."/>` element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LsxAttribute {
    pub id: String,
    pub kind: String,
    /// Raw value text, entity references left undecoded
    pub value: String,
}

/// A `<node id="..">` element with its attributes and child nodes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LsxNode {
    pub id: String,
    pub attributes: Vec<LsxAttribute>,
    pub children: Vec<LsxNode>,
}

impl LsxNode {
    /// Value of a direct attribute
    pub fn attribute(&self, id: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.value.as_str())
    }

    /// Value of a direct attribute, or a `MissingAttribute` error
    pub fn required(&self, id: &str) -> Result<&str> {
        self.attribute(id).ok_or_else(|| Error::MissingAttribute {
            node: self.id.clone(),
            attribute: id.to_string(),
        })
    }

    /// All descendant nodes with the given id, depth-first, in document order
    pub fn descendants<'a>(&'a self, id: &str) -> Vec<&'a LsxNode> {
        let mut found = Vec::new();
        for child in &self.children {
            collect(child, id, &mut found);
        }
        found
    }
}

fn collect<'a>(node: &'a LsxNode, id: &str, found: &mut Vec<&'a LsxNode>) {
    if node.id == id {
        found.push(node);
    }
    for child in &node.children {
        collect(child, id, found);
    }
}

/// A parsed LSX document: the top-level nodes of every region
#[derive(Debug, Clone, Default)]
pub struct LsxDocument {
    pub roots: Vec<LsxNode>,
}

impl LsxDocument {
    /// Parse LSX text; `document` names the source in error messages
    pub fn parse(text: &str, document: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut roots = Vec::new();
        let mut stack: Vec<LsxNode> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| Error::Xml {
                document: document.to_string(),
                message: format!("at byte {}: {}", reader.buffer_position(), e),
            })?;

            match event {
                Event::Start(e) if e.name().as_ref() == b"node" => {
                    stack.push(read_node(&e, document)?);
                }
                Event::Empty(e) if e.name().as_ref() == b"node" => {
                    let node = read_node(&e, document)?;
                    attach(node, &mut stack, &mut roots);
                }
                Event::End(e) if e.name().as_ref() == b"node" => {
                    let node = stack.pop().ok_or_else(|| Error::Xml {
                        document: document.to_string(),
                        message: "unbalanced </node>".to_string(),
                    })?;
                    attach(node, &mut stack, &mut roots);
                }
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"attribute" => {
                    let attribute = read_attribute(&e, document)?;
                    let owner = stack.last_mut().ok_or_else(|| Error::Xml {
                        document: document.to_string(),
                        message: format!("attribute '{}' outside of a node", attribute.id),
                    })?;
                    owner.attributes.push(attribute);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::Xml {
                document: document.to_string(),
                message: format!("node '{}' is never closed", open.id),
            });
        }

        Ok(Self { roots })
    }

    /// All nodes with the given id, depth-first, in document order
    pub fn nodes<'a>(&'a self, id: &str) -> Vec<&'a LsxNode> {
        let mut found = Vec::new();
        for root in &self.roots {
            collect(root, id, &mut found);
        }
        found
    }

    /// First node with the given id
    pub fn first(&self, id: &str) -> Option<&LsxNode> {
        self.nodes(id).into_iter().next()
    }
}

fn attach(node: LsxNode, stack: &mut [LsxNode], roots: &mut Vec<LsxNode>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn read_node(e: &BytesStart<'_>, document: &str) -> Result<LsxNode> {
    let id = read_attrs(e, document)?
        .into_iter()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v)
        .unwrap_or_default();
    Ok(LsxNode {
        id,
        ..LsxNode::default()
    })
}

fn read_attribute(e: &BytesStart<'_>, document: &str) -> Result<LsxAttribute> {
    let mut attribute = LsxAttribute::default();
    for (key, value) in read_attrs(e, document)? {
        match key.as_str() {
            "id" => attribute.id = value,
            "type" => attribute.kind = value,
            "value" => attribute.value = value,
            _ => {}
        }
    }
    Ok(attribute)
}

/// Raw (key, value) pairs of an element's XML attributes
pub(crate) fn read_attrs(e: &BytesStart<'_>, document: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml {
            document: document.to_string(),
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = std::str::from_utf8(&attr.value)
            .map_err(|err| Error::Xml {
                document: document.to_string(),
                message: format!("attribute '{}' is not UTF-8: {}", key, err),
            })?
            .to_string();
        pairs.push((key, value));
    }
    Ok(pairs)
}
