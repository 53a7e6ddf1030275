use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};

use crate::{
    datatypes::{Element, Mesh, MeshReader, Node, Vertex},
    error::CcxError,
};

/// Element type assumed when an `*ELEMENT` card has no `TYPE=` parameter
pub const DEFAULT_ELEMENT_TYPE: &str = "C3D8";

enum InpParseState {
    Nodes,
    Elements { label: String },
    Limbo,
}

/// A keyword card such as `*ELEMENT, TYPE=C3D8, ELSET=Eall`
#[derive(Debug, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub parameters: Vec<(String, String)>,
}

impl Keyword {
    /// Parses a keyword line. Comment lines (`**`) and data lines give `None`.
    pub fn parse(line: &str) -> Option<Keyword> {
        let line = line.trim();
        if !line.starts_with('*') || line.starts_with("**") {
            return None;
        }

        let mut fields = line[1..].split(',');
        let name = fields
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<&str>>()
            .join(" ")
            .to_uppercase();

        let parameters = fields
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((key, value)) => (key.trim().to_uppercase(), value.trim().to_string()),
                None => (p.to_uppercase(), String::new()),
            })
            .collect();

        Some(Keyword { name, parameters })
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("**")
}

/// Element record before node ids are resolved to mesh indexes
struct RawElement {
    id: usize,
    label: String,
    node_ids: Vec<usize>,
    line_number: usize,
}

fn parse_int(field: &str, what: &str, line_number: usize) -> Result<usize, CcxError> {
    field.trim().parse().map_err(|_| {
        CcxError::Input(format!(
            "line {line_number}: expected {what}, found '{}'",
            field.trim()
        ))
    })
}

fn parse_node(line: &str, line_number: usize) -> Result<Node, CcxError> {
    let fields: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    if fields.len() < 3 {
        return Err(CcxError::Input(format!(
            "line {line_number}: node definition needs an id and at least two coordinates"
        )));
    }

    let id = parse_int(fields[0], "a node id", line_number)?;
    let mut coords = [0.0; 3];
    for (coord, field) in coords.iter_mut().zip(&fields[1..]) {
        *coord = field.parse().map_err(|_| {
            CcxError::Input(format!(
                "line {line_number}: non-float coordinate '{field}' for node {id}"
            ))
        })?;
    }

    Ok(Node {
        id,
        vertex: Vertex {
            x: coords[0],
            y: coords[1],
            z: coords[2],
        },
    })
}

fn parse_element(
    fields: &[String],
    label: &str,
    line_number: usize,
) -> Result<RawElement, CcxError> {
    let id = parse_int(&fields[0], "an element id", line_number)?;
    let node_ids = fields[1..]
        .iter()
        .map(|f| parse_int(f, "a node id", line_number))
        .collect::<Result<Vec<usize>, CcxError>>()?;

    if node_ids.is_empty() {
        return Err(CcxError::Input(format!(
            "line {line_number}: element {id} has no nodes"
        )));
    }

    Ok(RawElement {
        id,
        label: label.to_string(),
        node_ids,
        line_number,
    })
}

/// Parses the node and element sections of a CalculiX input deck
///
/// # Arguments
/// * `contents` - The text of the .inp file
///
/// # Returns
/// A Mesh with nodes in definition order and elements referencing them by index
pub fn parse_inp(contents: &str) -> Result<Mesh, CcxError> {
    let mut parser_state = InpParseState::Limbo;

    let mut nodes: Vec<Node> = Vec::new();
    let mut node_indexes: HashMap<usize, usize> = HashMap::new();
    let mut raw_elements: Vec<RawElement> = Vec::new();

    // fields of an element definition that continues on the next line
    let mut pending: Vec<String> = Vec::new();
    let mut pending_line = 0;

    for (i, line) in contents.lines().enumerate() {
        let line_number = i + 1;
        let line = line.trim();

        if line.is_empty() || is_comment(line) {
            continue;
        }

        if let Some(keyword) = Keyword::parse(line) {
            if let InpParseState::Elements { label } = &parser_state {
                if !pending.is_empty() {
                    raw_elements.push(parse_element(&pending, label, pending_line)?);
                    pending.clear();
                }
            }

            parser_state = match keyword.name.as_str() {
                "NODE" => InpParseState::Nodes,
                "ELEMENT" => InpParseState::Elements {
                    label: keyword
                        .parameter("TYPE")
                        .map(str::to_uppercase)
                        .unwrap_or_else(|| DEFAULT_ELEMENT_TYPE.to_string()),
                },
                other => {
                    debug!("skipping *{other} section at line {line_number}");
                    InpParseState::Limbo
                }
            };
            continue;
        }

        match &parser_state {
            InpParseState::Limbo => continue,
            InpParseState::Nodes => {
                let node = parse_node(line, line_number)?;
                match node_indexes.get(&node.id) {
                    Some(&idx) => nodes[idx] = node,
                    None => {
                        node_indexes.insert(node.id, nodes.len());
                        nodes.push(node);
                    }
                }
            }
            InpParseState::Elements { label } => {
                if pending.is_empty() {
                    pending_line = line_number;
                }
                pending.extend(
                    line.split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(String::from),
                );

                if !line.ends_with(',') {
                    raw_elements.push(parse_element(&pending, label, pending_line)?);
                    pending.clear();
                }
            }
        }
    }

    if let InpParseState::Elements { label } = &parser_state {
        if !pending.is_empty() {
            raw_elements.push(parse_element(&pending, label, pending_line)?);
        }
    }

    if nodes.is_empty() || raw_elements.is_empty() {
        return Err(CcxError::EmptyOrUnsupportedMesh(
            "no valid nodes or elements found in .inp file".to_string(),
        ));
    }

    let mut elements: Vec<Element> = Vec::with_capacity(raw_elements.len());
    for raw in raw_elements {
        let nodes = raw
            .node_ids
            .iter()
            .map(|node_id| {
                node_indexes.get(node_id).copied().ok_or_else(|| {
                    CcxError::Input(format!(
                        "line {}: element {} references undefined node {node_id}",
                        raw.line_number, raw.id
                    ))
                })
            })
            .collect::<Result<Vec<usize>, CcxError>>()?;

        elements.push(Element {
            id: raw.id,
            label: raw.label,
            nodes,
        });
    }

    Ok(Mesh { nodes, elements })
}

/// Reads CalculiX `.inp` files from disk
pub struct InpReader;

impl MeshReader for InpReader {
    fn load(&self, path: &Path) -> Result<Mesh, CcxError> {
        if !path.exists() {
            return Err(CcxError::FileNotFound(path.to_path_buf()));
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                return Err(CcxError::Input(format!(
                    "Unable to read input file {}: {err}",
                    path.display()
                )))
            }
        };

        let mesh = parse_inp(&contents)?;

        info!(
            "loaded {} nodes and {} elements from {}",
            mesh.nodes.len(),
            mesh.elements.len(),
            path.display()
        );

        Ok(mesh)
    }
}
